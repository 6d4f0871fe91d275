// interviewd — usage-metered session lifecycle engine for live mock
// interviews: session state machine, idempotent usage ledger, zombie reaper,
// and the feedback generation pipeline behind an HTTP API.

pub mod api;
pub mod engine;
pub mod feedback;
pub mod infra;
pub mod ledger;
pub mod store;
