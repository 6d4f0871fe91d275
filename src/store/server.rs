// src/store/server.rs — Async message passing for Store
//
// The store server task is the single writer: commands for one session are
// applied in arrival order, which is the per-session mutual exclusion the
// recorder and the reaper rely on. Unrelated sessions share the queue but
// each command is one short SQLite transaction, so the reaper's batch never
// stalls live traffic for long.

use tokio::sync::{mpsc, oneshot};

use crate::engine::types::{
    FeedbackReport, Segment, SegmentOutcome, Session, SessionStatus, TranscriptTurn,
    ZombieOutcome,
};
use crate::infra::errors::EngineError;
use crate::ledger::{LedgerTransaction, TxnType};
use crate::store::Store;

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

#[derive(Debug)]
pub enum StoreCommand {
    InsertSession {
        id: String,
        owner_id: String,
        config: serde_json::Value,
        resp: Reply<()>,
    },
    GetSession {
        id: String,
        resp: Reply<Session>,
    },
    AppendTurns {
        id: String,
        turns: Vec<TranscriptTurn>,
        resp: Reply<()>,
    },
    RecordSegment {
        segment: Segment,
        resp: Reply<SegmentOutcome>,
    },
    Transition {
        id: String,
        target: SessionStatus,
        final_duration_seconds: i64,
        note: Option<String>,
        resp: Reply<bool>,
    },
    StaleSessions {
        stale_threshold_minutes: i64,
        max_batch_size: u32,
        resp: Reply<Vec<String>>,
    },
    CloseZombie {
        id: String,
        max_session_seconds: i64,
        resp: Reply<ZombieOutcome>,
    },
    AttachFeedback {
        id: String,
        report: FeedbackReport,
        quality_score: i64,
        note: Option<String>,
        resp: Reply<()>,
    },
    MarkFeedbackFailed {
        id: String,
        note: String,
        severity: String,
        resp: Reply<()>,
    },
    PendingFeedbackSessions {
        resp: Reply<Vec<String>>,
    },
    Balance {
        owner_id: String,
        resp: Reply<i64>,
    },
    ApplyCredit {
        owner_id: String,
        seconds_delta: i64,
        txn_type: TxnType,
        idempotency_key: String,
        description: String,
        resp: Reply<bool>,
    },
    Transactions {
        owner_id: String,
        resp: Reply<Vec<LedgerTransaction>>,
    },
}

/// A handle to the Store that uses message passing.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreCommand>,
}

impl StoreHandle {
    pub fn new(tx: mpsc::Sender<StoreCommand>) -> Self {
        Self { tx }
    }

    async fn send<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> StoreCommand,
    ) -> Result<T, EngineError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx
            .send(build(resp_tx))
            .await
            .map_err(|_| EngineError::Config("store server is gone".into()))?;
        resp_rx
            .await
            .map_err(|_| EngineError::Config("store server dropped the reply".into()))?
    }

    pub async fn insert_session(
        &self,
        id: String,
        owner_id: String,
        config: serde_json::Value,
    ) -> Result<(), EngineError> {
        self.send(|resp| StoreCommand::InsertSession {
            id,
            owner_id,
            config,
            resp,
        })
        .await
    }

    pub async fn get_session(&self, id: String) -> Result<Session, EngineError> {
        self.send(|resp| StoreCommand::GetSession { id, resp }).await
    }

    pub async fn append_turns(
        &self,
        id: String,
        turns: Vec<TranscriptTurn>,
    ) -> Result<(), EngineError> {
        self.send(|resp| StoreCommand::AppendTurns { id, turns, resp })
            .await
    }

    pub async fn record_segment(&self, segment: Segment) -> Result<SegmentOutcome, EngineError> {
        self.send(|resp| StoreCommand::RecordSegment { segment, resp })
            .await
    }

    pub async fn transition(
        &self,
        id: String,
        target: SessionStatus,
        final_duration_seconds: i64,
        note: Option<String>,
    ) -> Result<bool, EngineError> {
        self.send(|resp| StoreCommand::Transition {
            id,
            target,
            final_duration_seconds,
            note,
            resp,
        })
        .await
    }

    pub async fn stale_sessions(
        &self,
        stale_threshold_minutes: i64,
        max_batch_size: u32,
    ) -> Result<Vec<String>, EngineError> {
        self.send(|resp| StoreCommand::StaleSessions {
            stale_threshold_minutes,
            max_batch_size,
            resp,
        })
        .await
    }

    pub async fn close_zombie(
        &self,
        id: String,
        max_session_seconds: i64,
    ) -> Result<ZombieOutcome, EngineError> {
        self.send(|resp| StoreCommand::CloseZombie {
            id,
            max_session_seconds,
            resp,
        })
        .await
    }

    pub async fn attach_feedback(
        &self,
        id: String,
        report: FeedbackReport,
        quality_score: i64,
        note: Option<String>,
    ) -> Result<(), EngineError> {
        self.send(|resp| StoreCommand::AttachFeedback {
            id,
            report,
            quality_score,
            note,
            resp,
        })
        .await
    }

    pub async fn mark_feedback_failed(
        &self,
        id: String,
        note: String,
        severity: String,
    ) -> Result<(), EngineError> {
        self.send(|resp| StoreCommand::MarkFeedbackFailed {
            id,
            note,
            severity,
            resp,
        })
        .await
    }

    pub async fn pending_feedback_sessions(&self) -> Result<Vec<String>, EngineError> {
        self.send(|resp| StoreCommand::PendingFeedbackSessions { resp })
            .await
    }

    pub async fn balance(&self, owner_id: String) -> Result<i64, EngineError> {
        self.send(|resp| StoreCommand::Balance { owner_id, resp })
            .await
    }

    pub async fn apply_credit(
        &self,
        owner_id: String,
        seconds_delta: i64,
        txn_type: TxnType,
        idempotency_key: String,
        description: String,
    ) -> Result<bool, EngineError> {
        self.send(|resp| StoreCommand::ApplyCredit {
            owner_id,
            seconds_delta,
            txn_type,
            idempotency_key,
            description,
            resp,
        })
        .await
    }

    pub async fn transactions(
        &self,
        owner_id: String,
    ) -> Result<Vec<LedgerTransaction>, EngineError> {
        self.send(|resp| StoreCommand::Transactions { owner_id, resp })
            .await
    }
}

/// Helper to spawn the store server and return a handle.
pub fn spawn_store_server(store: Store) -> (StoreHandle, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(100);
    let handle = StoreHandle::new(tx);
    let join_handle = tokio::spawn(run_store_server(store, rx));
    (handle, join_handle)
}

/// The background task that owns the Store.
pub async fn run_store_server(store: Store, mut rx: mpsc::Receiver<StoreCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            StoreCommand::InsertSession {
                id,
                owner_id,
                config,
                resp,
            } => {
                let _ = resp.send(store.insert_session(&id, &owner_id, &config));
            }
            StoreCommand::GetSession { id, resp } => {
                let _ = resp.send(store.get_session(&id));
            }
            StoreCommand::AppendTurns { id, turns, resp } => {
                let _ = resp.send(store.append_turns(&id, &turns));
            }
            StoreCommand::RecordSegment { segment, resp } => {
                let _ = resp.send(store.record_segment(&segment));
            }
            StoreCommand::Transition {
                id,
                target,
                final_duration_seconds,
                note,
                resp,
            } => {
                let _ = resp.send(store.transition(
                    &id,
                    target,
                    final_duration_seconds,
                    note.as_deref(),
                ));
            }
            StoreCommand::StaleSessions {
                stale_threshold_minutes,
                max_batch_size,
                resp,
            } => {
                let _ = resp.send(store.stale_sessions(stale_threshold_minutes, max_batch_size));
            }
            StoreCommand::CloseZombie {
                id,
                max_session_seconds,
                resp,
            } => {
                let _ = resp.send(store.close_zombie(&id, max_session_seconds));
            }
            StoreCommand::AttachFeedback {
                id,
                report,
                quality_score,
                note,
                resp,
            } => {
                let _ =
                    resp.send(store.attach_feedback(&id, &report, quality_score, note.as_deref()));
            }
            StoreCommand::MarkFeedbackFailed {
                id,
                note,
                severity,
                resp,
            } => {
                let _ = resp.send(store.mark_feedback_failed(&id, &note, &severity));
            }
            StoreCommand::PendingFeedbackSessions { resp } => {
                let _ = resp.send(store.pending_feedback_sessions());
            }
            StoreCommand::Balance { owner_id, resp } => {
                let _ = resp.send(store.balance(&owner_id));
            }
            StoreCommand::ApplyCredit {
                owner_id,
                seconds_delta,
                txn_type,
                idempotency_key,
                description,
                resp,
            } => {
                let _ = resp.send(store.apply_credit(
                    &owner_id,
                    seconds_delta,
                    txn_type,
                    &idempotency_key,
                    &description,
                ));
            }
            StoreCommand::Transactions { owner_id, resp } => {
                let _ = resp.send(store.transactions(&owner_id));
            }
        }
    }
}
