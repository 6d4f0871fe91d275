// src/engine/mod.rs — Session lifecycle engine

pub mod lifecycle;
pub mod reaper;
pub mod recorder;
pub mod types;
