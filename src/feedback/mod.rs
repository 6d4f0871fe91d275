// src/feedback/mod.rs — Feedback generation pipeline

pub mod classifier;
pub mod generator;
pub mod pipeline;
