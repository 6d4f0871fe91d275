// src/infra/mod.rs

pub mod cache;
pub mod config;
pub mod errors;
pub mod logger;
pub mod ratelimit;
