// src/infra/errors.rs — Error types for interviewd

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    // Segment validation (no state mutated)
    #[error("Invalid segment: {message}")]
    InvalidSegment { message: String },

    // Business rejection — the caller gets the remaining balance back
    #[error("Insufficient balance: {remaining}s remaining, {requested}s requested")]
    InsufficientBalance { remaining: i64, requested: i64 },

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Session '{id}' not found")]
    SessionNotFound { id: String },

    #[error("Session '{id}' is already {status}")]
    SessionClosed { id: String, status: String },

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    // Feedback generator errors (retriable = network/timeout/408/429)
    #[error("Feedback generator error: {message}")]
    Generator { message: String, retriable: bool },

    #[error("Feedback generator quota exceeded")]
    GeneratorQuota,

    #[error("Malformed feedback response: {message}")]
    MalformedFeedback { message: String },

    #[error("Feedback generation cancelled")]
    Cancelled,

    // Infra
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failure classification driving the retry policy. Mapped once here at the
/// boundary, never re-derived at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Transient: network, timeout, HTTP 408/429. Worth retrying.
    Retryable,
    /// Auth failure, quota, malformed responses, everything else. Never retried.
    Fatal,
    /// The target session does not exist.
    NotFound,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Retryable => "retryable",
            FailureKind::Fatal => "fatal",
            FailureKind::NotFound => "not_found",
        }
    }
}

impl EngineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            EngineError::Generator {
                retriable: true, ..
            } => FailureKind::Retryable,
            EngineError::RateLimited { .. } => FailureKind::Retryable,
            EngineError::SessionNotFound { .. } => FailureKind::NotFound,
            _ => FailureKind::Fatal,
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.kind() == FailureKind::Retryable
    }

    /// Short user-facing message. The technical detail stays in operator logs.
    pub fn user_message(&self) -> String {
        match self {
            EngineError::InsufficientBalance { remaining, .. } => {
                format!("You have {remaining} seconds of interview time remaining.")
            }
            EngineError::SessionNotFound { .. } => "Session not found.".into(),
            EngineError::RateLimited { .. } => "Too many requests, slow down.".into(),
            EngineError::Generator { .. }
            | EngineError::GeneratorQuota
            | EngineError::MalformedFeedback { .. } => {
                "Feedback generation failed. Please try again later.".into()
            }
            EngineError::Cancelled => "Feedback generation was cancelled.".into(),
            EngineError::InvalidSegment { message } => message.clone(),
            _ => "Something went wrong.".into(),
        }
    }
}
