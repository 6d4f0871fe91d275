// src/api/types.rs

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::reaper::SweepError;
use crate::engine::types::{FeedbackReport, TranscriptTurn};
use crate::infra::errors::EngineError;

/// Request body for creating a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    /// Opaque session parameters (role, difficulty, interviewer persona...).
    /// Stored as-is, never interpreted by the engine.
    #[serde(default)]
    pub config: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub status: String,
}

/// One segment of talk time submitted by the live client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentRequest {
    pub resumed_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_seconds: i64,
    pub transcript_start_index: i64,
    #[serde(default)]
    pub transcript_end_index: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SegmentResponse {
    pub accepted: bool,
    pub already_processed: bool,
    pub actual_duration_seconds: i64,
    pub remaining_seconds: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TurnsRequest {
    pub turns: Vec<TranscriptTurn>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompleteRequest {
    pub final_duration_seconds: i64,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FailRequest {
    pub final_duration_seconds: i64,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TransitionResponse {
    pub session_id: String,
    pub status: String,
    pub feedback_enqueued: bool,
}

/// Reaper trigger response: {processed, completed, errors[]}.
#[derive(Debug, Serialize)]
pub struct SweepResponse {
    pub processed: usize,
    pub completed: usize,
    pub errors: Vec<SweepError>,
}

/// Feedback retrieval: the report when done, otherwise a classified envelope
/// with a user-facing message (the technical detail stays in operator logs).
#[derive(Debug, Serialize)]
pub struct FeedbackEnvelope {
    pub session_id: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<FeedbackReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub owner_id: String,
    pub remaining_seconds: i64,
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_seconds: Option<i64>,
}

/// API-level error: status, machine-readable body, optional extra headers
/// (Retry-After on 429).
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
    pub headers: HeaderMap,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                error: message.into(),
                remaining_seconds: None,
            },
            headers: HeaderMap::new(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, self.headers, Json(self.body)).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let status = match &e {
            EngineError::InvalidSegment { .. } => StatusCode::BAD_REQUEST,
            EngineError::InsufficientBalance { .. } => StatusCode::FORBIDDEN,
            EngineError::SessionNotFound { .. } => StatusCode::NOT_FOUND,
            EngineError::SessionClosed { .. } | EngineError::InvalidTransition { .. } => {
                StatusCode::CONFLICT
            }
            EngineError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let remaining = match &e {
            EngineError::InsufficientBalance { remaining, .. } => Some(*remaining),
            _ => None,
        };

        let mut headers = HeaderMap::new();
        if let EngineError::RateLimited { retry_after_ms } = &e {
            let secs = retry_after_ms.div_ceil(1000);
            if let Ok(v) = HeaderValue::from_str(&secs.to_string()) {
                headers.insert("retry-after", v);
            }
        }

        // 5xx details are for operators, not callers.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Internal error: {e}");
            "internal error".to_string()
        } else {
            e.to_string()
        };

        Self {
            status,
            body: ErrorResponse {
                error: message,
                remaining_seconds: remaining,
            },
            headers,
        }
    }
}
