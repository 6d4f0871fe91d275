// src/engine/types.rs — Session, segment, and feedback types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::infra::errors::EngineError;

/// Session lifecycle status. `completed` and `failed` are terminal;
/// `failed -> completed` is the one allowed close-out after the fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, EngineError> {
        match s {
            "in_progress" => Ok(SessionStatus::InProgress),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            other => Err(EngineError::Config(format!(
                "unknown session status '{other}'"
            ))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }
}

/// Where the feedback pipeline stands for a session. `pending` is set in the
/// same store transaction as the `completed` transition, so a crash between
/// transition and pipeline spawn cannot orphan a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackState {
    None,
    Pending,
    Done,
    Failed,
}

impl FeedbackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackState::None => "none",
            FeedbackState::Pending => "pending",
            FeedbackState::Done => "done",
            FeedbackState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, EngineError> {
        match s {
            "none" => Ok(FeedbackState::None),
            "pending" => Ok(FeedbackState::Pending),
            "done" => Ok(FeedbackState::Done),
            "failed" => Ok(FeedbackState::Failed),
            other => Err(EngineError::Config(format!(
                "unknown feedback state '{other}'"
            ))),
        }
    }
}

/// One turn of the interview transcript. Indices are stable and append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptTurn {
    pub index: i64,
    pub role: String,
    pub text: String,
}

/// One session record, owned by this engine from creation until terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub owner_id: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub duration_seconds: i64,
    /// Highest transcript index consumed by an accepted segment.
    pub transcript_cursor: i64,
    pub transcript: Vec<TranscriptTurn>,
    pub feedback: Option<FeedbackReport>,
    pub feedback_note: Option<String>,
    pub feedback_state: FeedbackState,
    /// Classification of the final failure when `feedback_state` is failed
    /// (retryable / fatal / not_found).
    pub feedback_severity: Option<String>,
    pub quality_score: Option<i64>,
    /// Opaque session parameters supplied at creation. Never mutated here.
    pub config: serde_json::Value,
}

/// A validated, normalized segment ready for the atomic debit-and-extend.
#[derive(Debug, Clone)]
pub struct Segment {
    pub session_id: String,
    pub owner_id: String,
    pub resumed_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_seconds: i64,
    pub transcript_start_index: i64,
    pub transcript_end_index: Option<i64>,
}

/// Outcome of recording a segment. A replayed idempotency key is a success
/// with `already_processed = true`, never a second debit.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentOutcome {
    pub already_processed: bool,
    pub actual_duration_seconds: i64,
    pub remaining_seconds: i64,
}

/// Outcome of force-closing one zombie session.
#[derive(Debug, Clone)]
pub struct ZombieOutcome {
    /// The session was already terminal when the reaper got to it.
    pub already_closed: bool,
    pub charged_seconds: i64,
    pub final_duration_seconds: i64,
}

/// Structured feedback written back to a completed session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackReport {
    pub executive_summary: String,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
    pub skills: Vec<SkillScore>,
    pub action_plan: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillScore {
    pub name: String,
    /// 0-100.
    pub score: i64,
    pub feedback: String,
}

impl FeedbackReport {
    /// Mean of per-skill scores, the session's derived quality score.
    pub fn quality_score(&self) -> i64 {
        if self.skills.is_empty() {
            return 0;
        }
        let sum: i64 = self.skills.iter().map(|s| s.score).sum();
        sum / self.skills.len() as i64
    }
}
