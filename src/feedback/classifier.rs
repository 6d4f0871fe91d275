// src/feedback/classifier.rs — Interview classification and failure mapping
//
// Two classifications live here: how substantial an interview was (drives
// whether the expensive generator is called at all) and how a generator
// failure maps onto the retry policy. Both are closed enums mapped once at
// this boundary.

use crate::engine::types::{FeedbackReport, Session};
use crate::infra::config::FeedbackConfig;
use crate::infra::errors::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterviewLength {
    /// Below the minimums — gets placeholder feedback, no generator call.
    TooShort,
    Short,
    Medium,
    Long,
}

impl InterviewLength {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterviewLength::TooShort => "too_short",
            InterviewLength::Short => "short",
            InterviewLength::Medium => "medium",
            InterviewLength::Long => "long",
        }
    }
}

/// Classify by chargeable length, user participation, and response volume.
pub fn classify_length(session: &Session, config: &FeedbackConfig) -> InterviewLength {
    let user_turns: Vec<_> = session
        .transcript
        .iter()
        .filter(|t| t.role == "user")
        .collect();
    let response_chars: usize = user_turns.iter().map(|t| t.text.len()).sum();

    if session.duration_seconds < config.min_duration_seconds
        || user_turns.len() < config.min_user_turns
        || response_chars < config.min_response_chars
    {
        return InterviewLength::TooShort;
    }
    if session.duration_seconds <= config.short_max_seconds {
        InterviewLength::Short
    } else if session.duration_seconds <= config.medium_max_seconds {
        InterviewLength::Medium
    } else {
        InterviewLength::Long
    }
}

/// Reduced feedback for interviews too short to evaluate meaningfully.
pub fn placeholder_report() -> FeedbackReport {
    FeedbackReport {
        executive_summary: "This interview was too short to evaluate in depth. \
            Complete a longer session for detailed feedback."
            .into(),
        strengths: vec!["You showed up and started practicing.".into()],
        improvements: vec![
            "Stay in the session longer so there is enough material to assess.".into(),
        ],
        skills: vec![],
        action_plan: vec!["Schedule a full-length practice interview.".into()],
    }
}

/// Map an HTTP status from the generator onto the error taxonomy.
/// Retryable: 408, 429. Everything else (401/403/5xx/other 4xx) is fatal.
pub fn classify_status(status: u16, detail: &str) -> EngineError {
    match status {
        408 | 429 => EngineError::Generator {
            message: format!("HTTP {status}: {detail}"),
            retriable: true,
        },
        402 => EngineError::GeneratorQuota,
        _ => EngineError::Generator {
            message: format!("HTTP {status}: {detail}"),
            retriable: false,
        },
    }
}

/// Schema validation of a generator response. A response that fails here is
/// a classified (fatal) failure, never silently accepted.
pub fn validate_report(report: &FeedbackReport) -> Result<(), EngineError> {
    if report.executive_summary.trim().is_empty() {
        return Err(EngineError::MalformedFeedback {
            message: "empty executive summary".into(),
        });
    }
    if report.strengths.is_empty() || report.improvements.is_empty() {
        return Err(EngineError::MalformedFeedback {
            message: "strengths and improvements must be non-empty".into(),
        });
    }
    if report.skills.is_empty() {
        return Err(EngineError::MalformedFeedback {
            message: "no per-skill scores".into(),
        });
    }
    for skill in &report.skills {
        if skill.name.trim().is_empty() {
            return Err(EngineError::MalformedFeedback {
                message: "skill with empty name".into(),
            });
        }
        if !(0..=100).contains(&skill.score) {
            return Err(EngineError::MalformedFeedback {
                message: format!("skill '{}' score {} outside 0-100", skill.name, skill.score),
            });
        }
    }
    if report.action_plan.is_empty() {
        return Err(EngineError::MalformedFeedback {
            message: "empty action plan".into(),
        });
    }
    Ok(())
}
