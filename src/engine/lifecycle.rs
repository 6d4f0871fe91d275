// src/engine/lifecycle.rs — Session state machine
//
// in_progress -> completed
// in_progress -> failed
// failed      -> completed   (manual close-out after a failed run)
//
// `completed` has no outgoing transitions.

use crate::engine::types::SessionStatus;
use crate::infra::errors::EngineError;

pub fn can_transition(from: SessionStatus, to: SessionStatus) -> bool {
    use SessionStatus::*;
    matches!(
        (from, to),
        (InProgress, Completed) | (InProgress, Failed) | (Failed, Completed)
    )
}

pub fn ensure_transition(from: SessionStatus, to: SessionStatus) -> Result<(), EngineError> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition {
            from: from.as_str().to_string(),
            to: to.as_str().to_string(),
        })
    }
}
