// src/engine/recorder.rs — Segment Recorder
//
// Validation and normalization of incoming segments. The debit-and-extend
// itself is a single store transaction (see store::Store::record_segment);
// this module guarantees the store only ever sees consistent segments.

use chrono::{DateTime, Duration, Utc};

use crate::engine::types::Segment;
use crate::infra::errors::EngineError;

/// A raw segment as submitted by the live client.
#[derive(Debug, Clone)]
pub struct SegmentInput {
    pub session_id: String,
    pub owner_id: String,
    pub resumed_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_seconds: i64,
    pub transcript_start_index: i64,
    pub transcript_end_index: Option<i64>,
}

/// Validate and normalize a raw segment.
///
/// Sub-second segments must already be rounded up by the caller, so a
/// duration below 1 is malformed. If the wall-clock span between the two
/// timestamps is shorter than the claimed duration, `ended_at` is pushed
/// forward so elapsed time is consistent with the charge — the recorder
/// never invents negative time.
pub fn normalize(input: SegmentInput) -> Result<Segment, EngineError> {
    if input.duration_seconds < 1 {
        return Err(EngineError::InvalidSegment {
            message: format!(
                "duration_seconds must be >= 1, got {}",
                input.duration_seconds
            ),
        });
    }
    if input.ended_at < input.resumed_at {
        return Err(EngineError::InvalidSegment {
            message: "ended_at precedes resumed_at".into(),
        });
    }
    if input.transcript_start_index < 0 {
        return Err(EngineError::InvalidSegment {
            message: "transcript_start_index must be non-negative".into(),
        });
    }
    if let Some(end) = input.transcript_end_index {
        if end < input.transcript_start_index {
            return Err(EngineError::InvalidSegment {
                message: "transcript_end_index precedes transcript_start_index".into(),
            });
        }
    }

    let min_ended_at = input.resumed_at + Duration::seconds(input.duration_seconds);
    let ended_at = if input.ended_at < min_ended_at {
        min_ended_at
    } else {
        input.ended_at
    };

    Ok(Segment {
        session_id: input.session_id,
        owner_id: input.owner_id,
        resumed_at: input.resumed_at,
        ended_at,
        duration_seconds: input.duration_seconds,
        transcript_start_index: input.transcript_start_index,
        transcript_end_index: input.transcript_end_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn input_at(resumed: DateTime<Utc>, ended: DateTime<Utc>, duration: i64) -> SegmentInput {
        SegmentInput {
            session_id: "s-1".into(),
            owner_id: "u-1".into(),
            resumed_at: resumed,
            ended_at: ended,
            duration_seconds: duration,
            transcript_start_index: 0,
            transcript_end_index: Some(4),
        }
    }

    #[test]
    fn test_rejects_zero_duration() {
        let t = Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap();
        let err = normalize(input_at(t, t + Duration::seconds(5), 0)).unwrap_err();
        assert!(matches!(err, EngineError::InvalidSegment { .. }));
    }

    #[test]
    fn test_rejects_ended_before_resumed() {
        let t = Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap();
        let err = normalize(input_at(t, t - Duration::seconds(1), 1)).unwrap_err();
        assert!(matches!(err, EngineError::InvalidSegment { .. }));
    }

    // resumedAt=T, endedAt=T+0.4s, duration=1 -> endedAt pushed to T+1s.
    #[test]
    fn test_pushes_ended_at_forward_to_cover_charge() {
        let t = Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap();
        let seg = normalize(input_at(t, t + Duration::milliseconds(400), 1)).unwrap();
        assert_eq!(seg.ended_at, t + Duration::seconds(1));
        assert_eq!(seg.duration_seconds, 1);
    }

    #[test]
    fn test_keeps_ended_at_when_span_covers_charge() {
        let t = Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap();
        let ended = t + Duration::seconds(90);
        let seg = normalize(input_at(t, ended, 60)).unwrap();
        assert_eq!(seg.ended_at, ended);
    }

    #[test]
    fn test_rejects_inverted_transcript_window() {
        let t = Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap();
        let mut input = input_at(t, t + Duration::seconds(10), 10);
        input.transcript_start_index = 6;
        input.transcript_end_index = Some(2);
        assert!(normalize(input).is_err());
    }

    #[test]
    fn test_open_transcript_window_allowed() {
        let t = Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap();
        let mut input = input_at(t, t + Duration::seconds(10), 10);
        input.transcript_end_index = None;
        assert!(normalize(input).is_ok());
    }
}
