// src/store/mod.rs — SQLite store
//
// Every multi-step mutation here (debit-and-extend, zombie close, terminal
// transition) runs inside a single SQLite transaction: read, validate,
// insert ledger row, update session row, commit. An error before commit
// rolls the whole thing back, so partial application cannot happen.

pub mod schema;
pub mod server;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use crate::engine::lifecycle;
use crate::engine::types::{
    FeedbackReport, FeedbackState, Segment, SegmentOutcome, Session, SessionStatus,
    TranscriptTurn, ZombieOutcome,
};
use crate::infra::errors::EngineError;
use crate::ledger::{self, LedgerTransaction, TxnType};

pub struct Store {
    conn: Connection,
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, EngineError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| EngineError::Config(format!("bad timestamp '{s}': {e}")))
}

/// Signed sum of committed transactions for an owner.
fn balance_of(conn: &Connection, owner_id: &str) -> Result<i64, rusqlite::Error> {
    conn.query_row(
        "SELECT COALESCE(SUM(seconds_delta), 0) FROM ledger_transactions WHERE owner_id = ?1",
        params![owner_id],
        |r| r.get(0),
    )
}

impl Store {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        schema::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, EngineError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        schema::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Get a reference to the underlying connection (for advanced queries).
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    // -- Sessions --

    pub fn insert_session(
        &self,
        id: &str,
        owner_id: &str,
        config: &serde_json::Value,
    ) -> Result<(), EngineError> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO sessions (id, owner_id, status, created_at, updated_at, config)
             VALUES (?1, ?2, 'in_progress', ?3, ?3, ?4)",
            params![id, owner_id, now, config.to_string()],
        )?;
        Ok(())
    }

    pub fn get_session(&self, id: &str) -> Result<Session, EngineError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, owner_id, status, created_at, updated_at, duration_seconds,
                        transcript_cursor, transcript, feedback, feedback_note,
                        feedback_state, quality_score, config, feedback_severity
                 FROM sessions WHERE id = ?1",
                params![id],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, String>(3)?,
                        r.get::<_, String>(4)?,
                        r.get::<_, i64>(5)?,
                        r.get::<_, i64>(6)?,
                        r.get::<_, String>(7)?,
                        r.get::<_, Option<String>>(8)?,
                        r.get::<_, Option<String>>(9)?,
                        r.get::<_, String>(10)?,
                        r.get::<_, Option<i64>>(11)?,
                        r.get::<_, String>(12)?,
                        r.get::<_, Option<String>>(13)?,
                    ))
                },
            )
            .optional()?;

        let Some((
            id,
            owner_id,
            status,
            created_at,
            updated_at,
            duration_seconds,
            transcript_cursor,
            transcript,
            feedback,
            feedback_note,
            feedback_state,
            quality_score,
            config,
            feedback_severity,
        )) = row
        else {
            return Err(EngineError::SessionNotFound { id: id.to_string() });
        };

        let transcript: Vec<TranscriptTurn> = serde_json::from_str(&transcript)
            .map_err(|e| EngineError::Config(format!("bad transcript json: {e}")))?;
        let feedback: Option<FeedbackReport> = match feedback {
            Some(raw) => Some(
                serde_json::from_str(&raw)
                    .map_err(|e| EngineError::Config(format!("bad feedback json: {e}")))?,
            ),
            None => None,
        };
        let config: serde_json::Value = serde_json::from_str(&config)
            .map_err(|e| EngineError::Config(format!("bad config json: {e}")))?;

        Ok(Session {
            id,
            owner_id,
            status: SessionStatus::parse(&status)?,
            created_at: parse_ts(&created_at)?,
            updated_at: parse_ts(&updated_at)?,
            duration_seconds,
            transcript_cursor,
            transcript,
            feedback,
            feedback_note,
            feedback_state: FeedbackState::parse(&feedback_state)?,
            feedback_severity,
            quality_score,
            config,
        })
    }

    /// Append transcript turns. Indices must continue the existing sequence;
    /// the transcript is append-only with stable indices.
    pub fn append_turns(&self, id: &str, turns: &[TranscriptTurn]) -> Result<(), EngineError> {
        let tx = self.conn.unchecked_transaction()?;

        let row = tx
            .query_row(
                "SELECT status, transcript FROM sessions WHERE id = ?1",
                params![id],
                |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
            )
            .optional()?;
        let Some((status, transcript)) = row else {
            return Err(EngineError::SessionNotFound { id: id.to_string() });
        };

        let status = SessionStatus::parse(&status)?;
        if status.is_terminal() {
            return Err(EngineError::SessionClosed {
                id: id.to_string(),
                status: status.as_str().to_string(),
            });
        }

        let mut existing: Vec<TranscriptTurn> = serde_json::from_str(&transcript)
            .map_err(|e| EngineError::Config(format!("bad transcript json: {e}")))?;
        for turn in turns {
            if turn.index != existing.len() as i64 {
                return Err(EngineError::InvalidSegment {
                    message: format!(
                        "transcript turn index {} does not continue the sequence at {}",
                        turn.index,
                        existing.len()
                    ),
                });
            }
            existing.push(turn.clone());
        }

        let now = Utc::now().to_rfc3339();
        tx.execute(
            "UPDATE sessions SET transcript = ?1, updated_at = ?2 WHERE id = ?3",
            params![serde_json::to_string(&existing).unwrap_or_default(), now, id],
        )?;
        tx.commit()?;
        Ok(())
    }

    // -- Segment Recorder: the atomic debit-and-extend --

    /// Record one segment: replay-check the idempotency key, check the
    /// balance, insert the usage debit, extend the session. One transaction.
    pub fn record_segment(&self, seg: &Segment) -> Result<SegmentOutcome, EngineError> {
        let tx = self.conn.unchecked_transaction()?;
        let key = ledger::segment_key(&seg.session_id, seg.resumed_at);

        let row = tx
            .query_row(
                "SELECT owner_id, status FROM sessions WHERE id = ?1",
                params![seg.session_id],
                |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
            )
            .optional()?;
        let Some((owner_id, status)) = row else {
            return Err(EngineError::SessionNotFound {
                id: seg.session_id.clone(),
            });
        };
        if owner_id != seg.owner_id {
            // Don't leak other users' sessions.
            return Err(EngineError::SessionNotFound {
                id: seg.session_id.clone(),
            });
        }

        // Replay check first: a retried final segment must still answer
        // already_processed even after the session went terminal.
        let prior: Option<i64> = tx
            .query_row(
                "SELECT seconds_delta FROM ledger_transactions WHERE idempotency_key = ?1",
                params![key],
                |r| r.get(0),
            )
            .optional()?;
        if let Some(delta) = prior {
            let remaining = balance_of(&tx, &owner_id)?;
            return Ok(SegmentOutcome {
                already_processed: true,
                actual_duration_seconds: -delta,
                remaining_seconds: remaining,
            });
        }

        let status = SessionStatus::parse(&status)?;
        if status.is_terminal() {
            return Err(EngineError::SessionClosed {
                id: seg.session_id.clone(),
                status: status.as_str().to_string(),
            });
        }

        let remaining = balance_of(&tx, &owner_id)?;
        if remaining < seg.duration_seconds {
            return Err(EngineError::InsufficientBalance {
                remaining,
                requested: seg.duration_seconds,
            });
        }

        let now = Utc::now().to_rfc3339();
        tx.execute(
            "INSERT INTO ledger_transactions
             (id, owner_id, seconds_delta, txn_type, description, idempotency_key, created_at)
             VALUES (?1, ?2, ?3, 'usage', ?4, ?5, ?6)",
            params![
                uuid::Uuid::new_v4().to_string(),
                owner_id,
                -seg.duration_seconds,
                format!("interview segment {}s", seg.duration_seconds),
                key,
                now
            ],
        )?;

        let cursor = seg
            .transcript_end_index
            .unwrap_or(seg.transcript_start_index);
        tx.execute(
            "UPDATE sessions
             SET duration_seconds = duration_seconds + ?1,
                 transcript_cursor = MAX(transcript_cursor, ?2),
                 updated_at = ?3
             WHERE id = ?4",
            params![seg.duration_seconds, cursor, now, seg.session_id],
        )?;

        tx.commit()?;
        Ok(SegmentOutcome {
            already_processed: false,
            actual_duration_seconds: seg.duration_seconds,
            remaining_seconds: remaining - seg.duration_seconds,
        })
    }

    // -- State machine --

    /// Apply a terminal transition. Returns true when the feedback pipeline
    /// was enqueued (transition into completed), which happens in this same
    /// transaction via feedback_state = 'pending'.
    pub fn transition(
        &self,
        id: &str,
        target: SessionStatus,
        final_duration_seconds: i64,
        note: Option<&str>,
    ) -> Result<bool, EngineError> {
        let tx = self.conn.unchecked_transaction()?;

        let row = tx
            .query_row(
                "SELECT status, duration_seconds FROM sessions WHERE id = ?1",
                params![id],
                |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)),
            )
            .optional()?;
        let Some((status, duration)) = row else {
            return Err(EngineError::SessionNotFound { id: id.to_string() });
        };

        let from = SessionStatus::parse(&status)?;
        lifecycle::ensure_transition(from, target)?;

        // duration_seconds never decreases
        let final_duration = final_duration_seconds.max(duration);
        let enqueue = target == SessionStatus::Completed;
        let fb_state = if enqueue { Some("pending") } else { None };

        let now = Utc::now().to_rfc3339();
        tx.execute(
            "UPDATE sessions
             SET status = ?1,
                 duration_seconds = ?2,
                 feedback_note = COALESCE(?3, feedback_note),
                 feedback_state = COALESCE(?4, feedback_state),
                 updated_at = ?5
             WHERE id = ?6",
            params![target.as_str(), final_duration, note, fb_state, now, id],
        )?;
        tx.commit()?;
        Ok(enqueue)
    }

    // -- Zombie Reaper --

    /// Sessions stuck in_progress past the staleness threshold, oldest first.
    pub fn stale_sessions(
        &self,
        stale_threshold_minutes: i64,
        max_batch_size: u32,
    ) -> Result<Vec<String>, EngineError> {
        let cutoff = (Utc::now() - Duration::minutes(stale_threshold_minutes)).to_rfc3339();
        let mut stmt = self.conn.prepare(
            "SELECT id FROM sessions
             WHERE status = 'in_progress' AND updated_at < ?1
             ORDER BY updated_at ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![cutoff, max_batch_size], |r| r.get(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    /// Force-close one zombie session: charge elapsed time exactly once
    /// (stable idempotency key, clamped to the remaining balance) and
    /// transition to completed. One transaction; either the whole
    /// debit+transition lands or neither does.
    pub fn close_zombie(
        &self,
        id: &str,
        max_session_seconds: i64,
    ) -> Result<ZombieOutcome, EngineError> {
        let tx = self.conn.unchecked_transaction()?;

        let row = tx
            .query_row(
                "SELECT owner_id, status, created_at, updated_at, duration_seconds
                 FROM sessions WHERE id = ?1",
                params![id],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, String>(3)?,
                        r.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional()?;
        let Some((owner_id, status, created_at, updated_at, duration)) = row else {
            return Err(EngineError::SessionNotFound { id: id.to_string() });
        };

        let status = SessionStatus::parse(&status)?;
        if status.is_terminal() {
            return Ok(ZombieOutcome {
                already_closed: true,
                charged_seconds: 0,
                final_duration_seconds: duration,
            });
        }

        let now = Utc::now();
        let elapsed = (now - parse_ts(&created_at)?).num_seconds().max(0);
        let capped = elapsed.min(max_session_seconds);
        let additional = (capped - duration).max(0);

        let key = ledger::zombie_key(id);
        let mut charged = 0i64;
        if additional > 0 {
            let already: Option<i64> = tx
                .query_row(
                    "SELECT seconds_delta FROM ledger_transactions WHERE idempotency_key = ?1",
                    params![key],
                    |r| r.get(0),
                )
                .optional()?;
            if already.is_none() {
                let remaining = balance_of(&tx, &owner_id)?;
                charged = additional.min(remaining).max(0);
                if charged > 0 {
                    tx.execute(
                        "INSERT INTO ledger_transactions
                         (id, owner_id, seconds_delta, txn_type, description, idempotency_key, created_at)
                         VALUES (?1, ?2, ?3, 'usage', ?4, ?5, ?6)",
                        params![
                            uuid::Uuid::new_v4().to_string(),
                            owner_id,
                            -charged,
                            format!("zombie cleanup: {charged}s reconciling charge"),
                            key,
                            now.to_rfc3339()
                        ],
                    )?;
                }
            }
        }

        let final_duration = duration + charged;
        let note = format!(
            "Closed by reaper: no activity since {updated_at}, elapsed capped at {capped}s"
        );
        tx.execute(
            "UPDATE sessions
             SET status = 'completed',
                 duration_seconds = ?1,
                 feedback_state = 'pending',
                 feedback_note = ?2,
                 updated_at = ?3
             WHERE id = ?4",
            params![final_duration, note, now.to_rfc3339(), id],
        )?;
        tx.commit()?;

        Ok(ZombieOutcome {
            already_closed: false,
            charged_seconds: charged,
            final_duration_seconds: final_duration,
        })
    }

    // -- Feedback --

    /// Attach a feedback report to a terminal session. This is the one
    /// permitted post-terminal mutation; status is untouched.
    pub fn attach_feedback(
        &self,
        id: &str,
        report: &FeedbackReport,
        quality_score: i64,
        note: Option<&str>,
    ) -> Result<(), EngineError> {
        let tx = self.conn.unchecked_transaction()?;

        let status: Option<String> = tx
            .query_row(
                "SELECT status FROM sessions WHERE id = ?1",
                params![id],
                |r| r.get(0),
            )
            .optional()?;
        let Some(status) = status else {
            return Err(EngineError::SessionNotFound { id: id.to_string() });
        };
        let status = SessionStatus::parse(&status)?;
        if !status.is_terminal() {
            return Err(EngineError::InvalidTransition {
                from: status.as_str().to_string(),
                to: "feedback".to_string(),
            });
        }

        let raw = serde_json::to_string(report)
            .map_err(|e| EngineError::Config(format!("feedback serialization: {e}")))?;
        let now = Utc::now().to_rfc3339();
        tx.execute(
            "UPDATE sessions
             SET feedback = ?1,
                 quality_score = ?2,
                 feedback_state = 'done',
                 feedback_severity = NULL,
                 feedback_note = COALESCE(?3, feedback_note),
                 updated_at = ?4
             WHERE id = ?5",
            params![raw, quality_score, note, now, id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Record a final (non-retryable or exhausted) feedback failure, with the
    /// classification of the failure that ended the run.
    pub fn mark_feedback_failed(
        &self,
        id: &str,
        note: &str,
        severity: &str,
    ) -> Result<(), EngineError> {
        let now = Utc::now().to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE sessions
             SET feedback_state = 'failed', feedback_note = ?1, feedback_severity = ?2,
                 updated_at = ?3
             WHERE id = ?4",
            params![note, severity, now, id],
        )?;
        if changed == 0 {
            return Err(EngineError::SessionNotFound { id: id.to_string() });
        }
        Ok(())
    }

    /// Completed sessions whose feedback was enqueued but never finished.
    /// The serve loop re-drives these at startup.
    pub fn pending_feedback_sessions(&self) -> Result<Vec<String>, EngineError> {
        let mut stmt = self.conn.prepare(
            "SELECT id FROM sessions
             WHERE feedback_state = 'pending' AND status = 'completed'
             ORDER BY updated_at ASC",
        )?;
        let rows = stmt.query_map([], |r| r.get(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    // -- Ledger --

    pub fn balance(&self, owner_id: &str) -> Result<i64, EngineError> {
        Ok(balance_of(&self.conn, owner_id)?)
    }

    /// Append a grant/refund/adjustment. Idempotent on the key: a replay
    /// returns Ok(false) and commits nothing.
    pub fn apply_credit(
        &self,
        owner_id: &str,
        seconds_delta: i64,
        txn_type: TxnType,
        idempotency_key: &str,
        description: &str,
    ) -> Result<bool, EngineError> {
        match txn_type {
            TxnType::Usage => {
                return Err(EngineError::Config(
                    "usage debits only go through segment recording".into(),
                ))
            }
            TxnType::Grant | TxnType::Refund if seconds_delta <= 0 => {
                return Err(EngineError::Config(format!(
                    "{} delta must be positive",
                    txn_type.as_str()
                )))
            }
            _ => {}
        }

        let tx = self.conn.unchecked_transaction()?;

        if seconds_delta < 0 {
            let remaining = balance_of(&tx, owner_id)?;
            if remaining + seconds_delta < 0 {
                return Err(EngineError::InsufficientBalance {
                    remaining,
                    requested: -seconds_delta,
                });
            }
        }

        let now = Utc::now().to_rfc3339();
        let changed = tx.execute(
            "INSERT OR IGNORE INTO ledger_transactions
             (id, owner_id, seconds_delta, txn_type, description, idempotency_key, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                uuid::Uuid::new_v4().to_string(),
                owner_id,
                seconds_delta,
                txn_type.as_str(),
                description,
                idempotency_key,
                now
            ],
        )?;
        tx.commit()?;
        Ok(changed > 0)
    }

    pub fn transactions(&self, owner_id: &str) -> Result<Vec<LedgerTransaction>, EngineError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, owner_id, seconds_delta, txn_type, description, idempotency_key, created_at
             FROM ledger_transactions WHERE owner_id = ?1
             ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![owner_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, String>(5)?,
                r.get::<_, String>(6)?,
            ))
        })?;

        let mut result = Vec::new();
        for row in rows {
            let (id, owner_id, seconds_delta, txn_type, description, idempotency_key, created_at) =
                row?;
            result.push(LedgerTransaction {
                id,
                owner_id,
                seconds_delta,
                txn_type: TxnType::parse(&txn_type)?,
                description,
                idempotency_key,
                created_at: parse_ts(&created_at)?,
            });
        }
        Ok(result)
    }
}
