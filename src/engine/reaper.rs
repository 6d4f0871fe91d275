// src/engine/reaper.rs — Zombie session reaper
//
// Finds sessions stuck in_progress past the staleness threshold (client
// crashed, tab killed, network died) and force-closes them. The debit uses
// a stable per-session idempotency key, so overlapping sweeps never charge
// twice. One bad record never aborts the batch.

use serde::Serialize;

use crate::infra::config::MeteringConfig;
use crate::infra::errors::EngineError;
use crate::store::server::StoreHandle;

#[derive(Debug, Clone, Serialize)]
pub struct SweepError {
    pub session_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub completed: usize,
    pub errors: Vec<SweepError>,
    /// Sessions closed by this sweep. Callers invalidate their cached detail
    /// and drive the enqueued feedback; not part of the wire response.
    #[serde(skip)]
    pub closed: Vec<String>,
}

pub async fn sweep(
    store: &StoreHandle,
    config: &MeteringConfig,
) -> Result<SweepReport, EngineError> {
    let ids = store
        .stale_sessions(config.stale_threshold_minutes, config.max_batch_size)
        .await?;

    let mut report = SweepReport::default();
    for id in ids {
        report.scanned += 1;
        match store
            .close_zombie(id.clone(), config.max_session_seconds)
            .await
        {
            Ok(outcome) if !outcome.already_closed => {
                tracing::info!(
                    session = %id,
                    charged = outcome.charged_seconds,
                    duration = outcome.final_duration_seconds,
                    "Reaper closed zombie session"
                );
                report.completed += 1;
                report.closed.push(id);
            }
            Ok(_) => {
                tracing::debug!(session = %id, "Session already closed, skipping");
            }
            Err(e) => {
                tracing::error!(session = %id, "Reaper failed to close session: {e}");
                report.errors.push(SweepError {
                    session_id: id,
                    message: e.to_string(),
                });
            }
        }
    }

    Ok(report)
}
