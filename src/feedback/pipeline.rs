// src/feedback/pipeline.rs — Feedback generation with retry and backoff
//
// Runs once per session reaching completed. Retries only classified-retryable
// failures (network, timeout, 408/429) with exponential backoff; fatal errors
// and exhausted retries are recorded on the session and surfaced. Progress is
// reported through a callback so a caller can render status.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::engine::types::{FeedbackReport, Session};
use crate::feedback::classifier::{self, InterviewLength};
use crate::feedback::generator::FeedbackGenerator;
use crate::infra::cache::TtlCache;
use crate::infra::config::FeedbackConfig;
use crate::infra::errors::EngineError;
use crate::store::server::StoreHandle;

pub type ProgressFn = dyn Fn(u8, &str) + Send + Sync;

/// Caller-observable cancellation point. Cancelling abandons the in-flight
/// generator call; the session stays `pending` so a later run can re-drive it.
#[derive(Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            self.notify.notified().await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &FeedbackConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            backoff_factor: config.backoff_factor,
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Delay after the given failed attempt (0-indexed): initial * factor^attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms =
            self.initial_delay.as_millis() as f64 * self.backoff_factor.powi(attempt as i32);
        let capped_ms = base_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }
}

pub struct FeedbackPipeline {
    store: StoreHandle,
    generator: Arc<dyn FeedbackGenerator>,
    policy: RetryPolicy,
    config: FeedbackConfig,
    cache: Arc<TtlCache<Session>>,
}

impl FeedbackPipeline {
    pub fn new(
        store: StoreHandle,
        generator: Arc<dyn FeedbackGenerator>,
        config: FeedbackConfig,
        cache: Arc<TtlCache<Session>>,
    ) -> Self {
        Self {
            store,
            generator,
            policy: RetryPolicy::from_config(&config),
            config,
            cache,
        }
    }

    pub async fn run(
        &self,
        session_id: &str,
        on_progress: &ProgressFn,
        cancel: &CancelFlag,
    ) -> Result<FeedbackReport, EngineError> {
        on_progress(5, "loading session");
        let session = self.store.get_session(session_id.to_string()).await?;

        // Already generated — a duplicate trigger is answered, not re-run.
        if let Some(existing) = session.feedback {
            on_progress(100, "feedback already generated");
            return Ok(existing);
        }

        let length = classifier::classify_length(&session, &self.config);
        if length == InterviewLength::TooShort {
            on_progress(50, "session too short, writing reduced feedback");
            let report = classifier::placeholder_report();
            self.finish(session_id, &report, Some("session below evaluation minimums"))
                .await?;
            on_progress(100, "done");
            return Ok(report);
        }

        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let pct = (10 + attempt * 80 / self.policy.max_attempts.max(1)) as u8;
            on_progress(
                pct,
                &format!(
                    "generating feedback (attempt {} of {})",
                    attempt + 1,
                    self.policy.max_attempts
                ),
            );

            let result = tokio::select! {
                res = self.generator.generate(&session, length) => res,
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            };

            match result {
                Ok(report) => {
                    on_progress(95, "writing feedback");
                    self.finish(session_id, &report, None).await?;
                    on_progress(100, "done");
                    return Ok(report);
                }
                Err(e) if e.is_retriable() && attempt + 1 < self.policy.max_attempts => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    tracing::warn!(
                        session = session_id,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Feedback generation failed, retrying: {e}"
                    );
                    on_progress(pct, &format!("retrying in {}s", delay.as_secs()));
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                    }
                    attempt += 1;
                }
                Err(e) => {
                    // Fatal, not found, or retries exhausted. Technical detail
                    // goes to the session note and logs; the caller shows
                    // e.user_message().
                    tracing::error!(session = session_id, "Feedback generation failed: {e}");
                    if !matches!(e, EngineError::SessionNotFound { .. }) {
                        self.store
                            .mark_feedback_failed(
                                session_id.to_string(),
                                e.to_string(),
                                e.kind().as_str().to_string(),
                            )
                            .await?;
                    }
                    return Err(e);
                }
            }
        }
    }

    async fn finish(
        &self,
        session_id: &str,
        report: &FeedbackReport,
        note: Option<&str>,
    ) -> Result<(), EngineError> {
        self.store
            .attach_feedback(
                session_id.to_string(),
                report.clone(),
                report.quality_score(),
                note.map(str::to_string),
            )
            .await?;
        // Readers must not see the pre-feedback session after this point.
        self.cache.invalidate(session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy_ms(initial: u64, factor: f64, max: u64, attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts: attempts,
            initial_delay: Duration::from_millis(initial),
            backoff_factor: factor,
            max_delay: Duration::from_millis(max),
        }
    }

    #[test]
    fn test_delays_double_per_attempt() {
        let p = policy_ms(2_000, 2.0, 60_000, 3);
        assert_eq!(p.delay_for_attempt(0), Duration::from_secs(2));
        assert_eq!(p.delay_for_attempt(1), Duration::from_secs(4));
        assert_eq!(p.delay_for_attempt(2), Duration::from_secs(8));
    }

    #[test]
    fn test_delay_capped() {
        let p = policy_ms(2_000, 2.0, 10_000, 8);
        assert_eq!(p.delay_for_attempt(6), Duration::from_secs(10));
    }

    #[test]
    fn test_policy_from_config_defaults() {
        let p = RetryPolicy::from_config(&FeedbackConfig::default());
        assert_eq!(p.max_attempts, 3);
        assert_eq!(p.initial_delay, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_cancel_flag_wakes_waiter() {
        let flag = CancelFlag::new();
        let waiter = flag.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
            true
        });
        flag.cancel();
        assert!(handle.await.unwrap());
        assert!(flag.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_flag_already_set() {
        let flag = CancelFlag::new();
        flag.cancel();
        // Must resolve immediately even though no waiter was registered
        // before the cancel.
        flag.cancelled().await;
    }
}
