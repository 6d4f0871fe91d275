// Feedback pipeline behavior against a scripted generator: retry with
// backoff on transient failures, immediate stop on fatal ones, placeholder
// for too-short sessions, and cancellation.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use pretty_assertions::assert_eq;

use interviewd::engine::types::{
    FeedbackReport, FeedbackState, Session, SessionStatus, SkillScore, TranscriptTurn,
};
use interviewd::feedback::classifier::InterviewLength;
use interviewd::feedback::generator::FeedbackGenerator;
use interviewd::feedback::pipeline::{CancelFlag, FeedbackPipeline};
use interviewd::infra::cache::TtlCache;
use interviewd::infra::config::FeedbackConfig;
use interviewd::infra::errors::EngineError;
use interviewd::ledger::TxnType;
use interviewd::store::server::{spawn_store_server, StoreHandle};
use interviewd::store::Store;

/// Generator that replays a scripted sequence of outcomes.
struct ScriptedGenerator {
    calls: AtomicUsize,
    script: Mutex<VecDeque<Result<FeedbackReport, EngineError>>>,
}

impl ScriptedGenerator {
    fn new(script: Vec<Result<FeedbackReport, EngineError>>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            script: Mutex::new(script.into()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedbackGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        _session: &Session,
        _length: InterviewLength,
    ) -> Result<FeedbackReport, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("generator called past the script"))
    }
}

fn report() -> FeedbackReport {
    FeedbackReport {
        executive_summary: "Solid performance with room to tighten structure.".into(),
        strengths: vec!["Clear communication".into()],
        improvements: vec!["Quantify outcomes".into()],
        skills: vec![SkillScore {
            name: "communication".into(),
            score: 80,
            feedback: "Consistently clear".into(),
        }],
        action_plan: vec!["Practice STAR answers".into()],
    }
}

fn retryable(msg: &str) -> EngineError {
    EngineError::Generator {
        message: msg.into(),
        retriable: true,
    }
}

fn fast_config() -> FeedbackConfig {
    FeedbackConfig {
        max_attempts: 3,
        initial_delay_ms: 40,
        backoff_factor: 2.0,
        max_delay_ms: 1_000,
        ..FeedbackConfig::default()
    }
}

/// A completed session long and talkative enough to clear the evaluation
/// minimums.
async fn completed_session(duration: i64) -> StoreHandle {
    let store = Store::in_memory().unwrap();
    store
        .apply_credit("u-1", 10_000, TxnType::Grant, "seed-grant", "test seed")
        .unwrap();
    store
        .insert_session("s-1", "u-1", &serde_json::json!({}))
        .unwrap();

    let long_answer = "I led the migration of our billing pipeline to an event-driven design, \
                       which cut reconciliation failures by ninety percent over two quarters."
        .to_string();
    let turns: Vec<TranscriptTurn> = (0..8)
        .map(|i| TranscriptTurn {
            index: i,
            role: if i % 2 == 0 { "interviewer" } else { "user" }.into(),
            text: long_answer.clone(),
        })
        .collect();
    store.append_turns("s-1", &turns).unwrap();
    store
        .transition("s-1", SessionStatus::Completed, duration, None)
        .unwrap();

    let (handle, _join) = spawn_store_server(store);
    handle
}

fn pipeline(
    handle: &StoreHandle,
    generator: Arc<ScriptedGenerator>,
    config: FeedbackConfig,
) -> (FeedbackPipeline, Arc<TtlCache<Session>>) {
    let cache = Arc::new(TtlCache::new(Duration::from_secs(30)));
    (
        FeedbackPipeline::new(handle.clone(), generator, config, cache.clone()),
        cache,
    )
}

fn progress_recorder() -> (Arc<Mutex<Vec<u8>>>, impl Fn(u8, &str) + Send + Sync) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |pct: u8, _status: &str| {
        sink.lock().unwrap().push(pct)
    })
}

#[tokio::test]
async fn test_transient_failures_retried_to_success() {
    let handle = completed_session(600).await;
    let generator = ScriptedGenerator::new(vec![
        Err(retryable("HTTP 429")),
        Err(retryable("HTTP 429")),
        Ok(report()),
    ]);
    let (pipeline, _cache) = pipeline(&handle, generator.clone(), fast_config());
    let (seen, on_progress) = progress_recorder();

    let started = Instant::now();
    let result = pipeline
        .run("s-1", &on_progress, &CancelFlag::new())
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(generator.calls(), 3);
    assert_eq!(result.quality_score(), 80);
    // Backoff actually waited: 40ms then 80ms.
    assert!(elapsed >= Duration::from_millis(120), "elapsed {elapsed:?}");
    assert_eq!(*seen.lock().unwrap().last().unwrap(), 100);

    let session = handle.get_session("s-1".to_string()).await.unwrap();
    assert_eq!(session.feedback_state, FeedbackState::Done);
    assert_eq!(session.quality_score, Some(80));
    assert!(session.feedback.is_some());
}

#[tokio::test]
async fn test_exhausted_retries_mark_failed() {
    let handle = completed_session(600).await;
    let generator = ScriptedGenerator::new(vec![
        Err(retryable("timeout")),
        Err(retryable("timeout")),
        Err(retryable("timeout")),
    ]);
    let (pipeline, _cache) = pipeline(&handle, generator.clone(), fast_config());
    let (_seen, on_progress) = progress_recorder();

    let err = pipeline
        .run("s-1", &on_progress, &CancelFlag::new())
        .await
        .unwrap_err();
    assert!(err.is_retriable());
    assert_eq!(generator.calls(), 3);

    let session = handle.get_session("s-1".to_string()).await.unwrap();
    assert_eq!(session.feedback_state, FeedbackState::Failed);
    assert!(session.feedback_note.unwrap().contains("timeout"));
    // Exhausting a transient failure is still classified as retryable, not
    // fatal, so callers can tell the two apart.
    assert_eq!(session.feedback_severity.as_deref(), Some("retryable"));
}

#[tokio::test]
async fn test_fatal_error_never_retried() {
    let handle = completed_session(600).await;
    let generator = ScriptedGenerator::new(vec![Err(EngineError::Generator {
        message: "HTTP 403: key revoked".into(),
        retriable: false,
    })]);
    let (pipeline, _cache) = pipeline(&handle, generator.clone(), fast_config());
    let (_seen, on_progress) = progress_recorder();

    let started = Instant::now();
    let err = pipeline
        .run("s-1", &on_progress, &CancelFlag::new())
        .await
        .unwrap_err();

    // One call, no backoff sleep, failed state recorded.
    assert_eq!(generator.calls(), 1);
    assert!(!err.is_retriable());
    assert!(started.elapsed() < Duration::from_millis(40));
    let session = handle.get_session("s-1".to_string()).await.unwrap();
    assert_eq!(session.feedback_state, FeedbackState::Failed);
    assert_eq!(session.feedback_severity.as_deref(), Some("fatal"));
}

#[tokio::test]
async fn test_malformed_report_is_fatal() {
    let handle = completed_session(600).await;
    let generator = ScriptedGenerator::new(vec![Err(EngineError::MalformedFeedback {
        message: "missing executive_summary".into(),
    })]);
    let (pipeline, _cache) = pipeline(&handle, generator.clone(), fast_config());
    let (_seen, on_progress) = progress_recorder();

    let err = pipeline
        .run("s-1", &on_progress, &CancelFlag::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::MalformedFeedback { .. }));
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn test_too_short_session_gets_placeholder_without_generator_call() {
    let store = Store::in_memory().unwrap();
    store
        .insert_session("s-1", "u-1", &serde_json::json!({}))
        .unwrap();
    store
        .transition("s-1", SessionStatus::Completed, 30, None)
        .unwrap();
    let (handle, _join) = spawn_store_server(store);

    let generator = ScriptedGenerator::new(vec![]);
    let (pipeline, _cache) = pipeline(&handle, generator.clone(), fast_config());
    let (_seen, on_progress) = progress_recorder();

    let report = pipeline
        .run("s-1", &on_progress, &CancelFlag::new())
        .await
        .unwrap();
    assert_eq!(generator.calls(), 0);
    assert!(!report.executive_summary.is_empty());

    let session = handle.get_session("s-1".to_string()).await.unwrap();
    assert_eq!(session.feedback_state, FeedbackState::Done);
}

#[tokio::test]
async fn test_duplicate_run_returns_existing_report() {
    let handle = completed_session(600).await;
    let generator = ScriptedGenerator::new(vec![Ok(report())]);
    let (pipeline, _cache) = pipeline(&handle, generator.clone(), fast_config());
    let (_seen, on_progress) = progress_recorder();

    pipeline
        .run("s-1", &on_progress, &CancelFlag::new())
        .await
        .unwrap();
    // Second run is answered from the stored report, not the generator.
    pipeline
        .run("s-1", &on_progress, &CancelFlag::new())
        .await
        .unwrap();
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn test_cancellation_during_backoff() {
    let handle = completed_session(600).await;
    let generator = ScriptedGenerator::new(vec![
        Err(retryable("HTTP 429")),
        Ok(report()),
    ]);
    let config = FeedbackConfig {
        initial_delay_ms: 5_000,
        ..fast_config()
    };
    let (pipeline, _cache) = pipeline(&handle, generator.clone(), config);

    let cancel = CancelFlag::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let err = pipeline
        .run("s-1", &|_, _| {}, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
    // Abandoned during the 5s backoff, not after it.
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(generator.calls(), 1);
}
