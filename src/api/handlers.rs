// src/api/handlers.rs

use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::Json;

use crate::api::{auth, spawn_feedback, types::*, EngineState};
use crate::engine::reaper;
use crate::engine::recorder::{self, SegmentInput};
use crate::engine::types::{Session, SessionStatus};
use crate::infra::errors::EngineError;
use crate::infra::ratelimit::RateLimiter;

/// Check a limiter and build the quota headers for the response.
fn guard(limiter: &RateLimiter, key: &str) -> Result<HeaderMap, ApiError> {
    let decision = limiter.check(key);

    let mut headers = HeaderMap::new();
    if let Ok(v) = HeaderValue::from_str(&limiter.limit().to_string()) {
        headers.insert("x-ratelimit-limit", v);
    }
    if let Ok(v) = HeaderValue::from_str(&decision.remaining.to_string()) {
        headers.insert("x-ratelimit-remaining", v);
    }

    if decision.allowed {
        Ok(headers)
    } else {
        let retry_after_ms = decision
            .retry_after
            .map(|d| d.as_millis() as u64)
            .unwrap_or(1_000);
        let mut err = ApiError::from(EngineError::RateLimited { retry_after_ms });
        err.headers.extend(headers);
        Err(err)
    }
}

/// Fetch a session through the TTL cache and verify ownership. A session
/// belonging to someone else reads as not-found.
async fn owned_session(
    state: &EngineState,
    id: &str,
    owner_id: &str,
) -> Result<Session, ApiError> {
    let session = match state.session_cache.get(id) {
        Some(session) => session,
        None => {
            let session = state.store.get_session(id.to_string()).await?;
            state.session_cache.insert(id, session.clone());
            session
        }
    };
    if session.owner_id != owner_id {
        return Err(EngineError::SessionNotFound { id: id.to_string() }.into());
    }
    Ok(session)
}

/// POST /api/v1/sessions — create a session in in_progress.
pub async fn create_session(
    State(state): State<EngineState>,
    headers: HeaderMap,
    Json(body): Json<CreateSessionRequest>,
) -> Result<(StatusCode, HeaderMap, Json<CreateSessionResponse>), ApiError> {
    let owner_id = auth::authenticate(&state, &headers)?;
    let rl_headers = guard(&state.create_limiter, &owner_id)?;

    let session_id = uuid::Uuid::new_v4().to_string();
    state
        .store
        .insert_session(session_id.clone(), owner_id, body.config)
        .await?;

    Ok((
        StatusCode::CREATED,
        rl_headers,
        Json(CreateSessionResponse {
            session_id,
            status: "in_progress".into(),
        }),
    ))
}

/// POST /api/v1/sessions/{id}/segments — the metered write path.
pub async fn submit_segment(
    State(state): State<EngineState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<SegmentRequest>,
) -> Result<(HeaderMap, Json<SegmentResponse>), ApiError> {
    let owner_id = auth::authenticate(&state, &headers)?;
    let rl_headers = guard(&state.segment_limiter, &owner_id)?;

    let segment = recorder::normalize(SegmentInput {
        session_id: id.clone(),
        owner_id,
        resumed_at: body.resumed_at,
        ended_at: body.ended_at,
        duration_seconds: body.duration_seconds,
        transcript_start_index: body.transcript_start_index,
        transcript_end_index: body.transcript_end_index,
    })?;

    let outcome = state.store.record_segment(segment).await?;
    state.session_cache.invalidate(&id);

    Ok((
        rl_headers,
        Json(SegmentResponse {
            accepted: true,
            already_processed: outcome.already_processed,
            actual_duration_seconds: outcome.actual_duration_seconds,
            remaining_seconds: outcome.remaining_seconds,
        }),
    ))
}

/// POST /api/v1/sessions/{id}/turns — transcript append from the transport.
pub async fn append_turns(
    State(state): State<EngineState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<TurnsRequest>,
) -> Result<StatusCode, ApiError> {
    let owner_id = auth::authenticate(&state, &headers)?;
    owned_session(&state, &id, &owner_id).await?;

    state.store.append_turns(id.clone(), body.turns).await?;
    state.session_cache.invalidate(&id);
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/sessions/{id}/complete — terminal transition; enqueues the
/// feedback pipeline in the same store transaction.
pub async fn complete_session(
    State(state): State<EngineState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<CompleteRequest>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let owner_id = auth::authenticate(&state, &headers)?;
    owned_session(&state, &id, &owner_id).await?;

    let enqueued = state
        .store
        .transition(
            id.clone(),
            SessionStatus::Completed,
            body.final_duration_seconds,
            body.note,
        )
        .await?;
    state.session_cache.invalidate(&id);

    if enqueued {
        spawn_feedback(&state, id.clone());
    }

    Ok(Json(TransitionResponse {
        session_id: id,
        status: "completed".into(),
        feedback_enqueued: enqueued,
    }))
}

/// POST /api/v1/sessions/{id}/fail
pub async fn fail_session(
    State(state): State<EngineState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<FailRequest>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let owner_id = auth::authenticate(&state, &headers)?;
    owned_session(&state, &id, &owner_id).await?;

    state
        .store
        .transition(
            id.clone(),
            SessionStatus::Failed,
            body.final_duration_seconds,
            body.note,
        )
        .await?;
    state.session_cache.invalidate(&id);

    Ok(Json(TransitionResponse {
        session_id: id,
        status: "failed".into(),
        feedback_enqueued: false,
    }))
}

/// GET /api/v1/sessions/{id}
pub async fn get_session(
    State(state): State<EngineState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Session>, ApiError> {
    let owner_id = auth::authenticate(&state, &headers)?;
    let session = owned_session(&state, &id, &owner_id).await?;
    Ok(Json(session))
}

/// GET /api/v1/sessions/{id}/feedback
pub async fn get_feedback(
    State(state): State<EngineState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<FeedbackEnvelope>, ApiError> {
    let owner_id = auth::authenticate(&state, &headers)?;
    let session = owned_session(&state, &id, &owner_id).await?;

    let state_str = session.feedback_state.as_str().to_string();
    let envelope = match session.feedback {
        Some(report) => FeedbackEnvelope {
            session_id: id,
            state: state_str,
            quality_score: session.quality_score,
            report: Some(report),
            message: None,
            severity: None,
        },
        None => {
            let (message, severity) = match state_str.as_str() {
                "pending" => ("Feedback is being generated.".to_string(), None),
                "failed" => (
                    "Feedback generation failed. Please try again later.".to_string(),
                    session.feedback_severity.clone(),
                ),
                _ => ("No feedback available for this session.".to_string(), None),
            };
            FeedbackEnvelope {
                session_id: id,
                state: state_str,
                report: None,
                quality_score: None,
                message: Some(message),
                severity,
            }
        }
    };
    Ok(Json(envelope))
}

/// GET /api/v1/balance — remaining seconds for the authenticated owner.
pub async fn get_balance(
    State(state): State<EngineState>,
    headers: HeaderMap,
) -> Result<Json<BalanceResponse>, ApiError> {
    let owner_id = auth::authenticate(&state, &headers)?;
    let remaining_seconds = state.store.balance(owner_id.clone()).await?;
    Ok(Json(BalanceResponse {
        owner_id,
        remaining_seconds,
    }))
}

/// POST /api/v1/reaper/sweep — scheduler-triggered zombie sweep.
pub async fn trigger_sweep(
    State(state): State<EngineState>,
    headers: HeaderMap,
) -> Result<Json<SweepResponse>, ApiError> {
    auth::check_reaper_secret(&state, &headers)?;

    let report = reaper::sweep(&state.store, &state.config.metering).await?;

    // A closed session must not keep reading as in_progress from the cache,
    // and its enqueued feedback is driven now, not at the next restart.
    for id in &report.closed {
        state.session_cache.invalidate(id);
    }
    for id in state.store.pending_feedback_sessions().await? {
        spawn_feedback(&state, id);
    }

    Ok(Json(SweepResponse {
        processed: report.scanned,
        completed: report.completed,
        errors: report.errors,
    }))
}

/// GET /api/v1/health — simple health check.
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
