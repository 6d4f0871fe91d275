// src/api/mod.rs — HTTP surface for the session engine

pub mod auth;
pub mod handlers;
pub mod types;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use crate::engine::types::Session;
use crate::feedback::generator::FeedbackGenerator;
use crate::feedback::pipeline::{CancelFlag, FeedbackPipeline};
use crate::infra::cache::TtlCache;
use crate::infra::config::Config;
use crate::infra::ratelimit::RateLimiter;
use crate::store::server::StoreHandle;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct EngineState {
    pub store: StoreHandle,
    pub config: Arc<Config>,
    pub segment_limiter: Arc<RateLimiter>,
    pub create_limiter: Arc<RateLimiter>,
    pub session_cache: Arc<TtlCache<Session>>,
    pub generator: Arc<dyn FeedbackGenerator>,
}

impl EngineState {
    pub fn new(store: StoreHandle, config: Config, generator: Arc<dyn FeedbackGenerator>) -> Self {
        let window = Duration::from_millis(config.limits.window_ms);
        let cache_ttl = Duration::from_secs(config.server.session_cache_ttl_seconds);
        Self {
            segment_limiter: Arc::new(RateLimiter::new(config.limits.segment_limit, window)),
            create_limiter: Arc::new(RateLimiter::new(config.limits.create_limit, window)),
            session_cache: Arc::new(TtlCache::new(cache_ttl)),
            store,
            config: Arc::new(config),
            generator,
        }
    }
}

/// Run the feedback pipeline for a session in the background. Progress goes
/// to the logs; interactive callers poll the feedback endpoint.
pub fn spawn_feedback(state: &EngineState, session_id: String) {
    let pipeline = FeedbackPipeline::new(
        state.store.clone(),
        state.generator.clone(),
        state.config.feedback.clone(),
        state.session_cache.clone(),
    );
    tokio::spawn(async move {
        let cancel = CancelFlag::new();
        let sid = session_id.clone();
        let progress = move |pct: u8, status: &str| {
            tracing::debug!(session = %sid, pct, "{status}");
        };
        if let Err(e) = pipeline.run(&session_id, &progress, &cancel).await {
            tracing::warn!(session = %session_id, "Feedback pipeline finished with error: {e}");
        }
    });
}

/// Build the axum router with all API routes.
pub fn build_router(state: EngineState) -> Router {
    // Auth is bearer tokens, not cookies, so a permissive CORS policy is
    // safe; the browser client is served from a different origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/sessions", post(handlers::create_session))
        .route("/api/v1/sessions/{id}", get(handlers::get_session))
        .route(
            "/api/v1/sessions/{id}/segments",
            post(handlers::submit_segment),
        )
        .route("/api/v1/sessions/{id}/turns", post(handlers::append_turns))
        .route(
            "/api/v1/sessions/{id}/complete",
            post(handlers::complete_session),
        )
        .route("/api/v1/sessions/{id}/fail", post(handlers::fail_session))
        .route(
            "/api/v1/sessions/{id}/feedback",
            get(handlers::get_feedback),
        )
        .route("/api/v1/balance", get(handlers::get_balance))
        .route("/api/v1/reaper/sweep", post(handlers::trigger_sweep))
        .route("/api/v1/health", get(handlers::health))
        .layer(cors)
        .with_state(state)
}

/// Start the API server on the configured port (blocking).
pub async fn start_server(state: EngineState) -> anyhow::Result<()> {
    let port = state.config.server.port;
    let addr = format!("127.0.0.1:{port}");

    let router = build_router(state);

    tracing::info!("API server listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::generator::DisabledGenerator;
    use crate::store::server::spawn_store_server;
    use crate::store::Store;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn test_state() -> EngineState {
        let store = Store::in_memory().unwrap();
        let (handle, _join) = spawn_store_server(store);
        EngineState::new(handle, Config::default(), Arc::new(DisabledGenerator))
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = build_router(test_state().await);
        let req = Request::builder()
            .uri("/api/v1/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_balance_requires_auth() {
        let app = build_router(test_state().await);
        let req = Request::builder()
            .uri("/api/v1/balance")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
