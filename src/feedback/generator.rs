// src/feedback/generator.rs — External feedback generation collaborator

use async_trait::async_trait;
use serde::Serialize;

use crate::engine::types::{FeedbackReport, Session};
use crate::feedback::classifier::{self, InterviewLength};
use crate::infra::errors::EngineError;

#[async_trait]
pub trait FeedbackGenerator: Send + Sync {
    /// Produce a structured feedback report for a finished session.
    async fn generate(
        &self,
        session: &Session,
        length: InterviewLength,
    ) -> Result<FeedbackReport, EngineError>;
}

/// Request body sent to the external generation service.
#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    session_id: &'a str,
    duration_seconds: i64,
    length: &'a str,
    transcript: &'a [crate::engine::types::TranscriptTurn],
    config: &'a serde_json::Value,
}

/// Stand-in when no generator endpoint is configured. Fails fatally so the
/// session is marked instead of retried forever.
pub struct DisabledGenerator;

#[async_trait]
impl FeedbackGenerator for DisabledGenerator {
    async fn generate(
        &self,
        _session: &Session,
        _length: InterviewLength,
    ) -> Result<FeedbackReport, EngineError> {
        Err(EngineError::Generator {
            message: "no feedback generator configured".into(),
            retriable: false,
        })
    }
}

/// HTTP implementation against the configured generation endpoint.
pub struct HttpGenerator {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpGenerator {
    pub fn new(url: String, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            api_key,
        }
    }
}

#[async_trait]
impl FeedbackGenerator for HttpGenerator {
    async fn generate(
        &self,
        session: &Session,
        length: InterviewLength,
    ) -> Result<FeedbackReport, EngineError> {
        let body = GenerateRequest {
            session_id: &session.id,
            duration_seconds: session.duration_seconds,
            length: length.as_str(),
            transcript: &session.transcript,
            config: &session.config,
        };

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        // No connectivity / timeout is transient; an HTTP status is
        // classified by the taxonomy in classifier.rs.
        let response = request.send().await.map_err(|e| EngineError::Generator {
            message: format!("request failed: {e}"),
            retriable: e.is_timeout() || e.is_connect() || e.is_request(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(classifier::classify_status(status.as_u16(), &detail));
        }

        let report: FeedbackReport =
            response
                .json()
                .await
                .map_err(|e| EngineError::MalformedFeedback {
                    message: format!("response did not match the feedback schema: {e}"),
                })?;
        classifier::validate_report(&report)?;
        Ok(report)
    }
}
