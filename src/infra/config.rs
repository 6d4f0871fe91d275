// src/infra/config.rs — Configuration loading (TOML)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub metering: MeteringConfig,

    #[serde(default)]
    pub feedback: FeedbackConfig,

    #[serde(default)]
    pub limits: RateLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    /// Bearer token -> owner id. Identity management proper lives outside
    /// this engine; the token table is enough to attribute requests.
    #[serde(default)]
    pub tokens: HashMap<String, String>,
    /// Shared secret for the external reaper scheduler.
    pub reaper_secret: Option<String>,
    /// How long a session detail read may be served from the in-memory cache.
    #[serde(default = "default_session_cache_ttl")]
    pub session_cache_ttl_seconds: u64,
}

fn default_session_cache_ttl() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8710,
            tokens: HashMap::new(),
            reaper_secret: None,
            session_cache_ttl_seconds: default_session_cache_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeteringConfig {
    /// Minutes without an update before an in_progress session counts as a zombie.
    pub stale_threshold_minutes: i64,
    /// Upper bound on sessions closed per sweep.
    pub max_batch_size: u32,
    /// Hard ceiling on chargeable wall-clock time per session.
    pub max_session_seconds: i64,
    /// Reaper timer period inside `serve`.
    pub sweep_interval_minutes: u64,
}

impl Default for MeteringConfig {
    fn default() -> Self {
        Self {
            stale_threshold_minutes: 10,
            max_batch_size: 50,
            max_session_seconds: 7200,
            sweep_interval_minutes: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackConfig {
    pub generator_url: Option<String>,
    pub api_key: Option<String>,
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
    /// Sessions below all three minimums get placeholder feedback instead of
    /// a generator call.
    pub min_duration_seconds: i64,
    pub min_user_turns: usize,
    pub min_response_chars: usize,
    /// Boundaries for short/medium/long classification, in seconds.
    pub short_max_seconds: i64,
    pub medium_max_seconds: i64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            generator_url: None,
            api_key: None,
            max_attempts: 3,
            initial_delay_ms: 2_000,
            backoff_factor: 2.0,
            max_delay_ms: 60_000,
            min_duration_seconds: 120,
            min_user_turns: 3,
            min_response_chars: 200,
            short_max_seconds: 300,
            medium_max_seconds: 900,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Segment submissions per key per window.
    pub segment_limit: u32,
    /// Session creations per key per window.
    pub create_limit: u32,
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            segment_limit: 30,
            create_limit: 5,
            window_ms: 60_000,
        }
    }
}

impl Config {
    /// Load from the default location, falling back to defaults if absent.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("INTERVIEWD_CONFIG").unwrap_or_else(|_| "interviewd.toml".into());
        let path = Path::new(&path);
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&raw)?;
        Ok(config)
    }
}
