pub mod sources;

use std::{fmt, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_ASR_BASE_URL, DEFAULT_ASR_READ_TIMEOUT_MS,
    DEFAULT_BACKOFF_BASE_SECONDS, DEFAULT_BACKOFF_MAX_SECONDS,
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_CURVE_LIMIT,
    DEFAULT_HEALTH_TIMEOUT_MS, DEFAULT_OVERLAP_MS, DEFAULT_PROBE_COOLDOWN_MS,
    DEFAULT_PUSH_INTERVAL_MS, DEFAULT_SEGMENT_MS, DEFAULT_SER_BASE_URL,
    DEFAULT_SER_READ_TIMEOUT_MS, DEFAULT_SERVER_HOST, DEFAULT_SERVER_PORT,
    DEFAULT_TIMEOUT_BACKOFF_FLOOR_SECONDS, DEFAULT_WORKER_BATCH_SIZE,
    DEFAULT_WORKER_MAX_ATTEMPTS, DEFAULT_WORKER_POLL_INTERVAL_MS,
};

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub worker: WorkerConfig,
    pub emotion: EmotionConfig,
    pub transcription: TranscriptionConfig,
    pub realtime: RealtimeConfig,
    pub metadata: ConfigMetadata,
}

impl Config {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            worker: WorkerConfig::default(),
            emotion: EmotionConfig::default(),
            transcription: TranscriptionConfig::default(),
            realtime: RealtimeConfig::default(),
            metadata: ConfigMetadata::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_SERVER_HOST.to_string(),
            port: DEFAULT_SERVER_PORT,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DatabaseConfig {
    pub primary_url: Option<String>,
}

/// Polling worker knobs. Backoff values feed the retry schedule applied
/// when an attempt fails.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub poll_interval_ms: u64,
    pub batch_size: i64,
    pub max_attempts: i32,
    pub backoff_base_seconds: u64,
    pub backoff_max_seconds: u64,
    pub timeout_backoff_floor_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: DEFAULT_WORKER_POLL_INTERVAL_MS,
            batch_size: DEFAULT_WORKER_BATCH_SIZE,
            max_attempts: DEFAULT_WORKER_MAX_ATTEMPTS,
            backoff_base_seconds: DEFAULT_BACKOFF_BASE_SECONDS,
            backoff_max_seconds: DEFAULT_BACKOFF_MAX_SECONDS,
            timeout_backoff_floor_seconds: DEFAULT_TIMEOUT_BACKOFF_FLOOR_SECONDS,
        }
    }
}

/// Which client implementations get wired at startup. The decision is
/// made once; there is no per-call switching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    /// Real SER/ASR services over HTTP.
    Http,
    /// Deterministic local fixtures, no network access.
    #[default]
    Fixture,
}

impl FromStr for AnalysisMode {
    type Err = ();

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "fixture" => Ok(Self::Fixture),
            _ => Err(()),
        }
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => f.write_str("http"),
            Self::Fixture => f.write_str("fixture"),
        }
    }
}

/// SER (speech emotion recognition) integration. `mode` doubles as the
/// analysis mode for the ASR client, which follows it.
#[derive(Debug, Clone)]
pub struct EmotionConfig {
    pub enabled: bool,
    pub mode: AnalysisMode,
    pub base_url: String,
    pub segment_ms: i64,
    pub overlap_ms: i64,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub health_timeout_ms: u64,
    pub probe_cooldown_ms: u64,
}

impl Default for EmotionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: AnalysisMode::default(),
            base_url: DEFAULT_SER_BASE_URL.to_string(),
            segment_ms: DEFAULT_SEGMENT_MS,
            overlap_ms: DEFAULT_OVERLAP_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            read_timeout_ms: DEFAULT_SER_READ_TIMEOUT_MS,
            health_timeout_ms: DEFAULT_HEALTH_TIMEOUT_MS,
            probe_cooldown_ms: DEFAULT_PROBE_COOLDOWN_MS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TranscriptionConfig {
    pub base_url: String,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_ASR_BASE_URL.to_string(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            read_timeout_ms: DEFAULT_ASR_READ_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub push_interval_ms: u64,
    pub curve_limit: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            push_interval_ms: DEFAULT_PUSH_INTERVAL_MS,
            curve_limit: DEFAULT_CURVE_LIMIT,
        }
    }
}

/// Where the effective configuration came from, for startup logging.
#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}
