use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::util::{parse_bool_var, parse_var};

use super::AnalysisMode;

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    #[serde(default)]
    pub database: FileDatabaseConfig,
    #[serde(default)]
    pub worker: FileWorkerConfig,
    #[serde(default)]
    pub emotion: FileEmotionConfig,
    #[serde(default)]
    pub transcription: FileTranscriptionConfig,
    #[serde(default)]
    pub realtime: FileRealtimeConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileDatabaseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_file: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileWorkerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_base_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_max_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_backoff_floor_seconds: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileEmotionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<AnalysisMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlap_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe_cooldown_ms: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileTranscriptionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileRealtimeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_interval_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub curve_limit: Option<usize>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub database_url: Option<String>,
    pub database_url_file: Option<PathBuf>,
    pub database_host: Option<String>,
    pub database_port: Option<u16>,
    pub database_user: Option<String>,
    pub database_name: Option<String>,
    pub database_password: Option<String>,
    pub database_password_file: Option<PathBuf>,
    pub app_password: Option<String>,
    pub app_password_file: Option<PathBuf>,
    pub worker_enabled: Option<bool>,
    pub worker_poll_interval_ms: Option<u64>,
    pub worker_batch_size: Option<i64>,
    pub worker_max_attempts: Option<i32>,
    pub backoff_base_seconds: Option<u64>,
    pub backoff_max_seconds: Option<u64>,
    pub timeout_backoff_floor_seconds: Option<u64>,
    pub analysis_mode: Option<AnalysisMode>,
    pub emotion_enabled: Option<bool>,
    pub emotion_base_url: Option<String>,
    pub segment_ms: Option<i64>,
    pub overlap_ms: Option<i64>,
    pub emotion_connect_timeout_ms: Option<u64>,
    pub emotion_read_timeout_ms: Option<u64>,
    pub emotion_health_timeout_ms: Option<u64>,
    pub probe_cooldown_ms: Option<u64>,
    pub transcription_base_url: Option<String>,
    pub transcription_read_timeout_ms: Option<u64>,
    pub push_interval_ms: Option<u64>,
    pub curve_limit: Option<usize>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self {
            config_path: std::env::var("EMVOX_CONFIG_PATH")
                .ok()
                .map(PathBuf::from),
            server_host: std::env::var("SERVER_HOST").ok(),
            server_port: parse_var("SERVER_PORT"),
            database_url: std::env::var("DATABASE_URL").ok(),
            database_url_file: std::env::var("DATABASE_URL_FILE")
                .ok()
                .map(PathBuf::from),
            database_host: std::env::var("DATABASE_HOST").ok(),
            database_port: parse_var("DATABASE_PORT"),
            database_user: std::env::var("DATABASE_USER").ok(),
            database_name: std::env::var("DATABASE_NAME").ok(),
            database_password: std::env::var("DATABASE_PASSWORD").ok(),
            database_password_file: std::env::var("DATABASE_PASSWORD_FILE")
                .ok()
                .map(PathBuf::from),
            app_password: std::env::var("EMVOX_APP_PASSWORD").ok(),
            app_password_file: std::env::var("EMVOX_APP_PASSWORD_FILE")
                .ok()
                .map(PathBuf::from),

            worker_enabled: parse_bool_var("EMVOX_WORKER_ENABLED"),
            worker_poll_interval_ms: parse_var("EMVOX_WORKER_POLL_INTERVAL_MS"),
            worker_batch_size: parse_var("EMVOX_WORKER_BATCH_SIZE"),
            worker_max_attempts: parse_var("EMVOX_WORKER_MAX_ATTEMPTS"),
            backoff_base_seconds: parse_var("EMVOX_BACKOFF_BASE_SECONDS"),
            backoff_max_seconds: parse_var("EMVOX_BACKOFF_MAX_SECONDS"),
            timeout_backoff_floor_seconds: parse_var(
                "EMVOX_TIMEOUT_BACKOFF_FLOOR_SECONDS",
            ),

            analysis_mode: std::env::var("EMVOX_ANALYSIS_MODE")
                .ok()
                .and_then(|raw| raw.parse().ok()),
            emotion_enabled: parse_bool_var("EMVOX_EMOTION_ENABLED"),
            emotion_base_url: std::env::var("EMVOX_SER_BASE_URL").ok(),
            segment_ms: parse_var("EMVOX_SEGMENT_MS"),
            overlap_ms: parse_var("EMVOX_OVERLAP_MS"),
            emotion_connect_timeout_ms: parse_var(
                "EMVOX_SER_CONNECT_TIMEOUT_MS",
            ),
            emotion_read_timeout_ms: parse_var("EMVOX_SER_READ_TIMEOUT_MS"),
            emotion_health_timeout_ms: parse_var("EMVOX_SER_HEALTH_TIMEOUT_MS"),
            probe_cooldown_ms: parse_var("EMVOX_SER_PROBE_COOLDOWN_MS"),

            transcription_base_url: std::env::var("EMVOX_ASR_BASE_URL").ok(),
            transcription_read_timeout_ms: parse_var(
                "EMVOX_ASR_READ_TIMEOUT_MS",
            ),

            push_interval_ms: parse_var("EMVOX_PUSH_INTERVAL_MS"),
            curve_limit: parse_var("EMVOX_CURVE_LIMIT"),
        }
    }
}
