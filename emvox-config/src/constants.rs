//! Built-in defaults, matched by the TOML sections in
//! [`models::sources`](crate::models::sources) and the `EMVOX_*`
//! environment variables.

/// Config file locations probed when no explicit path is given, in order.
pub const DEFAULT_CONFIG_LOCATIONS: &[&str] = &["emvox.toml", "config/emvox.toml"];

pub const DEFAULT_SERVER_HOST: &str = "0.0.0.0";
pub const DEFAULT_SERVER_PORT: u16 = 8080;

pub const DEFAULT_WORKER_POLL_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_WORKER_BATCH_SIZE: i64 = 20;
pub const DEFAULT_WORKER_MAX_ATTEMPTS: i32 = 4;
pub const DEFAULT_BACKOFF_BASE_SECONDS: u64 = 30;
pub const DEFAULT_BACKOFF_MAX_SECONDS: u64 = 600;
pub const DEFAULT_TIMEOUT_BACKOFF_FLOOR_SECONDS: u64 = 180;

pub const DEFAULT_SER_BASE_URL: &str = "http://localhost:8001";
pub const DEFAULT_SEGMENT_MS: i64 = 8_000;
pub const DEFAULT_OVERLAP_MS: i64 = 0;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_SER_READ_TIMEOUT_MS: u64 = 180_000;
pub const DEFAULT_HEALTH_TIMEOUT_MS: u64 = 1_500;
pub const DEFAULT_PROBE_COOLDOWN_MS: u64 = 5_000;

pub const DEFAULT_ASR_BASE_URL: &str = "http://localhost:8002";
pub const DEFAULT_ASR_READ_TIMEOUT_MS: u64 = 90_000;

pub const DEFAULT_PUSH_INTERVAL_MS: u64 = 1_000;
/// Floor for `realtime.push_interval_ms`; below this the snapshot
/// rebuild cost outweighs any perceived smoothness.
pub const MIN_PUSH_INTERVAL_MS: u64 = 200;
pub const DEFAULT_CURVE_LIMIT: usize = 180;
