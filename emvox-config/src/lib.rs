//! Layered configuration for the Emvox analysis stack.
//!
//! Settings are composed from three layers, lowest precedence first:
//! built-in defaults, an optional TOML file (`emvox.toml` or
//! `config/emvox.toml`), and environment variables (a `.env` file is
//! picked up through `dotenvy`). `emvox-server` drives loading through
//! [`ConfigLoader`] at startup and surfaces the collected
//! [`ConfigWarnings`] as log output, so there is a single source of
//! truth for defaults and guard rails.

pub mod constants;
pub mod loader;
pub mod models;
pub mod util;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoader, error::ConfigLoadError};
pub use models::{
    AnalysisMode, Config, ConfigMetadata, DatabaseConfig, EmotionConfig,
    RealtimeConfig, ServerConfig, TranscriptionConfig, WorkerConfig,
};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
