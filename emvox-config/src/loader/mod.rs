pub mod db_url;
pub mod error;

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{
    constants::DEFAULT_CONFIG_LOCATIONS,
    models::{
        Config, ConfigMetadata,
        sources::{EnvConfig, FileConfig},
    },
    validation::{ConfigWarnings, apply_guard_rails},
};
use db_url::resolve_database_url;
use error::ConfigLoadError;

/// Result of a configuration load: the resolved config plus any
/// non-fatal warnings to surface at startup.
#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

/// Composes defaults, an optional TOML file, and environment variables
/// into a [`Config`]. Environment values take precedence over the file,
/// the file over built-in defaults.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    env: Option<EnvConfig>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an explicit config file instead of probing the default
    /// locations. A missing file is then an error rather than a fallback
    /// to defaults.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Supply environment values directly instead of gathering them from
    /// the process environment. Also skips the `.env` lookup.
    pub fn with_env(mut self, env: EnvConfig) -> Self {
        self.env = Some(env);
        self
    }

    pub fn load(self) -> Result<ConfigLoad, ConfigLoadError> {
        let (env, env_file_loaded) = match self.env {
            Some(env) => (env, false),
            None => {
                let loaded = dotenvy::dotenv().is_ok();
                (EnvConfig::gather(), loaded)
            }
        };

        let explicit = self.config_path.or_else(|| env.config_path.clone());
        let (file, config_path) = read_file_config(explicit.as_deref())?;

        let mut config = compose(&env, &file)?;
        config.metadata = ConfigMetadata {
            config_path,
            env_file_loaded,
        };
        let warnings = apply_guard_rails(&mut config)?;

        Ok(ConfigLoad { config, warnings })
    }
}

fn read_file_config(
    explicit: Option<&Path>,
) -> Result<(FileConfig, Option<PathBuf>), ConfigLoadError> {
    if let Some(path) = explicit {
        return Ok((parse_file(path)?, Some(path.to_path_buf())));
    }

    for candidate in DEFAULT_CONFIG_LOCATIONS {
        let path = Path::new(candidate);
        if !path.is_file() {
            continue;
        }
        debug!(path = %path.display(), "configuration file found");
        return Ok((parse_file(path)?, Some(path.to_path_buf())));
    }

    debug!("no configuration file found; using environment and defaults");
    Ok((FileConfig::default(), None))
}

fn parse_file(path: &Path) -> Result<FileConfig, ConfigLoadError> {
    let raw = std::fs::read_to_string(path).map_err(|source| {
        ConfigLoadError::ConfigFileIo {
            path: path.to_path_buf(),
            source,
        }
    })?;
    toml::from_str(&raw).map_err(|source| ConfigLoadError::ConfigFileParse {
        path: path.to_path_buf(),
        source,
    })
}

fn compose(
    env: &EnvConfig,
    file: &FileConfig,
) -> Result<Config, ConfigLoadError> {
    let mut config = Config::default();

    overlay(
        &mut config.server.host,
        env.server_host.clone().or_else(|| file.server.host.clone()),
    );
    overlay(&mut config.server.port, env.server_port.or(file.server.port));

    config.database.primary_url =
        resolve_database_url(env, &file.database)?;

    let worker = &file.worker;
    overlay(
        &mut config.worker.enabled,
        env.worker_enabled.or(worker.enabled),
    );
    overlay(
        &mut config.worker.poll_interval_ms,
        env.worker_poll_interval_ms.or(worker.poll_interval_ms),
    );
    overlay(
        &mut config.worker.batch_size,
        env.worker_batch_size.or(worker.batch_size),
    );
    overlay(
        &mut config.worker.max_attempts,
        env.worker_max_attempts.or(worker.max_attempts),
    );
    overlay(
        &mut config.worker.backoff_base_seconds,
        env.backoff_base_seconds.or(worker.backoff_base_seconds),
    );
    overlay(
        &mut config.worker.backoff_max_seconds,
        env.backoff_max_seconds.or(worker.backoff_max_seconds),
    );
    overlay(
        &mut config.worker.timeout_backoff_floor_seconds,
        env.timeout_backoff_floor_seconds
            .or(worker.timeout_backoff_floor_seconds),
    );

    let emotion = &file.emotion;
    overlay(
        &mut config.emotion.enabled,
        env.emotion_enabled.or(emotion.enabled),
    );
    overlay(&mut config.emotion.mode, env.analysis_mode.or(emotion.mode));
    overlay(
        &mut config.emotion.base_url,
        env.emotion_base_url
            .clone()
            .or_else(|| emotion.base_url.clone()),
    );
    overlay(
        &mut config.emotion.segment_ms,
        env.segment_ms.or(emotion.segment_ms),
    );
    overlay(
        &mut config.emotion.overlap_ms,
        env.overlap_ms.or(emotion.overlap_ms),
    );
    overlay(
        &mut config.emotion.connect_timeout_ms,
        env.emotion_connect_timeout_ms.or(emotion.connect_timeout_ms),
    );
    overlay(
        &mut config.emotion.read_timeout_ms,
        env.emotion_read_timeout_ms.or(emotion.read_timeout_ms),
    );
    overlay(
        &mut config.emotion.health_timeout_ms,
        env.emotion_health_timeout_ms.or(emotion.health_timeout_ms),
    );
    overlay(
        &mut config.emotion.probe_cooldown_ms,
        env.probe_cooldown_ms.or(emotion.probe_cooldown_ms),
    );

    let transcription = &file.transcription;
    overlay(
        &mut config.transcription.base_url,
        env.transcription_base_url
            .clone()
            .or_else(|| transcription.base_url.clone()),
    );
    overlay(
        &mut config.transcription.connect_timeout_ms,
        transcription.connect_timeout_ms,
    );
    overlay(
        &mut config.transcription.read_timeout_ms,
        env.transcription_read_timeout_ms
            .or(transcription.read_timeout_ms),
    );

    overlay(
        &mut config.realtime.push_interval_ms,
        env.push_interval_ms.or(file.realtime.push_interval_ms),
    );
    overlay(
        &mut config.realtime.curve_limit,
        env.curve_limit.or(file.realtime.curve_limit),
    );

    Ok(config)
}

fn overlay<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}
