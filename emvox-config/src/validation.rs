//! Guard rails applied after composition. Most problems are clamped and
//! reported as warnings; only values with no sensible interpretation are
//! rejected outright.

use thiserror::Error;

use crate::{
    constants::MIN_PUSH_INTERVAL_MS,
    models::{AnalysisMode, Config},
};

/// A non-fatal configuration problem, surfaced as a log line at startup.
#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn push(&mut self, message: impl Into<String>) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    fn push_with_hint(
        &mut self,
        message: impl Into<String>,
        hint: impl Into<String>,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }
}

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("emotion.segment_ms must be positive, got {0}")]
    NonPositiveSegment(i64),

    #[error("emotion.overlap_ms {overlap} must be in 0..segment_ms ({segment})")]
    OverlapOutOfRange { overlap: i64, segment: i64 },
}

pub fn apply_guard_rails(
    config: &mut Config,
) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();

    if config.emotion.segment_ms <= 0 {
        return Err(ConfigGuardRailError::NonPositiveSegment(
            config.emotion.segment_ms,
        ));
    }
    if config.emotion.overlap_ms < 0
        || config.emotion.overlap_ms >= config.emotion.segment_ms
    {
        return Err(ConfigGuardRailError::OverlapOutOfRange {
            overlap: config.emotion.overlap_ms,
            segment: config.emotion.segment_ms,
        });
    }

    if config.worker.max_attempts < 1 {
        warnings.push_with_hint(
            format!(
                "worker.max_attempts {} raised to 1",
                config.worker.max_attempts
            ),
            "every task gets at least one attempt",
        );
        config.worker.max_attempts = 1;
    }

    if config.worker.batch_size < 1 {
        warnings.push(format!(
            "worker.batch_size {} raised to 1",
            config.worker.batch_size
        ));
        config.worker.batch_size = 1;
    }

    if config.worker.backoff_max_seconds < config.worker.backoff_base_seconds {
        warnings.push(format!(
            "worker.backoff_max_seconds {} raised to the base of {}",
            config.worker.backoff_max_seconds,
            config.worker.backoff_base_seconds
        ));
        config.worker.backoff_max_seconds = config.worker.backoff_base_seconds;
    }

    if config.realtime.push_interval_ms < MIN_PUSH_INTERVAL_MS {
        warnings.push(format!(
            "realtime.push_interval_ms {} raised to the {MIN_PUSH_INTERVAL_MS} ms floor",
            config.realtime.push_interval_ms
        ));
        config.realtime.push_interval_ms = MIN_PUSH_INTERVAL_MS;
    }

    if config.emotion.mode == AnalysisMode::Fixture {
        warnings.push_with_hint(
            "analysis mode is \"fixture\"; SER/ASR responses are synthesized locally",
            "set [emotion] mode = \"http\" or EMVOX_ANALYSIS_MODE=http to reach real services",
        );
    }

    Ok(warnings)
}
