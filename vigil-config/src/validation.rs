use thiserror::Error;

use crate::models::{Config, WorkerPoolConfig};

/// Above this, a single request can hold a lot of memory in `memory` mode.
const LARGE_MAX_BYTES: u64 = 256 * 1024 * 1024;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigGuardRailError {
    #[error("{pool} worker pool {reason}")]
    InvalidWorkerPool { pool: &'static str, reason: String },
    #[error("limits.max_in_flight must be at least 1")]
    NoVideoConcurrency,
    #[error("acquire.max_bytes must be greater than zero")]
    ZeroMaxBytes,
    #[error("classifier.flag_threshold {value} is outside [0, 1]")]
    InvalidFlagThreshold { value: f32 },
    #[error("classifier.command is required")]
    MissingClassifierCommand,
    #[error("transform.{field} {reason}")]
    InvalidTransform { field: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(
        &mut self,
        message: S,
        hint: H,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }
}

pub fn apply_guard_rails(
    config: &Config,
) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();

    check_pool("transform", &config.transform.workers)?;
    check_pool("classifier", &config.classifier.workers)?;

    if config.limits.max_in_flight == 0 {
        return Err(ConfigGuardRailError::NoVideoConcurrency);
    }
    if config.acquire.max_bytes == 0 {
        return Err(ConfigGuardRailError::ZeroMaxBytes);
    }

    let threshold = config.classifier.flag_threshold;
    if !(0.0..=1.0).contains(&threshold) {
        return Err(ConfigGuardRailError::InvalidFlagThreshold {
            value: threshold,
        });
    }
    if config
        .classifier
        .command
        .first()
        .is_none_or(|program| program.trim().is_empty())
    {
        return Err(ConfigGuardRailError::MissingClassifierCommand);
    }

    if config.transform.input_dimension == 0 {
        return Err(ConfigGuardRailError::InvalidTransform {
            field: "input_dimension",
            reason: "must be greater than zero".into(),
        });
    }
    if !(1..=100).contains(&config.transform.jpeg_quality) {
        return Err(ConfigGuardRailError::InvalidTransform {
            field: "jpeg_quality",
            reason: format!(
                "{} is outside 1..=100",
                config.transform.jpeg_quality
            ),
        });
    }

    if config.auth.bearer_token.is_none() {
        warnings.push_with_hint(
            "No API token configured; classification endpoints are open",
            "Set VIGIL_API_TOKEN or auth.bearer_token",
        );
    }
    if config.acquire.max_bytes > LARGE_MAX_BYTES {
        warnings.push_with_hint(
            format!(
                "acquire.max_bytes is {} bytes; each request may buffer that much",
                config.acquire.max_bytes
            ),
            "Lower ACQUIRE_MAX_BYTES or switch ACQUIRE_MODE to file",
        );
    }
    if config.locks.ttl < config.acquire.download_timeout {
        warnings.push_with_hint(
            "locks.ttl is shorter than acquire.download_timeout",
            "An idle lock may be evicted while a slow download still runs",
        );
    }

    Ok(warnings)
}

fn check_pool(
    pool: &'static str,
    settings: &WorkerPoolConfig,
) -> Result<(), ConfigGuardRailError> {
    if settings.max_workers == 0 {
        return Err(ConfigGuardRailError::InvalidWorkerPool {
            pool,
            reason: "needs max_workers >= 1".into(),
        });
    }
    if settings.min_workers > settings.max_workers {
        return Err(ConfigGuardRailError::InvalidWorkerPool {
            pool,
            reason: format!(
                "min_workers {} exceeds max_workers {}",
                settings.min_workers, settings.max_workers
            ),
        });
    }
    Ok(())
}
