use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr, time::Duration};
use vigil_model::StorageMode;

use crate::{loader::error::ConfigLoadError, models::TransformBackend};

/// Raw configuration as defined in a TOML file.
///
/// Durations are humantime strings (`"30s"`, `"10m"`) and are parsed when
/// the configuration is composed.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    #[serde(default)]
    pub auth: FileAuthConfig,
    #[serde(default)]
    pub acquire: FileAcquireConfig,
    #[serde(default)]
    pub limits: FileLimitsConfig,
    #[serde(default)]
    pub cache: FileCacheConfig,
    #[serde(default)]
    pub locks: FileCacheConfig,
    #[serde(default)]
    pub ffmpeg: FileFfmpegConfig,
    #[serde(default)]
    pub transform: FileTransformConfig,
    #[serde(default)]
    pub classifier: FileClassifierConfig,
    #[serde(default)]
    pub janitor: FileJanitorConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileAuthConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileAcquireConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_redirects: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seek_offset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<StorageMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileLimitsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_in_flight: Option<usize>,
}

/// Shared shape of the `[cache]` and `[locks]` tables.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileCacheConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_items: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileFfmpegConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ffmpeg_path: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileWorkerPoolConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_timeout: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileTransformConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<TransformBackend>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_dimension: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jpeg_quality: Option<u8>,
    #[serde(default)]
    pub workers: FileWorkerPoolConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileClassifierConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flag_threshold: Option<f32>,
    #[serde(default)]
    pub workers: FileWorkerPoolConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileJanitorConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age: Option<String>,
}

/// Configuration overrides gathered from environment variables.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub bearer_token: Option<String>,
    pub max_bytes: Option<u64>,
    pub download_timeout: Option<Duration>,
    pub stream_timeout: Option<Duration>,
    pub max_redirects: Option<usize>,
    pub seek_offset: Option<Duration>,
    pub storage_mode: Option<StorageMode>,
    pub work_dir: Option<PathBuf>,
    pub user_agent: Option<String>,
    pub max_in_flight: Option<usize>,
    pub cache_max_items: Option<u64>,
    pub cache_ttl: Option<Duration>,
    pub lock_max_items: Option<u64>,
    pub lock_ttl: Option<Duration>,
    pub ffmpeg_path: Option<String>,
    pub transform_backend: Option<TransformBackend>,
    pub transform_min_workers: Option<usize>,
    pub transform_max_workers: Option<usize>,
    pub classifier_command: Option<Vec<String>>,
    pub classifier_min_workers: Option<usize>,
    pub classifier_max_workers: Option<usize>,
    pub flag_threshold: Option<f32>,
}

impl EnvConfig {
    /// Reads overrides from the process environment.
    pub fn gather() -> Result<Self, ConfigLoadError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads overrides through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigLoadError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key).and_then(|raw| {
                let trimmed = raw.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
        };

        Ok(Self {
            config_path: var("VIGIL_CONFIG").map(PathBuf::from),
            server_host: var("SERVER_HOST"),
            server_port: parse_var(&var, "SERVER_PORT")?,
            bearer_token: var("VIGIL_API_TOKEN"),
            max_bytes: parse_var(&var, "ACQUIRE_MAX_BYTES")?,
            download_timeout: duration_var(&var, "ACQUIRE_DOWNLOAD_TIMEOUT")?,
            stream_timeout: duration_var(&var, "ACQUIRE_STREAM_TIMEOUT")?,
            max_redirects: parse_var(&var, "ACQUIRE_MAX_REDIRECTS")?,
            seek_offset: duration_var(&var, "ACQUIRE_SEEK_OFFSET")?,
            storage_mode: parse_var(&var, "ACQUIRE_MODE")?,
            work_dir: var("VIGIL_WORK_DIR").map(PathBuf::from),
            user_agent: var("ACQUIRE_USER_AGENT"),
            max_in_flight: parse_var(&var, "MAX_VIDEO_CONCURRENCY")?,
            cache_max_items: parse_var(&var, "CACHE_MAX_ITEMS")?,
            cache_ttl: duration_var(&var, "CACHE_TTL")?,
            lock_max_items: parse_var(&var, "LOCK_MAX_ITEMS")?,
            lock_ttl: duration_var(&var, "LOCK_TTL")?,
            ffmpeg_path: var("FFMPEG_PATH"),
            transform_backend: parse_var(&var, "TRANSFORM_BACKEND")?,
            transform_min_workers: parse_var(&var, "TRANSFORM_MIN_WORKERS")?,
            transform_max_workers: parse_var(&var, "TRANSFORM_MAX_WORKERS")?,
            classifier_command: var("CLASSIFIER_COMMAND").map(|raw| {
                raw.split_whitespace().map(str::to_string).collect()
            }),
            classifier_min_workers: parse_var(&var, "CLASSIFIER_MIN_WORKERS")?,
            classifier_max_workers: parse_var(&var, "CLASSIFIER_MAX_WORKERS")?,
            flag_threshold: parse_var(&var, "CLASSIFIER_FLAG_THRESHOLD")?,
        })
    }
}

fn parse_var<T, F>(var: &F, key: &str) -> Result<Option<T>, ConfigLoadError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    var(key)
        .map(|raw| {
            raw.parse::<T>().map_err(|err| ConfigLoadError::InvalidValue {
                key: key.to_string(),
                value: raw.clone(),
                reason: err.to_string(),
            })
        })
        .transpose()
}

fn duration_var<F>(var: &F, key: &str) -> Result<Option<Duration>, ConfigLoadError>
where
    F: Fn(&str) -> Option<String>,
{
    var(key)
        .map(|raw| parse_duration(key, &raw))
        .transpose()
}

/// Parses a humantime duration, naming `key` in the error.
pub(crate) fn parse_duration(
    key: &str,
    raw: &str,
) -> Result<Duration, ConfigLoadError> {
    humantime::parse_duration(raw.trim()).map_err(|err| {
        ConfigLoadError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
            reason: err.to_string(),
        }
    })
}
