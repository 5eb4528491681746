use std::{fmt, path::PathBuf, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use vigil_model::StorageMode;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub acquire: AcquireConfig,
    pub limits: LimitsConfig,
    pub cache: CacheConfig,
    pub locks: LockConfig,
    pub ffmpeg: FfmpegConfig,
    pub transform: TransformConfig,
    pub classifier: ClassifierConfig,
    pub janitor: JanitorConfig,
    pub metadata: ConfigMetadata,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Clone, Default)]
pub struct AuthConfig {
    /// Shared secret for `Authorization: Bearer`. `None` disables auth.
    pub bearer_token: Option<String>,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field(
                "bearer_token",
                &self.bearer_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct AcquireConfig {
    pub max_bytes: u64,
    pub download_timeout: Duration,
    pub stream_timeout: Duration,
    pub max_redirects: usize,
    /// Where in the video the extracted frame is taken.
    pub seek_offset: Duration,
    pub mode: StorageMode,
    pub work_dir: PathBuf,
    pub user_agent: String,
}

#[derive(Debug, Clone, Copy)]
pub struct LimitsConfig {
    /// Concurrent video sub-steps across all requests.
    pub max_in_flight: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub max_items: u64,
    pub ttl: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct LockConfig {
    pub max_items: u64,
    pub ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct FfmpegConfig {
    pub ffmpeg_path: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformBackend {
    /// Resize on the server's blocking thread pool.
    #[default]
    InProcess,
    /// Dispatch to `vigil-server worker` processes.
    Workers,
}

impl FromStr for TransformBackend {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "in_process" | "inprocess" => Ok(TransformBackend::InProcess),
            "workers" | "worker" => Ok(TransformBackend::Workers),
            other => Err(format!("unknown transform backend `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    pub call_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct TransformConfig {
    pub backend: TransformBackend,
    pub input_dimension: u32,
    pub jpeg_quality: u8,
    pub workers: WorkerPoolConfig,
}

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Program and arguments of the model worker.
    pub command: Vec<String>,
    pub flag_threshold: f32,
    pub workers: WorkerPoolConfig,
}

#[derive(Debug, Clone, Copy)]
pub struct JanitorConfig {
    pub interval: Duration,
    pub max_age: Duration,
}

/// Where the configuration came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}
