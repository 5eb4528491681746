pub mod error;

use once_cell::sync::Lazy;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    models::{
        AcquireConfig, AuthConfig, CacheConfig, ClassifierConfig, Config,
        ConfigMetadata, FfmpegConfig, JanitorConfig, LimitsConfig, LockConfig,
        ServerConfig, TransformConfig, WorkerPoolConfig,
    },
    sources::{EnvConfig, FileConfig, FileWorkerPoolConfig, parse_duration},
    validation::{self, ConfigWarnings},
};
use error::ConfigLoadError;

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![PathBuf::from("vigil.toml"), PathBuf::from("config/vigil.toml")]
});

const DEFAULT_USER_AGENT: &str =
    concat!("vigil/", env!("CARGO_PKG_VERSION"));

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    /// Loads `.env`, then composes environment, file and defaults.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(
                |err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                },
            )?,
            None => {
                dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                })?
            }
        };

        self.resolve(EnvConfig::gather()?, env_file_loaded)
    }

    /// Composes `env` with the config file and defaults, without touching
    /// the process environment.
    pub fn load_from(&self, env: EnvConfig) -> Result<ConfigLoad, ConfigLoadError> {
        self.resolve(env, false)
    }

    fn resolve(
        &self,
        env: EnvConfig,
        env_file_loaded: bool,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let (file_config, config_path) = self.load_file_config(&env)?;
        let config_present = file_config.is_some();

        let config = compose_config(
            file_config.unwrap_or_default(),
            env,
            ConfigMetadata {
                config_path,
                env_file_loaded,
            },
        )?;

        let mut warnings = ConfigWarnings::default();
        if !config_present {
            warnings.push_with_hint(
                "No vigil.toml detected; using environment variables and defaults",
                "Pass --config or set VIGIL_CONFIG to load a configuration file",
            );
        }
        warnings.extend(validation::apply_guard_rails(&config)?);

        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let explicit = self
            .options
            .config_path
            .clone()
            .or_else(|| env.config_path.clone());

        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigLoadError::MissingConfig { path });
                }
                path
            }
            None => match DEFAULT_CONFIG_LOCATIONS
                .iter()
                .find(|candidate| candidate.exists())
            {
                Some(found) => found.clone(),
                None => return Ok((None, None)),
            },
        };

        let file_config = read_file_config(&path)?;
        Ok((Some(file_config), Some(path)))
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigLoadError> {
    let contents =
        fs::read_to_string(path).map_err(|err| ConfigLoadError::Io {
            path: path.to_path_buf(),
            source: err,
        })?;
    toml::from_str(&contents).map_err(|err| ConfigLoadError::Parse {
        path: path.to_path_buf(),
        source: err,
    })
}

fn compose_config(
    file: FileConfig,
    env: EnvConfig,
    metadata: ConfigMetadata,
) -> Result<Config, ConfigLoadError> {
    let FileConfig {
        server: file_server,
        auth: file_auth,
        acquire: file_acquire,
        limits: file_limits,
        cache: file_cache,
        locks: file_locks,
        ffmpeg: file_ffmpeg,
        transform: file_transform,
        classifier: file_classifier,
        janitor: file_janitor,
    } = file;

    let server = ServerConfig {
        host: env
            .server_host
            .or(file_server.host)
            .unwrap_or_else(|| "0.0.0.0".to_string()),
        port: env.server_port.or(file_server.port).unwrap_or(3000),
    };

    let auth = AuthConfig {
        bearer_token: env.bearer_token.or(file_auth.bearer_token),
    };

    let acquire = AcquireConfig {
        max_bytes: env
            .max_bytes
            .or(file_acquire.max_bytes)
            .unwrap_or(20 * 1024 * 1024),
        download_timeout: duration(
            env.download_timeout,
            "acquire.download_timeout",
            file_acquire.download_timeout,
            Duration::from_secs(30),
        )?,
        stream_timeout: duration(
            env.stream_timeout,
            "acquire.stream_timeout",
            file_acquire.stream_timeout,
            Duration::from_secs(20),
        )?,
        max_redirects: env
            .max_redirects
            .or(file_acquire.max_redirects)
            .unwrap_or(5),
        seek_offset: duration(
            env.seek_offset,
            "acquire.seek_offset",
            file_acquire.seek_offset,
            Duration::from_secs(1),
        )?,
        mode: env.storage_mode.or(file_acquire.mode).unwrap_or_default(),
        work_dir: env
            .work_dir
            .or(file_acquire.work_dir)
            .unwrap_or_else(|| std::env::temp_dir().join("vigil")),
        user_agent: env
            .user_agent
            .or(file_acquire.user_agent)
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
    };

    let limits = LimitsConfig {
        max_in_flight: env
            .max_in_flight
            .or(file_limits.max_in_flight)
            .unwrap_or(4),
    };

    let cache = CacheConfig {
        max_items: env
            .cache_max_items
            .or(file_cache.max_items)
            .unwrap_or(10_000),
        ttl: duration(
            env.cache_ttl,
            "cache.ttl",
            file_cache.ttl,
            Duration::from_secs(60 * 60),
        )?,
    };

    let locks = LockConfig {
        max_items: env
            .lock_max_items
            .or(file_locks.max_items)
            .unwrap_or(10_000),
        ttl: duration(
            env.lock_ttl,
            "locks.ttl",
            file_locks.ttl,
            Duration::from_secs(10 * 60),
        )?,
    };

    let ffmpeg = FfmpegConfig {
        ffmpeg_path: env
            .ffmpeg_path
            .or(file_ffmpeg.ffmpeg_path)
            .unwrap_or_else(|| "ffmpeg".to_string()),
    };

    let transform = TransformConfig {
        backend: env
            .transform_backend
            .or(file_transform.backend)
            .unwrap_or_default(),
        input_dimension: file_transform.input_dimension.unwrap_or(224),
        jpeg_quality: file_transform.jpeg_quality.unwrap_or(90),
        workers: worker_pool(
            "transform.workers",
            env.transform_min_workers,
            env.transform_max_workers,
            file_transform.workers,
            4,
        )?,
    };

    let classifier = ClassifierConfig {
        command: env
            .classifier_command
            .or(file_classifier.command)
            .unwrap_or_default(),
        flag_threshold: env
            .flag_threshold
            .or(file_classifier.flag_threshold)
            .unwrap_or(0.5),
        workers: worker_pool(
            "classifier.workers",
            env.classifier_min_workers,
            env.classifier_max_workers,
            file_classifier.workers,
            2,
        )?,
    };

    let janitor = JanitorConfig {
        interval: duration(
            None,
            "janitor.interval",
            file_janitor.interval,
            Duration::from_secs(5 * 60),
        )?,
        max_age: duration(
            None,
            "janitor.max_age",
            file_janitor.max_age,
            Duration::from_secs(15 * 60),
        )?,
    };

    Ok(Config {
        server,
        auth,
        acquire,
        limits,
        cache,
        locks,
        ffmpeg,
        transform,
        classifier,
        janitor,
        metadata,
    })
}

fn duration(
    env: Option<Duration>,
    key: &str,
    file: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigLoadError> {
    if let Some(value) = env {
        return Ok(value);
    }
    match file {
        Some(raw) => parse_duration(key, &raw),
        None => Ok(default),
    }
}

fn worker_pool(
    key: &str,
    env_min: Option<usize>,
    env_max: Option<usize>,
    file: FileWorkerPoolConfig,
    default_max: usize,
) -> Result<WorkerPoolConfig, ConfigLoadError> {
    Ok(WorkerPoolConfig {
        min_workers: env_min.or(file.min).unwrap_or(1),
        max_workers: env_max.or(file.max).unwrap_or(default_max),
        call_timeout: duration(
            None,
            &format!("{key}.call_timeout"),
            file.call_timeout,
            Duration::from_secs(30),
        )?,
    })
}
