//! Configuration for Vigil.
//!
//! Values are resolved in order: environment variables (optionally seeded
//! from a `.env` file), then a TOML config file, then built-in defaults.
//! The composed [`Config`] is checked by guard rails that either reject it
//! or attach [`ConfigWarnings`].

pub mod loader;
pub mod models;
pub mod sources;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoader, ConfigLoaderOptions, error::ConfigLoadError};
pub use models::{
    AcquireConfig, AuthConfig, CacheConfig, ClassifierConfig, Config, ConfigMetadata,
    FfmpegConfig, JanitorConfig, LimitsConfig, LockConfig, ServerConfig, TransformBackend,
    TransformConfig, WorkerPoolConfig,
};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
