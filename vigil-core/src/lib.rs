//! Vigil core: the concurrent media acquisition and classification
//! pipeline.
//!
//! A [`RequestCoordinator`] owns one request end to end. It fingerprints
//! the input, serializes duplicate requests through the
//! [`KeyedLockRegistry`], answers repeats from the [`ResultCache`], and on
//! a miss drives the [`MediaAcquirer`], a [`Transcoder`] and a
//! [`Classifier`]. Every temp path a request creates is recorded in its
//! [`RequestScratch`] and purged before the keyed lock is released.
//!
//! CPU-heavy work is bounded twice: the global [`ConcurrencyLimiter`]
//! gates video acquisition sub-steps, and the proxies dispatch to
//! independently sized [`WorkerPool`]s.

pub mod acquire;
pub mod cache;
pub mod classify;
pub mod cleanup;
pub mod coordinator;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod limiter;
pub mod media;
pub mod transform;
pub mod worker;

pub use acquire::{AcquireLimits, MediaAcquirer};
pub use cache::{CachedResult, KeyedLockGuard, KeyedLockRegistry, ResultCache};
pub use classify::{Classifier, PooledClassifier};
pub use cleanup::{PurgeReport, RequestScratch, TempJanitor};
pub use coordinator::{Classification, CoordinatorSettings, RequestCoordinator};
pub use error::{AcquireError, AcquireStage, PipelineError, Result};
pub use extract::{ExtractError, FfmpegFrameExtractor, FrameExtractor};
pub use fetch::{Fetcher, HttpFetcher};
pub use limiter::ConcurrencyLimiter;
pub use media::{AcquiredMedia, MediaHandle};
pub use transform::{
    InProcessTranscoder, NormalizeSettings, PooledTranscoder, Transcoder,
};
pub use worker::{PoolSettings, WorkerCommand, WorkerError, WorkerPool};
