//! Single-frame extraction from video input via an external binary.

mod ffmpeg;

use std::{io, path::Path, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::fetch::{BodyStream, FetchError};

pub use ffmpeg::FfmpegFrameExtractor;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("failed to spawn frame extractor: {0}")]
    Spawn(#[source] io::Error),

    #[error("frame extractor exited with {code:?}: {stderr}")]
    Exit { code: Option<i32>, stderr: String },

    #[error("frame extractor produced no frame")]
    NoFrame,

    #[error("frame extraction timed out after {0:?}")]
    Timeout(Duration),

    #[error("input stream failed: {0}")]
    Input(#[source] FetchError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("frame extraction cancelled")]
    Cancelled,
}

/// Pulls one encoded frame out of a video. Every method must abort the
/// underlying process promptly when `cancel` fires.
#[async_trait]
pub trait FrameExtractor: Send + Sync + 'static {
    /// Pipe `input` into the extractor, feeding at most `max_input` bytes.
    /// The extractor closing its input early once it has a frame is not an
    /// error.
    async fn from_stream(
        &self,
        input: BodyStream,
        max_input: u64,
        cancel: &CancellationToken,
    ) -> Result<Bytes, ExtractError>;

    /// Extract from a complete in-memory buffer.
    async fn from_bytes(
        &self,
        input: Bytes,
        cancel: &CancellationToken,
    ) -> Result<Bytes, ExtractError>;

    /// Extract from `input` on disk, writing the frame to `output`.
    async fn from_file(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), ExtractError>;
}
