//! Normalization of acquired images to the classifier's input format.

mod in_process;
mod pooled;

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::{
    cleanup::RequestScratch,
    error::{PipelineError, Result},
    media::MediaHandle,
    worker::WorkerError,
};

pub use in_process::{InProcessTranscoder, NormalizeSettings, normalize_image};
pub use pooled::PooledTranscoder;

/// Resize and re-encode an image for the classifier.
#[async_trait]
pub trait Transcoder: Send + Sync + 'static {
    async fn normalize(&self, data: Bytes, cancel: &CancellationToken) -> Result<Bytes>;

    /// File variant: read `input`, write the normalized image to `output`,
    /// return the bytes written.
    async fn normalize_file(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64>;
}

/// Normalize whatever the acquirer produced, keeping the storage mode:
/// memory in, memory out; file in, a new scratch file out.
pub async fn normalize_media(
    transcoder: &dyn Transcoder,
    media: &MediaHandle,
    scratch: &RequestScratch,
    cancel: &CancellationToken,
) -> Result<MediaHandle> {
    match media {
        MediaHandle::Memory(data) => transcoder
            .normalize(data.clone(), cancel)
            .await
            .map(MediaHandle::Memory),
        MediaHandle::File(input) => {
            let output = scratch.reserve("normalized", "jpg");
            transcoder.normalize_file(input, &output, cancel).await?;
            Ok(MediaHandle::File(output))
        }
    }
}

fn processing_error(err: WorkerError) -> PipelineError {
    match err {
        WorkerError::Cancelled => PipelineError::Cancelled,
        other => PipelineError::Processing(other.to_string()),
    }
}
