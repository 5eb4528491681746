//! Scoring of normalized images against the content model.

mod pooled;

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use vigil_model::Probabilities;

use crate::{error::Result, media::MediaHandle};

pub use pooled::PooledClassifier;

/// Opaque model capability. Probabilities come back exactly as the model
/// produced them.
#[async_trait]
pub trait Classifier: Send + Sync + 'static {
    async fn score(&self, data: Bytes, cancel: &CancellationToken) -> Result<Probabilities>;

    async fn score_file(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<Probabilities>;
}

/// Score a normalized image wherever it lives.
pub async fn score_media(
    classifier: &dyn Classifier,
    media: &MediaHandle,
    cancel: &CancellationToken,
) -> Result<Probabilities> {
    match media {
        MediaHandle::Memory(data) => classifier.score(data.clone(), cancel).await,
        MediaHandle::File(path) => classifier.score_file(path, cancel).await,
    }
}
