use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;
use vigil_model::{Provenance, StorageMode};

use super::{MediaAcquirer, download::expect_body};
use crate::{
    cleanup::RequestScratch,
    error::{AcquireError, AcquireStage, PipelineError, Result},
    fetch::FetchRequest,
    media::MediaHandle,
};

pub(super) fn log_fallback(tier: Provenance, url: &Url, err: &AcquireError) {
    warn!(%url, %tier, error = %err, "video acquisition tier failed, falling back");
}

impl MediaAcquirer {
    /// Tier 1: pipe the GET body into the extractor without buffering.
    pub(super) async fn stream_extract(
        &self,
        url: &Url,
        cancel: &CancellationToken,
    ) -> std::result::Result<Bytes, AcquireError> {
        let timeout = self.limits.stream_timeout;
        self.limited(
            cancel,
            self.guarded(cancel, timeout, async {
                let request = FetchRequest::get(url.clone()).with_timeout(timeout);
                let (resolved, response) = self.send_following(request, cancel).await?;
                expect_body(&response)?;
                debug!(url = %resolved, "streaming into frame extractor");
                let frame = self
                    .extractor
                    .from_stream(response.body, self.limits.max_bytes, cancel)
                    .await?;
                Ok(frame)
            }),
        )
        .await
    }

    /// Tier 2: HEAD, buffer the planned range, extract from the buffer.
    pub(super) async fn buffered_range(
        &self,
        url: &Url,
        cancel: &CancellationToken,
    ) -> std::result::Result<Bytes, AcquireError> {
        let (resolved, plan) = self.plan_range(url, cancel).await?;
        let buffer = self
            .limited(cancel, self.download_range(&resolved, plan, cancel))
            .await?;
        debug!(url = %resolved, bytes = buffer.len(), "buffered video prefix");
        self.limited(cancel, async {
            Ok(self.extractor.from_bytes(buffer, cancel).await?)
        })
        .await
    }

    /// Tier 3: download to a temp file, extract to another temp file.
    ///
    /// Both paths are reserved before either is written so they are purged
    /// whichever step fails.
    pub(super) async fn temp_file_extract(
        &self,
        url: &Url,
        scratch: &RequestScratch,
        cancel: &CancellationToken,
    ) -> Result<MediaHandle> {
        let video_path = scratch.reserve("video", "bin");
        let frame_path = scratch.reserve("frame", "jpg");

        let download = async {
            let (resolved, plan) = self.plan_range(url, cancel).await?;
            self.limited(
                cancel,
                self.download_range_to_file(&resolved, plan, &video_path, cancel),
            )
            .await
        };
        let written = download.await.map_err(|err| {
            PipelineError::acquisition(AcquireStage::FinalDownload, err)
        })?;
        debug!(%url, bytes = written, path = %video_path.display(), "video saved");

        self.limited(cancel, async {
            Ok(self
                .extractor
                .from_file(&video_path, &frame_path, cancel)
                .await?)
        })
        .await
        .map_err(|err| PipelineError::acquisition(AcquireStage::FinalScreenshot, err))?;

        match self.mode {
            StorageMode::File => Ok(MediaHandle::File(frame_path)),
            StorageMode::Memory => {
                let frame = tokio::fs::read(&frame_path).await.map_err(|err| {
                    PipelineError::acquisition(
                        AcquireStage::FinalRead,
                        AcquireError::Io(err),
                    )
                })?;
                Ok(MediaHandle::Memory(Bytes::from(frame)))
            }
        }
    }
}
