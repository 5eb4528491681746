//! Media acquisition: one bounded download for images, a three-tier
//! fallback for video.
//!
//! Video tiers, cheapest first:
//!
//! 1. stream the GET body straight into the frame extractor;
//! 2. HEAD for the size, buffer the whole resource (or a prefix of
//!    `max_bytes`) in memory, extract from the buffer;
//! 3. same range plan streamed to a temp file, extract from the file.
//!
//! Tier 1 and 2 failures are logged and fall through. Only a tier 3
//! failure reaches the caller, tagged with its [`AcquireStage`].
//!
//! The acquirer never deletes anything. Every path it creates is reserved
//! through the caller's [`RequestScratch`], which owns cleanup.

mod download;
mod tiers;

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;
use vigil_model::{Provenance, StorageMode};

use crate::{
    cleanup::RequestScratch,
    error::{AcquireError, AcquireStage, PipelineError, Result},
    extract::FrameExtractor,
    fetch::{FetchError, Fetcher},
    limiter::ConcurrencyLimiter,
    media::{AcquiredMedia, MediaHandle},
};

const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "m4v", "mov", "webm", "mkv", "avi", "wmv", "flv", "mpeg", "mpg",
    "3gp", "ts",
];

/// Size and time bounds applied to every acquisition.
#[derive(Debug, Clone, Copy)]
pub struct AcquireLimits {
    /// Hard cap on bytes pulled for one resource.
    pub max_bytes: u64,
    /// Wall clock for a buffered or file download, redirects included.
    pub download_timeout: Duration,
    /// Wall clock for tier 1 streaming extraction.
    pub stream_timeout: Duration,
    /// Redirect hops followed before giving up.
    pub max_redirects: usize,
}

impl Default for AcquireLimits {
    fn default() -> Self {
        Self {
            max_bytes: 20 * 1024 * 1024,
            download_timeout: Duration::from_secs(30),
            stream_timeout: Duration::from_secs(20),
            max_redirects: 5,
        }
    }
}

/// Turns a URL or an inline payload into one classifiable image, in the
/// configured [`StorageMode`].
#[derive(Clone)]
pub struct MediaAcquirer {
    fetcher: Arc<dyn Fetcher>,
    extractor: Arc<dyn FrameExtractor>,
    limiter: ConcurrencyLimiter,
    limits: AcquireLimits,
    mode: StorageMode,
}

impl std::fmt::Debug for MediaAcquirer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaAcquirer")
            .field("limiter", &self.limiter)
            .field("limits", &self.limits)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

/// Whether the URL path ends in a known video container extension.
pub fn is_video_url(url: &Url) -> bool {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
}

impl MediaAcquirer {
    /// Build an acquirer that shares `limiter` with the rest of the pipeline.
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        extractor: Arc<dyn FrameExtractor>,
        limiter: ConcurrencyLimiter,
        limits: AcquireLimits,
        mode: StorageMode,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            limiter,
            limits,
            mode,
        }
    }

    /// Size and time bounds in effect.
    pub fn limits(&self) -> &AcquireLimits {
        &self.limits
    }

    /// Whether media is kept in memory or on disk.
    pub fn mode(&self) -> StorageMode {
        self.mode
    }

    /// Gate for the expensive video sub-steps.
    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// Fetch `url` and return one classifiable image.
    pub async fn acquire(
        &self,
        url: &Url,
        is_video: bool,
        scratch: &RequestScratch,
        cancel: &CancellationToken,
    ) -> Result<AcquiredMedia> {
        if is_video {
            return self.acquire_video(url, scratch, cancel).await;
        }

        debug!(%url, mode = %self.mode, "downloading image");
        let media = match self.mode {
            StorageMode::Memory => self
                .download_to_memory(url, cancel)
                .await
                .map(MediaHandle::Memory),
            StorageMode::File => {
                let path = scratch.reserve("image", "bin");
                self.download_to_file(url, &path, cancel)
                    .await
                    .map(|_| MediaHandle::File(path))
            }
        }
        .map_err(|err| PipelineError::acquisition(AcquireStage::Download, err))?;

        Ok(AcquiredMedia::new(media, Provenance::Direct))
    }

    /// Wrap an already decoded inline payload.
    pub async fn adopt_inline(
        &self,
        data: Bytes,
        scratch: &RequestScratch,
    ) -> Result<AcquiredMedia> {
        let media = match self.mode {
            StorageMode::Memory => MediaHandle::Memory(data),
            StorageMode::File => {
                let path = scratch.reserve("inline", "bin");
                tokio::fs::write(&path, &data).await.map_err(|err| {
                    PipelineError::acquisition(
                        AcquireStage::InlineStore,
                        AcquireError::Io(err),
                    )
                })?;
                MediaHandle::File(path)
            }
        };
        Ok(AcquiredMedia::new(media, Provenance::Inline))
    }

    async fn acquire_video(
        &self,
        url: &Url,
        scratch: &RequestScratch,
        cancel: &CancellationToken,
    ) -> Result<AcquiredMedia> {
        let frame = match self.stream_extract(url, cancel).await {
            Ok(frame) => Some((frame, Provenance::StreamExtract)),
            Err(err) if err.is_cancelled() => return Err(PipelineError::Cancelled),
            Err(err) => {
                tiers::log_fallback(Provenance::StreamExtract, url, &err);
                None
            }
        };

        let frame = match frame {
            Some(frame) => Some(frame),
            None => match self.buffered_range(url, cancel).await {
                Ok(frame) => Some((frame, Provenance::BufferedRange)),
                Err(err) if err.is_cancelled() => {
                    return Err(PipelineError::Cancelled);
                }
                Err(err) => {
                    tiers::log_fallback(Provenance::BufferedRange, url, &err);
                    None
                }
            },
        };

        if let Some((frame, provenance)) = frame {
            info!(%url, tier = %provenance, bytes = frame.len(), "video frame acquired");
            let media = self.materialize(frame, scratch).await.map_err(|err| {
                PipelineError::acquisition(AcquireStage::InlineStore, err)
            })?;
            return Ok(AcquiredMedia::new(media, provenance));
        }

        let media = self.temp_file_extract(url, scratch, cancel).await?;
        info!(%url, tier = %Provenance::TempFile, "video frame acquired");
        Ok(AcquiredMedia::new(media, Provenance::TempFile))
    }

    /// In file mode, park an in-memory frame in the scratch dir so every
    /// downstream stage sees a path.
    async fn materialize(
        &self,
        frame: Bytes,
        scratch: &RequestScratch,
    ) -> std::result::Result<MediaHandle, AcquireError> {
        match self.mode {
            StorageMode::Memory => Ok(MediaHandle::Memory(frame)),
            StorageMode::File => {
                let path = scratch.reserve("frame", "jpg");
                tokio::fs::write(&path, &frame).await?;
                Ok(MediaHandle::File(path))
            }
        }
    }

    /// Run `task` under the global limiter, giving up on cancellation.
    async fn limited<T, F>(
        &self,
        cancel: &CancellationToken,
        task: F,
    ) -> std::result::Result<T, AcquireError>
    where
        F: Future<Output = std::result::Result<T, AcquireError>>,
    {
        self.limiter
            .run_cancellable(cancel, task)
            .await
            .unwrap_or(Err(AcquireError::Cancelled))
    }

    /// Bound `task` by `timeout` and by `cancel`.
    async fn guarded<T, F>(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
        task: F,
    ) -> std::result::Result<T, AcquireError>
    where
        F: Future<Output = std::result::Result<T, AcquireError>>,
    {
        match cancel
            .run_until_cancelled(tokio::time::timeout(timeout, task))
            .await
        {
            None => Err(AcquireError::Cancelled),
            Some(Err(_elapsed)) => Err(FetchError::Timeout(timeout).into()),
            Some(Ok(outcome)) => outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_detection_uses_the_path_extension() {
        let video = |s: &str| is_video_url(&Url::parse(s).expect("url"));
        assert!(video("https://cdn.example/clip.MP4"));
        assert!(video("https://cdn.example/a/b/movie.webm?sig=abc"));
        assert!(!video("https://cdn.example/animated.gif"));
        assert!(!video("https://cdn.example/photo.jpg"));
        assert!(!video("https://cdn.example/"));
        assert!(!video("https://cdn.example/mp4"));
    }
}
