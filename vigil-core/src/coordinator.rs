use std::{path::PathBuf, sync::Arc};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;
use vigil_model::{
    CategoryScores, ClassifyRequest, ContentFingerprint, Provenance, RequestKind,
    ResultSource,
};

use crate::{
    acquire::{MediaAcquirer, is_video_url},
    cache::{CachedResult, KeyedLockRegistry, ResultCache},
    classify::{Classifier, score_media},
    cleanup::RequestScratch,
    error::{PipelineError, Result},
    limiter::ConcurrencyLimiter,
    transform::{Transcoder, normalize_media},
};

/// Coordinator knobs. The storage mode belongs to the [`MediaAcquirer`].
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// `porn + hentai` at or above this marks a result as flagged.
    pub flag_threshold: f32,
    /// Largest decoded inline payload accepted.
    pub max_inline_bytes: u64,
    /// Where request scratch files are created.
    pub work_dir: PathBuf,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            flag_threshold: 0.5,
            max_inline_bytes: 20 * 1024 * 1024,
            work_dir: std::env::temp_dir().join("vigil"),
        }
    }
}

/// Outcome of one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    /// Fingerprint of the request payload.
    pub fingerprint: ContentFingerprint,
    #[serde(flatten)]
    pub scores: CategoryScores,
    /// `cache`, or where fresh media came from.
    pub source: ResultSource,
}

impl Classification {
    fn from_cache(hit: &CachedResult) -> Self {
        Self {
            fingerprint: hit.fingerprint,
            scores: hit.scores,
            source: ResultSource::Cache,
        }
    }
}

/// A request that passed validation.
#[derive(Debug)]
enum Target {
    Remote { url: Url, video: bool },
    Inline(Bytes),
}

/// Drives one request from fingerprint to result.
///
/// Requests for the same fingerprint are serialized by the keyed lock and
/// all but the first are answered from the cache. Scratch files are purged
/// before the lock is released, on every path.
#[derive(Clone)]
pub struct RequestCoordinator {
    cache: ResultCache,
    locks: KeyedLockRegistry,
    acquirer: MediaAcquirer,
    transcoder: Arc<dyn Transcoder>,
    classifier: Arc<dyn Classifier>,
    settings: CoordinatorSettings,
}

impl std::fmt::Debug for RequestCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCoordinator")
            .field("cache", &self.cache)
            .field("locks", &self.locks)
            .field("acquirer", &self.acquirer)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl RequestCoordinator {
    /// Assemble a coordinator from explicitly constructed parts.
    pub fn new(
        cache: ResultCache,
        locks: KeyedLockRegistry,
        acquirer: MediaAcquirer,
        transcoder: Arc<dyn Transcoder>,
        classifier: Arc<dyn Classifier>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            cache,
            locks,
            acquirer,
            transcoder,
            classifier,
            settings,
        }
    }

    /// Result cache, exposed for health reporting.
    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Keyed lock registry, exposed for health reporting.
    pub fn locks(&self) -> &KeyedLockRegistry {
        &self.locks
    }

    /// The limiter shared with the acquirer.
    pub fn limiter(&self) -> &ConcurrencyLimiter {
        self.acquirer.limiter()
    }

    /// Settings this coordinator was built with.
    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    /// Classify `request`, honoring `cancel` at every suspend point.
    ///
    /// Invalid requests fail before any lock or cache access. Failures and
    /// cancellations are never cached.
    #[instrument(skip_all, fields(kind = %request.kind))]
    pub async fn handle(
        &self,
        request: ClassifyRequest,
        cancel: CancellationToken,
    ) -> Result<Classification> {
        let target = self.validate(&request)?;
        let fingerprint = request.fingerprint();

        if let Some(hit) = self.cache.get(&fingerprint).await {
            debug!(fingerprint = %fingerprint.short(), "cache hit");
            return Ok(Classification::from_cache(&hit));
        }

        let _guard = cancel
            .run_until_cancelled(self.locks.acquire(fingerprint))
            .await
            .ok_or(PipelineError::Cancelled)?;

        // Whoever held the lock before us may have just filled the cache.
        if let Some(hit) = self.cache.get(&fingerprint).await {
            debug!(fingerprint = %fingerprint.short(), "cache hit after lock wait");
            return Ok(Classification::from_cache(&hit));
        }

        let scratch = RequestScratch::new(&self.settings.work_dir);
        let outcome = self.run_pipeline(&target, &scratch, &cancel).await;

        let report = scratch.purge().await;
        if report.failed > 0 {
            warn!(
                fingerprint = %fingerprint.short(),
                failed = report.failed,
                "some temp files could not be removed"
            );
        }

        let (scores, provenance) = match outcome {
            Ok(done) => done,
            Err(err) => {
                if err.is_cancelled() {
                    info!(fingerprint = %fingerprint.short(), "request cancelled");
                } else {
                    warn!(
                        fingerprint = %fingerprint.short(),
                        error = %err,
                        "classification failed"
                    );
                }
                return Err(err);
            }
        };
        if cancel.is_cancelled() {
            info!(fingerprint = %fingerprint.short(), "request cancelled before caching");
            return Err(PipelineError::Cancelled);
        }

        let stored = self.cache.insert(fingerprint, scores).await;
        info!(
            fingerprint = %fingerprint.short(),
            source = %provenance,
            top_label = %stored.scores.top_label,
            flagged = stored.scores.flagged,
            "classified"
        );
        Ok(Classification {
            fingerprint,
            scores: stored.scores,
            source: ResultSource::Fresh(provenance),
        })
    }

    async fn run_pipeline(
        &self,
        target: &Target,
        scratch: &RequestScratch,
        cancel: &CancellationToken,
    ) -> Result<(CategoryScores, Provenance)> {
        let acquired = match target {
            Target::Remote { url, video } => {
                self.acquirer.acquire(url, *video, scratch, cancel).await?
            }
            Target::Inline(data) => {
                self.acquirer.adopt_inline(data.clone(), scratch).await?
            }
        };

        let normalized =
            normalize_media(self.transcoder.as_ref(), &acquired.media, scratch, cancel)
                .await?;
        let probabilities =
            score_media(self.classifier.as_ref(), &normalized, cancel).await?;

        Ok((
            CategoryScores::derive(probabilities, self.settings.flag_threshold),
            acquired.provenance,
        ))
    }

    fn validate(&self, request: &ClassifyRequest) -> Result<Target> {
        match request.kind {
            RequestKind::Url => {
                let url = Url::parse(request.value.trim()).map_err(|err| {
                    PipelineError::Validation(format!("invalid URL: {err}"))
                })?;
                if !matches!(url.scheme(), "http" | "https") {
                    return Err(PipelineError::Validation(format!(
                        "unsupported URL scheme `{}`",
                        url.scheme()
                    )));
                }
                if url.host_str().is_none_or(str::is_empty) {
                    return Err(PipelineError::Validation("URL has no host".into()));
                }
                let video = request.video.unwrap_or_else(|| is_video_url(&url));
                Ok(Target::Remote { url, video })
            }
            RequestKind::Data => {
                let decoded = STANDARD.decode(request.value.trim()).map_err(|err| {
                    PipelineError::Validation(format!("invalid base64 payload: {err}"))
                })?;
                if decoded.is_empty() {
                    return Err(PipelineError::Validation("payload is empty".into()));
                }
                if decoded.len() as u64 > self.settings.max_inline_bytes {
                    return Err(PipelineError::Validation(format!(
                        "payload exceeds {} bytes",
                        self.settings.max_inline_bytes
                    )));
                }
                Ok(Target::Inline(Bytes::from(decoded)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        acquire::AcquireLimits,
        extract::{ExtractError, FrameExtractor},
        fetch::{BodyStream, FetchError, FetchRequest, FetchResponse, Fetcher},
    };
    use async_trait::async_trait;
    use mockall::mock;
    use std::{path::Path, time::Duration};
    use vigil_model::{Category, Probabilities, StorageMode};

    mock! {
        Transcoder {}
        #[async_trait]
        impl Transcoder for Transcoder {
            async fn normalize(&self, data: Bytes, cancel: &CancellationToken) -> Result<Bytes>;
            async fn normalize_file(
                &self,
                input: &Path,
                output: &Path,
                cancel: &CancellationToken,
            ) -> Result<u64>;
        }
    }

    mock! {
        Classifier {}
        #[async_trait]
        impl Classifier for Classifier {
            async fn score(&self, data: Bytes, cancel: &CancellationToken) -> Result<Probabilities>;
            async fn score_file(
                &self,
                path: &Path,
                cancel: &CancellationToken,
            ) -> Result<Probabilities>;
        }
    }

    struct Offline;

    #[async_trait]
    impl Fetcher for Offline {
        async fn send(
            &self,
            request: FetchRequest,
        ) -> std::result::Result<FetchResponse, FetchError> {
            Err(FetchError::Transport {
                url: request.url.to_string(),
                message: "offline".into(),
            })
        }
    }

    struct NoFrames;

    #[async_trait]
    impl FrameExtractor for NoFrames {
        async fn from_stream(
            &self,
            _input: BodyStream,
            _max_input: u64,
            _cancel: &CancellationToken,
        ) -> std::result::Result<Bytes, ExtractError> {
            Err(ExtractError::NoFrame)
        }

        async fn from_bytes(
            &self,
            _input: Bytes,
            _cancel: &CancellationToken,
        ) -> std::result::Result<Bytes, ExtractError> {
            Err(ExtractError::NoFrame)
        }

        async fn from_file(
            &self,
            _input: &Path,
            _output: &Path,
            _cancel: &CancellationToken,
        ) -> std::result::Result<(), ExtractError> {
            Err(ExtractError::NoFrame)
        }
    }

    const PAYLOAD: &str = "aW1hZ2UtYnl0ZXM="; // "image-bytes"

    fn probabilities() -> Probabilities {
        Probabilities {
            drawing: 0.05,
            hentai: 0.05,
            neutral: 0.7,
            porn: 0.1,
            sexy: 0.1,
        }
    }

    fn coordinator(
        transcoder: MockTranscoder,
        classifier: MockClassifier,
        work_dir: &Path,
    ) -> RequestCoordinator {
        let acquirer = MediaAcquirer::new(
            Arc::new(Offline),
            Arc::new(NoFrames),
            ConcurrencyLimiter::new(2),
            AcquireLimits::default(),
            StorageMode::Memory,
        );
        RequestCoordinator::new(
            ResultCache::new(100, Duration::from_secs(60)),
            KeyedLockRegistry::new(100, Duration::from_secs(60)),
            acquirer,
            Arc::new(transcoder),
            Arc::new(classifier),
            CoordinatorSettings {
                max_inline_bytes: 64,
                work_dir: work_dir.to_path_buf(),
                ..CoordinatorSettings::default()
            },
        )
    }

    #[tokio::test]
    async fn invalid_requests_never_touch_locks_or_cache() {
        let dir = tempfile::tempdir().expect("tempdir");
        let coordinator =
            coordinator(MockTranscoder::new(), MockClassifier::new(), dir.path());

        for request in [
            ClassifyRequest::url("ftp://example.com/a.jpg"),
            ClassifyRequest::url("not a url"),
            ClassifyRequest::data(""),
            ClassifyRequest::data("!!!not-base64!!!"),
            ClassifyRequest::data(STANDARD.encode([0u8; 65])),
        ] {
            let err = coordinator
                .handle(request.clone(), CancellationToken::new())
                .await
                .expect_err("invalid");
            assert!(matches!(err, PipelineError::Validation(_)), "{request:?}: {err:?}");
        }
        assert!(coordinator.locks().is_empty());
        assert!(coordinator.cache().is_empty().await);
    }

    #[tokio::test]
    async fn inline_payload_is_classified_once_then_cached() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut transcoder = MockTranscoder::new();
        transcoder
            .expect_normalize()
            .times(1)
            .withf(|data, _| &data[..] == b"image-bytes")
            .returning(|_, _| Ok(Bytes::from_static(b"normalized")));
        let mut classifier = MockClassifier::new();
        classifier
            .expect_score()
            .times(1)
            .withf(|data, _| &data[..] == b"normalized")
            .returning(|_, _| Ok(probabilities()));
        let coordinator = coordinator(transcoder, classifier, dir.path());

        let first = coordinator
            .handle(ClassifyRequest::data(PAYLOAD), CancellationToken::new())
            .await
            .expect("first");
        assert_eq!(first.source, ResultSource::Fresh(Provenance::Inline));
        assert_eq!(first.scores.top_label, Category::Neutral);
        assert!(!first.scores.flagged);
        assert_eq!(first.scores.scores, probabilities());

        let second = coordinator
            .handle(ClassifyRequest::data(PAYLOAD), CancellationToken::new())
            .await
            .expect("second");
        assert_eq!(second.source, ResultSource::Cache);
        assert_eq!(second.scores, first.scores);
        assert_eq!(second.fingerprint, first.fingerprint);
    }

    #[tokio::test]
    async fn failures_are_not_cached_and_release_the_lock() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut transcoder = MockTranscoder::new();
        transcoder
            .expect_normalize()
            .times(2)
            .returning(|data, _| Ok(data));
        let mut classifier = MockClassifier::new();
        classifier
            .expect_score()
            .times(2)
            .returning(|_, _| Err(PipelineError::Classification("model offline".into())));
        let coordinator = coordinator(transcoder, classifier, dir.path());

        for _ in 0..2 {
            let err = tokio::time::timeout(
                Duration::from_secs(5),
                coordinator.handle(ClassifyRequest::data(PAYLOAD), CancellationToken::new()),
            )
            .await
            .expect("lock was released")
            .expect_err("classification fails");
            assert!(err.to_string().contains("model offline"));
        }
        assert!(coordinator.cache().is_empty().await);
    }

    #[tokio::test]
    async fn cancellation_mid_pipeline_is_not_cached() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let mut transcoder = MockTranscoder::new();
        transcoder.expect_normalize().times(1).returning(move |_, _| {
            trigger.cancel();
            Err(PipelineError::Cancelled)
        });
        let coordinator = coordinator(transcoder, MockClassifier::new(), dir.path());

        let err = coordinator
            .handle(ClassifyRequest::data(PAYLOAD), cancel)
            .await
            .expect_err("cancelled");
        assert!(err.is_cancelled());
        assert!(coordinator.cache().is_empty().await);
    }

    #[tokio::test]
    async fn file_mode_normalized_output_is_purged() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut transcoder = MockTranscoder::new();
        transcoder
            .expect_normalize_file()
            .times(1)
            .returning(|input, output, _| {
                let data = std::fs::read(input).expect("inline file exists");
                std::fs::write(output, &data).expect("write output");
                Ok(data.len() as u64)
            });
        let mut classifier = MockClassifier::new();
        classifier
            .expect_score_file()
            .times(1)
            .returning(|path, _| {
                assert!(path.exists());
                Ok(probabilities())
            });

        let acquirer = MediaAcquirer::new(
            Arc::new(Offline),
            Arc::new(NoFrames),
            ConcurrencyLimiter::new(1),
            AcquireLimits::default(),
            StorageMode::File,
        );
        let coordinator = RequestCoordinator::new(
            ResultCache::new(10, Duration::from_secs(60)),
            KeyedLockRegistry::new(10, Duration::from_secs(60)),
            acquirer,
            Arc::new(transcoder),
            Arc::new(classifier),
            CoordinatorSettings {
                work_dir: dir.path().to_path_buf(),
                ..CoordinatorSettings::default()
            },
        );

        coordinator
            .handle(ClassifyRequest::data(PAYLOAD), CancellationToken::new())
            .await
            .expect("classified");
        let leftovers = std::fs::read_dir(dir.path()).expect("read dir").count();
        assert_eq!(leftovers, 0);
    }
}
