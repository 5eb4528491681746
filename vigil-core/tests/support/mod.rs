#![allow(dead_code)]

use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::{
    StatusCode,
    header::{self, HeaderMap, HeaderValue},
};
use tokio_util::sync::CancellationToken;
use vigil_core::{
    AcquireLimits, Classifier, ConcurrencyLimiter, CoordinatorSettings, ExtractError,
    FrameExtractor, KeyedLockRegistry, MediaAcquirer, PipelineError, RequestCoordinator,
    ResultCache, Transcoder,
    fetch::{BodyStream, ByteRange, FetchError, FetchMethod, FetchRequest, FetchResponse, Fetcher},
};
use vigil_model::{Probabilities, StorageMode};

pub type Responder =
    Arc<dyn Fn(&FetchRequest) -> Result<FetchResponse, FetchError> + Send + Sync>;

struct Route {
    method: FetchMethod,
    url: String,
    delay: Option<Duration>,
    respond: Responder,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    pub method: FetchMethod,
    pub url: String,
    pub range: Option<ByteRange>,
}

/// Fetcher answering from a fixed route table. Unrouted requests get 404.
#[derive(Default)]
pub struct ScriptedFetcher {
    routes: Mutex<Vec<Route>>,
    log: Mutex<Vec<Recorded>>,
}

impl ScriptedFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn route(
        &self,
        method: FetchMethod,
        url: &str,
        respond: impl Fn(&FetchRequest) -> Result<FetchResponse, FetchError>
        + Send
        + Sync
        + 'static,
    ) {
        self.routes.lock().push(Route {
            method,
            url: url.to_string(),
            delay: None,
            respond: Arc::new(respond),
        });
    }

    pub fn route_delayed(
        &self,
        method: FetchMethod,
        url: &str,
        delay: Duration,
        respond: impl Fn(&FetchRequest) -> Result<FetchResponse, FetchError>
        + Send
        + Sync
        + 'static,
    ) {
        self.routes.lock().push(Route {
            method,
            url: url.to_string(),
            delay: Some(delay),
            respond: Arc::new(respond),
        });
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.log.lock().clone()
    }

    pub fn count(&self, method: FetchMethod) -> usize {
        self.log.lock().iter().filter(|r| r.method == method).count()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn send(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        self.log.lock().push(Recorded {
            method: request.method,
            url: request.url.to_string(),
            range: request.range,
        });
        let route = {
            let routes = self.routes.lock();
            routes
                .iter()
                .find(|r| r.method == request.method && r.url == request.url.as_str())
                .map(|r| (r.delay, Arc::clone(&r.respond)))
        };
        match route {
            Some((delay, respond)) => {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                respond(&request)
            }
            None => Ok(FetchResponse::empty(StatusCode::NOT_FOUND, HeaderMap::new())),
        }
    }
}

fn length_header(len: usize) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len as u64));
    headers
}

/// 200 with `data` split into small chunks and a matching Content-Length.
pub fn body(data: &'static [u8]) -> impl Fn(&FetchRequest) -> Result<FetchResponse, FetchError> {
    move |_: &FetchRequest| {
        let chunks = data
            .chunks(4)
            .map(|c| Ok(Bytes::from_static(c)))
            .collect();
        Ok(FetchResponse::from_chunks(StatusCode::OK, length_header(data.len()), chunks))
    }
}

/// Body whose Content-Length understates what is actually sent.
pub fn lying_body(
    data: &'static [u8],
    declared: usize,
) -> impl Fn(&FetchRequest) -> Result<FetchResponse, FetchError> {
    move |_: &FetchRequest| {
        Ok(FetchResponse::from_chunks(
            StatusCode::OK,
            length_header(declared),
            vec![Ok(Bytes::from_static(data))],
        ))
    }
}

/// HEAD answer declaring `len` bytes.
pub fn head(len: usize) -> impl Fn(&FetchRequest) -> Result<FetchResponse, FetchError> {
    move |_: &FetchRequest| Ok(FetchResponse::empty(StatusCode::OK, length_header(len)))
}

pub fn status(code: u16) -> impl Fn(&FetchRequest) -> Result<FetchResponse, FetchError> {
    move |_: &FetchRequest| {
        let status = StatusCode::from_u16(code).expect("valid status");
        Ok(FetchResponse::empty(status, HeaderMap::new()))
    }
}

pub fn redirect(
    location: &'static str,
) -> impl Fn(&FetchRequest) -> Result<FetchResponse, FetchError> {
    move |_: &FetchRequest| {
        let mut headers = HeaderMap::new();
        headers.insert(header::LOCATION, HeaderValue::from_static(location));
        Ok(FetchResponse::empty(StatusCode::FOUND, headers))
    }
}

pub fn transport_error() -> impl Fn(&FetchRequest) -> Result<FetchResponse, FetchError> {
    |request: &FetchRequest| {
        Err(FetchError::Transport {
            url: request.url.to_string(),
            message: "connection reset".into(),
        })
    }
}

/// First call gets `first`, every later call gets `rest`.
pub fn first_then(
    first: impl Fn(&FetchRequest) -> Result<FetchResponse, FetchError> + Send + Sync + 'static,
    rest: impl Fn(&FetchRequest) -> Result<FetchResponse, FetchError> + Send + Sync + 'static,
) -> impl Fn(&FetchRequest) -> Result<FetchResponse, FetchError> + Send + Sync + 'static {
    let calls = AtomicUsize::new(0);
    move |request: &FetchRequest| {
        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
            first(request)
        } else {
            rest(request)
        }
    }
}

#[derive(Debug, Clone)]
pub enum Behavior {
    Frame(&'static [u8]),
    Fail,
    /// Block until cancelled.
    Hang,
}

/// Frame extractor with a fixed behavior per entry point.
#[derive(Debug)]
pub struct FakeExtractor {
    pub stream: Behavior,
    pub bytes: Behavior,
    pub file: Behavior,
    pub stream_calls: AtomicUsize,
    pub bytes_calls: AtomicUsize,
    pub file_calls: AtomicUsize,
    pub buffered_sizes: Mutex<Vec<usize>>,
}

impl FakeExtractor {
    pub fn new(stream: Behavior, bytes: Behavior, file: Behavior) -> Arc<Self> {
        Arc::new(Self {
            stream,
            bytes,
            file,
            stream_calls: AtomicUsize::new(0),
            bytes_calls: AtomicUsize::new(0),
            file_calls: AtomicUsize::new(0),
            buffered_sizes: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> (usize, usize, usize) {
        (
            self.stream_calls.load(Ordering::SeqCst),
            self.bytes_calls.load(Ordering::SeqCst),
            self.file_calls.load(Ordering::SeqCst),
        )
    }

    async fn behave(
        behavior: &Behavior,
        cancel: &CancellationToken,
    ) -> Result<Bytes, ExtractError> {
        match behavior {
            Behavior::Frame(frame) => Ok(Bytes::from_static(frame)),
            Behavior::Fail => Err(ExtractError::NoFrame),
            Behavior::Hang => {
                cancel.cancelled().await;
                Err(ExtractError::Cancelled)
            }
        }
    }
}

#[async_trait]
impl FrameExtractor for FakeExtractor {
    async fn from_stream(
        &self,
        mut input: BodyStream,
        max_input: u64,
        cancel: &CancellationToken,
    ) -> Result<Bytes, ExtractError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        let mut read = 0u64;
        while let Some(chunk) = input.next().await {
            read += chunk.map_err(ExtractError::Input)?.len() as u64;
            if read >= max_input {
                break;
            }
        }
        Self::behave(&self.stream, cancel).await
    }

    async fn from_bytes(
        &self,
        input: Bytes,
        cancel: &CancellationToken,
    ) -> Result<Bytes, ExtractError> {
        self.bytes_calls.fetch_add(1, Ordering::SeqCst);
        self.buffered_sizes.lock().push(input.len());
        Self::behave(&self.bytes, cancel).await
    }

    async fn from_file(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), ExtractError> {
        self.file_calls.fetch_add(1, Ordering::SeqCst);
        tokio::fs::metadata(input).await?;
        let frame = Self::behave(&self.file, cancel).await?;
        tokio::fs::write(output, &frame).await?;
        Ok(())
    }
}

/// Transcoder that passes bytes through and counts calls.
#[derive(Debug, Default)]
pub struct CountingTranscoder {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Transcoder for CountingTranscoder {
    async fn normalize(
        &self,
        data: Bytes,
        _cancel: &CancellationToken,
    ) -> vigil_core::Result<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(data)
    }

    async fn normalize_file(
        &self,
        input: &Path,
        output: &Path,
        _cancel: &CancellationToken,
    ) -> vigil_core::Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::fs::copy(input, output)
            .await
            .map_err(|err| PipelineError::Processing(err.to_string()))
    }
}

/// Classifier returning fixed scores after `delay`, tracking how many
/// calls overlap.
#[derive(Debug)]
pub struct CountingClassifier {
    pub scores: Probabilities,
    pub delay: Duration,
    pub calls: AtomicUsize,
    active: AtomicUsize,
    pub peak: AtomicUsize,
}

impl CountingClassifier {
    pub fn new(delay: Duration) -> Self {
        Self {
            scores: neutral_scores(),
            delay,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    async fn run(&self, cancel: &CancellationToken) -> vigil_core::Result<Probabilities> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let slept = cancel
            .run_until_cancelled(tokio::time::sleep(self.delay))
            .await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        slept.map(|_| self.scores).ok_or(PipelineError::Cancelled)
    }
}

#[async_trait]
impl Classifier for CountingClassifier {
    async fn score(
        &self,
        _data: Bytes,
        cancel: &CancellationToken,
    ) -> vigil_core::Result<Probabilities> {
        self.run(cancel).await
    }

    async fn score_file(
        &self,
        _path: &Path,
        cancel: &CancellationToken,
    ) -> vigil_core::Result<Probabilities> {
        self.run(cancel).await
    }
}

pub fn neutral_scores() -> Probabilities {
    Probabilities {
        drawing: 0.02,
        hentai: 0.01,
        neutral: 0.9,
        porn: 0.02,
        sexy: 0.05,
    }
}

pub fn limits(max_bytes: u64) -> AcquireLimits {
    AcquireLimits {
        max_bytes,
        download_timeout: Duration::from_secs(5),
        stream_timeout: Duration::from_secs(5),
        max_redirects: 3,
    }
}

pub fn acquirer(
    fetcher: Arc<ScriptedFetcher>,
    extractor: Arc<FakeExtractor>,
    max_bytes: u64,
    mode: StorageMode,
) -> MediaAcquirer {
    MediaAcquirer::new(
        fetcher,
        extractor,
        ConcurrencyLimiter::new(2),
        limits(max_bytes),
        mode,
    )
}

pub struct Harness {
    pub coordinator: RequestCoordinator,
    pub fetcher: Arc<ScriptedFetcher>,
    pub extractor: Arc<FakeExtractor>,
    pub transcoder: Arc<CountingTranscoder>,
    pub classifier: Arc<CountingClassifier>,
    pub work_dir: tempfile::TempDir,
}

impl Harness {
    pub fn new(
        fetcher: Arc<ScriptedFetcher>,
        extractor: Arc<FakeExtractor>,
        classify_delay: Duration,
    ) -> Self {
        let work_dir = tempfile::tempdir().expect("tempdir");
        let transcoder = Arc::new(CountingTranscoder::default());
        let classifier = Arc::new(CountingClassifier::new(classify_delay));
        let coordinator = RequestCoordinator::new(
            ResultCache::new(100, Duration::from_secs(60)),
            KeyedLockRegistry::new(100, Duration::from_secs(60)),
            acquirer(
                Arc::clone(&fetcher),
                Arc::clone(&extractor),
                1024,
                StorageMode::Memory,
            ),
            transcoder.clone(),
            classifier.clone(),
            CoordinatorSettings {
                work_dir: work_dir.path().to_path_buf(),
                ..CoordinatorSettings::default()
            },
        );
        Self {
            coordinator,
            fetcher,
            extractor,
            transcoder,
            classifier,
            work_dir,
        }
    }

    pub fn leftover_files(&self) -> usize {
        std::fs::read_dir(self.work_dir.path())
            .expect("read work dir")
            .count()
    }
}
