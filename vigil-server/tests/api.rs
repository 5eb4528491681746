use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{HeaderMap, Request, StatusCode, header},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use vigil_core::{
    AcquireLimits, Classifier, ConcurrencyLimiter, CoordinatorSettings,
    ExtractError, FrameExtractor, KeyedLockRegistry, MediaAcquirer,
    PipelineError, RequestCoordinator, ResultCache, Transcoder,
    fetch::{BodyStream, FetchError, FetchRequest, FetchResponse, Fetcher},
};
use vigil_model::{Probabilities, StorageMode};
use vigil_server::{AppState, routes::create_router};

/// Answers every request with the same status; 599 means "connection refused".
struct StaticFetcher {
    status: u16,
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn send(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        if self.status == 599 {
            return Err(FetchError::Transport {
                url: request.url.to_string(),
                message: "connection refused".into(),
            });
        }
        let status = StatusCode::from_u16(self.status).expect("status");
        Ok(FetchResponse::from_chunks(
            status,
            HeaderMap::new(),
            vec![Ok(Bytes::from_static(b"not an image"))],
        ))
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
    ) -> Result<Bytes, ExtractError> {
        Err(ExtractError::NoFrame)
    }

    async fn from_bytes(
        &self,
        _input: Bytes,
        _cancel: &CancellationToken,
    ) -> Result<Bytes, ExtractError> {
        Err(ExtractError::NoFrame)
    }

    async fn from_file(
        &self,
        _input: &Path,
        _output: &Path,
        _cancel: &CancellationToken,
    ) -> Result<(), ExtractError> {
        Err(ExtractError::NoFrame)
    }
}

struct PassThrough;

#[async_trait]
impl Transcoder for PassThrough {
    async fn normalize(
        &self,
        data: Bytes,
        _cancel: &CancellationToken,
    ) -> vigil_core::Result<Bytes> {
        Ok(data)
    }

    async fn normalize_file(
        &self,
        input: &Path,
        output: &Path,
        _cancel: &CancellationToken,
    ) -> vigil_core::Result<u64> {
        tokio::fs::copy(input, output)
            .await
            .map_err(|err| PipelineError::Processing(err.to_string()))
    }
}

/// Scores everything as mostly porn. With `hang` set it waits for
/// cancellation instead and records that it saw it.
#[derive(Default)]
struct FakeModel {
    hang: bool,
    calls: AtomicUsize,
    saw_cancel: AtomicBool,
}

impl FakeModel {
    fn scores() -> Probabilities {
        Probabilities {
            drawing: 0.05,
            hentai: 0.05,
            neutral: 0.1,
            porn: 0.7,
            sexy: 0.1,
        }
    }

    async fn run(&self, cancel: &CancellationToken) -> vigil_core::Result<Probabilities> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            cancel.cancelled().await;
            self.saw_cancel.store(true, Ordering::SeqCst);
            return Err(PipelineError::Cancelled);
        }
        Ok(Self::scores())
    }
}

#[async_trait]
impl Classifier for FakeModel {
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

struct TestApp {
    router: Router,
    state: AppState,
    model: Arc<FakeModel>,
    _work_dir: tempfile::TempDir,
}

fn app(token: Option<&str>, upstream_status: u16, model: FakeModel) -> TestApp {
    let work_dir = tempfile::tempdir().expect("work dir");
    let model = Arc::new(model);
    let acquirer = MediaAcquirer::new(
        Arc::new(StaticFetcher {
            status: upstream_status,
        }),
        Arc::new(NoFrames),
        ConcurrencyLimiter::new(2),
        AcquireLimits {
            max_bytes: 1024,
            ..AcquireLimits::default()
        },
        StorageMode::Memory,
    );
    let coordinator = RequestCoordinator::new(
        ResultCache::new(100, Duration::from_secs(60)),
        KeyedLockRegistry::new(100, Duration::from_secs(60)),
        acquirer,
        Arc::new(PassThrough),
        model.clone(),
        CoordinatorSettings {
            flag_threshold: 0.5,
            max_inline_bytes: 1024,
            work_dir: work_dir.path().to_path_buf(),
        },
    );
    let state = AppState::new(coordinator, token.map(str::to_string));
    TestApp {
        router: create_router(state.clone()),
        state,
        model,
        _work_dir: work_dir,
    }
}

fn post(path: &str, body: Value, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("request")
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn payload() -> Value {
    json!({ "data": STANDARD.encode(b"pretend this is a jpeg") })
}

#[tokio::test]
async fn health_reports_introspection() {
    let app = app(None, 200, FakeModel::default());
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .expect("request");

    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["cache_entries"], 0);
    assert_eq!(body["limiter_available"], 2);
}

#[tokio::test]
async fn inline_payload_is_classified_then_cached() {
    let app = app(None, 200, FakeModel::default());

    let (status, first) =
        send(&app.router, post("/api/v1/classify/data", payload(), None)).await;
    assert_eq!(status, StatusCode::OK, "{first}");
    assert_eq!(first["source"], "inline");
    assert_eq!(first["top_label"], "porn");
    assert_eq!(first["flagged"], true);
    assert!(first["scores"]["neutral"].is_number());
    assert!(first["fingerprint"].is_string());

    let (status, second) =
        send(&app.router, post("/api/v1/classify/data", payload(), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["source"], "cache");
    assert_eq!(second["fingerprint"], first["fingerprint"]);
    assert_eq!(app.model.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn bearer_token_is_enforced() {
    let app = app(Some("s3cret"), 200, FakeModel::default());

    let (status, body) =
        send(&app.router, post("/api/v1/classify/data", payload(), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["status"], 401);

    let (status, _) = send(
        &app.router,
        post("/api/v1/classify/data", payload(), Some("guess")),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app.router,
        post("/api/v1/classify/data", payload(), Some("s3cret")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let health = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .expect("request");
    let (status, _) = send(&app.router, health).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn invalid_input_is_a_bad_request() {
    let app = app(None, 200, FakeModel::default());

    let cases = [
        ("/api/v1/classify/data", json!({ "data": "%%%not base64%%%" })),
        ("/api/v1/classify/data", json!({ "data": "" })),
        ("/api/v1/classify/url", json!({ "url": "ftp://example.test/a.png" })),
        ("/api/v1/classify/url", json!({ "url": "not a url" })),
        ("/api/v1/classify/url", json!({ "link": "http://example.test" })),
    ];
    for (path, body) in cases {
        let (status, reply) = send(&app.router, post(path, body.clone(), None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{path} {body}");
        assert_eq!(reply["error"]["status"], 400);
    }

    let oversized = json!({ "data": STANDARD.encode(vec![7u8; 2048]) });
    let (status, _) = send(&app.router, post("/api/v1/classify/data", oversized, None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(app.model.calls.load(Ordering::SeqCst), 0);
    assert!(app.state.coordinator.locks().is_empty());
}

#[tokio::test]
async fn upstream_failures_map_to_gateway_statuses() {
    let app = app(None, 404, FakeModel::default());
    let (status, body) = send(
        &app.router,
        post(
            "/api/v1/classify/url",
            json!({ "url": "http://example.test/missing.png" }),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let message = body["error"]["message"].as_str().expect("message");
    assert!(message.contains("media download failed"), "{message}");

    let app = crate::app(None, 599, FakeModel::default());
    let (status, _) = send(
        &app.router,
        post(
            "/api/v1/classify/url",
            json!({ "url": "http://example.test/photo.jpg" }),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn dropped_request_cancels_the_pipeline() {
    let app = app(
        None,
        200,
        FakeModel {
            hang: true,
            ..FakeModel::default()
        },
    );

    let call = app
        .router
        .clone()
        .oneshot(post("/api/v1/classify/data", payload(), None));
    let outcome = tokio::time::timeout(Duration::from_millis(100), call).await;
    assert!(outcome.is_err(), "request should still be running");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !app.model.saw_cancel.load(Ordering::SeqCst) {
        assert!(tokio::time::Instant::now() < deadline, "cancellation never arrived");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    // let the detached task finish its cleanup
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(app.state.coordinator.cache().is_empty().await);
}
