use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::error;
use vigil_core::Classification;
use vigil_model::ClassifyRequest;

use crate::{
    AppState,
    infra::errors::{AppError, AppResult},
};

#[derive(Debug, Deserialize)]
pub struct ClassifyUrlBody {
    pub url: String,
    /// Forces the video path on or off; inferred from the URL when absent.
    #[serde(default)]
    pub video: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ClassifyDataBody {
    /// Standard base64.
    pub data: String,
}

pub async fn classify_url(
    State(state): State<AppState>,
    payload: Result<Json<ClassifyUrlBody>, JsonRejection>,
) -> AppResult<Json<Classification>> {
    let Json(body) = payload.map_err(|err| AppError::bad_request(err.body_text()))?;
    let mut request = ClassifyRequest::url(body.url);
    if let Some(video) = body.video {
        request = request.with_video_hint(video);
    }
    run_detached(state, request).await.map(Json)
}

pub async fn classify_data(
    State(state): State<AppState>,
    payload: Result<Json<ClassifyDataBody>, JsonRejection>,
) -> AppResult<Json<Classification>> {
    let Json(body) = payload.map_err(|err| AppError::bad_request(err.body_text()))?;
    run_detached(state, ClassifyRequest::data(body.data)).await.map(Json)
}

/// Run the request on its own task so cleanup finishes even if the client
/// disconnects. Dropping this future cancels the request through the guard.
async fn run_detached(
    state: AppState,
    request: ClassifyRequest,
) -> AppResult<Classification> {
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let coordinator = state.coordinator.clone();

    let task = tokio::spawn(async move { coordinator.handle(request, cancel).await });
    let outcome = task.await;
    guard.disarm();

    match outcome {
        Ok(result) => result.map_err(AppError::from),
        Err(join) => {
            error!(error = %join, "classification task failed");
            Err(AppError::internal("classification task failed"))
        }
    }
}
