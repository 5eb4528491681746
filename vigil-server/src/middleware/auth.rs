use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use constant_time_eq::constant_time_eq;

use crate::{AppState, infra::errors::AppError};

/// Rejects requests without the configured bearer token. A no-op when no
/// token is configured.
pub async fn require_bearer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = state.api_token.as_deref() else {
        return Ok(next.run(request).await);
    };

    match extract_bearer_token(&request) {
        Some(token) if constant_time_eq(token.as_bytes(), expected.as_bytes()) => {
            Ok(next.run(request).await)
        }
        Some(_) => Err(AppError::unauthorized("invalid API token")),
        None => Err(AppError::unauthorized("missing bearer token")),
    }
}

fn extract_bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}
