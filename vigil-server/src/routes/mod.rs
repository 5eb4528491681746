pub mod v1;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::{AppState, handlers};

/// Full application router: health plus every API version.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/v1", v1::create_v1_router(state.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
