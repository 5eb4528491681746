use axum::{Router, middleware, routing::post};

use crate::{AppState, handlers, middleware::require_bearer};

pub fn create_v1_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/classify/url", post(handlers::classify_url))
        .route("/classify/data", post(handlers::classify_data))
        .route_layer(middleware::from_fn_with_state(state, require_bearer))
}
