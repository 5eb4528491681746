use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::AppState;

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let coordinator = &state.coordinator;
    let limiter = coordinator.limiter();
    Json(json!({
        "status": "ok",
        "cache_entries": coordinator.cache().len().await,
        "lock_entries": coordinator.locks().len(),
        "limiter_available": limiter.available(),
        "limiter_max": limiter.max_in_flight(),
    }))
}
