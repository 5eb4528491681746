//! # Vigil Server
//!
//! Thin HTTP surface over [`vigil_core::RequestCoordinator`]:
//!
//! - `POST /api/v1/classify/url` and `POST /api/v1/classify/data`
//! - `GET /health` with cache, lock and limiter introspection
//!
//! The same binary doubles as the image transform worker
//! (`vigil-server worker`), speaking the line-delimited JSON protocol of
//! [`vigil_core::worker::protocol`] on stdin/stdout.

pub mod handlers;
pub mod infra;
pub mod middleware;
pub mod routes;
pub mod worker;

pub use infra::app_state::AppState;
