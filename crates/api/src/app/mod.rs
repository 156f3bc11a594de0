//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: pipeline wiring (cache backend, aggregation store, runner)
//! - `routes/`: HTTP routes + handlers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

pub mod errors;
pub mod routes;
pub mod services;

use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<AppServices>) -> Router {
    Router::new()
        .route("/info", get(routes::system::info))
        .merge(routes::router())
        .layer(ServiceBuilder::new().layer(Extension(services)))
}
