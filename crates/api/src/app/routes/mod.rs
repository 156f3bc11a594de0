use axum::{
    Router,
    routing::{get, post},
};

pub mod jobs;
pub mod system;

/// Router for the job endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/run", post(jobs::run_job))
        .route("/status", get(jobs::job_status))
}
