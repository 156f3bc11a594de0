use std::io;
use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    response::IntoResponse,
};
use serde::Deserialize;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_stream::StreamExt;
use tracing::{error, info, warn};

use chronos_core::JobId;

use crate::app::errors;
use crate::app::services::AppServices;

/// Media types accepted for a feed upload (parameters after `;` are ignored).
const FEED_MEDIA_TYPES: [&str; 2] = ["application/x-ndjson", "application/jsonl"];

pub const JOB_ID_HEADER: &str = "x-job-id";

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub key: Option<String>,
}

/// `POST /run`: spool the feed to a temporary file and start the job.
///
/// The response only acknowledges the upload. Header errors are found later,
/// on a blocking task, and are logged rather than returned.
pub async fn run_job(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    body: Body,
) -> axum::response::Response {
    if !is_feed_content_type(&headers) {
        return errors::json_error(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "unsupported_media_type",
            "Content-Type must be application/x-ndjson or application/jsonl",
        );
    }

    let feed = match spool(body).await {
        Ok(feed) => feed,
        Err(e) => {
            error!(error = %e, "failed to spool feed");
            return errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "io_error", e.to_string());
        }
    };

    let job_id = JobId::generate();
    info!(job_id = %job_id, "job received");

    let dispatch_id = job_id.clone();
    tokio::task::spawn_blocking(move || {
        if let Err(e) = services.dispatch(dispatch_id.clone(), feed) {
            warn!(job_id = %dispatch_id, error = %e, "job rejected");
        }
    });

    (
        StatusCode::ACCEPTED,
        [(JOB_ID_HEADER, job_id.to_string())],
        Json(serde_json::json!({
            "message": "Job accepted",
            "job_id": job_id,
        })),
    )
        .into_response()
}

/// `GET /status?key=<job-id>`: current statistics of a job.
pub async fn job_status(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<StatusQuery>,
) -> axum::response::Response {
    let Some(key) = query.key.filter(|k| !k.is_empty()) else {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "missing_key",
            "query parameter `key` is required",
        );
    };

    let job_id: JobId = match key.parse() {
        Ok(id) => id,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_key", e.to_string()),
    };

    match tokio::task::spawn_blocking(move || services.stats(&job_id)).await {
        Ok(Ok(stats)) => (StatusCode::OK, Json(stats)).into_response(),
        Ok(Err(e)) => errors::store_error_to_response(e),
        Err(e) => errors::json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            e.to_string(),
        ),
    }
}

fn is_feed_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|media| media.trim().to_ascii_lowercase())
        .is_some_and(|media| FEED_MEDIA_TYPES.contains(&media.as_str()))
}

/// Copy the request body into an anonymous temp file, rewound for reading.
async fn spool(body: Body) -> io::Result<std::fs::File> {
    let file = tokio::task::spawn_blocking(tempfile::tempfile)
        .await
        .map_err(io::Error::other)??;
    let mut file = tokio::fs::File::from_std(file);

    let mut chunks = body.into_data_stream();
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(io::Error::other)?;
        file.write_all(&chunk).await?;
    }

    file.flush().await?;
    file.rewind().await?;
    Ok(file.into_std().await)
}
