use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::path::Path as FsPath;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use super::{
    models::{HealthResponse, JOB_ID_HEADER},
    state::AppState,
    utils::{attachment, parse_content_type, read_limited},
    validation::validate_submission,
};
use crate::api::error::ApiError;
use crate::jobs::FetchMode;

/// Smoke-test endpoint (GET /); requesters probe it before submitting.
pub async fn hello() -> &'static str {
    "relaybox relay ready"
}

/// Basic submission (POST /)
pub async fn submit_basic(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, ApiError> {
    submit(state, headers, body, FetchMode::Basic).await
}

/// Rendered submission (POST /rendered)
pub async fn submit_rendered(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, ApiError> {
    submit(state, headers, body, FetchMode::Rendered).await
}

/// Runs a job synchronously and streams its bundle back.
///
/// ## Flow:
/// 1. Require `Content-Type: application/json`
/// 2. Read the body up to `server.max_payload_bytes`
/// 3. Check the payload shape (JSON object, string fields)
/// 4. Hand the job to the manager, which validates the url, fetches and packages
/// 5. Stream `results.zip` with the job id in `x-relaybox-job-id`
///
/// A failed fetch is still a 200: the bundle's metadata says what happened.
async fn submit(
    state: AppState,
    headers: HeaderMap,
    body: Body,
    mode: FetchMode,
) -> Result<Response, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::InvalidPayload("missing Content-Type header".into()))?;
    parse_content_type(content_type)?;

    let max_size = state.config.server.max_payload_bytes.as_usize();
    let body_bytes = read_limited(body, max_size).await?;

    let value: serde_json::Value = serde_json::from_slice(&body_bytes)?;
    let request =
        validate_submission(value).map_err(|e| ApiError::InvalidPayload(e.to_string()))?;

    // Anything past request validation counts as accepted, failed or not.
    let receipt = match state.jobs.submit(request, mode).await {
        Ok(receipt) => {
            state.metrics.job_accepted();
            receipt
        }
        Err(err) if err.is_validation() => {
            warn!(%mode, error = %err, "Submission rejected");
            return Err(err.into());
        }
        Err(err) => {
            state.metrics.job_accepted();
            state.metrics.job_failed();
            warn!(%mode, error = %err, "Job failed");
            return Err(err.into());
        }
    };

    archive_response(&state, &receipt.job_id.to_string(), &receipt.archive).await
}

/// Historical retrieval (GET /{job_id})
pub async fn get_results(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let archive = state.results.retrieve(&job_id).await?;
    archive_response(&state, &job_id, &archive).await
}

async fn archive_response(
    state: &AppState,
    job_id: &str,
    archive: &FsPath,
) -> Result<Response, ApiError> {
    let file = tokio::fs::File::open(archive)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to open archive: {e}")))?;
    let size = file.metadata().await.ok().map(|m| m.len());

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/zip")
        .header(header::CONTENT_DISPOSITION, attachment(job_id))
        .header(JOB_ID_HEADER, job_id);
    if let Some(size) = size {
        builder = builder.header(header::CONTENT_LENGTH, size);
    }

    let response = builder
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    state.metrics.archive_served();
    info!(job_id, path = %archive.display(), "Serving archive");
    Ok(response)
}

/// Health check endpoint (GET /health)
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        store_results: state.results.is_enabled(),
        metrics: state.metrics.snapshot(),
    };

    (StatusCode::OK, Json(response))
}
