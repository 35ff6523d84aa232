//! Wire models of the relay endpoints.
//!
//! Submissions (`POST /` and `POST /rendered`) carry a
//! [`JobRequest`](crate::jobs::JobRequest):
//!
//! ```json
//! { "url": "http://example.com/a", "user-agent": "Mozilla/5.0 ..." }
//! ```
//!
//! Successful submissions and retrievals answer with the bundle itself
//! (`application/zip`); everything else answers with an [`ErrorResponse`].

use serde::Serialize;

use crate::observability::MetricsSnapshot;

/// Header carrying the relay-assigned job id on archive responses
pub const JOB_ID_HEADER: &str = "x-relaybox-job-id";

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub store_results: bool,
    pub metrics: MetricsSnapshot,
}
