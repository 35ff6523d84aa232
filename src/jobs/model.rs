use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

pub type HeadersMap = BTreeMap<String, String>;
pub type CookieMap = BTreeMap<String, String>;

/// Which fetch strategy a job runs with
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    /// Single HTTP GET streamed to disk
    Basic,
    /// Full page render with sub-resources and a screenshot
    Rendered,
}

impl FetchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchMode::Basic => "basic",
            FetchMode::Rendered => "rendered",
        }
    }
}

impl fmt::Display for FetchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relay-assigned job identifier (UUIDv7, time ordered plus random bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parses an externally supplied id. Anything that is not a UUID is
    /// rejected, which also keeps path separators out of job directories.
    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw.trim()).ok().map(Self)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

/// Submission payload: `{ "url": "...", "user-agent": "..." }`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "user-agent", default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl JobRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            user_agent: None,
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

/// One accepted fetch request and the directory it owns
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub mode: FetchMode,
    pub requested_url: String,
    pub actual_url: String,
    pub user_agent: String,
    pub dir: PathBuf,
}

impl Job {
    /// Path of the primary payload written by the basic strategy.
    pub fn payload_path(&self) -> PathBuf {
        self.dir.join(self.id.to_string())
    }
}

/// Sub-artifact captured during a rendered fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// Position in capture order
    pub index: usize,
    pub content: Vec<u8>,
}

impl Resource {
    pub fn file_name(&self) -> String {
        format!("resource{}", self.index)
    }
}

/// A redirect answered before the final response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectHop {
    pub headers: HeadersMap,
    pub response_code: u16,
}

/// Status record of a job, serialized as `metadata.json` in every bundle.
///
/// The three outcome flags are tri-state: `None` means the stage was never
/// reached and the key is omitted from the file. They are filled in a fixed
/// order (connection, fetch, object write) by the active strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetadata {
    pub requested_url: String,
    pub actual_url: String,
    /// Name of the primary payload file inside the job directory
    pub remote_job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_object_success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_code: Option<u16>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub server_headers: HeadersMap,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cookies: CookieMap,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub redirects: Vec<RedirectHop>,
}

impl JobMetadata {
    pub fn for_job(job: &Job) -> Self {
        Self {
            requested_url: job.requested_url.clone(),
            actual_url: job.actual_url.clone(),
            remote_job_id: job.id.to_string(),
            ..Self::default()
        }
    }

    /// No response at all: terminal, but not an error.
    pub fn record_connection_failure(&mut self) {
        self.connection_success = Some(false);
    }

    /// A response arrived; captures everything known before the body is read.
    pub fn record_connected(&mut self, response_code: u16, headers: HeadersMap, cookies: CookieMap) {
        self.connection_success = Some(true);
        self.response_code = Some(response_code);
        self.server_headers = headers;
        self.cookies = cookies;
    }

    pub fn record_fetch(&mut self, success: bool) {
        self.fetch_success = Some(success);
    }

    pub fn record_object_write(&mut self, success: bool) {
        self.fetch_object_success = Some(success);
    }
}

/// Strips leading whitespace and control characters from a submitted url.
pub fn normalize_url(url: &str) -> String {
    url.trim_start_matches(|c: char| c.is_whitespace() || c.is_control())
        .to_string()
}
