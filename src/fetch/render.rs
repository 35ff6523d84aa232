//! Rendered fetches through a headless browser
//!
//! The browser sits behind [`RenderEngine`] / [`RenderSession`] so the
//! strategy logic (flags, file layout, failure mapping) does not depend on a
//! particular automation backend.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use super::{FetchError, FetchStrategy};
use crate::jobs::{CookieMap, FetchMode, HeadersMap, Job, JobMetadata, Resource};

/// Statuses that count as a failed rendered fetch
const FAILED_STATUSES: [u16; 4] = [400, 401, 403, 404];

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render engine unavailable: {0}")]
    Unavailable(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("screenshot failed: {0}")]
    Screenshot(String),
}

/// Everything captured while loading one page
#[derive(Debug, Clone, Default)]
pub struct RenderedPage {
    /// Status of the main document response
    pub status: u16,
    pub headers: HeadersMap,
    pub cookies: CookieMap,
    /// Serialized DOM after load
    pub content: Option<Vec<u8>>,
    /// Sub-resources in capture order
    pub resources: Vec<Resource>,
}

#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Opens an isolated browsing session presenting `user_agent`.
    async fn open(&self, user_agent: &str) -> Result<Box<dyn RenderSession>, RenderError>;
}

#[async_trait]
pub trait RenderSession: Send {
    /// Stable identifier; names the primary payload file.
    fn id(&self) -> &str;

    async fn navigate(&mut self, url: &str) -> Result<RenderedPage, RenderError>;

    async fn screenshot(&mut self, path: &Path) -> Result<(), RenderError>;

    async fn close(self: Box<Self>);
}

/// Engine used when no browser backend is compiled in
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableEngine;

#[async_trait]
impl RenderEngine for UnavailableEngine {
    async fn open(&self, _user_agent: &str) -> Result<Box<dyn RenderSession>, RenderError> {
        Err(RenderError::Unavailable(
            "relay built without the `chromium` feature".to_string(),
        ))
    }
}

pub struct RenderedFetcher {
    engine: Arc<dyn RenderEngine>,
    timeout: Duration,
}

impl RenderedFetcher {
    pub fn new(engine: Arc<dyn RenderEngine>, timeout: Duration) -> Self {
        Self { engine, timeout }
    }

    async fn load(
        &self,
        session: &mut Box<dyn RenderSession>,
        url: &str,
    ) -> Result<RenderedPage, RenderError> {
        match tokio::time::timeout(self.timeout, session.navigate(url)).await {
            Ok(result) => result,
            Err(_) => Err(RenderError::Navigation(format!(
                "timed out after {:?}",
                self.timeout
            ))),
        }
    }
}

#[async_trait]
impl FetchStrategy for RenderedFetcher {
    fn mode(&self) -> FetchMode {
        FetchMode::Rendered
    }

    async fn fetch(&self, job: &Job) -> Result<JobMetadata, FetchError> {
        let mut metadata = JobMetadata::for_job(job);

        let mut session = match self.engine.open(&job.user_agent).await {
            Ok(session) => session,
            Err(err) => {
                warn!(job_id = %job.id, error = %err, "Render session unavailable");
                metadata.record_connection_failure();
                return Ok(metadata);
            }
        };

        let payload_name = payload_name(session.id(), job);
        metadata.remote_job_id = payload_name.clone();

        let page = match self.load(&mut session, &job.actual_url).await {
            Ok(page) if page.content.is_some() || !page.resources.is_empty() => page,
            Ok(_) => {
                warn!(job_id = %job.id, url = %job.actual_url, "Render produced nothing");
                metadata.record_connection_failure();
                session.close().await;
                return Ok(metadata);
            }
            Err(err) => {
                warn!(job_id = %job.id, url = %job.actual_url, error = %err, "Render failed");
                metadata.record_connection_failure();
                session.close().await;
                return Ok(metadata);
            }
        };

        let RenderedPage {
            status,
            headers,
            cookies,
            content,
            resources,
        } = page;
        metadata.record_connected(status, headers, cookies);
        metadata.record_fetch(!FAILED_STATUSES.contains(&status));

        let screenshot = job.dir.join(screenshot_name(&job.actual_url));
        if let Err(err) = session.screenshot(&screenshot).await {
            warn!(job_id = %job.id, error = %err, "Screenshot failed");
        }
        session.close().await;

        let written = write_artifacts(&job.dir, &payload_name, content, &resources).await;
        match written {
            Ok(()) => {
                debug!(job_id = %job.id, resources = resources.len(), "Render artifacts written");
                metadata.record_object_write(true);
            }
            Err(err) => {
                warn!(job_id = %job.id, error = %err, "Failed to store render artifacts");
                metadata.record_object_write(false);
            }
        }

        Ok(metadata)
    }
}

async fn write_artifacts(
    dir: &Path,
    payload_name: &str,
    content: Option<Vec<u8>>,
    resources: &[Resource],
) -> std::io::Result<()> {
    if let Some(content) = content {
        tokio::fs::write(dir.join(payload_name), content).await?;
    }
    for resource in resources {
        tokio::fs::write(dir.join(resource.file_name()), &resource.content).await?;
    }
    Ok(())
}

/// Session ids come from the engine; anything that could escape the job
/// directory falls back to the job id.
fn payload_name(session_id: &str, job: &Job) -> String {
    let usable = !session_id.is_empty()
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if usable {
        session_id.to_string()
    } else {
        job.id.to_string()
    }
}

/// `<host[:port]>.png`, or `screenshot.png` when the url has no host.
pub(crate) fn screenshot_name(url: &str) -> String {
    let host = Url::parse(url).ok().and_then(|url| {
        url.host_str().map(|host| match url.port() {
            Some(port) => format!("{host}_{port}"),
            None => host.to_string(),
        })
    });
    format!("{}.png", host.unwrap_or_else(|| "screenshot".to_string()))
}
