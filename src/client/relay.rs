use chrono::{Local, NaiveDateTime};
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

use super::dedup::{DedupIndex, DedupKey, DirectoryIndex};
use super::{ClientError, Result};
use crate::archive::{RESULTS_ARCHIVE, extract_bundle};
use crate::jobs::{FetchMode, JobRequest};

/// Result of asking the relay for a resource
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retrieval {
    /// Bundle downloaded and extracted into this directory
    Fetched(PathBuf),
    /// The same key was already claimed; nothing was sent to the relay
    AlreadyFetched(PathBuf),
}

impl Retrieval {
    pub fn path(&self) -> &Path {
        match self {
            Retrieval::Fetched(path) | Retrieval::AlreadyFetched(path) => path,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Retrieval::AlreadyFetched(_))
    }
}

/// Requester side of the relay protocol, bound to one relay and one mode
pub struct RelayClient {
    http: Client,
    endpoint: Url,
    index: Arc<dyn DedupIndex>,
}

impl RelayClient {
    /// Probes the relay and binds to the submission endpoint for `mode`.
    pub async fn connect(relay_url: &str, mode: FetchMode) -> Result<Self> {
        Self::connect_with_index(relay_url, mode, Arc::new(DirectoryIndex)).await
    }

    pub async fn connect_with_index(
        relay_url: &str,
        mode: FetchMode,
        index: Arc<dyn DedupIndex>,
    ) -> Result<Self> {
        let mut base = Url::parse(relay_url).map_err(|e| ClientError::InvalidUrl {
            url: relay_url.to_string(),
            reason: e.to_string(),
        })?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http = Client::builder()
            .build()
            .map_err(|e| ClientError::RelayUnavailable(e.to_string()))?;

        let probe = http
            .get(base.clone())
            .send()
            .await
            .map_err(|e| ClientError::RelayUnavailable(e.to_string()))?;
        if probe.status() != StatusCode::OK {
            return Err(ClientError::RelayUnavailable(format!(
                "probe answered {}",
                probe.status()
            )));
        }

        let endpoint = match mode {
            FetchMode::Basic => base,
            FetchMode::Rendered => base.join("rendered").map_err(|e| ClientError::InvalidUrl {
                url: relay_url.to_string(),
                reason: e.to_string(),
            })?,
        };
        debug!(%endpoint, %mode, "Relay reachable");

        Ok(Self {
            http,
            endpoint,
            index,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Fetches `url` through the relay into a fresh directory under `target`.
    pub async fn request_resource(
        &self,
        target: &Path,
        url: &str,
        user_agent: Option<&str>,
    ) -> Result<Retrieval> {
        self.request_resource_at(target, url, user_agent, Local::now().naive_local())
            .await
    }

    /// Same as [`request_resource`](Self::request_resource) with an explicit
    /// timestamp for the dedup key.
    pub async fn request_resource_at(
        &self,
        target: &Path,
        url: &str,
        user_agent: Option<&str>,
        at: NaiveDateTime,
    ) -> Result<Retrieval> {
        let parsed = Url::parse(url).map_err(|e| ClientError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let key = DedupKey::new(&parsed, at);
        let destination = target.join(key.dir_name());

        if !self.index.claim(target, &key)? {
            warn!(path = %destination.display(), url, "Resource already fetched");
            return Ok(Retrieval::AlreadyFetched(destination));
        }
        tokio::fs::create_dir_all(&destination).await?;

        let mut request = JobRequest::new(url);
        if let Some(user_agent) = user_agent {
            request = request.with_user_agent(user_agent);
        }

        let mut response = self
            .http
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| ClientError::RelayUnavailable(e.to_string()))?;
        if response.status() != StatusCode::OK {
            return Err(ClientError::RelayUnavailable(format!(
                "relay answered {}",
                response.status()
            )));
        }

        let download = destination.join(RESULTS_ARCHIVE);
        let mut file = tokio::fs::File::create(&download).await?;
        let mut bytes = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ClientError::RelayUnavailable(e.to_string()))?
        {
            file.write_all(&chunk).await?;
            bytes += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);

        let bundle = download.clone();
        let into = destination.clone();
        tokio::task::spawn_blocking(move || extract_bundle(&bundle, &into))
            .await
            .map_err(|e| ClientError::Io(std::io::Error::other(e)))??;

        if let Err(err) = tokio::fs::remove_file(&download).await {
            warn!(path = %download.display(), error = %err, "Failed to remove downloaded archive");
        }

        info!(path = %destination.display(), url, bytes, "Resource fetched");
        Ok(Retrieval::Fetched(destination))
    }
}

impl std::fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient")
            .field("endpoint", &self.endpoint.as_str())
            .finish_non_exhaustive()
    }
}
