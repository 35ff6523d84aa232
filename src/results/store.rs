use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use super::pruning::{self, PruneStats};
use super::{Result, RetrievalError};
use crate::archive::RESULTS_ARCHIVE;
use crate::config::RelayConfig;
use crate::jobs::JobId;

/// Read-only view over the job directories under the storage root
#[derive(Debug, Clone)]
pub struct ResultStore {
    root: PathBuf,
    store_results: bool,
}

impl ResultStore {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            root: config.storage_dir.clone(),
            store_results: config.store_results,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_enabled(&self) -> bool {
        self.store_results
    }

    /// Locates the bundle of a previous job.
    ///
    /// Ids that are not UUIDs are reported as unknown without touching the
    /// filesystem.
    pub async fn retrieve(&self, job_id: &str) -> Result<PathBuf> {
        if !self.store_results {
            return Err(RetrievalError::RetentionDisabled);
        }

        let id = JobId::parse(job_id)
            .ok_or_else(|| RetrievalError::JobNotFound(job_id.to_string()))?;
        let job_dir = self.root.join(id.to_string());

        if !tokio::fs::try_exists(&job_dir).await? {
            return Err(RetrievalError::JobNotFound(id.to_string()));
        }

        let archive = job_dir.join(RESULTS_ARCHIVE);
        if !tokio::fs::try_exists(&archive).await? {
            return Err(RetrievalError::ArchiveMissing(id.to_string()));
        }

        debug!(job_id = %id, path = %archive.display(), "Bundle located");
        Ok(archive)
    }

    /// Removes job directories older than `ttl`. Never runs on its own.
    pub async fn prune(&self, ttl: Duration) -> Result<PruneStats> {
        pruning::prune_expired(&self.root, ttl).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(root: &Path, store_results: bool) -> ResultStore {
        ResultStore::new(&RelayConfig {
            storage_dir: root.to_path_buf(),
            store_results,
            ..RelayConfig::default()
        })
    }

    #[tokio::test]
    async fn test_retrieve_existing_bundle() {
        let root = TempDir::new().unwrap();
        let id = JobId::generate();
        let job_dir = root.path().join(id.to_string());
        std::fs::create_dir(&job_dir).unwrap();
        std::fs::write(job_dir.join(RESULTS_ARCHIVE), b"PK").unwrap();

        let path = store(root.path(), true).retrieve(&id.to_string()).await.unwrap();
        assert_eq!(path, job_dir.join(RESULTS_ARCHIVE));
    }

    #[tokio::test]
    async fn test_retrieve_unknown_and_malformed_ids() {
        let root = TempDir::new().unwrap();
        let store = store(root.path(), true);

        let unknown = JobId::generate().to_string();
        assert!(matches!(
            store.retrieve(&unknown).await,
            Err(RetrievalError::JobNotFound(_))
        ));
        assert!(matches!(
            store.retrieve("../../etc").await,
            Err(RetrievalError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_retrieve_without_archive() {
        let root = TempDir::new().unwrap();
        let id = JobId::generate();
        std::fs::create_dir(root.path().join(id.to_string())).unwrap();

        assert!(matches!(
            store(root.path(), true).retrieve(&id.to_string()).await,
            Err(RetrievalError::ArchiveMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_retention_disabled() {
        let root = TempDir::new().unwrap();
        let id = JobId::generate();
        let job_dir = root.path().join(id.to_string());
        std::fs::create_dir(&job_dir).unwrap();
        std::fs::write(job_dir.join(RESULTS_ARCHIVE), b"PK").unwrap();

        assert!(matches!(
            store(root.path(), false).retrieve(&id.to_string()).await,
            Err(RetrievalError::RetentionDisabled)
        ));
    }
}
