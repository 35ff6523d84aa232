use std::path::{Path, PathBuf};

use tracing::{error, info, warn};
use url::Url;

use super::error::{JobError, Result};
use super::model::{FetchMode, Job, JobId, JobMetadata, JobRequest, normalize_url};
use crate::archive::{ArchivePackager, METADATA_FILE};
use crate::config::RelayConfig;
use crate::fetch::StrategyRegistry;

/// Outcome of a completed submission
#[derive(Debug, Clone)]
pub struct JobReceipt {
    pub job_id: JobId,
    pub mode: FetchMode,
    /// Outer bundle, ready to be streamed back
    pub archive: PathBuf,
    pub metadata: JobMetadata,
}

/// Owns job identity, the per-job working directory, dispatch to the
/// strategy matching the requested mode, and hand-off to packaging.
///
/// Jobs share nothing but the storage root, so concurrent submissions need
/// no coordination beyond the uniqueness of their ids.
pub struct JobManager {
    storage_dir: PathBuf,
    default_user_agent: String,
    strategies: StrategyRegistry,
    packager: ArchivePackager,
}

impl JobManager {
    pub fn new(config: &RelayConfig, strategies: StrategyRegistry) -> Self {
        Self {
            storage_dir: config.storage_dir.clone(),
            default_user_agent: config.default_user_agent.clone(),
            strategies,
            packager: ArchivePackager::new(),
        }
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Runs one job to completion and returns the path of its bundle.
    ///
    /// Connection and HTTP failures are not errors here: they end up in the
    /// bundled metadata. Errors are reserved for rejected submissions and
    /// environment failures. A strategy or metadata failure removes the job
    /// directory; a packaging failure leaves it on disk for inspection.
    pub async fn submit(&self, request: JobRequest, mode: FetchMode) -> Result<JobReceipt> {
        let job = self.accept(request, mode)?;
        let strategy = self
            .strategies
            .get(mode)
            .map_err(|_| JobError::UnsupportedMode(mode))?;

        // Fails on an existing directory; ids never repeat, so a collision
        // means the environment is broken and is not retried.
        tokio::fs::create_dir(&job.dir).await?;
        info!(job_id = %job.id, %mode, url = %job.actual_url, "Job accepted");

        let metadata = match strategy.fetch(&job).await {
            Ok(metadata) => metadata,
            Err(err) => {
                error!(job_id = %job.id, error = %err, "Fetch strategy failed");
                rollback(&job).await;
                return Err(err.into());
            }
        };

        if let Err(err) = write_metadata(&job.dir, &metadata).await {
            error!(job_id = %job.id, error = %err, "Failed to write metadata");
            rollback(&job).await;
            return Err(err.into());
        }

        let archive = self
            .packager
            .package(&job.dir, &metadata, mode)
            .await
            .inspect_err(|err| {
                error!(job_id = %job.id, error = %err, "Packaging failed, artifacts kept on disk");
            })?;

        info!(
            job_id = %job.id,
            connection_success = ?metadata.connection_success,
            fetch_success = ?metadata.fetch_success,
            response_code = ?metadata.response_code,
            archive = %archive.display(),
            "Job completed"
        );

        Ok(JobReceipt {
            job_id: job.id,
            mode,
            archive,
            metadata,
        })
    }

    /// Validates a submission and assigns it an id. Touches no state.
    fn accept(&self, request: JobRequest, mode: FetchMode) -> Result<Job> {
        let requested_url = request.url.ok_or(JobError::MissingField("url"))?;
        let actual_url = normalize_url(&requested_url);

        let parsed = Url::parse(&actual_url).map_err(|err| JobError::InvalidUrl {
            url: requested_url.clone(),
            reason: err.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(JobError::InvalidUrl {
                url: requested_url,
                reason: "scheme must be http or https".to_string(),
            });
        }

        let user_agent = request
            .user_agent
            .filter(|ua| !ua.trim().is_empty())
            .unwrap_or_else(|| self.default_user_agent.clone());

        let id = JobId::generate();
        Ok(Job {
            id,
            mode,
            requested_url,
            actual_url,
            user_agent,
            dir: self.storage_dir.join(id.to_string()),
        })
    }
}

async fn write_metadata(job_dir: &Path, metadata: &JobMetadata) -> std::io::Result<()> {
    let body = serde_json::to_vec_pretty(metadata).map_err(std::io::Error::other)?;
    tokio::fs::write(job_dir.join(METADATA_FILE), body).await
}

async fn rollback(job: &Job) {
    if let Err(err) = tokio::fs::remove_dir_all(&job.dir).await {
        warn!(job_id = %job.id, error = %err, "Failed to remove job directory");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{FetchError, FetchStrategy};
    use async_trait::async_trait;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct StaticStrategy {
        body: Option<&'static [u8]>,
    }

    #[async_trait]
    impl FetchStrategy for StaticStrategy {
        fn mode(&self) -> FetchMode {
            FetchMode::Basic
        }

        async fn fetch(&self, job: &Job) -> std::result::Result<JobMetadata, FetchError> {
            let mut metadata = JobMetadata::for_job(job);
            match self.body {
                Some(body) => {
                    metadata.record_connected(200, Default::default(), Default::default());
                    metadata.record_fetch(true);
                    tokio::fs::write(job.payload_path(), body).await?;
                    metadata.record_object_write(true);
                }
                None => metadata.record_connection_failure(),
            }
            Ok(metadata)
        }
    }

    struct FailingStrategy;

    #[async_trait]
    impl FetchStrategy for FailingStrategy {
        fn mode(&self) -> FetchMode {
            FetchMode::Basic
        }

        async fn fetch(&self, job: &Job) -> std::result::Result<JobMetadata, FetchError> {
            tokio::fs::write(job.dir.join("partial"), b"half").await?;
            Err(FetchError::Client("engine exploded".to_string()))
        }
    }

    /// Fetches fine but leaves a directory where the bundle is staged.
    struct BlockedBundleStrategy;

    #[async_trait]
    impl FetchStrategy for BlockedBundleStrategy {
        fn mode(&self) -> FetchMode {
            FetchMode::Basic
        }

        async fn fetch(&self, job: &Job) -> std::result::Result<JobMetadata, FetchError> {
            let mut metadata = JobMetadata::for_job(job);
            metadata.record_connected(200, Default::default(), Default::default());
            metadata.record_fetch(true);
            tokio::fs::write(job.payload_path(), b"hello").await?;
            metadata.record_object_write(true);
            tokio::fs::create_dir(job.dir.join("results.zip.part")).await?;
            Ok(metadata)
        }
    }

    fn manager(root: &Path, strategy: Arc<dyn FetchStrategy>) -> JobManager {
        let config = RelayConfig {
            storage_dir: root.to_path_buf(),
            default_user_agent: "DefaultAgent/1.0".to_string(),
            ..RelayConfig::default()
        };
        let mut registry = StrategyRegistry::new();
        registry.register(strategy);
        JobManager::new(&config, registry)
    }

    fn job_dirs(root: &Path) -> usize {
        std::fs::read_dir(root).unwrap().count()
    }

    #[tokio::test]
    async fn test_missing_url_creates_nothing() {
        let root = TempDir::new().unwrap();
        let manager = manager(root.path(), Arc::new(StaticStrategy { body: None }));

        let err = manager
            .submit(JobRequest::default(), FetchMode::Basic)
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::MissingField("url")));
        assert!(err.is_validation());
        assert_eq!(job_dirs(root.path()), 0);
    }

    #[tokio::test]
    async fn test_invalid_scheme_is_rejected() {
        let root = TempDir::new().unwrap();
        let manager = manager(root.path(), Arc::new(StaticStrategy { body: None }));

        let err = manager
            .submit(JobRequest::new("ftp://example.com/file"), FetchMode::Basic)
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::InvalidUrl { .. }));
        assert_eq!(job_dirs(root.path()), 0);
    }

    #[tokio::test]
    async fn test_unregistered_mode() {
        let root = TempDir::new().unwrap();
        let manager = manager(root.path(), Arc::new(StaticStrategy { body: None }));

        let err = manager
            .submit(JobRequest::new("http://example.com"), FetchMode::Rendered)
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::UnsupportedMode(FetchMode::Rendered)));
        assert_eq!(job_dirs(root.path()), 0);
    }

    #[tokio::test]
    async fn test_strategy_failure_rolls_back() {
        let root = TempDir::new().unwrap();
        let manager = manager(root.path(), Arc::new(FailingStrategy));

        let err = manager
            .submit(JobRequest::new("http://example.com"), FetchMode::Basic)
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::Strategy(_)));
        assert_eq!(job_dirs(root.path()), 0);
    }

    #[tokio::test]
    async fn test_successful_job_layout() {
        let root = TempDir::new().unwrap();
        let manager = manager(root.path(), Arc::new(StaticStrategy { body: Some(b"hello") }));

        let receipt = manager
            .submit(JobRequest::new("\t http://example.com/a"), FetchMode::Basic)
            .await
            .unwrap();

        let job_dir = root.path().join(receipt.job_id.to_string());
        assert!(job_dir.join(METADATA_FILE).is_file());
        assert_eq!(receipt.archive, job_dir.join(crate::archive::RESULTS_ARCHIVE));
        assert!(receipt.archive.is_file());
        assert_eq!(receipt.metadata.requested_url, "\t http://example.com/a");
        assert_eq!(receipt.metadata.actual_url, "http://example.com/a");
        assert_eq!(receipt.metadata.remote_job_id, receipt.job_id.to_string());
    }

    #[tokio::test]
    async fn test_packaging_failure_keeps_job_dir() {
        let root = TempDir::new().unwrap();
        let manager = manager(root.path(), Arc::new(BlockedBundleStrategy));

        let err = manager
            .submit(JobRequest::new("http://example.com/a"), FetchMode::Basic)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Packaging(_)));
        assert!(!err.is_validation());

        let entries: Vec<_> = std::fs::read_dir(root.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(entries.len(), 1);
        let job_dir = &entries[0];
        assert!(job_dir.join(METADATA_FILE).is_file());
        assert!(!job_dir.join(crate::archive::RESULTS_ARCHIVE).exists());

        let store = crate::results::ResultStore::new(&RelayConfig {
            storage_dir: root.path().to_path_buf(),
            store_results: true,
            ..RelayConfig::default()
        });
        let job_id = job_dir.file_name().unwrap().to_str().unwrap();
        assert!(matches!(
            store.retrieve(job_id).await,
            Err(crate::results::RetrievalError::ArchiveMissing(_))
        ));
    }
}
