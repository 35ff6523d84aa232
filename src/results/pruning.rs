//! Retention cleanup of job directories
use std::path::Path;
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use super::Result;
use crate::jobs::JobId;

/// Pruning statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PruneStats {
    /// Job directories inspected
    pub scanned: usize,
    pub pruned: usize,
    /// Expired directories that could not be removed
    pub failed: usize,
}

/// Removes job directories whose modification time is at least `ttl` old.
/// Entries not named like a job id are left alone.
pub(super) async fn prune_expired(root: &Path, ttl: Duration) -> Result<PruneStats> {
    let mut stats = PruneStats::default();
    let now = SystemTime::now();

    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(stats),
        Err(err) => return Err(err.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(id) = name.to_str().and_then(JobId::parse) else {
            continue;
        };
        let metadata = entry.metadata().await?;
        if !metadata.is_dir() {
            continue;
        }
        stats.scanned += 1;

        let age = now
            .duration_since(metadata.modified()?)
            .unwrap_or(Duration::ZERO);
        if age < ttl {
            continue;
        }

        match tokio::fs::remove_dir_all(entry.path()).await {
            Ok(()) => {
                debug!(job_id = %id, age_secs = age.as_secs(), "Pruned job");
                stats.pruned += 1;
            }
            Err(err) => {
                warn!(job_id = %id, error = %err, "Failed to prune job");
                stats.failed += 1;
            }
        }
    }

    info!(?stats, "Pruning complete");
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_prune_only_touches_job_directories() {
        let root = TempDir::new().unwrap();
        let job = root.path().join(JobId::generate().to_string());
        std::fs::create_dir(&job).unwrap();
        std::fs::create_dir(root.path().join("keep-me")).unwrap();

        let stats = prune_expired(root.path(), Duration::ZERO).await.unwrap();

        assert_eq!(stats, PruneStats { scanned: 1, pruned: 1, failed: 0 });
        assert!(!job.exists());
        assert!(root.path().join("keep-me").exists());
    }

    #[tokio::test]
    async fn test_prune_keeps_fresh_jobs() {
        let root = TempDir::new().unwrap();
        let job = root.path().join(JobId::generate().to_string());
        std::fs::create_dir(&job).unwrap();

        let stats = prune_expired(root.path(), Duration::from_secs(3600))
            .await
            .unwrap();

        assert_eq!(stats.pruned, 0);
        assert!(job.exists());
    }

    #[tokio::test]
    async fn test_prune_missing_root() {
        let root = TempDir::new().unwrap();
        let stats = prune_expired(&root.path().join("absent"), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(stats, PruneStats::default());
    }
}
