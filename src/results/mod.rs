//! Retrieval of finished bundles by job id, and explicit retention cleanup.

mod pruning;
mod store;

use thiserror::Error;

pub use pruning::PruneStats;
pub use store::ResultStore;

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("job {0} has no results archive")]
    ArchiveMissing(String),

    #[error("result retention is disabled on this relay")]
    RetentionDisabled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RetrievalError>;
