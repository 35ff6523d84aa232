use thiserror::Error;

use super::model::FetchMode;
use crate::archive::ArchiveError;
use crate::fetch::FetchError;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("no fetch strategy registered for mode '{0}'")]
    UnsupportedMode(FetchMode),

    #[error("job environment error: {0}")]
    Environment(#[from] std::io::Error),

    #[error("fetch strategy failed: {0}")]
    Strategy(#[from] FetchError),

    #[error("packaging failed: {0}")]
    Packaging(#[from] ArchiveError),
}

impl JobError {
    /// Rejections caused by the submission itself; no job was created.
    pub fn is_validation(&self) -> bool {
        matches!(self, JobError::MissingField(_) | JobError::InvalidUrl { .. })
    }
}

pub type Result<T> = std::result::Result<T, JobError>;
