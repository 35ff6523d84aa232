//! Requester side of the relay protocol
//!
//! Each request claims a dedup key (second, host, path prefix) before
//! anything goes over the wire. A key that was already claimed turns the
//! call into [`Retrieval::AlreadyFetched`], a warning rather than an error.

mod dedup;
mod relay;

use thiserror::Error;

use crate::archive::ArchiveError;

pub use dedup::{DedupIndex, DedupKey, DirectoryIndex, MemoryIndex};
pub use relay::{RelayClient, Retrieval};

#[derive(Debug, Error)]
pub enum ClientError {
    /// No answer or a non-200 answer; treat the relay as degraded.
    #[error("relay unavailable: {0}")]
    RelayUnavailable(String),

    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("local I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to extract bundle: {0}")]
    Extraction(#[from] ArchiveError),
}

pub type Result<T> = std::result::Result<T, ClientError>;
