//! Two-layer ZIP bundles
//!
//! Every finished job is shipped as one outer archive (`results.zip`):
//!
//! ```text
//! results.zip
//! ├── metadata.json        always present
//! ├── payload.zip          ZipCrypto, only when a primary payload exists
//! │   └── <remote_job_id>
//! ├── resource0 .. N       rendered mode only
//! └── <host>.png           rendered mode only, when the screenshot succeeded
//! ```
//!
//! The inner archive password is fixed and publicly known. It only keeps
//! scanners on the requester side away from possibly hostile payloads.

mod extract;
mod packager;

use std::path::PathBuf;
use thiserror::Error;

pub use extract::{entry_names, extract_bundle, read_metadata, read_payload, read_payload_from_bundle};
pub use packager::ArchivePackager;

pub const METADATA_FILE: &str = "metadata.json";
pub const PAYLOAD_ARCHIVE: &str = "payload.zip";
pub const RESULTS_ARCHIVE: &str = "results.zip";
pub const PAYLOAD_PASSWORD: &[u8] = b"infected";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("metadata is not valid JSON: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("metadata file missing: {0}")]
    MissingMetadata(PathBuf),
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
