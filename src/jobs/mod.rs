//! Job identity, lifecycle and orchestration on the relay side.
//!
//! A job is created when a submission passes validation, gets a UUIDv7 id and
//! an isolated working directory under the storage root, runs the fetch
//! strategy selected by its [`FetchMode`], and ends with a packaged bundle.
//!
//! ## Example
//!
//! ```rust,ignore
//! use relaybox::jobs::{FetchMode, JobManager, JobRequest};
//!
//! let manager = JobManager::new(&config.relay, registry);
//! let receipt = manager
//!     .submit(JobRequest::new("http://example.com/a"), FetchMode::Basic)
//!     .await?;
//! println!("bundle at {}", receipt.archive.display());
//! ```

mod error;
mod manager;
mod model;

pub use error::{JobError, Result};
pub use manager::{JobManager, JobReceipt};
pub use model::{
    CookieMap, FetchMode, HeadersMap, Job, JobId, JobMetadata, JobRequest, RedirectHop, Resource,
    normalize_url,
};
