//! Data-level error kinds for the pipeline's external collaborators (§6, §7).
//!
//! Neither kind here is ever stored in a [`mediatask_future::Future`]'s
//! exception slot — a bad tag read is a per-row fact, not a reason to
//! cancel the whole batch (§4.G: "unreadable file ⇒ `LoaderResult` with the
//! original entry marked error, count=1; not an exception").

use thiserror::Error;

/// Failure reading a file's metadata, surfaced from [`crate::loader::MetadataReader`].
#[derive(Debug, Clone, Error)]
pub enum MetadataError {
    #[error("unreadable file: {0}")]
    Unreadable(String),
}
