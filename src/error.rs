//! Error taxonomy for the ingestion core.
//!
//! Row-level validation failures are not errors; they surface as drop counts
//! in [`crate::validate::ValidationReport`]. Everything that concerns a whole
//! file or an external collaborator lands here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Recoverable: the caller should skip this file, not abort the batch.
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),

    /// The file claims a supported type but could not be read or parsed.
    /// Fatal for that file.
    #[error("unreadable file {path}: {reason}")]
    FileFormat { path: String, reason: String },

    /// Snapshot store failure, propagated unchanged. Retries, if any, belong
    /// to the store side.
    #[error("snapshot store error: {0}")]
    SnapshotIo(#[source] anyhow::Error),

    /// Analytical sink failure, propagated unchanged.
    #[error("sink write error: {0}")]
    SinkWrite(#[source] anyhow::Error),
}

impl IngestError {
    pub fn file_format(path: &str, err: impl std::fmt::Display) -> Self {
        IngestError::FileFormat {
            path: path.to_string(),
            reason: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
