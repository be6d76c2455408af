//! Error types for the sync layer.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Connectivity/network error. Recoverable; retried with backoff.
    #[error("network error: {0}")]
    Network(String),

    /// The remote rejected an insert because the key already exists.
    /// Benign on replay: the record made it on an earlier attempt.
    #[error("duplicate key")]
    DuplicateKey,

    /// The remote row does not exist. Benign for deletes.
    #[error("record not found")]
    NotFound,

    /// The remote refused the operation.
    #[error("remote error ({status}): {message}")]
    Remote { status: u16, message: String },

    /// A local record or response did not have the expected shape.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// Local store error.
    #[error("store error: {0}")]
    Store(#[from] cortado_store::StoreError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Fallback queue file I/O error.
    #[error("queue file error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Whether this error means the network itself is unavailable, so a
    /// cached answer is the right fallback.
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}
