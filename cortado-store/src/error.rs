//! Error types for the mirror store.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Record not found.
    #[error("record not found: {0}")]
    NotFound(String),

    /// Table is not part of the mirror schema.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// Row is missing a required field or has the wrong shape.
    #[error("invalid row: {0}")]
    InvalidRow(String),
}
