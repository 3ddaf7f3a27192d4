//! Storage-specific error types.
//!
//! All central-store operations return [`StorageError`] on failure, which can
//! be matched to determine the underlying cause (database, timeout, bad row).

use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database operation failed (sqlx error).
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Operation did not finish within its deadline.
    #[error("storage operation timed out")]
    Timeout,

    /// Invalid data in database (e.g., negative port).
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Internal error (e.g., task join failure).
    #[error("internal error: {0}")]
    Internal(String),
}
