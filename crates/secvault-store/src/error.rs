//! Error types for the store crate.

use secvault_perms::AuditError;
use thiserror::Error;

/// Errors from the SQLite audit store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// An entry could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A row holds data that does not decode.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// The blocking task running the query panicked or was cancelled.
    #[error("blocking task failed: {0}")]
    Task(String),

    /// The connection mutex was poisoned.
    #[error("connection lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    /// Map a failed append to the audit error the access layer expects.
    pub fn into_write_error(self) -> AuditError {
        match self {
            StoreError::LockPoisoned => AuditError::LockPoisoned,
            other => AuditError::WriteFailed(other.to_string()),
        }
    }

    /// Map a failed read to the audit error the access layer expects.
    pub fn into_read_error(self) -> AuditError {
        match self {
            StoreError::LockPoisoned => AuditError::LockPoisoned,
            other => AuditError::ReadFailed(other.to_string()),
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
