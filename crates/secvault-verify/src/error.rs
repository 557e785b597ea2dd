//! Error types for the verification crate.

use secvault_core::{CoreError, EntityId, EntityStatus};
use thiserror::Error;

/// Errors from registry maintenance and trust store loading.
///
/// Verification itself never fails with an error; its findings are reported
/// in a [`crate::VerificationResult`].
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("entity {0} is already registered")]
    DuplicateEntity(EntityId),

    #[error("unknown entity: {0}")]
    UnknownEntity(EntityId),

    #[error("entity {entity} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        entity: EntityId,
        from: EntityStatus,
        to: EntityStatus,
    },

    #[error("invalid trust store: {0}")]
    TrustStore(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("registry lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result type for verification crate operations.
pub type Result<T> = std::result::Result<T, VerifyError>;
