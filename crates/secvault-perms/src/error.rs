//! Error types for the permissions crate.

use secvault_core::{ConsentId, CoreError, EntityId, SubjectId};
use thiserror::Error;

/// Errors from an audit log backend.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The backend could not persist the entry.
    #[error("audit write failed: {0}")]
    WriteFailed(String),

    /// The backend could not be read.
    #[error("audit read failed: {0}")]
    ReadFailed(String),

    /// A lock protecting the log was poisoned.
    #[error("audit log lock poisoned")]
    LockPoisoned,
}

/// Errors from access decisions.
///
/// A denial is not an error: it is an [`crate::AccessDecision::Denied`].
/// These are the conditions under which no decision could be made.
#[derive(Debug, Error)]
pub enum AccessError {
    /// No active consent grant covers the request.
    #[error("consent denied: {0}")]
    ConsentDenied(&'static str),

    /// The audit entry for the decision could not be written, so the
    /// decision was discarded.
    #[error("audit unavailable: {0}")]
    AuditUnavailable(#[from] AuditError),

    /// A lock protecting consent or disclosure state was poisoned.
    #[error("permission state lock poisoned")]
    LockPoisoned,
}

/// Errors from consent management.
#[derive(Debug, Error)]
pub enum PermsError {
    /// The actor may not manage consent for this subject.
    #[error("{actor} may not act for subject {subject}")]
    NotAuthorized { actor: EntityId, subject: SubjectId },

    /// No consent grant with this id.
    #[error("consent not found: {0}")]
    ConsentNotFound(ConsentId),

    /// The grant is malformed, e.g. it expires before it is created.
    #[error("invalid consent: {0}")]
    InvalidConsent(String),

    /// Disclosure not found for this subject.
    #[error("disclosure {seq} not found")]
    DisclosureNotFound { seq: u64 },

    /// Audit failure while recording the change.
    #[error(transparent)]
    Audit(#[from] AuditError),

    /// Invalid household or guardian relation.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A lock protecting permission state was poisoned.
    #[error("permission state lock poisoned")]
    LockPoisoned,
}

/// Result type for consent management.
pub type Result<T> = std::result::Result<T, PermsError>;
