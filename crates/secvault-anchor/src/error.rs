//! Error types for the anchor crate.

use secvault_core::CoreError;
use thiserror::Error;

/// Errors from anchoring.
///
/// A commitment that is not yet confirmed is not an error; it resolves to
/// [`crate::Resolution::Pending`].
#[derive(Debug, Error)]
pub enum AnchorError {
    /// The ledger could not be reached or refused the request.
    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(String),

    /// The ledger does not know this reference.
    #[error("unknown ledger reference: {0}")]
    UnknownReference(String),

    /// The commitment was not issued by this service.
    #[error("unknown commitment for reference {0}")]
    UnknownCommitment(String),

    /// A batch with no digests.
    #[error("empty anchor batch")]
    EmptyBatch,

    /// The ledger confirmed, but the resulting proof does not verify.
    #[error("ledger confirmation for {0} does not verify")]
    ProofRejected(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result type for anchor operations.
pub type Result<T> = std::result::Result<T, AnchorError>;
