//! Error types for the vault.

use secvault_anchor::AnchorError;
use secvault_core::{CoreError, DocumentId, EntityId, ParseError};
use secvault_perms::{AccessError, PermsError};
use secvault_store::StoreError;
use secvault_verify::VerifyError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors from vault operations.
///
/// A document that fails verification is not an error; see
/// [`secvault_verify::VerificationResult`]. Neither is a denied access
/// request or a pending anchor.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Core(#[from] CoreError),

    /// The container bytes could not be decoded.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("registry error: {0}")]
    Verify(#[from] VerifyError),

    #[error("permission error: {0}")]
    Perms(#[from] PermsError),

    #[error("access error: {0}")]
    Access(#[from] AccessError),

    #[error("anchor error: {0}")]
    Anchor(#[from] AnchorError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// The entity is not registered.
    #[error("unknown entity: {0}")]
    UnknownEntity(EntityId),

    /// The entity is registered but suspended or revoked.
    #[error("entity {0} is not active")]
    EntityInactive(EntityId),

    /// Only the issuer may revoke a document.
    #[error("{entity} did not issue document {document}")]
    NotIssuer { document: DocumentId, entity: EntityId },

    /// Usage counter state was poisoned.
    #[error("vault state lock poisoned")]
    LockPoisoned,
}

/// Result type for vault operations.
pub type Result<T> = std::result::Result<T, VaultError>;
