//! Error types for secvault core.

use thiserror::Error;

use crate::container::Section;
use crate::types::EntityId;

/// Errors raised while building, signing or encoding documents.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("invalid predicate: {0}")]
    InvalidPredicate(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("invalid household: {0}")]
    InvalidHousehold(String),

    #[error("entity {0} is revoked")]
    EntityRevoked(EntityId),

    #[error("signer {0} already signed this document with a different signature")]
    DuplicateSigner(EntityId),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Content encryption failures.
///
/// `WrongKey` and `AuthenticationFailed` are kept apart for internal
/// diagnostics but render identically and share one reason code, so a caller
/// cannot use them as a key oracle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("content could not be decrypted")]
    WrongKey,

    #[error("content could not be decrypted")]
    AuthenticationFailed,

    #[error("content encryption failed")]
    EncryptionFailed,

    #[error("sealed content requires a recipient secret")]
    KeyRequired,

    #[error("malformed sealed content")]
    MalformedSealedContent,
}

impl CryptoError {
    /// Stable reason code for caller-facing reports.
    pub fn code(&self) -> &'static str {
        match self {
            CryptoError::WrongKey | CryptoError::AuthenticationFailed => "decryption_failed",
            CryptoError::EncryptionFailed => "encryption_failed",
            CryptoError::KeyRequired => "key_required",
            CryptoError::MalformedSealedContent => "malformed_sealed_content",
        }
    }
}

/// Container decoding failures. All of them are fatal and non-retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("container truncated: {len} bytes, need at least {needed}")]
    Truncated { len: usize, needed: usize },

    #[error("bad magic bytes")]
    BadMagic,

    #[error("unsupported container version: {0}")]
    UnsupportedVersion(u16),

    #[error("unsupported encryption mode: {0}")]
    UnsupportedEncryption(u8),

    #[error("unsupported compression mode: {0}")]
    UnsupportedCompression(u8),

    #[error("reserved header bytes are not zero")]
    ReservedBytesSet,

    #[error("{section} offset {offset} is invalid")]
    BadOffset { section: Section, offset: u64 },

    #[error("{section} section declares {declared} bytes but only {available} remain")]
    SectionLength {
        section: Section,
        declared: u64,
        available: u64,
    },

    #[error("{0} trailing bytes after last section")]
    TrailingBytes(usize),

    #[error("malformed {section} section: {reason}")]
    Malformed { section: Section, reason: String },

    #[error("{0} section is not canonically encoded")]
    NonCanonical(Section),

    #[error("predicate nesting exceeds depth {0}")]
    PredicateTooDeep(usize),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl ParseError {
    /// Stable reason code for caller-facing reports and audit entries.
    pub fn code(&self) -> &'static str {
        match self {
            ParseError::Truncated { .. } => "truncated",
            ParseError::BadMagic => "bad_magic",
            ParseError::UnsupportedVersion(_) => "unsupported_version",
            ParseError::UnsupportedEncryption(_) => "unsupported_encryption",
            ParseError::UnsupportedCompression(_) => "unsupported_compression",
            ParseError::ReservedBytesSet => "reserved_bytes_set",
            ParseError::BadOffset { .. } => "bad_offset",
            ParseError::SectionLength { .. } => "section_length",
            ParseError::TrailingBytes(_) => "trailing_bytes",
            ParseError::Malformed { .. } => "malformed_section",
            ParseError::NonCanonical(_) => "non_canonical",
            ParseError::PredicateTooDeep(_) => "predicate_too_deep",
            ParseError::Crypto(e) => e.code(),
        }
    }

    pub(crate) fn malformed(section: Section, reason: impl Into<String>) -> Self {
        ParseError::Malformed {
            section,
            reason: reason.into(),
        }
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decryption_failures_are_indistinguishable() {
        let wrong = CryptoError::WrongKey;
        let auth = CryptoError::AuthenticationFailed;
        assert_eq!(wrong.to_string(), auth.to_string());
        assert_eq!(wrong.code(), auth.code());
        assert_ne!(wrong, auth);
    }

    #[test]
    fn parse_error_codes_follow_crypto() {
        let err = ParseError::from(CryptoError::AuthenticationFailed);
        assert_eq!(err.code(), "decryption_failed");
    }
}
