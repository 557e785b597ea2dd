//! Signing and hashing primitives.
//!
//! Wraps Ed25519 and Blake3 behind strong types. Nothing outside this module
//! and [`crate::cipher`] touches the underlying primitive crates.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

/// Blake3 key-derivation contexts. Each hashed structure gets its own.
pub mod domain {
    pub const DOCUMENT_DIGEST: &str = "secvault document digest v1";
    pub const CONTENT_HASH: &str = "secvault content hash v1";
    pub const DOCUMENT_ID: &str = "secvault document id v1";
    pub const ENTITY_ID: &str = "secvault entity id v1";
    pub const SUBJECT_ID: &str = "secvault subject id v1";
    pub const HOUSEHOLD_ID: &str = "secvault household id v1";
    pub const CONSENT_ID: &str = "secvault consent id v1";
    pub const SIGNATURE: &[u8] = b"secvault-signature-v1:";
    pub const LEDGER_ATTESTATION: &[u8] = b"secvault-ledger-attestation-v1:";
}

/// A 32-byte Blake3 digest.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    /// Plain Blake3 hash of `data`.
    pub fn hash(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Domain-separated hash over several parts.
    ///
    /// Each part is prefixed with its length so that part boundaries cannot
    /// be shifted to produce a collision.
    pub fn derive(domain: &str, parts: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key(domain);
        for part in parts {
            hasher.update(&(part.len() as u64).to_be_bytes());
            hasher.update(part);
        }
        Self(*hasher.finalize().as_bytes())
    }

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut arr = [0u8; 32];
        hex::decode_to_slice(s, &mut arr)?;
        Ok(Self(arr))
    }

    pub const ZERO: Self = Self([0u8; 32]);
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for Digest {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// A 32-byte Ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ed25519PublicKey(pub [u8; 32]);

impl Ed25519PublicKey {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut arr = [0u8; 32];
        hex::decode_to_slice(s, &mut arr)?;
        Ok(Self(arr))
    }

    /// Verify a signature over a message.
    ///
    /// Uses strict verification, which rejects small-order keys and
    /// non-canonical signature encodings.
    pub fn verify(&self, message: &[u8], signature: &Ed25519Signature) -> Result<(), CoreError> {
        let verifying_key =
            VerifyingKey::from_bytes(&self.0).map_err(|_| CoreError::InvalidPublicKey)?;
        let sig = Signature::from_bytes(&signature.0);
        verifying_key
            .verify_strict(message, &sig)
            .map_err(|_| CoreError::InvalidSignature)
    }
}

impl fmt::Debug for Ed25519PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ed25519Pub({})", &self.to_hex()[..16])
    }
}

impl From<[u8; 32]> for Ed25519PublicKey {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// A 64-byte Ed25519 signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Ed25519Signature(pub [u8; 64]);

impl Ed25519Signature {
    pub const fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Build from a slice, failing unless it is exactly 64 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 64] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl fmt::Debug for Ed25519Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ed25519Sig({}...)", &self.to_hex()[..16])
    }
}

impl From<[u8; 64]> for Ed25519Signature {
    fn from(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }
}

/// An Ed25519 signing keypair held by an issuer, cosigner or ledger.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            signing_key: SigningKey::generate(&mut rng),
        }
    }

    /// Deterministic keypair from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    pub fn public_key(&self) -> Ed25519PublicKey {
        Ed25519PublicKey(self.signing_key.verifying_key().to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        Ed25519Signature(self.signing_key.sign(message).to_bytes())
    }

    /// Raw seed bytes (secret key material).
    pub fn seed(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// The exact bytes a document signer signs.
///
/// Covers the container's identifying header fields (magic and format
/// version) and the document digest. Transport choices such as the
/// encryption mode are not covered: the digest already commits to the
/// plaintext and the AEAD binds the ciphertext to the digest.
pub fn signing_message(magic: &[u8; 4], version: u16, digest: &Digest) -> Vec<u8> {
    let mut msg = Vec::with_capacity(domain::SIGNATURE.len() + 4 + 2 + 32);
    msg.extend_from_slice(domain::SIGNATURE);
    msg.extend_from_slice(magic);
    msg.extend_from_slice(&version.to_be_bytes());
    msg.extend_from_slice(digest.as_bytes());
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_separates_domains() {
        let a = Digest::derive("domain a", &[b"x"]);
        let b = Digest::derive("domain b", &[b"x"]);
        assert_ne!(a, b);
    }

    #[test]
    fn derive_length_prefixes_parts() {
        let a = Digest::derive(domain::DOCUMENT_DIGEST, &[b"ab", b"c"]);
        let b = Digest::derive(domain::DOCUMENT_DIGEST, &[b"a", b"bc"]);
        assert_ne!(a, b);
    }

    #[test]
    fn digest_hex_roundtrip() {
        let d = Digest::hash(b"payload");
        assert_eq!(Digest::from_hex(&d.to_hex()).unwrap(), d);
        assert_eq!(d.to_string().len(), 16);
    }

    #[test]
    fn sign_and_verify() {
        let kp = Keypair::generate();
        let msg = signing_message(b"SEC\x01", 1, &Digest::hash(b"doc"));
        let sig = kp.sign(&msg);
        assert!(kp.public_key().verify(&msg, &sig).is_ok());

        let other = signing_message(b"SEC\x01", 2, &Digest::hash(b"doc"));
        assert!(kp.public_key().verify(&other, &sig).is_err());
    }

    #[test]
    fn seeded_keypair_is_deterministic() {
        let a = Keypair::from_seed(&[7u8; 32]);
        let b = Keypair::from_seed(&[7u8; 32]);
        assert_eq!(a.public_key(), b.public_key());
        assert_eq!(a.seed(), [7u8; 32]);
    }

    #[test]
    fn signature_from_slice_checks_length() {
        assert!(Ed25519Signature::from_slice(&[0u8; 63]).is_none());
        assert!(Ed25519Signature::from_slice(&[0u8; 64]).is_some());
    }
}
