//! Content encryption.
//!
//! Provides X25519 agreement for establishing a recipient secret and
//! ChaCha20-Poly1305 sealing of document content under a per-document key.
//!
//! Sealed content layout: `nonce[12] || key_check[16] || ciphertext+tag`.
//! The associated data is always the document digest, which ties a ciphertext
//! to exactly one signed document.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::crypto::Digest;
use crate::error::CryptoError;
use crate::types::DocumentId;

const CONTENT_KEY_CONTEXT: &str = "secvault content key v1";
const RECIPIENT_SECRET_CONTEXT: &str = "secvault recipient secret v1";
const KEY_CHECK_TAG: &[u8] = b"secvault-key-check-v1:";

pub const NONCE_LEN: usize = 12;
pub const KEY_CHECK_LEN: usize = 16;
const TAG_LEN: usize = 16;

/// An X25519 public key (32 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct X25519PublicKey(pub [u8; 32]);

impl X25519PublicKey {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// An X25519 static secret used only for key agreement.
pub struct X25519StaticSecret(StaticSecret);

impl X25519StaticSecret {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(StaticSecret::from(bytes))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    pub fn public_key(&self) -> X25519PublicKey {
        X25519PublicKey(*PublicKey::from(&self.0).as_bytes())
    }
}

/// The long-lived secret shared between an issuer and a recipient.
///
/// Content keys are never stored; each one is derived from this secret and
/// the document id.
#[derive(Clone, PartialEq, Eq)]
pub struct RecipientSecret([u8; 32]);

impl RecipientSecret {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Establish a secret from our X25519 secret and the peer's public key.
    ///
    /// Both sides arrive at the same value.
    pub fn agree(local: &X25519StaticSecret, peer: &X25519PublicKey) -> Self {
        let shared = local.0.diffie_hellman(&PublicKey::from(peer.0));
        let mut hasher = blake3::Hasher::new_derive_key(RECIPIENT_SECRET_CONTEXT);
        hasher.update(shared.as_bytes());
        Self(*hasher.finalize().as_bytes())
    }
}

impl fmt::Debug for RecipientSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RecipientSecret(..)")
    }
}

/// A 256-bit ChaCha20-Poly1305 key for one document.
#[derive(Clone)]
pub struct ContentKey([u8; 32]);

impl ContentKey {
    pub fn derive(secret: &RecipientSecret, document_id: &DocumentId) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key(CONTENT_KEY_CONTEXT);
        hasher.update(secret.as_bytes());
        hasher.update(document_id.as_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    fn key_check(&self, nonce: &[u8; NONCE_LEN]) -> [u8; KEY_CHECK_LEN] {
        let mut hasher = blake3::Hasher::new_keyed(&self.0);
        hasher.update(KEY_CHECK_TAG);
        hasher.update(nonce);
        let mut out = [0u8; KEY_CHECK_LEN];
        out.copy_from_slice(&hasher.finalize().as_bytes()[..KEY_CHECK_LEN]);
        out
    }

    fn cipher(&self) -> Result<ChaCha20Poly1305, CryptoError> {
        ChaCha20Poly1305::new_from_slice(&self.0).map_err(|_| CryptoError::EncryptionFailed)
    }

    /// Encrypt `plaintext` with a fresh random nonce, binding it to `digest`.
    pub fn seal(&self, plaintext: &[u8], digest: &Digest) -> Result<SealedContent, CryptoError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher()?
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: digest.as_bytes(),
                },
            )
            .map_err(|_| CryptoError::EncryptionFailed)?;

        Ok(SealedContent {
            nonce,
            key_check: self.key_check(&nonce),
            ciphertext,
        })
    }

    /// Decrypt sealed content that was bound to `digest`.
    pub fn open(&self, sealed: &SealedContent, digest: &Digest) -> Result<Vec<u8>, CryptoError> {
        if self.key_check(&sealed.nonce) != sealed.key_check {
            return Err(CryptoError::WrongKey);
        }
        self.cipher()
            .map_err(|_| CryptoError::AuthenticationFailed)?
            .decrypt(
                Nonce::from_slice(&sealed.nonce),
                Payload {
                    msg: &sealed.ciphertext,
                    aad: digest.as_bytes(),
                },
            )
            .map_err(|_| CryptoError::AuthenticationFailed)
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ContentKey(..)")
    }
}

/// Encrypted document content as carried in a mode-1 container.
#[derive(Clone, PartialEq, Eq)]
pub struct SealedContent {
    pub nonce: [u8; NONCE_LEN],
    pub key_check: [u8; KEY_CHECK_LEN],
    pub ciphertext: Vec<u8>,
}

impl SealedContent {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(NONCE_LEN + KEY_CHECK_LEN + self.ciphertext.len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.key_check);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Split a content section into its parts. The ciphertext must at least
    /// hold the authentication tag.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() < NONCE_LEN + KEY_CHECK_LEN + TAG_LEN {
            return Err(CryptoError::MalformedSealedContent);
        }
        let (nonce, rest) = bytes.split_at(NONCE_LEN);
        let (key_check, ciphertext) = rest.split_at(KEY_CHECK_LEN);
        Ok(Self {
            nonce: nonce
                .try_into()
                .map_err(|_| CryptoError::MalformedSealedContent)?,
            key_check: key_check
                .try_into()
                .map_err(|_| CryptoError::MalformedSealedContent)?,
            ciphertext: ciphertext.to_vec(),
        })
    }

    /// Length of the plaintext this ciphertext decrypts to.
    pub fn plaintext_len(&self) -> usize {
        self.ciphertext.len().saturating_sub(TAG_LEN)
    }
}

impl fmt::Debug for SealedContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SealedContent")
            .field("nonce", &hex::encode(self.nonce))
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_id(byte: u8) -> DocumentId {
        DocumentId::from_bytes([byte; 32])
    }

    #[test]
    fn agreement_is_symmetric() {
        let alice = X25519StaticSecret::generate();
        let bob = X25519StaticSecret::generate();

        let a = RecipientSecret::agree(&alice, &bob.public_key());
        let b = RecipientSecret::agree(&bob, &alice.public_key());
        assert_eq!(a, b);
    }

    #[test]
    fn seal_and_open() {
        let key = ContentKey::derive(&RecipientSecret::generate(), &doc_id(1));
        let digest = Digest::hash(b"digest");

        let sealed = key.seal(b"blood type: O-", &digest).unwrap();
        assert_eq!(sealed.plaintext_len(), 14);
        assert_eq!(key.open(&sealed, &digest).unwrap(), b"blood type: O-");
    }

    #[test]
    fn nonces_are_fresh() {
        let key = ContentKey::derive(&RecipientSecret::generate(), &doc_id(1));
        let digest = Digest::hash(b"digest");
        let a = key.seal(b"same", &digest).unwrap();
        let b = key.seal(b"same", &digest).unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn wrong_key_is_detected_by_key_check() {
        let secret = RecipientSecret::generate();
        let digest = Digest::hash(b"digest");
        let sealed = ContentKey::derive(&secret, &doc_id(1))
            .seal(b"data", &digest)
            .unwrap();

        let other_doc = ContentKey::derive(&secret, &doc_id(2));
        assert_eq!(other_doc.open(&sealed, &digest), Err(CryptoError::WrongKey));
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let key = ContentKey::derive(&RecipientSecret::generate(), &doc_id(1));
        let digest = Digest::hash(b"digest");
        let mut sealed = key.seal(b"data", &digest).unwrap();
        sealed.ciphertext[0] ^= 0x01;
        assert_eq!(
            key.open(&sealed, &digest),
            Err(CryptoError::AuthenticationFailed)
        );
    }

    #[test]
    fn associated_data_binds_digest() {
        let key = ContentKey::derive(&RecipientSecret::generate(), &doc_id(1));
        let sealed = key.seal(b"data", &Digest::hash(b"a")).unwrap();
        assert_eq!(
            key.open(&sealed, &Digest::hash(b"b")),
            Err(CryptoError::AuthenticationFailed)
        );
    }

    #[test]
    fn sealed_bytes_roundtrip() {
        let key = ContentKey::derive(&RecipientSecret::generate(), &doc_id(3));
        let sealed = key.seal(b"x", &Digest::ZERO).unwrap();
        let parsed = SealedContent::from_bytes(&sealed.to_bytes()).unwrap();
        assert_eq!(parsed, sealed);
        assert_eq!(
            SealedContent::from_bytes(&[0u8; 20]),
            Err(CryptoError::MalformedSealedContent)
        );
    }
}
