//! # secvault core
//!
//! Pure primitives for secvault: documents, entities, predicates, the
//! container codec and the cryptographic layer.
//!
//! This crate performs no I/O. Everything here is computation over
//! immutable data, and every type is `Send + Sync`.
//!
//! ## Key Types
//!
//! - [`Document`] - A signed document with metadata, predicate, content and ACL
//! - [`DocumentBuilder`] - The only way to create a new document
//! - [`Predicate`] - Declarative condition embedded in a document
//! - [`Entity`] - An issuing or relying party
//! - [`AnchorProof`] - Merkle inclusion proof plus ledger attestation
//!
//! ## Container
//!
//! [`container::encode`] and [`container::decode`] implement the binary
//! envelope. All structured sections use canonical CBOR (see [`canonical`]),
//! so the same document always produces the same digest.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use secvault_core::{container, DocumentBuilder, DocumentType, Entity, Keypair, SubjectId, TrustTier};
//!
//! let key = Keypair::generate();
//! let clinic = Entity::new("City Clinic", key.public_key(), TrustTier::Clinical, 0);
//!
//! let mut doc = DocumentBuilder::new(
//!     clinic.id,
//!     SubjectId::derive("patient-7"),
//!     DocumentType::new("rx.dispensation").unwrap(),
//! )
//! .content(&b"amoxicillin 500mg"[..])
//! .build()
//! .unwrap();
//! doc.sign(clinic.id, &key).unwrap();
//!
//! let bytes = container::encode(&doc, None).unwrap();
//! let parsed = container::decode(&bytes, None).unwrap();
//! assert_eq!(parsed, doc);
//! ```

pub mod anchor;
pub mod canonical;
pub mod cipher;
pub mod container;
pub mod crypto;
pub mod document;
pub mod entity;
pub mod error;
pub mod merkle;
pub mod predicate;
pub mod types;

pub use anchor::{attestation_message, verify_proof, AnchorProof, LedgerAttestation};
pub use cipher::{ContentKey, RecipientSecret, SealedContent, X25519PublicKey, X25519StaticSecret};
pub use container::{EncryptionMode, Section, FORMAT_VERSION, MAGIC};
pub use crypto::{Digest, Ed25519PublicKey, Ed25519Signature, Keypair};
pub use document::{
    content_hash, AclEntry, AnchorRecord, Document, DocumentBuilder, DocumentContent,
    DocumentStatus, FieldScope, Metadata, Permission, Permissions, SignatureEntry,
};
pub use entity::{Capability, Entity, EntityStatus, Household, HouseholdGraph, TrustTier};
pub use error::{CoreError, CryptoError, ParseError};
pub use merkle::{MerkleProof, MerkleTree};
pub use predicate::{GeoBox, GeoPoint, Predicate, PredicateFailure, PredicateInput, MAX_PREDICATE_DEPTH};
pub use types::{
    now_millis, ConsentId, DocumentId, DocumentType, EntityId, HouseholdId, Purpose, SubjectId,
    Timestamp,
};
