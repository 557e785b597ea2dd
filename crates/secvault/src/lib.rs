//! # secvault
//!
//! Self-verifying document containers: issue a document, sign it, seal it
//! into a portable container, then let any relying party verify it and
//! request access under the subject's consent.
//!
//! ## Overview
//!
//! - **Documents** carry metadata, a declarative predicate, content and an
//!   ACL, bound together by one digest that every signer signs.
//! - **Verification** runs five gates in order (integrity, signature,
//!   anchor, temporal, predicate) against a versioned trust snapshot.
//! - **Access** is granted by the document's ACL, by a subject's consent,
//!   or as audited break-glass access. Every decision is audited first.
//! - **Anchoring** commits document digests to an external ledger in
//!   Merkle batches.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use secvault::{Vault, VaultConfig};
//! use secvault::core::{DocumentBuilder, DocumentType, Entity, Keypair, Predicate, SubjectId, TrustTier, now_millis};
//! use secvault::verify::{VerificationContext, VerificationLevel};
//!
//! async fn example() -> secvault::Result<()> {
//!     let vault = Vault::in_memory(&VaultConfig::default(), Keypair::generate())?;
//!
//!     let key = Keypair::generate();
//!     let clinic = vault.register(Entity::new("City Clinic", key.public_key(), TrustTier::Clinical, now_millis()))?;
//!
//!     let doc = vault.issue(
//!         DocumentBuilder::new(clinic, SubjectId::derive("patient-7"), DocumentType::new("rx.dispensation")?)
//!             .content(&b"amoxicillin 500mg"[..])
//!             .predicate(Predicate::quantity("remaining_uses", 3)),
//!     )?;
//!     let bytes = vault.serialize(&doc, &[(clinic, &key)], None)?;
//!
//!     let received = vault.parse(&bytes, None)?;
//!     let result = vault
//!         .verify(&received, VerificationContext::at(now_millis()), VerificationLevel::Full)
//!         .await?;
//!     assert!(result.valid);
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `secvault::core` - documents, entities, predicates, container codec
//! - `secvault::verify` - registry, policies and the verification engine
//! - `secvault::perms` - consent, ACL evaluation and the audit trail
//! - `secvault::anchor` - ledger abstraction and anchor service
//! - `secvault::store` - SQLite audit log

pub mod config;
pub mod error;
pub mod vault;

pub use secvault_anchor as anchor;
pub use secvault_core as core;
pub use secvault_perms as perms;
pub use secvault_store as store;
pub use secvault_verify as verify;

pub use config::{ConfigError, VaultConfig};
pub use error::{Result, VaultError};
pub use vault::{RevocationAck, Vault};

pub use secvault_anchor::{Commitment, Resolution};
pub use secvault_core::{Document, DocumentBuilder, Entity, EntityId, Keypair, SubjectId};
pub use secvault_perms::{AccessDecision, AccessRequest, ConsentScope, NewConsent};
pub use secvault_verify::{VerificationContext, VerificationLevel, VerificationResult};
