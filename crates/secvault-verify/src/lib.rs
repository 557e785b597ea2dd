//! # secvault verify
//!
//! The verification engine: a versioned entity registry, immutable trust
//! snapshots, per-type gate policies and the five-gate pipeline.
//!
//! ## Gates
//!
//! | Gate      | Weight | Checks                                           |
//! |-----------|--------|--------------------------------------------------|
//! | Integrity | 30     | digest recomputation, content hash               |
//! | Signature | 30     | issuer signature, signer status, cosigner tiers  |
//! | Anchor    | 15     | Merkle inclusion and ledger attestation          |
//! | Temporal  | 15     | revocation, then expiry                          |
//! | Predicate | 10     | embedded predicate against the caller's context  |
//!
//! A run reads exactly one [`TrustSnapshot`], taken from the
//! [`EntityRegistry`] before it starts.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use secvault_verify::{EntityRegistry, VerificationContext, VerificationLevel, Verifier};
//! # fn doc() -> secvault_core::Document { unimplemented!() }
//!
//! let registry = EntityRegistry::new();
//! let snapshot = registry.snapshot().unwrap();
//! let result = Verifier::default().verify(
//!     &doc(),
//!     &snapshot,
//!     &VerificationContext::at(secvault_core::now_millis()),
//!     VerificationLevel::Full,
//! );
//! println!("valid={} score={}", result.valid, result.score);
//! ```

pub mod context;
pub mod engine;
pub mod error;
pub mod policy;
pub mod registry;
pub mod result;
pub mod snapshot;

pub use context::{VerificationContext, VerificationLevel};
pub use engine::Verifier;
pub use error::{Result, VerifyError};
pub use policy::{GatePolicy, PolicyTable};
pub use registry::EntityRegistry;
pub use result::{FailureReason, Gate, GateOutcome, GateStatus, VerificationResult, Warning};
pub use snapshot::{RevocationRecord, TrustSnapshot};
