//! # secvault anchor
//!
//! Commits document digests to an external append-only ledger.
//!
//! Digests are batched into a Merkle tree and only the root is submitted.
//! Once the ledger confirms, each digest gets an [`AnchorProof`]: its
//! inclusion path, the root, the ledger reference and the ledger's signed
//! attestation. The proof can be checked offline with
//! [`secvault_core::verify_proof`].
//!
//! [`AnchorLedger`] is the seam to a real ledger. [`MemoryLedger`] is an
//! in-process implementation with configurable latency and failures.
//!
//! [`AnchorProof`]: secvault_core::AnchorProof

pub mod error;
pub mod ledger;
pub mod service;

pub use error::{AnchorError, Result};
pub use ledger::{AnchorLedger, LedgerStatus, MemoryLedger};
pub use service::{AnchorService, Commitment, Resolution};
