//! # secvault perms
//!
//! Authorization for verified documents.
//!
//! Access to a document is decided from three sources, in order:
//!
//! 1. The document's embedded ACL ([`acl`])
//! 2. Consent grants made by the subject or a guardian ([`consent`])
//! 3. Break-glass emergency access, which is always audited and disclosed
//!    to the subject afterwards ([`disclosure`])
//!
//! None of these applies unless the document passed a full verification.
//!
//! ## Audit
//!
//! Every decision and every consent change is appended to an [`AuditLog`]
//! before the caller sees the result. If the append fails the operation
//! fails: there is no unaudited access.

pub mod access;
pub mod acl;
pub mod audit;
pub mod consent;
pub mod disclosure;
pub mod error;

pub use access::{AccessBasis, AccessDecision, AccessManager, AccessRequest, DenialReason};
pub use acl::matching_entry;
pub use audit::{AuditEntry, AuditKind, AuditLog, AuditRecord, MemoryAuditLog};
pub use consent::{may_act_for, ConsentBook, ConsentGrant, ConsentScope, ConsentTarget, NewConsent};
pub use disclosure::{Disclosure, DisclosureQueue};
pub use error::{AccessError, AuditError, PermsError, Result};
