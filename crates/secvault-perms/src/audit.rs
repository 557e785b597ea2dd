//! The audit trail.
//!
//! Every verification, access decision and consent change produces an
//! [`AuditEntry`]. Logs are append-only: an entry, once written, has a
//! sequence number and is never modified or removed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use secvault_core::{ConsentId, DocumentId, EntityId, SubjectId, Timestamp};

use crate::error::AuditError;

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditKind {
    /// A document was run through the verifier.
    Verification {
        valid: bool,
        score: u8,
        level: String,
        /// The gate that stopped the run.
        gate: Option<String>,
        codes: Vec<String>,
    },

    /// Access was granted.
    AccessGranted {
        /// "acl", "consent" or "emergency".
        basis: String,
        consent_id: Option<ConsentId>,
        fields: Vec<String>,
    },

    /// Access was refused.
    AccessDenied { code: String },

    /// A consent grant was created.
    ConsentGranted {
        consent_id: ConsentId,
        entity: EntityId,
    },

    /// A consent grant was withdrawn.
    ConsentRevoked { consent_id: ConsentId },

    /// The issuer revoked a document.
    DocumentRevoked { reason: String },

    /// A document digest was submitted for anchoring.
    AnchorSubmitted { reference: String },
}

impl AuditKind {
    pub fn name(&self) -> &'static str {
        match self {
            AuditKind::Verification { .. } => "verification",
            AuditKind::AccessGranted { .. } => "access_granted",
            AuditKind::AccessDenied { .. } => "access_denied",
            AuditKind::ConsentGranted { .. } => "consent_granted",
            AuditKind::ConsentRevoked { .. } => "consent_revoked",
            AuditKind::DocumentRevoked { .. } => "document_revoked",
            AuditKind::AnchorSubmitted { .. } => "anchor_submitted",
        }
    }
}

/// One audit event.
///
/// Carries identifiers and reason codes only. Content, keys and another
/// subject's data never appear here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When the event happened (Unix ms).
    pub at: Timestamp,

    /// The entity that caused the event, if any.
    pub actor: Option<EntityId>,

    /// The document concerned, if any.
    pub document: Option<DocumentId>,

    /// The subject whose data is concerned, if any.
    pub subject: Option<SubjectId>,

    /// Set for break-glass access.
    #[serde(default)]
    pub emergency: bool,

    /// What happened.
    pub kind: AuditKind,
}

impl AuditEntry {
    pub fn new(at: Timestamp, kind: AuditKind) -> Self {
        Self {
            at,
            actor: None,
            document: None,
            subject: None,
            emergency: false,
            kind,
        }
    }

    pub fn actor(mut self, actor: EntityId) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn document(mut self, document: DocumentId) -> Self {
        self.document = Some(document);
        self
    }

    pub fn subject(mut self, subject: SubjectId) -> Self {
        self.subject = Some(subject);
        self
    }

    pub fn emergency(mut self, emergency: bool) -> Self {
        self.emergency = emergency;
        self
    }
}

/// A written entry with its sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub seq: u64,
    pub entry: AuditEntry,
}

/// Append-only audit storage.
///
/// Implementations must be safe for concurrent writers and must return only
/// after the entry is durable to the extent the backend promises.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Append an entry. Returns its sequence number, starting at 1.
    async fn append(&self, entry: AuditEntry) -> Result<u64, AuditError>;

    /// All entries in sequence order.
    async fn entries(&self) -> Result<Vec<AuditRecord>, AuditError>;

    /// Entries concerning one document, in sequence order.
    async fn for_document(&self, document: &DocumentId) -> Result<Vec<AuditRecord>, AuditError> {
        Ok(self
            .entries()
            .await?
            .into_iter()
            .filter(|r| r.entry.document.as_ref() == Some(document))
            .collect())
    }
}

/// In-memory audit log. Lost on drop.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn append(&self, entry: AuditEntry) -> Result<u64, AuditError> {
        let mut records = self.records.lock().map_err(|_| AuditError::LockPoisoned)?;
        let seq = records.len() as u64 + 1;
        records.push(AuditRecord { seq, entry });
        Ok(seq)
    }

    async fn entries(&self) -> Result<Vec<AuditRecord>, AuditError> {
        let records = self.records.lock().map_err(|_| AuditError::LockPoisoned)?;
        Ok(records.clone())
    }
}
