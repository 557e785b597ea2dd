//! Access decisions.
//!
//! [`AccessManager::decide`] turns a verification result and a request into
//! a grant or a denial. Every decision is written to the audit log before it
//! is returned; when the write fails, no decision is returned at all.

use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use tracing::{info, warn};

use secvault_core::{
    Capability, ConsentId, Document, Entity, EntityId, FieldScope, HouseholdGraph, HouseholdId,
    Purpose, SubjectId, Timestamp,
};
use secvault_verify::VerificationResult;

use crate::acl::matching_entry;
use crate::audit::{AuditEntry, AuditKind, AuditLog};
use crate::consent::{ConsentBook, ConsentGrant, NewConsent};
use crate::disclosure::{Disclosure, DisclosureQueue};
use crate::error::{AccessError, PermsError, Result};

/// A request to read a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub requester: EntityId,
    /// Fields wanted. Empty means the whole document.
    pub fields: Vec<String>,
    pub purpose: Purpose,
    /// Break-glass justification. When normal authorization fails, a request
    /// carrying one is granted anyway, logged and disclosed to the subject.
    pub emergency: Option<String>,
}

impl AccessRequest {
    pub fn new(requester: EntityId, purpose: Purpose) -> Self {
        Self {
            requester,
            fields: Vec::new(),
            purpose,
            emergency: None,
        }
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn emergency(mut self, reason: impl Into<String>) -> Self {
        self.emergency = Some(reason.into());
        self
    }

    fn scope(&self) -> FieldScope {
        if self.fields.is_empty() {
            FieldScope::All
        } else {
            FieldScope::only(self.fields.iter().cloned())
        }
    }
}

/// What authorized a normal grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "basis", rename_all = "snake_case")]
pub enum AccessBasis {
    Acl,
    Consent { consent_id: ConsentId },
}

impl AccessBasis {
    fn name(&self) -> &'static str {
        match self {
            AccessBasis::Acl => "acl",
            AccessBasis::Consent { .. } => "consent",
        }
    }
}

/// Why access was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DenialReason {
    /// The document failed verification.
    Verification { codes: Vec<String> },
    /// Only a quick verification was supplied, or it was for another
    /// document.
    InsufficientVerification,
    /// Neither the ACL nor any consent grant covers the request.
    NoAuthorization { code: String },
}

impl DenialReason {
    pub fn code(&self) -> &str {
        match self {
            DenialReason::Verification { .. } => "verification_failed",
            DenialReason::InsufficientVerification => "insufficient_verification",
            DenialReason::NoAuthorization { code } => code,
        }
    }
}

/// The outcome of an access request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AccessDecision {
    Granted {
        basis: AccessBasis,
        fields: FieldScope,
        audit_seq: u64,
    },
    /// Break-glass access. Kept apart from [`AccessDecision::Granted`] so
    /// callers cannot mistake it for a normal grant.
    EmergencyGranted {
        reason: String,
        fields: FieldScope,
        audit_seq: u64,
    },
    Denied {
        reason: DenialReason,
        audit_seq: u64,
    },
}

impl AccessDecision {
    pub fn is_granted(&self) -> bool {
        !matches!(self, AccessDecision::Denied { .. })
    }

    pub fn audit_seq(&self) -> u64 {
        match self {
            AccessDecision::Granted { audit_seq, .. }
            | AccessDecision::EmergencyGranted { audit_seq, .. }
            | AccessDecision::Denied { audit_seq, .. } => *audit_seq,
        }
    }
}

/// Consent, guardianship and disclosure state plus the audit log.
///
/// State locks are never held across an `.await`: each operation decides
/// under the lock, releases it, then writes the audit entry.
pub struct AccessManager<A: AuditLog> {
    audit: A,
    consents: RwLock<ConsentBook>,
    households: RwLock<HouseholdGraph>,
    disclosures: RwLock<DisclosureQueue>,
}

impl<A: AuditLog> AccessManager<A> {
    pub fn new(audit: A) -> Self {
        Self {
            audit,
            consents: RwLock::new(ConsentBook::new()),
            households: RwLock::new(HouseholdGraph::new()),
            disclosures: RwLock::new(DisclosureQueue::new()),
        }
    }

    pub fn audit(&self) -> &A {
        &self.audit
    }

    // ─────────────────────────────────────────────────────────────────────
    // Households
    // ─────────────────────────────────────────────────────────────────────

    pub fn add_household(
        &self,
        name: &str,
        guardians: &[EntityId],
        members: &[SubjectId],
        capabilities: &[Capability],
    ) -> Result<HouseholdId> {
        let mut graph = self.households.write().map_err(|_| PermsError::LockPoisoned)?;
        Ok(graph.add_household(name, guardians, members, capabilities)?)
    }

    pub fn grant_capability(
        &self,
        guardian: EntityId,
        dependent: SubjectId,
        capabilities: &[Capability],
    ) -> Result<()> {
        let mut graph = self.households.write().map_err(|_| PermsError::LockPoisoned)?;
        graph.grant(guardian, dependent, capabilities);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Consent
    // ─────────────────────────────────────────────────────────────────────

    /// Record a consent grant made by `actor` and audit it.
    pub async fn grant_consent(
        &self,
        actor: &Entity,
        request: NewConsent,
        now: Timestamp,
    ) -> Result<ConsentGrant> {
        let grant = {
            let graph = self.households.read().map_err(|_| PermsError::LockPoisoned)?;
            let mut book = self.consents.write().map_err(|_| PermsError::LockPoisoned)?;
            book.grant(actor, request, &graph, now)?.clone()
        };
        self.audit
            .append(
                AuditEntry::new(
                    now,
                    AuditKind::ConsentGranted {
                        consent_id: grant.id,
                        entity: grant.entity,
                    },
                )
                .actor(actor.id)
                .subject(grant.subject),
            )
            .await?;
        info!(consent = %grant.id, subject = %grant.subject, entity = %grant.entity, "consent granted");
        Ok(grant)
    }

    /// Withdraw a consent grant and audit it.
    pub async fn revoke_consent(
        &self,
        actor: &Entity,
        id: &ConsentId,
        now: Timestamp,
    ) -> Result<ConsentGrant> {
        let grant = {
            let graph = self.households.read().map_err(|_| PermsError::LockPoisoned)?;
            let mut book = self.consents.write().map_err(|_| PermsError::LockPoisoned)?;
            book.revoke(actor, id, &graph, now)?.clone()
        };
        self.audit
            .append(
                AuditEntry::new(now, AuditKind::ConsentRevoked { consent_id: *id })
                    .actor(actor.id)
                    .subject(grant.subject),
            )
            .await?;
        info!(consent = %id, "consent revoked");
        Ok(grant)
    }

    pub fn consent(&self, id: &ConsentId) -> Result<Option<ConsentGrant>> {
        let book = self.consents.read().map_err(|_| PermsError::LockPoisoned)?;
        Ok(book.get(id).cloned())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Decisions
    // ─────────────────────────────────────────────────────────────────────

    /// Decide whether `request` may read `doc`.
    ///
    /// Requires a full, valid verification of this document. Then grants on
    /// a matching ACL entry, else on an active consent grant, else on a
    /// break-glass justification. Break-glass never overrides a failed
    /// verification.
    pub async fn decide(
        &self,
        doc: &Document,
        verification: &VerificationResult,
        request: &AccessRequest,
        now: Timestamp,
    ) -> std::result::Result<AccessDecision, AccessError> {
        let outcome = self.evaluate(doc, verification, request, now)?;

        let entry = AuditEntry::new(now, outcome.audit_kind(request))
            .actor(request.requester)
            .document(*doc.id())
            .subject(*doc.subject())
            .emergency(matches!(outcome, Outcome::Emergency(_)));
        let audit_seq = self.audit.append(entry).await?;

        let decision = match outcome {
            Outcome::Grant(basis) => {
                info!(document = %doc.id(), requester = %request.requester, basis = basis.name(), "access granted");
                AccessDecision::Granted {
                    basis,
                    fields: request.scope(),
                    audit_seq,
                }
            }
            Outcome::Emergency(reason) => {
                warn!(document = %doc.id(), requester = %request.requester, "break-glass access");
                let mut queue = self.disclosures.write().map_err(|_| AccessError::LockPoisoned)?;
                queue.push(Disclosure {
                    audit_seq,
                    subject: *doc.subject(),
                    document: *doc.id(),
                    requester: request.requester,
                    reason: reason.clone(),
                    fields: request.fields.clone(),
                    at: now,
                    acknowledged_at: None,
                });
                AccessDecision::EmergencyGranted {
                    reason,
                    fields: request.scope(),
                    audit_seq,
                }
            }
            Outcome::Deny(reason) => {
                info!(document = %doc.id(), requester = %request.requester, code = reason.code(), "access denied");
                AccessDecision::Denied { reason, audit_seq }
            }
        };
        Ok(decision)
    }

    fn evaluate(
        &self,
        doc: &Document,
        verification: &VerificationResult,
        request: &AccessRequest,
        now: Timestamp,
    ) -> std::result::Result<Outcome, AccessError> {
        if !verification.is_full()
            || verification.document_id != *doc.id()
            || verification.digest != *doc.digest()
        {
            return Ok(Outcome::Deny(DenialReason::InsufficientVerification));
        }
        if !verification.valid {
            let codes = verification
                .failures
                .iter()
                .map(|f| f.code().to_string())
                .collect();
            return Ok(Outcome::Deny(DenialReason::Verification { codes }));
        }

        if matching_entry(doc.acl(), &request.requester, &request.fields, &request.purpose, now).is_some() {
            return Ok(Outcome::Grant(AccessBasis::Acl));
        }

        let book = self.consents.read().map_err(|_| AccessError::LockPoisoned)?;
        match book.find(doc, &request.requester, &request.purpose, &request.fields, now) {
            Ok(grant) => Ok(Outcome::Grant(AccessBasis::Consent {
                consent_id: grant.id,
            })),
            Err(AccessError::ConsentDenied(code)) => Ok(match &request.emergency {
                Some(reason) => Outcome::Emergency(reason.clone()),
                None => Outcome::Deny(DenialReason::NoAuthorization { code: code.into() }),
            }),
            Err(other) => Err(other),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Disclosures
    // ─────────────────────────────────────────────────────────────────────

    /// Pending disclosures for `subject`, readable by the subject's own
    /// entity or a guardian holding [`Capability::ReceiveDisclosures`].
    pub fn pending_disclosures(&self, actor: &Entity, subject: &SubjectId) -> Result<Vec<Disclosure>> {
        self.check_disclosure_reader(actor, subject)?;
        let queue = self.disclosures.read().map_err(|_| PermsError::LockPoisoned)?;
        Ok(queue.pending(subject))
    }

    pub fn acknowledge_disclosure(
        &self,
        actor: &Entity,
        subject: &SubjectId,
        audit_seq: u64,
        now: Timestamp,
    ) -> Result<()> {
        self.check_disclosure_reader(actor, subject)?;
        let mut queue = self.disclosures.write().map_err(|_| PermsError::LockPoisoned)?;
        queue.acknowledge(subject, audit_seq, now)
    }

    fn check_disclosure_reader(&self, actor: &Entity, subject: &SubjectId) -> Result<()> {
        let graph = self.households.read().map_err(|_| PermsError::LockPoisoned)?;
        let allowed = actor.is_active()
            && (actor.subject.as_ref() == Some(subject)
                || graph.has_capability(&actor.id, subject, Capability::ReceiveDisclosures));
        if allowed {
            Ok(())
        } else {
            Err(PermsError::NotAuthorized {
                actor: actor.id,
                subject: *subject,
            })
        }
    }
}

enum Outcome {
    Grant(AccessBasis),
    Emergency(String),
    Deny(DenialReason),
}

impl Outcome {
    fn audit_kind(&self, request: &AccessRequest) -> AuditKind {
        match self {
            Outcome::Grant(basis) => AuditKind::AccessGranted {
                basis: basis.name().into(),
                consent_id: match basis {
                    AccessBasis::Consent { consent_id } => Some(*consent_id),
                    AccessBasis::Acl => None,
                },
                fields: request.fields.clone(),
            },
            Outcome::Emergency(_) => AuditKind::AccessGranted {
                basis: "emergency".into(),
                consent_id: None,
                fields: request.fields.clone(),
            },
            Outcome::Deny(reason) => AuditKind::AccessDenied {
                code: reason.code().to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditLog;
    use crate::consent::ConsentScope;
    use crate::error::AuditError;
    use async_trait::async_trait;
    use secvault_core::{AclEntry, DocumentBuilder, DocumentType, Keypair, Permission, TrustTier};
    use secvault_verify::{TrustSnapshot, VerificationContext, VerificationLevel, Verifier};

    const T0: Timestamp = 1_700_000_000_000;

    struct Fixture {
        issuer_key: Keypair,
        issuer: Entity,
        pharmacy: Entity,
        parent: Entity,
        child: SubjectId,
    }

    impl Fixture {
        fn new() -> Self {
            let issuer_key = Keypair::from_seed(&[1; 32]);
            let key = |seed: u8| Keypair::from_seed(&[seed; 32]).public_key();
            Self {
                issuer: Entity::new("clinic", issuer_key.public_key(), TrustTier::Clinical, 0),
                issuer_key,
                pharmacy: Entity::new("pharmacy", key(2), TrustTier::Commercial, 0),
                parent: Entity::new("parent", key(3), TrustTier::Individual, 0),
                child: SubjectId::derive("child-1"),
            }
        }

        fn document(&self, acl: Vec<AclEntry>) -> Document {
            let mut doc = DocumentBuilder::new(
                self.issuer.id,
                self.child,
                DocumentType::new("rx.dispensation").unwrap(),
            )
            .issued_at(T0)
            .acl(acl)
            .content(&b"amoxicillin"[..])
            .build()
            .unwrap();
            doc.sign(self.issuer.id, &self.issuer_key).unwrap();
            doc
        }

        fn verify(&self, doc: &Document, level: VerificationLevel) -> VerificationResult {
            let snapshot = TrustSnapshot::new().with_entity(self.issuer.clone());
            Verifier::default().verify(doc, &snapshot, &VerificationContext::at(T0), level)
        }
    }

    fn dispensing() -> Purpose {
        Purpose::new("dispensing").unwrap()
    }

    #[tokio::test]
    async fn acl_grant_is_audited() {
        let fx = Fixture::new();
        let doc = fx.document(vec![AclEntry::new(fx.pharmacy.id, &[Permission::Read])]);
        let verification = fx.verify(&doc, VerificationLevel::Full);
        let manager = AccessManager::new(MemoryAuditLog::new());

        let decision = manager
            .decide(&doc, &verification, &AccessRequest::new(fx.pharmacy.id, dispensing()), T0)
            .await
            .unwrap();
        assert!(matches!(decision, AccessDecision::Granted { basis: AccessBasis::Acl, .. }));

        let log = manager.audit().for_document(doc.id()).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].seq, decision.audit_seq());
        assert!(!log[0].entry.emergency);
    }

    #[tokio::test]
    async fn quick_verification_is_refused() {
        let fx = Fixture::new();
        let doc = fx.document(vec![AclEntry::new(fx.pharmacy.id, &[Permission::Read])]);
        let verification = fx.verify(&doc, VerificationLevel::Quick);
        let manager = AccessManager::new(MemoryAuditLog::new());

        let decision = manager
            .decide(&doc, &verification, &AccessRequest::new(fx.pharmacy.id, dispensing()), T0)
            .await
            .unwrap();
        assert_eq!(
            decision,
            AccessDecision::Denied {
                reason: DenialReason::InsufficientVerification,
                audit_seq: 1
            }
        );
    }

    #[tokio::test]
    async fn guardian_without_authorization_is_denied() {
        let fx = Fixture::new();
        let doc = fx.document(Vec::new());
        let verification = fx.verify(&doc, VerificationLevel::Full);
        let manager = AccessManager::new(MemoryAuditLog::new());
        manager
            .add_household("smith", &[fx.parent.id], &[fx.child], &[Capability::ActOnBehalf])
            .unwrap();

        let decision = manager
            .decide(&doc, &verification, &AccessRequest::new(fx.parent.id, dispensing()), T0)
            .await
            .unwrap();
        assert!(!decision.is_granted());

        let log = manager.audit().entries().await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(
            log[0].entry.kind,
            AuditKind::AccessDenied { code: "no_consent".into() }
        );
    }

    #[tokio::test]
    async fn consent_by_guardian_grants_pharmacy() {
        let fx = Fixture::new();
        let doc = fx.document(Vec::new());
        let verification = fx.verify(&doc, VerificationLevel::Full);
        let manager = AccessManager::new(MemoryAuditLog::new());
        manager
            .add_household("smith", &[fx.parent.id], &[fx.child], &[Capability::ActOnBehalf])
            .unwrap();

        let grant = manager
            .grant_consent(
                &fx.parent,
                NewConsent {
                    subject: fx.child,
                    entity: fx.pharmacy.id,
                    scope: ConsentScope::document(*doc.id()),
                    purpose: dispensing(),
                    expires_at: Some(T0 + 1_000),
                },
                T0,
            )
            .await
            .unwrap();

        let request = AccessRequest::new(fx.pharmacy.id, dispensing());
        let decision = manager.decide(&doc, &verification, &request, T0 + 10).await.unwrap();
        assert!(matches!(
            decision,
            AccessDecision::Granted { basis: AccessBasis::Consent { consent_id }, .. } if consent_id == grant.id
        ));

        // After expiry the same request is denied.
        let decision = manager.decide(&doc, &verification, &request, T0 + 1_001).await.unwrap();
        assert!(matches!(
            decision,
            AccessDecision::Denied { reason: DenialReason::NoAuthorization { ref code }, .. } if code == "consent_expired"
        ));
    }

    #[tokio::test]
    async fn break_glass_is_logged_and_disclosed() {
        let fx = Fixture::new();
        let doc = fx.document(Vec::new());
        let verification = fx.verify(&doc, VerificationLevel::Full);
        let manager = AccessManager::new(MemoryAuditLog::new());
        manager
            .add_household("smith", &[fx.parent.id], &[fx.child], &[Capability::ReceiveDisclosures])
            .unwrap();

        let er = Entity::new("er", Keypair::from_seed(&[7; 32]).public_key(), TrustTier::Clinical, 0);
        let request = AccessRequest::new(er.id, Purpose::new("treatment").unwrap())
            .emergency("patient unresponsive");
        let decision = manager.decide(&doc, &verification, &request, T0).await.unwrap();
        assert!(matches!(decision, AccessDecision::EmergencyGranted { .. }));

        let log = manager.audit().entries().await.unwrap();
        assert!(log[0].entry.emergency);

        let pending = manager.pending_disclosures(&fx.parent, &fx.child).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].requester, er.id);
        assert!(manager.pending_disclosures(&er, &fx.child).is_err());

        manager
            .acknowledge_disclosure(&fx.parent, &fx.child, pending[0].audit_seq, T0 + 5)
            .unwrap();
        assert!(manager.pending_disclosures(&fx.parent, &fx.child).unwrap().is_empty());
    }

    #[tokio::test]
    async fn break_glass_does_not_override_failed_verification() {
        let fx = Fixture::new();
        let doc = fx.document(Vec::new());
        // Verified against a snapshot that does not know the issuer.
        let verification = Verifier::default().verify(
            &doc,
            &TrustSnapshot::new(),
            &VerificationContext::at(T0),
            VerificationLevel::Full,
        );
        let manager = AccessManager::new(MemoryAuditLog::new());
        let request = AccessRequest::new(fx.pharmacy.id, dispensing()).emergency("urgent");
        let decision = manager.decide(&doc, &verification, &request, T0).await.unwrap();
        assert!(matches!(
            decision,
            AccessDecision::Denied { reason: DenialReason::Verification { .. }, .. }
        ));
    }

    struct BrokenLog;

    #[async_trait]
    impl AuditLog for BrokenLog {
        async fn append(&self, _entry: AuditEntry) -> std::result::Result<u64, AuditError> {
            Err(AuditError::WriteFailed("disk full".into()))
        }

        async fn entries(&self) -> std::result::Result<Vec<crate::audit::AuditRecord>, AuditError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn audit_failure_fails_closed() {
        let fx = Fixture::new();
        let doc = fx.document(vec![AclEntry::new(fx.pharmacy.id, &[Permission::Read])]);
        let verification = fx.verify(&doc, VerificationLevel::Full);
        let manager = AccessManager::new(BrokenLog);

        let result = manager
            .decide(&doc, &verification, &AccessRequest::new(fx.pharmacy.id, dispensing()), T0)
            .await;
        assert!(matches!(result, Err(AccessError::AuditUnavailable(_))));
    }
}
