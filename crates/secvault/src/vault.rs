//! The Vault: one API over registry, verifier, access manager and anchoring.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info};

use secvault_anchor::{AnchorLedger, AnchorService, Commitment, MemoryLedger, Resolution};
use secvault_core::{
    container, Capability, ConsentId, CoreError, Document, DocumentBuilder, DocumentId,
    Ed25519PublicKey, Entity, EntityId, HouseholdId, Keypair, RecipientSecret, SubjectId,
    Timestamp,
};
use secvault_perms::{
    AccessDecision, AccessError, AccessManager, AccessRequest, AuditEntry, AuditKind, AuditLog, AuditRecord,
    Disclosure, MemoryAuditLog, NewConsent, PermsError,
};
use secvault_store::SqliteAuditLog;
use secvault_verify::{
    EntityRegistry, RevocationRecord, VerificationContext, VerificationLevel, VerificationResult,
    Verifier,
};

use crate::config::VaultConfig;
use crate::error::{Result, VaultError};

/// Acknowledgement of a document revocation. Revoking twice returns the
/// same acknowledgement.
pub type RevocationAck = RevocationRecord;

/// Remaining usage counters per document.
type UsageTable = BTreeMap<DocumentId, BTreeMap<String, u64>>;

/// Issues, verifies, authorizes and anchors documents.
///
/// All state changes that matter to a subject (verifications, access
/// decisions, consent changes, revocations, anchor submissions) are written
/// to the audit log `A`. Anchors go to ledger `L`.
pub struct Vault<A: AuditLog, L: AnchorLedger> {
    registry: EntityRegistry,
    verifier: Verifier,
    access: AccessManager<A>,
    anchors: AnchorService<L>,
    /// Held across a whole access request so concurrent grants cannot
    /// overspend a counter.
    usage: Mutex<UsageTable>,
    /// Serializes revocations so each is audited exactly once.
    revoking: Mutex<()>,
    anchor_timeout: Duration,
}

impl<A: AuditLog, L: AnchorLedger> Vault<A, L> {
    /// Build a vault from its parts.
    ///
    /// Imports the configured trust store and trusts the ledger's
    /// attestation key.
    pub fn new(config: &VaultConfig, audit: A, ledger: L) -> Result<Self> {
        let registry = EntityRegistry::new();
        if let Some(path) = &config.trust_store {
            let added = registry.load_trust_store(path)?;
            info!(path = %path.display(), entities = added, "trust store imported");
        }
        registry.trust_ledger(ledger.attestation_key())?;

        info!(ledger = config.ledger_name(), "vault ready");
        Ok(Self {
            registry,
            verifier: Verifier::new(config.policies.clone()),
            access: AccessManager::new(audit),
            anchors: AnchorService::new(ledger).poll_interval(config.anchor_poll_interval()),
            usage: Mutex::new(BTreeMap::new()),
            revoking: Mutex::new(()),
            anchor_timeout: config.anchor_timeout(),
        })
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn audit(&self) -> &A {
        self.access.audit()
    }

    pub fn anchors(&self) -> &AnchorService<L> {
        &self.anchors
    }

    // ─────────────────────────────────────────────────────────────────────
    // Entities and households
    // ─────────────────────────────────────────────────────────────────────

    pub fn register(&self, entity: Entity) -> Result<EntityId> {
        Ok(self.registry.register(entity)?)
    }

    /// The registered entity with this id.
    pub fn entity(&self, id: &EntityId) -> Result<Entity> {
        self.registry
            .snapshot()?
            .entity(id)
            .cloned()
            .ok_or(VaultError::UnknownEntity(*id))
    }

    fn active_entity(&self, id: &EntityId) -> Result<Entity> {
        let entity = self.entity(id)?;
        if entity.is_active() {
            Ok(entity)
        } else {
            Err(VaultError::EntityInactive(*id))
        }
    }

    /// Replace an entity's key. Documents it signed with the old key stop
    /// verifying.
    pub fn rotate_key(&self, id: &EntityId, new_key: Ed25519PublicKey) -> Result<u32> {
        Ok(self.registry.rotate_key(id, new_key)?)
    }

    pub fn suspend(&self, id: &EntityId) -> Result<()> {
        Ok(self.registry.suspend(id)?)
    }

    pub fn reinstate(&self, id: &EntityId) -> Result<()> {
        Ok(self.registry.reinstate(id)?)
    }

    pub fn revoke_entity(&self, id: &EntityId) -> Result<()> {
        Ok(self.registry.revoke_entity(id)?)
    }

    pub fn add_household(
        &self,
        name: &str,
        guardians: &[EntityId],
        members: &[SubjectId],
        capabilities: &[Capability],
    ) -> Result<HouseholdId> {
        Ok(self
            .access
            .add_household(name, guardians, members, capabilities)?)
    }

    pub fn grant_capability(
        &self,
        guardian: EntityId,
        dependent: SubjectId,
        capabilities: &[Capability],
    ) -> Result<()> {
        Ok(self
            .access
            .grant_capability(guardian, dependent, capabilities)?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Documents
    // ─────────────────────────────────────────────────────────────────────

    /// Build a new, unsigned document. The issuer must be registered and
    /// active.
    pub fn issue(&self, builder: DocumentBuilder) -> Result<Document> {
        let doc = builder.build()?;
        self.active_entity(doc.issuer())?;
        debug!(document = %doc.id(), issuer = %doc.issuer(), doc_type = %doc.doc_type(), "document issued");
        Ok(doc)
    }

    /// Sign `doc` with each of `signers`.
    pub fn seal(&self, mut doc: Document, signers: &[(EntityId, &Keypair)]) -> Result<Document> {
        for (signer, keypair) in signers {
            doc.sign(*signer, keypair)?;
        }
        Ok(doc)
    }

    /// Sign and encode. With a recipient, the content section is encrypted
    /// for it.
    pub fn serialize(
        &self,
        doc: &Document,
        signers: &[(EntityId, &Keypair)],
        recipient: Option<&RecipientSecret>,
    ) -> Result<Vec<u8>> {
        let sealed = self.seal(doc.clone(), signers)?;
        Ok(container::encode(&sealed, recipient)?)
    }

    /// Decode container bytes. Sealed content is opened when `recipient`
    /// is given.
    pub fn parse(&self, bytes: &[u8], recipient: Option<&RecipientSecret>) -> Result<Document> {
        Ok(container::decode(bytes, recipient)?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Verification
    // ─────────────────────────────────────────────────────────────────────

    /// Verify against the current trust snapshot and audit the outcome.
    ///
    /// Usage counters the vault tracks for this document replace any the
    /// context supplies for the same counter.
    pub async fn verify(
        &self,
        doc: &Document,
        mut ctx: VerificationContext,
        level: VerificationLevel,
    ) -> Result<VerificationResult> {
        let snapshot = self.registry.snapshot()?;
        {
            let usage = self.usage.lock().await;
            if let Some(counters) = usage.get(doc.id()) {
                for (counter, remaining) in counters {
                    ctx.quantities.insert(counter.clone(), *remaining);
                }
            }
        }

        let result = self.verifier.verify(doc, &snapshot, &ctx, level);
        self.access
            .audit()
            .append(verification_entry(doc, &result))
            .await
            .map_err(PermsError::from)?;
        Ok(result)
    }

    /// Revoke a document. Only its issuer may do so.
    ///
    /// Idempotent: a second call returns the first acknowledgement and
    /// writes no new audit entry.
    pub async fn revoke(
        &self,
        doc: &Document,
        issuer: &EntityId,
        reason: &str,
        now: Timestamp,
    ) -> Result<RevocationAck> {
        if doc.issuer() != issuer {
            return Err(VaultError::NotIssuer {
                document: *doc.id(),
                entity: *issuer,
            });
        }
        self.entity(issuer)?;

        let _guard = self.revoking.lock().await;
        if let Some(existing) = self.registry.snapshot()?.revocation(doc.id()) {
            return Ok(existing.clone());
        }

        // The entry goes in first: a revocation the audit log refused must
        // not take effect.
        self.access
            .audit()
            .append(
                AuditEntry::new(
                    now,
                    AuditKind::DocumentRevoked {
                        reason: reason.to_string(),
                    },
                )
                .actor(*issuer)
                .document(*doc.id())
                .subject(*doc.subject()),
            )
            .await
            .map_err(PermsError::from)?;
        Ok(self
            .registry
            .revoke_document(*doc.id(), *issuer, reason, now)?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Access
    // ─────────────────────────────────────────────────────────────────────

    /// Decide an access request.
    ///
    /// Runs a full verification with the request's purpose and the vault's
    /// usage counters, audits it, then hands the result to the access
    /// manager. A grant consumes one use of every counter the document's
    /// predicate names.
    pub async fn request_access(
        &self,
        doc: &Document,
        request: &AccessRequest,
        ctx: VerificationContext,
    ) -> Result<AccessDecision> {
        self.active_entity(&request.requester)?;
        let snapshot = self.registry.snapshot()?;

        let mut usage = self.usage.lock().await;
        let counters = doc.predicate().counters();
        let remaining = if counters.is_empty() {
            None
        } else {
            Some(usage.entry(*doc.id()).or_insert(counters))
        };

        let mut ctx = ctx.purpose(request.purpose.clone());
        if let Some(remaining) = &remaining {
            ctx = ctx.quantities(BTreeMap::clone(remaining));
        }

        let result = self
            .verifier
            .verify(doc, &snapshot, &ctx, VerificationLevel::Full);
        self.access
            .audit()
            .append(verification_entry(doc, &result).actor(request.requester))
            .await
            .map_err(AccessError::from)?;
        let decision = self.access.decide(doc, &result, request, ctx.now).await?;

        if decision.is_granted() {
            if let Some(remaining) = remaining {
                for (counter, left) in remaining.iter_mut() {
                    *left = left.saturating_sub(1);
                    debug!(document = %doc.id(), %counter, left = *left, "usage consumed");
                }
            }
        }
        Ok(decision)
    }

    /// Remaining uses of `counter` on a document, once the vault has seen
    /// an access request for it.
    pub async fn usage_remaining(&self, document: &DocumentId, counter: &str) -> Option<u64> {
        self.usage
            .lock()
            .await
            .get(document)
            .and_then(|c| c.get(counter))
            .copied()
    }

    /// Record a consent grant made by `actor` (the subject's own entity or
    /// a guardian with [`Capability::ActOnBehalf`]).
    pub async fn grant_consent(
        &self,
        actor: &EntityId,
        consent: NewConsent,
        now: Timestamp,
    ) -> Result<ConsentId> {
        let actor = self.entity(actor)?;
        Ok(self.access.grant_consent(&actor, consent, now).await?.id)
    }

    pub async fn revoke_consent(
        &self,
        actor: &EntityId,
        consent: &ConsentId,
        now: Timestamp,
    ) -> Result<()> {
        let actor = self.entity(actor)?;
        self.access.revoke_consent(&actor, consent, now).await?;
        Ok(())
    }

    /// Break-glass accesses not yet acknowledged for `subject`.
    pub fn pending_disclosures(
        &self,
        actor: &EntityId,
        subject: &SubjectId,
    ) -> Result<Vec<Disclosure>> {
        let actor = self.entity(actor)?;
        Ok(self.access.pending_disclosures(&actor, subject)?)
    }

    pub fn acknowledge_disclosure(
        &self,
        actor: &EntityId,
        subject: &SubjectId,
        audit_seq: u64,
        now: Timestamp,
    ) -> Result<()> {
        let actor = self.entity(actor)?;
        Ok(self
            .access
            .acknowledge_disclosure(&actor, subject, audit_seq, now)?)
    }

    /// Audit records concerning one document.
    pub async fn audit_trail(&self, document: &DocumentId) -> Result<Vec<AuditRecord>> {
        Ok(self
            .access
            .audit()
            .for_document(document)
            .await
            .map_err(PermsError::from)?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Anchoring
    // ─────────────────────────────────────────────────────────────────────

    /// Submit the document's digest to the ledger. Repeated calls return the
    /// same commitment without a new submission.
    pub async fn anchor(&self, doc: &Document) -> Result<Commitment> {
        let commitment = self.anchors.anchor(*doc.digest()).await?;
        self.access
            .audit()
            .append(
                AuditEntry::new(
                    commitment.submitted_at,
                    AuditKind::AnchorSubmitted {
                        reference: commitment.reference.clone(),
                    },
                )
                .document(*doc.id())
                .subject(*doc.subject()),
            )
            .await
            .map_err(PermsError::from)?;
        Ok(commitment)
    }

    /// Poll the ledger for up to the configured timeout.
    pub async fn resolve_anchor(&self, commitment: &Commitment) -> Result<Resolution> {
        Ok(self
            .anchors
            .resolve_with_timeout(commitment, self.anchor_timeout)
            .await?)
    }

    /// Resolve and, once confirmed, attach the anchor record to `doc`.
    pub async fn attach_anchor(
        &self,
        doc: &mut Document,
        commitment: &Commitment,
    ) -> Result<Resolution> {
        if commitment.digest != *doc.digest() {
            return Err(VaultError::Core(CoreError::InvalidDocument(
                "commitment is for a different digest".into(),
            )));
        }
        let resolution = self.resolve_anchor(commitment).await?;
        if let Resolution::Confirmed(proof) = &resolution {
            doc.attach_anchor(proof.to_record()?)?;
            info!(document = %doc.id(), reference = %proof.reference, "anchor attached");
        }
        Ok(resolution)
    }
}

impl<L: AnchorLedger> Vault<SqliteAuditLog, L> {
    /// A vault with a SQLite audit log at the configured path, or in memory
    /// when none is configured.
    pub fn open(config: &VaultConfig, ledger: L) -> Result<Self> {
        let audit = match &config.audit_db {
            Some(path) => SqliteAuditLog::open(path)?,
            None => SqliteAuditLog::open_memory()?,
        };
        Self::new(config, audit, ledger)
    }
}

impl Vault<MemoryAuditLog, MemoryLedger> {
    /// A fully in-process vault. The ledger is named after the configured
    /// endpoint and signs with `ledger_key`.
    pub fn in_memory(config: &VaultConfig, ledger_key: Keypair) -> Result<Self> {
        let ledger = MemoryLedger::new(config.ledger_name(), ledger_key);
        Self::new(config, MemoryAuditLog::new(), ledger)
    }
}

/// The audit entry recording one verification run.
fn verification_entry(doc: &Document, result: &VerificationResult) -> AuditEntry {
    let level = match result.level {
        VerificationLevel::Quick => "quick",
        VerificationLevel::Full => "full",
    };
    AuditEntry::new(
        result.verified_at,
        AuditKind::Verification {
            valid: result.valid,
            score: result.score,
            level: level.into(),
            gate: result.failed_gate().map(|g| g.as_str().to_string()),
            codes: result
                .failure_codes()
                .into_iter()
                .map(String::from)
                .collect(),
        },
    )
    .document(*doc.id())
    .subject(*doc.subject())
}
