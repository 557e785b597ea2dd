//! The five-gate verification pipeline.
//!
//! Gates run in a fixed order: integrity, signature, anchor, temporal,
//! predicate. The first failing gate stops the run and every later gate is
//! reported as skipped. A quick run stops after the signature gate.

use secvault_core::{
    content_hash, verify_proof, AnchorProof, Document, DocumentContent, TrustTier,
};
use std::borrow::Cow;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::context::{VerificationContext, VerificationLevel};
use crate::policy::{GatePolicy, PolicyTable};
use crate::result::{FailureReason, Gate, GateOutcome, GateStatus, VerificationResult, Warning};
use crate::snapshot::TrustSnapshot;

/// What one gate concluded.
enum Verdict {
    Pass,
    /// Passed on what could be checked.
    PassWith(Warning),
    Fail(FailureReason),
    /// Not applicable to this document and not required by policy.
    Skip(Warning),
}

/// Runs documents through the gate pipeline under a policy table.
#[derive(Debug, Clone, Default)]
pub struct Verifier {
    policies: PolicyTable,
}

impl Verifier {
    pub fn new(policies: PolicyTable) -> Self {
        Self { policies }
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    /// Verify `doc` against one trust snapshot.
    ///
    /// Never errors: every problem with the document is a
    /// [`FailureReason`] in the returned result.
    pub fn verify(
        &self,
        doc: &Document,
        snapshot: &TrustSnapshot,
        ctx: &VerificationContext,
        level: VerificationLevel,
    ) -> VerificationResult {
        let policy = self.policies.policy_for(doc.doc_type());
        let mut run = Run {
            doc,
            snapshot,
            ctx,
            level,
            policy,
            failures: Vec::new(),
            warnings: Vec::new(),
            gates: Vec::with_capacity(Gate::ALL.len()),
        };

        let mut stopped = false;
        for gate in Gate::ALL {
            let in_level = level == VerificationLevel::Full
                || matches!(gate, Gate::Integrity | Gate::Signature);
            if stopped || !in_level {
                run.record(gate, GateStatus::Skipped);
                continue;
            }
            match run.check(gate) {
                Verdict::Pass => run.record(gate, GateStatus::Passed),
                Verdict::PassWith(warning) => {
                    debug!(document = %doc.id(), gate = gate.as_str(), code = warning.code(), "gate passed with warning");
                    run.warnings.push(warning);
                    run.record(gate, GateStatus::Passed);
                }
                Verdict::Skip(warning) => {
                    debug!(document = %doc.id(), gate = gate.as_str(), code = warning.code(), "gate skipped");
                    run.warnings.push(warning);
                    run.record(gate, GateStatus::Skipped);
                }
                Verdict::Fail(reason) => {
                    warn!(document = %doc.id(), gate = gate.as_str(), code = reason.code(), "gate failed");
                    run.failures.push(reason);
                    run.record(gate, GateStatus::Failed);
                    stopped = true;
                }
            }
        }

        let score = run
            .gates
            .iter()
            .filter(|g| g.status == GateStatus::Passed)
            .map(|g| g.gate.weight())
            .sum();
        let valid = run.failures.is_empty()
            && run.gates.iter().all(|g| {
                let required = match level {
                    VerificationLevel::Quick => matches!(g.gate, Gate::Integrity | Gate::Signature),
                    VerificationLevel::Full => policy.is_mandatory(g.gate),
                };
                !required || g.status == GateStatus::Passed
            });

        info!(
            document = %doc.id(),
            ?level,
            valid,
            score,
            snapshot_version = snapshot.version(),
            "verified document"
        );

        VerificationResult {
            document_id: *doc.id(),
            digest: *doc.digest(),
            level,
            valid,
            score,
            failures: run.failures,
            warnings: run.warnings,
            gates: run.gates,
            snapshot_version: snapshot.version(),
            verified_at: ctx.now,
        }
    }
}

struct Run<'a> {
    doc: &'a Document,
    snapshot: &'a TrustSnapshot,
    ctx: &'a VerificationContext,
    level: VerificationLevel,
    policy: &'a GatePolicy,
    failures: Vec<FailureReason>,
    warnings: Vec<Warning>,
    gates: Vec<GateOutcome>,
}

impl Run<'_> {
    fn record(&mut self, gate: Gate, status: GateStatus) {
        self.gates.push(GateOutcome { gate, status });
    }

    fn check(&self, gate: Gate) -> Verdict {
        match gate {
            Gate::Integrity => self.integrity(),
            Gate::Signature => self.signatures(),
            Gate::Anchor => self.anchor(),
            Gate::Temporal => self.temporal(),
            Gate::Predicate => self.predicate(),
        }
    }

    fn integrity(&self) -> Verdict {
        let meta = self.doc.metadata();
        match self.doc.compute_digest() {
            Ok(digest) if digest == meta.digest => {}
            _ => return Verdict::Fail(FailureReason::DigestMismatch),
        }

        let plaintext: Cow<'_, [u8]> = match self.doc.content() {
            DocumentContent::Plain(bytes) => Cow::Borrowed(bytes.as_ref()),
            DocumentContent::Sealed(_) => {
                // A full run must see the plaintext; a quick run settles for
                // the metadata digest.
                let Some(secret) = &self.ctx.recipient else {
                    return match self.level {
                        VerificationLevel::Quick => Verdict::PassWith(Warning::SealedContentUnchecked),
                        VerificationLevel::Full => Verdict::Fail(FailureReason::ContentUnverifiable),
                    };
                };
                match self.doc.open(secret) {
                    Ok(opened) => match opened.plaintext() {
                        Some(plain) => Cow::Owned(plain.to_vec()),
                        None => {
                            return Verdict::Fail(FailureReason::ContentUnreadable {
                                code: "decryption_failed".into(),
                            })
                        }
                    },
                    Err(e) => {
                        return Verdict::Fail(FailureReason::ContentUnreadable {
                            code: e.code().into(),
                        })
                    }
                }
            }
        };

        if plaintext.len() as u64 != meta.content_len || content_hash(&plaintext) != meta.content_hash {
            return Verdict::Fail(FailureReason::ContentHashMismatch);
        }
        Verdict::Pass
    }

    fn signatures(&self) -> Verdict {
        let issuer = self.doc.issuer();
        if self.doc.signature_by(issuer).is_none() {
            return Verdict::Fail(FailureReason::MissingIssuerSignature);
        }

        let message = self.doc.signing_message();
        let mut tiers = BTreeSet::new();
        for entry in self.doc.signatures() {
            let Some(entity) = self.snapshot.entity(&entry.signer) else {
                return Verdict::Fail(FailureReason::UnknownSigner {
                    signer: entry.signer,
                });
            };
            if !entity.is_active() {
                return Verdict::Fail(FailureReason::SignerInactive {
                    signer: entry.signer,
                    status: entity.status,
                });
            }
            if entity.public_key.verify(&message, &entry.signature).is_err() {
                return Verdict::Fail(FailureReason::SignatureInvalid {
                    signer: entry.signer,
                });
            }
            tiers.insert(entity.tier);
        }

        if let Some(tier) = missing_tier(&self.policy.cosigner_tiers, &tiers) {
            return Verdict::Fail(FailureReason::MissingCosigner { tier });
        }
        Verdict::Pass
    }

    fn anchor(&self) -> Verdict {
        let Some(record) = self.doc.anchor() else {
            return if self.policy.is_mandatory(Gate::Anchor) {
                Verdict::Fail(FailureReason::AnchorMissing)
            } else {
                Verdict::Skip(Warning::AnchorAbsent)
            };
        };
        let valid = AnchorProof::from_bytes(&record.proof).map_or(false, |proof| {
            proof.reference == record.reference
                && verify_proof(self.doc.digest(), &proof, self.snapshot.ledger_keys())
        });
        if valid {
            Verdict::Pass
        } else {
            Verdict::Fail(FailureReason::AnchorProofInvalid)
        }
    }

    fn temporal(&self) -> Verdict {
        if let Some(revocation) = self.snapshot.revocation(self.doc.id()) {
            return Verdict::Fail(FailureReason::Revoked {
                revoked_at: revocation.revoked_at,
            });
        }
        match self.doc.expires_at() {
            Some(expires_at) if self.doc.is_expired_at(self.ctx.now) => {
                Verdict::Fail(FailureReason::Expired { expires_at })
            }
            _ => Verdict::Pass,
        }
    }

    fn predicate(&self) -> Verdict {
        match self.doc.predicate().evaluate(&self.ctx.predicate_input()) {
            Ok(()) => Verdict::Pass,
            Err(failure) if failure.is_missing_input() && !self.policy.is_mandatory(Gate::Predicate) => {
                Verdict::Skip(Warning::PredicateInputMissing {
                    code: failure.code().into(),
                })
            }
            Err(failure) => Verdict::Fail(FailureReason::Predicate { failure }),
        }
    }
}

fn missing_tier(required: &BTreeSet<TrustTier>, present: &BTreeSet<TrustTier>) -> Option<TrustTier> {
    required.difference(present).next().copied()
}
