//! Verification outcomes.

use secvault_core::{Digest, DocumentId, EntityId, EntityStatus, PredicateFailure, Timestamp, TrustTier};
use serde::{Deserialize, Serialize};

use crate::context::VerificationLevel;

/// One stage of the verification pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gate {
    Integrity,
    Signature,
    Anchor,
    Temporal,
    Predicate,
}

impl Gate {
    pub const ALL: [Gate; 5] = [
        Gate::Integrity,
        Gate::Signature,
        Gate::Anchor,
        Gate::Temporal,
        Gate::Predicate,
    ];

    /// Points contributed to the score when the gate passes. Sums to 100.
    pub fn weight(self) -> u8 {
        match self {
            Gate::Integrity | Gate::Signature => 30,
            Gate::Anchor | Gate::Temporal => 15,
            Gate::Predicate => 10,
        }
    }

    /// Gates that no policy can make optional.
    pub fn always_mandatory(self) -> bool {
        matches!(self, Gate::Integrity | Gate::Signature | Gate::Temporal)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Gate::Integrity => "integrity",
            Gate::Signature => "signature",
            Gate::Anchor => "anchor",
            Gate::Temporal => "temporal",
            Gate::Predicate => "predicate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateStatus {
    Passed,
    Failed,
    /// Not executed: a previous gate failed, the level excludes it, or the
    /// input it needs was absent and policy allowed that.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateOutcome {
    pub gate: Gate,
    pub status: GateStatus,
}

/// Why a gate failed.
///
/// Carries identifiers and codes only, never key material or content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    // Integrity
    DigestMismatch,
    ContentHashMismatch,
    ContentUnreadable { code: String },
    /// Sealed content reached a full run without a recipient secret.
    ContentUnverifiable,

    // Signature
    MissingIssuerSignature,
    UnknownSigner { signer: EntityId },
    SignerInactive { signer: EntityId, status: EntityStatus },
    SignatureInvalid { signer: EntityId },
    MissingCosigner { tier: TrustTier },

    // Anchor
    AnchorMissing,
    AnchorProofInvalid,

    // Temporal
    Revoked { revoked_at: Timestamp },
    Expired { expires_at: Timestamp },

    Predicate { failure: PredicateFailure },
}

impl FailureReason {
    /// Stable reason code for callers and the audit trail.
    pub fn code(&self) -> &'static str {
        match self {
            FailureReason::DigestMismatch => "digest_mismatch",
            FailureReason::ContentHashMismatch => "content_hash_mismatch",
            FailureReason::ContentUnreadable { .. } => "content_unreadable",
            FailureReason::ContentUnverifiable => "content_unverifiable",
            FailureReason::MissingIssuerSignature => "missing_issuer_signature",
            FailureReason::UnknownSigner { .. } => "unknown_signer",
            FailureReason::SignerInactive { .. } => "signer_inactive",
            FailureReason::SignatureInvalid { .. } => "signature_invalid",
            FailureReason::MissingCosigner { .. } => "missing_cosigner",
            FailureReason::AnchorMissing => "anchor_missing",
            FailureReason::AnchorProofInvalid => "anchor_proof_invalid",
            FailureReason::Revoked { .. } => "revoked",
            FailureReason::Expired { .. } => "expired",
            FailureReason::Predicate { failure } => failure.code(),
        }
    }

    /// The gate that reports this reason.
    pub fn gate(&self) -> Gate {
        match self {
            FailureReason::DigestMismatch
            | FailureReason::ContentHashMismatch
            | FailureReason::ContentUnreadable { .. }
            | FailureReason::ContentUnverifiable => Gate::Integrity,
            FailureReason::MissingIssuerSignature
            | FailureReason::UnknownSigner { .. }
            | FailureReason::SignerInactive { .. }
            | FailureReason::SignatureInvalid { .. }
            | FailureReason::MissingCosigner { .. } => Gate::Signature,
            FailureReason::AnchorMissing | FailureReason::AnchorProofInvalid => Gate::Anchor,
            FailureReason::Revoked { .. } | FailureReason::Expired { .. } => Gate::Temporal,
            FailureReason::Predicate { .. } => Gate::Predicate,
        }
    }
}

/// Something the caller should know that did not fail verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum Warning {
    /// Content is sealed and no recipient secret was supplied, so its hash
    /// could not be checked.
    SealedContentUnchecked,
    AnchorAbsent,
    PredicateInputMissing { code: String },
}

impl Warning {
    pub fn code(&self) -> &'static str {
        match self {
            Warning::SealedContentUnchecked => "sealed_content_unchecked",
            Warning::AnchorAbsent => "anchor_absent",
            Warning::PredicateInputMissing { .. } => "predicate_input_missing",
        }
    }
}

/// The full report of one verification run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub document_id: DocumentId,
    pub digest: Digest,
    pub level: VerificationLevel,
    pub valid: bool,
    /// Sum of the weights of passed gates, 0..=100.
    pub score: u8,
    pub failures: Vec<FailureReason>,
    pub warnings: Vec<Warning>,
    pub gates: Vec<GateOutcome>,
    /// Version of the trust snapshot the run read.
    pub snapshot_version: u64,
    pub verified_at: Timestamp,
}

impl VerificationResult {
    pub fn is_full(&self) -> bool {
        self.level == VerificationLevel::Full
    }

    pub fn gate_status(&self, gate: Gate) -> GateStatus {
        self.gates
            .iter()
            .find(|g| g.gate == gate)
            .map_or(GateStatus::Skipped, |g| g.status)
    }

    /// The gate that stopped the pipeline, if any.
    pub fn failed_gate(&self) -> Option<Gate> {
        self.gates
            .iter()
            .find(|g| g.status == GateStatus::Failed)
            .map(|g| g.gate)
    }

    pub fn failure_codes(&self) -> Vec<&'static str> {
        self.failures.iter().map(FailureReason::code).collect()
    }
}
