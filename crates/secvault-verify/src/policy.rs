//! Per-document-type gate policy.

use secvault_core::{DocumentType, TrustTier};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::result::Gate;

/// Which optional gates a document type must pass, and which cosigners it
/// needs.
///
/// Integrity, signature and temporal gates are mandatory regardless of what
/// is listed here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatePolicy {
    pub mandatory: BTreeSet<Gate>,
    /// For each tier listed, at least one signature from an entity of that
    /// tier is required.
    pub cosigner_tiers: BTreeSet<TrustTier>,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            mandatory: BTreeSet::from([Gate::Predicate]),
            cosigner_tiers: BTreeSet::new(),
        }
    }
}

impl GatePolicy {
    pub fn require(mut self, gate: Gate) -> Self {
        self.mandatory.insert(gate);
        self
    }

    pub fn optional(mut self, gate: Gate) -> Self {
        self.mandatory.remove(&gate);
        self
    }

    pub fn cosigner(mut self, tier: TrustTier) -> Self {
        self.cosigner_tiers.insert(tier);
        self
    }

    pub fn is_mandatory(&self, gate: Gate) -> bool {
        gate.always_mandatory() || self.mandatory.contains(&gate)
    }
}

/// Policies keyed by document type, with a fallback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyTable {
    pub default: GatePolicy,
    pub by_type: BTreeMap<DocumentType, GatePolicy>,
}

impl PolicyTable {
    pub fn policy_for(&self, doc_type: &DocumentType) -> &GatePolicy {
        self.by_type.get(doc_type).unwrap_or(&self.default)
    }

    pub fn set(&mut self, doc_type: DocumentType, policy: GatePolicy) {
        self.by_type.insert(doc_type, policy);
    }
}
