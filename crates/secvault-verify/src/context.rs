//! Caller-supplied verification context.

use secvault_core::{GeoPoint, PredicateInput, Purpose, RecipientSecret, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationLevel {
    /// Integrity and signature gates only.
    Quick,
    Full,
}

/// What the relying party knows at verification time.
#[derive(Debug, Clone)]
pub struct VerificationContext {
    pub now: Timestamp,
    /// Current usage counter values, keyed by counter name.
    pub quantities: BTreeMap<String, u64>,
    pub location: Option<GeoPoint>,
    pub purpose: Option<Purpose>,
    /// Opens sealed content so its hash can be checked.
    pub recipient: Option<RecipientSecret>,
}

impl VerificationContext {
    pub fn at(now: Timestamp) -> Self {
        Self {
            now,
            quantities: BTreeMap::new(),
            location: None,
            purpose: None,
            recipient: None,
        }
    }

    pub fn quantity(mut self, counter: impl Into<String>, remaining: u64) -> Self {
        self.quantities.insert(counter.into(), remaining);
        self
    }

    pub fn quantities(mut self, quantities: BTreeMap<String, u64>) -> Self {
        self.quantities.extend(quantities);
        self
    }

    pub fn location(mut self, point: GeoPoint) -> Self {
        self.location = Some(point);
        self
    }

    pub fn purpose(mut self, purpose: Purpose) -> Self {
        self.purpose = Some(purpose);
        self
    }

    pub fn recipient(mut self, secret: RecipientSecret) -> Self {
        self.recipient = Some(secret);
        self
    }

    pub fn predicate_input(&self) -> PredicateInput<'_> {
        PredicateInput {
            now: self.now,
            quantities: &self.quantities,
            location: self.location,
            purpose: self.purpose.as_ref(),
        }
    }
}
