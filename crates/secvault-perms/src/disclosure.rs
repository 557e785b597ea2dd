//! After-the-fact notices of emergency access.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use secvault_core::{DocumentId, EntityId, SubjectId, Timestamp};

use crate::error::{PermsError, Result};

/// Notice to a subject that their document was opened under break-glass
/// access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disclosure {
    /// Sequence number of the audit entry recording the access.
    pub audit_seq: u64,
    pub subject: SubjectId,
    pub document: DocumentId,
    pub requester: EntityId,
    pub reason: String,
    pub fields: Vec<String>,
    pub at: Timestamp,
    pub acknowledged_at: Option<Timestamp>,
}

/// Per-subject disclosure queues.
#[derive(Debug, Clone, Default)]
pub struct DisclosureQueue {
    by_subject: BTreeMap<SubjectId, Vec<Disclosure>>,
}

impl DisclosureQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, disclosure: Disclosure) {
        self.by_subject
            .entry(disclosure.subject)
            .or_default()
            .push(disclosure);
    }

    /// Every disclosure for `subject`, oldest first.
    pub fn all(&self, subject: &SubjectId) -> &[Disclosure] {
        self.by_subject.get(subject).map_or(&[], Vec::as_slice)
    }

    /// Disclosures not yet acknowledged.
    pub fn pending(&self, subject: &SubjectId) -> Vec<Disclosure> {
        self.all(subject)
            .iter()
            .filter(|d| d.acknowledged_at.is_none())
            .cloned()
            .collect()
    }

    /// Mark a disclosure as seen. Acknowledging twice keeps the first time.
    pub fn acknowledge(&mut self, subject: &SubjectId, audit_seq: u64, now: Timestamp) -> Result<()> {
        let disclosure = self
            .by_subject
            .get_mut(subject)
            .and_then(|list| list.iter_mut().find(|d| d.audit_seq == audit_seq))
            .ok_or(PermsError::DisclosureNotFound { seq: audit_seq })?;
        disclosure.acknowledged_at.get_or_insert(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disclosure(subject: SubjectId, seq: u64) -> Disclosure {
        Disclosure {
            audit_seq: seq,
            subject,
            document: DocumentId::from_bytes([1; 32]),
            requester: EntityId::from_bytes([2; 32]),
            reason: "unconscious patient".into(),
            fields: Vec::new(),
            at: 10,
            acknowledged_at: None,
        }
    }

    #[test]
    fn acknowledge_clears_pending() {
        let alice = SubjectId::derive("alice");
        let bob = SubjectId::derive("bob");
        let mut queue = DisclosureQueue::new();
        queue.push(disclosure(alice, 1));
        queue.push(disclosure(alice, 4));
        queue.push(disclosure(bob, 2));

        assert_eq!(queue.pending(&alice).len(), 2);
        queue.acknowledge(&alice, 1, 20).unwrap();
        assert_eq!(queue.pending(&alice).len(), 1);
        assert_eq!(queue.all(&alice)[0].acknowledged_at, Some(20));

        // Bob's disclosure cannot be acknowledged through Alice.
        assert!(queue.acknowledge(&alice, 2, 20).is_err());
        assert_eq!(queue.pending(&bob).len(), 1);
    }
}
