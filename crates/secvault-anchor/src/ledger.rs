//! Ledger abstraction.
//!
//! A ledger accepts Merkle roots and, some time later, confirms them with a
//! signed attestation over `(root, reference, confirmed_at)`.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::Mutex;
use tracing::debug;

use secvault_core::{
    attestation_message, now_millis, Digest, Ed25519PublicKey, Keypair, LedgerAttestation,
    Timestamp,
};

use crate::error::{AnchorError, Result};

/// Where a submitted root stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerStatus {
    Pending,
    Confirmed {
        confirmed_at: Timestamp,
        attestation: LedgerAttestation,
    },
    Failed {
        reason: String,
    },
}

/// An append-only external ledger.
#[async_trait]
pub trait AnchorLedger: Send + Sync {
    /// Submit a root. Returns the ledger's reference for it.
    async fn submit(&self, root: Digest) -> Result<String>;

    /// Current status of a submission.
    async fn status(&self, reference: &str) -> Result<LedgerStatus>;

    /// Key the ledger signs confirmations with.
    fn attestation_key(&self) -> Ed25519PublicKey;
}

struct Submission {
    root: Digest,
    polls: u32,
    status: LedgerStatus,
}

#[derive(Default)]
struct MemoryLedgerState {
    submissions: BTreeMap<String, Submission>,
    unavailable: bool,
    reject: BTreeSet<String>,
}

/// In-process ledger with configurable confirmation latency and failure
/// injection.
///
/// A submission confirms on the `confirm_after_polls`-th status query. With
/// zero it confirms on the first query.
pub struct MemoryLedger {
    name: String,
    keypair: Keypair,
    confirm_after_polls: u32,
    state: Mutex<MemoryLedgerState>,
}

impl MemoryLedger {
    pub fn new(name: impl Into<String>, keypair: Keypair) -> Self {
        Self {
            name: name.into(),
            keypair,
            confirm_after_polls: 0,
            state: Mutex::new(MemoryLedgerState::default()),
        }
    }

    pub fn confirm_after_polls(mut self, polls: u32) -> Self {
        self.confirm_after_polls = polls;
        self
    }

    /// Make `submit` fail until switched back.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    /// Make the next submissions fail on the ledger side. References are
    /// assigned sequentially (`<name>:1`, `<name>:2`, ...).
    pub async fn reject(&self, reference: impl Into<String>) {
        self.state.lock().await.reject.insert(reference.into());
    }

    /// Number of accepted submissions.
    pub async fn submission_count(&self) -> usize {
        self.state.lock().await.submissions.len()
    }

    /// The root submitted under `reference`.
    pub async fn root(&self, reference: &str) -> Option<Digest> {
        self.state
            .lock()
            .await
            .submissions
            .get(reference)
            .map(|s| s.root)
    }
}

#[async_trait]
impl AnchorLedger for MemoryLedger {
    async fn submit(&self, root: Digest) -> Result<String> {
        let mut state = self.state.lock().await;
        if state.unavailable {
            return Err(AnchorError::LedgerUnavailable(format!("{} is offline", self.name)));
        }
        let reference = format!("{}:{}", self.name, state.submissions.len() + 1);
        let status = if state.reject.contains(&reference) {
            LedgerStatus::Failed {
                reason: "rejected by ledger".into(),
            }
        } else {
            LedgerStatus::Pending
        };
        debug!(%reference, %root, "ledger accepted root");
        state.submissions.insert(
            reference.clone(),
            Submission {
                root,
                polls: 0,
                status,
            },
        );
        Ok(reference)
    }

    async fn status(&self, reference: &str) -> Result<LedgerStatus> {
        let mut state = self.state.lock().await;
        let submission = state
            .submissions
            .get_mut(reference)
            .ok_or_else(|| AnchorError::UnknownReference(reference.to_string()))?;

        if submission.status == LedgerStatus::Pending {
            submission.polls += 1;
            if submission.polls >= self.confirm_after_polls {
                let confirmed_at = now_millis();
                let signature = self
                    .keypair
                    .sign(&attestation_message(&submission.root, reference, confirmed_at));
                submission.status = LedgerStatus::Confirmed {
                    confirmed_at,
                    attestation: LedgerAttestation {
                        ledger_key: self.keypair.public_key(),
                        signature,
                    },
                };
            }
        }
        Ok(submission.status.clone())
    }

    fn attestation_key(&self) -> Ed25519PublicKey {
        self.keypair.public_key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn confirms_after_configured_polls() {
        let ledger = MemoryLedger::new("mem", Keypair::generate()).confirm_after_polls(2);
        let root = Digest::hash(b"root");
        let reference = ledger.submit(root).await.unwrap();
        assert_eq!(reference, "mem:1");

        assert_eq!(ledger.status(&reference).await.unwrap(), LedgerStatus::Pending);
        let LedgerStatus::Confirmed { confirmed_at, attestation } = ledger.status(&reference).await.unwrap() else {
            panic!("expected confirmation");
        };
        attestation
            .ledger_key
            .verify(&attestation_message(&root, &reference, confirmed_at), &attestation.signature)
            .unwrap();

        // Confirmation is stable.
        assert!(matches!(
            ledger.status(&reference).await.unwrap(),
            LedgerStatus::Confirmed { confirmed_at: t, .. } if t == confirmed_at
        ));
    }

    #[tokio::test]
    async fn failure_injection() {
        let ledger = MemoryLedger::new("mem", Keypair::generate());
        ledger.set_unavailable(true).await;
        assert!(matches!(
            ledger.submit(Digest::ZERO).await,
            Err(AnchorError::LedgerUnavailable(_))
        ));
        ledger.set_unavailable(false).await;

        ledger.reject("mem:1").await;
        let reference = ledger.submit(Digest::ZERO).await.unwrap();
        assert!(matches!(
            ledger.status(&reference).await.unwrap(),
            LedgerStatus::Failed { .. }
        ));
        assert!(matches!(
            ledger.status("mem:99").await,
            Err(AnchorError::UnknownReference(_))
        ));
    }
}
