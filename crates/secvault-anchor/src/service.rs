//! The anchor service.
//!
//! Digests are committed to a ledger as leaves of a Merkle tree; only the
//! root is submitted. Each digest is anchored at most once: asking again
//! returns the existing commitment without another submission, unless the
//! ledger failed the earlier one.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use secvault_core::{now_millis, verify_proof, AnchorProof, Digest, MerkleTree, Timestamp};

use crate::error::{AnchorError, Result};
use crate::ledger::{AnchorLedger, LedgerStatus};

/// Receipt for a submitted digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Commitment {
    pub digest: Digest,
    /// Ledger reference of the batch root.
    pub reference: String,
    pub root: Digest,
    pub leaf_index: u64,
    pub submitted_at: Timestamp,
}

/// Result of resolving a commitment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Confirmed(AnchorProof),
    /// Not confirmed yet. Retry later.
    Pending,
    Failed(String),
}

impl Resolution {
    pub fn is_pending(&self) -> bool {
        matches!(self, Resolution::Pending)
    }
}

struct Batch {
    tree: MerkleTree,
    digests: Vec<Digest>,
    outcome: Option<Resolution>,
}

#[derive(Default)]
struct State {
    by_digest: BTreeMap<Digest, Commitment>,
    batches: BTreeMap<String, Batch>,
}

impl State {
    /// The live commitment for `digest`, ignoring ones the ledger failed.
    fn live(&self, digest: &Digest) -> Option<&Commitment> {
        self.by_digest.get(digest).filter(|c| {
            !matches!(
                self.batches.get(&c.reference).and_then(|b| b.outcome.as_ref()),
                Some(Resolution::Failed(_))
            )
        })
    }
}

/// Anchors digests to a ledger and assembles inclusion proofs.
pub struct AnchorService<L: AnchorLedger> {
    ledger: L,
    state: Mutex<State>,
    poll_interval: Duration,
}

impl<L: AnchorLedger> AnchorService<L> {
    pub fn new(ledger: L) -> Self {
        Self {
            ledger,
            state: Mutex::new(State::default()),
            poll_interval: Duration::from_millis(50),
        }
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Anchor a single digest.
    pub async fn anchor(&self, digest: Digest) -> Result<Commitment> {
        let mut commitments = self.anchor_batch(&[digest]).await?;
        commitments.pop().ok_or(AnchorError::EmptyBatch)
    }

    /// Anchor several digests under one ledger submission.
    ///
    /// Returns one commitment per input digest, in input order. Digests that
    /// already have a live commitment keep it; the rest go into a single new
    /// tree. If nothing is new, the ledger is not contacted.
    pub async fn anchor_batch(&self, digests: &[Digest]) -> Result<Vec<Commitment>> {
        if digests.is_empty() {
            return Err(AnchorError::EmptyBatch);
        }

        // The state lock is held across the submission so concurrent callers
        // anchoring the same digest share one submission.
        let mut state = self.state.lock().await;

        let mut fresh: Vec<Digest> = Vec::new();
        for digest in digests {
            if state.live(digest).is_none() && !fresh.contains(digest) {
                fresh.push(*digest);
            }
        }

        if let Some(tree) = MerkleTree::build(&fresh) {
            let root = tree.root();
            let reference = self.ledger.submit(root).await?;
            let submitted_at = now_millis();
            info!(%reference, %root, leaves = fresh.len(), "submitted anchor batch");

            for (index, digest) in fresh.iter().enumerate() {
                state.by_digest.insert(
                    *digest,
                    Commitment {
                        digest: *digest,
                        reference: reference.clone(),
                        root,
                        leaf_index: index as u64,
                        submitted_at,
                    },
                );
            }
            state.batches.insert(
                reference,
                Batch {
                    tree,
                    digests: fresh,
                    outcome: None,
                },
            );
        } else {
            debug!(count = digests.len(), "all digests already anchored");
        }

        digests
            .iter()
            .map(|d| {
                state
                    .by_digest
                    .get(d)
                    .cloned()
                    .ok_or_else(|| AnchorError::UnknownCommitment(d.to_string()))
            })
            .collect()
    }

    /// Ask the ledger once where a commitment stands.
    ///
    /// A confirmed proof is verified locally before it is returned, and
    /// final outcomes are cached so later calls do not query the ledger.
    pub async fn resolve(&self, commitment: &Commitment) -> Result<Resolution> {
        let mut state = self.state.lock().await;
        let batch = state
            .batches
            .get(&commitment.reference)
            .ok_or_else(|| AnchorError::UnknownCommitment(commitment.reference.clone()))?;

        let leaf = batch
            .digests
            .get(commitment.leaf_index as usize)
            .filter(|d| **d == commitment.digest)
            .ok_or_else(|| AnchorError::UnknownCommitment(commitment.reference.clone()))?;
        let leaf = *leaf;

        if let Some(outcome) = &batch.outcome {
            return Ok(match outcome {
                Resolution::Confirmed(proof) => {
                    Resolution::Confirmed(self.proof_for(batch, proof, commitment, leaf)?)
                }
                other => other.clone(),
            });
        }

        let resolution = match self.ledger.status(&commitment.reference).await? {
            LedgerStatus::Pending => return Ok(Resolution::Pending),
            LedgerStatus::Failed { reason } => {
                warn!(reference = %commitment.reference, %reason, "ledger failed anchor batch");
                Resolution::Failed(reason)
            }
            LedgerStatus::Confirmed {
                confirmed_at,
                attestation,
            } => {
                let proof = AnchorProof {
                    digest: leaf,
                    merkle: batch
                        .tree
                        .proof(commitment.leaf_index as usize)
                        .ok_or_else(|| AnchorError::UnknownCommitment(commitment.reference.clone()))?,
                    root: batch.tree.root(),
                    reference: commitment.reference.clone(),
                    confirmed_at,
                    attestation,
                };
                if !verify_proof(&leaf, &proof, &[self.ledger.attestation_key()]) {
                    return Err(AnchorError::ProofRejected(commitment.reference.clone()));
                }
                info!(reference = %commitment.reference, confirmed_at, "anchor confirmed");
                Resolution::Confirmed(proof)
            }
        };

        if let Some(batch) = state.batches.get_mut(&commitment.reference) {
            batch.outcome = Some(resolution.clone());
        }
        Ok(resolution)
    }

    /// Reuse a cached confirmation for another leaf of the same batch.
    fn proof_for(
        &self,
        batch: &Batch,
        confirmed: &AnchorProof,
        commitment: &Commitment,
        leaf: Digest,
    ) -> Result<AnchorProof> {
        if confirmed.digest == leaf {
            return Ok(confirmed.clone());
        }
        let merkle = batch
            .tree
            .proof(commitment.leaf_index as usize)
            .ok_or_else(|| AnchorError::UnknownCommitment(commitment.reference.clone()))?;
        Ok(AnchorProof {
            digest: leaf,
            merkle,
            ..confirmed.clone()
        })
    }

    /// Poll until the commitment is confirmed or failed, or `timeout`
    /// elapses. On timeout the answer is [`Resolution::Pending`].
    pub async fn resolve_with_timeout(
        &self,
        commitment: &Commitment,
        timeout: Duration,
    ) -> Result<Resolution> {
        let poll = async {
            loop {
                match self.resolve(commitment).await? {
                    Resolution::Pending => tokio::time::sleep(self.poll_interval).await,
                    settled => return Ok(settled),
                }
            }
        };
        match tokio::time::timeout(timeout, poll).await {
            Ok(result) => result,
            Err(_) => {
                debug!(reference = %commitment.reference, "anchor still pending after timeout");
                Ok(Resolution::Pending)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;
    use secvault_core::Keypair;
    use std::sync::Arc;

    fn service(polls: u32) -> AnchorService<MemoryLedger> {
        AnchorService::new(MemoryLedger::new("mem", Keypair::generate()).confirm_after_polls(polls))
            .poll_interval(Duration::from_millis(1))
    }

    fn digest(i: u8) -> Digest {
        Digest::hash(&[i])
    }

    #[tokio::test]
    async fn anchoring_twice_submits_once() {
        let svc = service(0);
        let a = svc.anchor(digest(1)).await.unwrap();
        let b = svc.anchor(digest(1)).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(svc.ledger().submission_count().await, 1);

        let Resolution::Confirmed(p1) = svc.resolve(&a).await.unwrap() else {
            panic!("expected confirmation");
        };
        let Resolution::Confirmed(p2) = svc.resolve(&b).await.unwrap() else {
            panic!("expected confirmation");
        };
        assert_eq!(p1, p2);
        assert!(verify_proof(&digest(1), &p1, &[svc.ledger().attestation_key()]));
    }

    #[tokio::test]
    async fn concurrent_anchors_share_one_submission() {
        let svc = Arc::new(service(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let svc = Arc::clone(&svc);
                tokio::spawn(async move { svc.anchor(digest(7)).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(svc.ledger().submission_count().await, 1);
    }

    #[tokio::test]
    async fn batch_uses_one_root() {
        let svc = service(0);
        let digests: Vec<Digest> = (0..5).map(digest).collect();
        let commitments = svc.anchor_batch(&digests).await.unwrap();
        assert_eq!(svc.ledger().submission_count().await, 1);
        assert!(commitments.iter().all(|c| c.root == commitments[0].root));

        for (d, c) in digests.iter().zip(&commitments) {
            let Resolution::Confirmed(proof) = svc.resolve(c).await.unwrap() else {
                panic!("expected confirmation");
            };
            assert!(verify_proof(d, &proof, &[svc.ledger().attestation_key()]));
        }

        // Already anchored digests are not resubmitted.
        let again = svc.anchor_batch(&[digests[2], digests[2]]).await.unwrap();
        assert_eq!(again[0], commitments[2]);
        assert_eq!(again[1], commitments[2]);
        assert_eq!(svc.ledger().submission_count().await, 1);
    }

    #[tokio::test]
    async fn timeout_reports_pending() {
        let svc = service(u32::MAX);
        let c = svc.anchor(digest(3)).await.unwrap();
        let resolution = svc
            .resolve_with_timeout(&c, Duration::from_millis(20))
            .await
            .unwrap();
        assert!(resolution.is_pending());
    }

    #[tokio::test]
    async fn polling_reaches_confirmation() {
        let svc = service(3);
        let c = svc.anchor(digest(4)).await.unwrap();
        let resolution = svc
            .resolve_with_timeout(&c, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(matches!(resolution, Resolution::Confirmed(_)));
    }

    #[tokio::test]
    async fn failed_batch_can_be_reanchored() {
        let svc = service(0);
        svc.ledger().reject("mem:1").await;
        let first = svc.anchor(digest(5)).await.unwrap();
        assert!(matches!(svc.resolve(&first).await.unwrap(), Resolution::Failed(_)));

        let second = svc.anchor(digest(5)).await.unwrap();
        assert_ne!(first.reference, second.reference);
        assert!(matches!(svc.resolve(&second).await.unwrap(), Resolution::Confirmed(_)));
    }

    #[tokio::test]
    async fn empty_batch_rejected() {
        assert!(matches!(
            service(0).anchor_batch(&[]).await,
            Err(AnchorError::EmptyBatch)
        ));
    }

    #[tokio::test]
    async fn foreign_commitment_rejected() {
        let svc = service(0);
        let c = Commitment {
            digest: digest(1),
            reference: "elsewhere:1".into(),
            root: digest(1),
            leaf_index: 0,
            submitted_at: 0,
        };
        assert!(matches!(
            svc.resolve(&c).await,
            Err(AnchorError::UnknownCommitment(_))
        ));
    }
}
