//! Anchor proofs.
//!
//! An [`AnchorProof`] shows that a document digest was a leaf of a Merkle
//! tree whose root a ledger confirmed at a point in time. The ledger's
//! confirmation is an Ed25519 attestation over `(root, reference,
//! confirmed_at)`, so a proof can be checked offline against a set of
//! trusted ledger keys.

use ciborium::value::Value;

use crate::canonical::{self, as_i64, bytes, int, int_map, text, MapReader};
use crate::crypto::{domain, Digest, Ed25519PublicKey, Ed25519Signature};
use crate::document::AnchorRecord;
use crate::error::{CoreError, Result};
use crate::merkle::MerkleProof;
use crate::types::Timestamp;

mod keys {
    pub const DIGEST: u64 = 0;
    pub const MERKLE: u64 = 1;
    pub const ROOT: u64 = 2;
    pub const REFERENCE: u64 = 3;
    pub const CONFIRMED_AT: u64 = 4;
    pub const LEDGER_KEY: u64 = 5;
    pub const SIGNATURE: u64 = 6;

    pub const ALL: &[u64] = &[0, 1, 2, 3, 4, 5, 6];
}

/// The ledger's signed statement that it committed `root`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerAttestation {
    pub ledger_key: Ed25519PublicKey,
    pub signature: Ed25519Signature,
}

/// Bytes a ledger signs when it confirms a root.
pub fn attestation_message(root: &Digest, reference: &str, confirmed_at: Timestamp) -> Vec<u8> {
    let mut msg = Vec::with_capacity(domain::LEDGER_ATTESTATION.len() + 32 + reference.len() + 12);
    msg.extend_from_slice(domain::LEDGER_ATTESTATION);
    msg.extend_from_slice(root.as_bytes());
    msg.extend_from_slice(&(reference.len() as u32).to_be_bytes());
    msg.extend_from_slice(reference.as_bytes());
    msg.extend_from_slice(&confirmed_at.to_be_bytes());
    msg
}

/// Proof that a digest was anchored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorProof {
    pub digest: Digest,
    pub merkle: MerkleProof,
    pub root: Digest,
    pub reference: String,
    pub confirmed_at: Timestamp,
    pub attestation: LedgerAttestation,
}

impl AnchorProof {
    fn to_value(&self) -> Value {
        int_map(vec![
            (keys::DIGEST, bytes(self.digest.as_bytes())),
            (keys::MERKLE, self.merkle.to_value()),
            (keys::ROOT, bytes(self.root.as_bytes())),
            (keys::REFERENCE, text(&self.reference)),
            (keys::CONFIRMED_AT, int(self.confirmed_at)),
            (keys::LEDGER_KEY, bytes(self.attestation.ledger_key.as_bytes())),
            (keys::SIGNATURE, bytes(self.attestation.signature.as_bytes())),
        ])
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        canonical::encode(&self.to_value()).map_err(|e| CoreError::EncodingError(e.to_string()))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let bad = |reason: String| CoreError::EncodingError(format!("anchor proof: {reason}"));
        let value = canonical::decode(data).map_err(|e| bad(e.to_string()))?;
        let map = MapReader::new(&value).map_err(bad)?;
        map.only_keys(keys::ALL).map_err(bad)?;

        let merkle = map
            .get(keys::MERKLE)
            .and_then(MerkleProof::from_value)
            .ok_or_else(|| bad("invalid merkle path".into()))?;
        let signature = Ed25519Signature::from_slice(map.bytes(keys::SIGNATURE, "signature").map_err(bad)?)
            .ok_or_else(|| bad("signature must be 64 bytes".into()))?;
        let confirmed_at = map
            .get(keys::CONFIRMED_AT)
            .and_then(as_i64)
            .ok_or_else(|| bad("invalid confirmed_at".into()))?;

        Ok(Self {
            digest: Digest(map.bytes32(keys::DIGEST, "digest").map_err(bad)?),
            merkle,
            root: Digest(map.bytes32(keys::ROOT, "root").map_err(bad)?),
            reference: map.text(keys::REFERENCE, "reference").map_err(bad)?.to_string(),
            confirmed_at,
            attestation: LedgerAttestation {
                ledger_key: Ed25519PublicKey(map.bytes32(keys::LEDGER_KEY, "ledger key").map_err(bad)?),
                signature,
            },
        })
    }

    /// The record stored in a container's anchor section.
    pub fn to_record(&self) -> Result<AnchorRecord> {
        Ok(AnchorRecord {
            reference: self.reference.clone(),
            proof: self.to_bytes()?,
        })
    }
}

/// Check an anchor proof for `digest`.
///
/// Holds only if the proof is about this digest, its Merkle path folds to
/// its root, its ledger key is trusted, and the ledger's attestation over
/// `(root, reference, confirmed_at)` verifies.
pub fn verify_proof(
    digest: &Digest,
    proof: &AnchorProof,
    trusted_ledgers: &[Ed25519PublicKey],
) -> bool {
    proof.digest == *digest
        && proof.merkle.verify(digest, &proof.root)
        && trusted_ledgers.contains(&proof.attestation.ledger_key)
        && proof
            .attestation
            .ledger_key
            .verify(
                &attestation_message(&proof.root, &proof.reference, proof.confirmed_at),
                &proof.attestation.signature,
            )
            .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;
    use crate::merkle::MerkleTree;

    fn proof_for(digests: &[Digest], index: usize, ledger: &Keypair) -> AnchorProof {
        let tree = MerkleTree::build(digests).unwrap();
        let root = tree.root();
        let reference = "memory-ledger:1".to_string();
        let confirmed_at = 1_700_000_000_000;
        AnchorProof {
            digest: digests[index],
            merkle: tree.proof(index).unwrap(),
            root,
            attestation: LedgerAttestation {
                ledger_key: ledger.public_key(),
                signature: ledger.sign(&attestation_message(&root, &reference, confirmed_at)),
            },
            reference,
            confirmed_at,
        }
    }

    fn batch() -> Vec<Digest> {
        (0u8..4).map(|i| Digest::hash(&[i])).collect()
    }

    #[test]
    fn valid_proof_verifies() {
        let ledger = Keypair::generate();
        let d = batch();
        let proof = proof_for(&d, 2, &ledger);
        assert!(verify_proof(&d[2], &proof, &[ledger.public_key()]));
    }

    #[test]
    fn untrusted_ledger_rejected() {
        let ledger = Keypair::generate();
        let d = batch();
        let proof = proof_for(&d, 0, &ledger);
        assert!(!verify_proof(&d[0], &proof, &[Keypair::generate().public_key()]));
    }

    #[test]
    fn proof_for_other_digest_rejected() {
        let ledger = Keypair::generate();
        let d = batch();
        let proof = proof_for(&d, 0, &ledger);
        assert!(!verify_proof(&d[1], &proof, &[ledger.public_key()]));
    }

    #[test]
    fn altered_confirmation_time_breaks_attestation() {
        let ledger = Keypair::generate();
        let d = batch();
        let mut proof = proof_for(&d, 1, &ledger);
        proof.confirmed_at -= 1;
        assert!(!verify_proof(&d[1], &proof, &[ledger.public_key()]));
    }

    #[test]
    fn bytes_roundtrip() {
        let ledger = Keypair::generate();
        let d = batch();
        let proof = proof_for(&d, 3, &ledger);
        let decoded = AnchorProof::from_bytes(&proof.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, proof);
        assert!(AnchorProof::from_bytes(&[0xa0]).is_err());
    }
}
