//! Binary Merkle trees over document digests.
//!
//! Hashing is domain separated so a leaf can never be confused with an
//! interior node:
//! - Leaf: `blake3(0x00 || digest)`
//! - Node: `blake3(0x01 || left || right)`
//!
//! A node without a sibling at some level is promoted unchanged to the next
//! level rather than paired with a copy of itself.

use ciborium::value::Value;

use crate::canonical::{as_u64, bytes, uint};
use crate::crypto::Digest;

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

pub fn leaf_hash(digest: &Digest) -> Digest {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[LEAF_PREFIX]);
    hasher.update(digest.as_bytes());
    Digest(*hasher.finalize().as_bytes())
}

pub fn node_hash(left: &Digest, right: &Digest) -> Digest {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[NODE_PREFIX]);
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    Digest(*hasher.finalize().as_bytes())
}

/// Which side of the running hash a sibling sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofStep {
    pub sibling: Digest,
    pub side: Side,
}

/// Number of siblings on the path from leaf `index` to the root of a tree
/// with `count` leaves.
fn path_len(mut index: u64, mut width: u64) -> usize {
    let mut len = 0;
    while width > 1 {
        if index ^ 1 < width {
            len += 1;
        }
        index /= 2;
        width = width.div_ceil(2);
    }
    len
}

/// Inclusion proof for one leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    pub leaf_index: u64,
    pub leaf_count: u64,
    pub steps: Vec<ProofStep>,
}

impl MerkleProof {
    /// Check that `digest` is leaf `leaf_index` of a tree with root `root`.
    ///
    /// The shape of the path is recomputed from the index and leaf count, so
    /// a proof with extra, missing or mis-sided steps is rejected even when
    /// it happens to fold to the right root.
    pub fn verify(&self, digest: &Digest, root: &Digest) -> bool {
        if self.leaf_index >= self.leaf_count {
            return false;
        }
        let mut index = self.leaf_index;
        let mut width = self.leaf_count;
        let mut acc = leaf_hash(digest);
        let mut steps = self.steps.iter();

        while width > 1 {
            if index ^ 1 < width {
                let Some(step) = steps.next() else {
                    return false;
                };
                let expected = if index % 2 == 0 { Side::Right } else { Side::Left };
                if step.side != expected {
                    return false;
                }
                acc = match step.side {
                    Side::Right => node_hash(&acc, &step.sibling),
                    Side::Left => node_hash(&step.sibling, &acc),
                };
            }
            index /= 2;
            width = width.div_ceil(2);
        }
        steps.next().is_none() && acc == *root
    }

    pub(crate) fn to_value(&self) -> Value {
        let steps = self
            .steps
            .iter()
            .map(|s| {
                Value::Array(vec![
                    uint(match s.side {
                        Side::Left => 0,
                        Side::Right => 1,
                    }),
                    bytes(s.sibling.as_bytes()),
                ])
            })
            .collect();
        Value::Array(vec![uint(self.leaf_index), uint(self.leaf_count), Value::Array(steps)])
    }

    pub(crate) fn from_value(value: &Value) -> Option<Self> {
        let Value::Array(items) = value else {
            return None;
        };
        let [index, count, Value::Array(raw_steps)] = items.as_slice() else {
            return None;
        };
        let mut steps = Vec::with_capacity(raw_steps.len());
        for raw in raw_steps {
            let Value::Array(pair) = raw else {
                return None;
            };
            let [side, Value::Bytes(sibling)] = pair.as_slice() else {
                return None;
            };
            let side = match as_u64(side)? {
                0 => Side::Left,
                1 => Side::Right,
                _ => return None,
            };
            let sibling: [u8; 32] = sibling.as_slice().try_into().ok()?;
            steps.push(ProofStep {
                sibling: Digest(sibling),
                side,
            });
        }
        let leaf_index = as_u64(index)?;
        let leaf_count = as_u64(count)?;
        if leaf_index >= leaf_count || path_len(leaf_index, leaf_count) != steps.len() {
            return None;
        }
        Some(Self {
            leaf_index,
            leaf_count,
            steps,
        })
    }
}

/// A fully materialized tree.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    levels: Vec<Vec<Digest>>,
}

impl MerkleTree {
    /// Build over the given digests in order. Returns `None` for no leaves.
    pub fn build(digests: &[Digest]) -> Option<Self> {
        if digests.is_empty() {
            return None;
        }
        let mut levels = vec![digests.iter().map(leaf_hash).collect::<Vec<_>>()];
        while let Some(level) = levels.last().filter(|l| l.len() > 1) {
            let next = level
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => node_hash(left, right),
                    promoted => promoted[0],
                })
                .collect();
            levels.push(next);
        }
        Some(Self { levels })
    }

    pub fn root(&self) -> Digest {
        self.levels
            .last()
            .and_then(|top| top.first())
            .copied()
            .unwrap_or(Digest::ZERO)
    }

    pub fn leaf_count(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    /// Inclusion proof for the leaf at `index`.
    pub fn proof(&self, index: usize) -> Option<MerkleProof> {
        if index >= self.leaf_count() {
            return None;
        }
        let mut steps = Vec::new();
        let mut i = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = i ^ 1;
            if let Some(node) = level.get(sibling) {
                steps.push(ProofStep {
                    sibling: *node,
                    side: if i % 2 == 0 { Side::Right } else { Side::Left },
                });
            }
            i /= 2;
        }
        Some(MerkleProof {
            leaf_index: index as u64,
            leaf_count: self.leaf_count() as u64,
            steps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn digests(n: usize) -> Vec<Digest> {
        (0..n).map(|i| Digest::hash(&(i as u64).to_be_bytes())).collect()
    }

    #[test]
    fn single_leaf_root_is_leaf_hash() {
        let d = digests(1);
        let tree = MerkleTree::build(&d).unwrap();
        assert_eq!(tree.root(), leaf_hash(&d[0]));
        let proof = tree.proof(0).unwrap();
        assert!(proof.steps.is_empty());
        assert!(proof.verify(&d[0], &tree.root()));
    }

    #[test]
    fn leaf_and_node_are_domain_separated() {
        let a = Digest::hash(b"a");
        let b = Digest::hash(b"b");
        let node = node_hash(&a, &b);
        assert_ne!(node, leaf_hash(&node));
    }

    #[test]
    fn odd_node_is_promoted() {
        let d = digests(3);
        let tree = MerkleTree::build(&d).unwrap();
        let left = node_hash(&leaf_hash(&d[0]), &leaf_hash(&d[1]));
        assert_eq!(tree.root(), node_hash(&left, &leaf_hash(&d[2])));
        assert_eq!(tree.proof(2).unwrap().steps.len(), 1);
    }

    #[test]
    fn wrong_digest_or_root_fails() {
        let d = digests(5);
        let tree = MerkleTree::build(&d).unwrap();
        let proof = tree.proof(3).unwrap();
        assert!(proof.verify(&d[3], &tree.root()));
        assert!(!proof.verify(&d[2], &tree.root()));
        assert!(!proof.verify(&d[3], &Digest::hash(b"other root")));
    }

    #[test]
    fn mis_sided_or_padded_proof_fails() {
        let d = digests(4);
        let tree = MerkleTree::build(&d).unwrap();
        let mut proof = tree.proof(1).unwrap();

        let mut flipped = proof.clone();
        flipped.steps[0].side = Side::Right;
        assert!(!flipped.verify(&d[1], &tree.root()));

        proof.steps.push(ProofStep {
            sibling: Digest::ZERO,
            side: Side::Right,
        });
        assert!(!proof.verify(&d[1], &tree.root()));
    }

    #[test]
    fn proof_value_roundtrip() {
        let d = digests(6);
        let tree = MerkleTree::build(&d).unwrap();
        let proof = tree.proof(4).unwrap();
        assert_eq!(MerkleProof::from_value(&proof.to_value()), Some(proof));
    }

    #[test]
    fn huge_leaf_count_is_rejected_not_overflowed() {
        let d = Digest::hash(b"leaf");
        let proof = MerkleProof {
            leaf_index: 0,
            leaf_count: u64::MAX,
            steps: vec![ProofStep {
                sibling: Digest::ZERO,
                side: Side::Right,
            }],
        };
        assert!(!proof.verify(&d, &Digest::ZERO));
        assert_eq!(MerkleProof::from_value(&proof.to_value()), None);
    }

    #[test]
    fn decoded_proof_must_match_tree_shape() {
        let d = digests(5);
        let tree = MerkleTree::build(&d).unwrap();
        let mut proof = tree.proof(4).unwrap();
        proof.leaf_count = 1 << 20;
        assert_eq!(MerkleProof::from_value(&proof.to_value()), None);

        proof.leaf_count = 5;
        proof.leaf_index = 5;
        assert_eq!(MerkleProof::from_value(&proof.to_value()), None);
    }

    #[test]
    fn empty_tree_is_none() {
        assert!(MerkleTree::build(&[]).is_none());
    }

    proptest! {
        #[test]
        fn every_leaf_proves(n in 1usize..40, pick in any::<prop::sample::Index>()) {
            let d = digests(n);
            let tree = MerkleTree::build(&d).unwrap();
            let i = pick.index(n);
            let proof = tree.proof(i).unwrap();
            prop_assert!(proof.verify(&d[i], &tree.root()));
        }
    }
}
