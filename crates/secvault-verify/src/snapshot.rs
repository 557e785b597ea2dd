//! Immutable views of trust state.

use secvault_core::{DocumentId, Ed25519PublicKey, Entity, EntityId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Issuer's revocation of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationRecord {
    pub document_id: DocumentId,
    pub issuer: EntityId,
    pub reason: String,
    pub revoked_at: Timestamp,
}

/// Entity keys and statuses, document revocations and trusted ledger keys
/// as of one registry version.
///
/// A verification run reads exactly one snapshot, so a concurrent key
/// rotation or revocation is either wholly visible to it or not at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustSnapshot {
    version: u64,
    entities: BTreeMap<EntityId, Entity>,
    revocations: BTreeMap<DocumentId, RevocationRecord>,
    ledger_keys: Vec<Ed25519PublicKey>,
}

impl TrustSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn entity(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn revocation(&self, document: &DocumentId) -> Option<&RevocationRecord> {
        self.revocations.get(document)
    }

    pub fn is_revoked(&self, document: &DocumentId) -> bool {
        self.revocations.contains_key(document)
    }

    pub fn ledger_keys(&self) -> &[Ed25519PublicKey] {
        &self.ledger_keys
    }

    // Builders for assembling a fixed snapshot, e.g. in tests.

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn with_entity(mut self, entity: Entity) -> Self {
        self.entities.insert(entity.id, entity);
        self
    }

    pub fn with_revocation(mut self, record: RevocationRecord) -> Self {
        self.revocations.insert(record.document_id, record);
        self
    }

    pub fn with_ledger_key(mut self, key: Ed25519PublicKey) -> Self {
        if !self.ledger_keys.contains(&key) {
            self.ledger_keys.push(key);
        }
        self
    }

    // Mutators used by the registry on its private copy.

    pub(crate) fn bump_version(&mut self) {
        self.version += 1;
    }

    pub(crate) fn entity_mut(&mut self, id: &EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(id)
    }

    pub(crate) fn insert_entity(&mut self, entity: Entity) {
        self.entities.insert(entity.id, entity);
    }

    pub(crate) fn insert_revocation(&mut self, record: RevocationRecord) {
        self.revocations.insert(record.document_id, record);
    }

    pub(crate) fn add_ledger_key(&mut self, key: Ed25519PublicKey) -> bool {
        if self.ledger_keys.contains(&key) {
            return false;
        }
        self.ledger_keys.push(key);
        true
    }
}

impl FromIterator<Entity> for TrustSnapshot {
    fn from_iter<I: IntoIterator<Item = Entity>>(entities: I) -> Self {
        entities.into_iter().fold(Self::new(), Self::with_entity)
    }
}
