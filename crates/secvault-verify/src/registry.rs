//! The mutable entity registry.
//!
//! The registry holds the current [`TrustSnapshot`] behind an `Arc`. Readers
//! take a cheap clone of the `Arc`; writers build the next snapshot from a
//! private copy and swap it in, bumping the version. A reader holding an old
//! snapshot never observes a half-applied change.

use secvault_core::{
    DocumentId, Ed25519PublicKey, Entity, EntityId, EntityStatus, SubjectId, Timestamp, TrustTier,
};
use serde::Deserialize;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use crate::error::{Result, VerifyError};
use crate::snapshot::{RevocationRecord, TrustSnapshot};

/// Registry of entities, revocations and trusted ledger keys.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    current: RwLock<Arc<TrustSnapshot>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a prepared snapshot.
    pub fn from_snapshot(snapshot: TrustSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Result<Arc<TrustSnapshot>> {
        self.current
            .read()
            .map(|guard| Arc::clone(&guard))
            .map_err(|_| VerifyError::LockPoisoned)
    }

    /// Apply `change` to a copy of the current snapshot and publish it.
    ///
    /// When `change` reports no modification (`Ok((value, false))`) the
    /// version is left alone.
    fn update<T>(&self, change: impl FnOnce(&mut TrustSnapshot) -> Result<(T, bool)>) -> Result<T> {
        let mut guard = self.current.write().map_err(|_| VerifyError::LockPoisoned)?;
        let mut next = TrustSnapshot::clone(&guard);
        let (value, modified) = change(&mut next)?;
        if modified {
            next.bump_version();
            *guard = Arc::new(next);
        }
        Ok(value)
    }

    pub fn register(&self, entity: Entity) -> Result<EntityId> {
        self.update(|snap| {
            if snap.entity(&entity.id).is_some() {
                return Err(VerifyError::DuplicateEntity(entity.id));
            }
            let id = entity.id;
            info!(entity = %id, name = %entity.name, tier = ?entity.tier, "registered entity");
            snap.insert_entity(entity);
            Ok((id, true))
        })
    }

    /// Replace an entity's signing key. Signatures made with the old key stop
    /// verifying immediately.
    pub fn rotate_key(&self, id: &EntityId, new_key: Ed25519PublicKey) -> Result<u32> {
        self.update(|snap| {
            let entity = snap
                .entity_mut(id)
                .ok_or(VerifyError::UnknownEntity(*id))?;
            entity.rotate_key(new_key)?;
            info!(entity = %id, key_version = entity.key_version, "rotated entity key");
            Ok((entity.key_version, true))
        })
    }

    pub fn suspend(&self, id: &EntityId) -> Result<()> {
        self.transition(id, EntityStatus::Suspended)
    }

    pub fn reinstate(&self, id: &EntityId) -> Result<()> {
        self.transition(id, EntityStatus::Active)
    }

    /// Revoke an entity. Terminal.
    pub fn revoke_entity(&self, id: &EntityId) -> Result<()> {
        self.transition(id, EntityStatus::Revoked)
    }

    fn transition(&self, id: &EntityId, to: EntityStatus) -> Result<()> {
        self.update(|snap| {
            let entity = snap
                .entity_mut(id)
                .ok_or(VerifyError::UnknownEntity(*id))?;
            let from = entity.status;
            if from == to {
                return Ok(((), false));
            }
            if from == EntityStatus::Revoked {
                return Err(VerifyError::InvalidTransition {
                    entity: *id,
                    from,
                    to,
                });
            }
            entity.status = to;
            info!(entity = %id, ?from, ?to, "entity status changed");
            Ok(((), true))
        })
    }

    /// Record a document revocation.
    ///
    /// Idempotent: revoking an already revoked document returns the original
    /// record unchanged.
    pub fn revoke_document(
        &self,
        document_id: DocumentId,
        issuer: EntityId,
        reason: &str,
        now: Timestamp,
    ) -> Result<RevocationRecord> {
        self.update(|snap| {
            if let Some(existing) = snap.revocation(&document_id) {
                debug!(document = %document_id, "document already revoked");
                return Ok((existing.clone(), false));
            }
            let record = RevocationRecord {
                document_id,
                issuer,
                reason: reason.to_string(),
                revoked_at: now,
            };
            info!(document = %document_id, issuer = %issuer, "document revoked");
            snap.insert_revocation(record.clone());
            Ok((record, true))
        })
    }

    /// Trust a ledger's attestation key.
    pub fn trust_ledger(&self, key: Ed25519PublicKey) -> Result<()> {
        self.update(|snap| Ok(((), snap.add_ledger_key(key))))
    }

    /// Import entities and ledger keys from a JSON trust store file.
    ///
    /// Entities already registered are skipped. Returns the number of
    /// entities added.
    pub fn load_trust_store(&self, path: impl AsRef<Path>) -> Result<usize> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let file: TrustStoreFile = serde_json::from_str(&raw)?;

        let mut entities = Vec::with_capacity(file.entities.len());
        for entry in file.entities {
            entities.push(entry.into_entity()?);
        }
        let ledger_keys = file
            .ledger_keys
            .iter()
            .map(|hex| {
                Ed25519PublicKey::from_hex(hex)
                    .map_err(|e| VerifyError::TrustStore(format!("ledger key {hex:?}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let added = self.update(|snap| {
            let mut added = 0;
            for entity in entities {
                if snap.entity(&entity.id).is_none() {
                    snap.insert_entity(entity);
                    added += 1;
                }
            }
            let mut modified = added > 0;
            for key in ledger_keys {
                modified |= snap.add_ledger_key(key);
            }
            Ok((added, modified))
        })?;
        info!(path = %path.as_ref().display(), added, "loaded trust store");
        Ok(added)
    }
}

#[derive(Debug, Deserialize)]
struct TrustStoreFile {
    #[serde(default)]
    entities: Vec<TrustStoreEntity>,
    #[serde(default)]
    ledger_keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TrustStoreEntity {
    /// Needed when the key has been rotated since registration, because the
    /// id is derived from the first key.
    #[serde(default)]
    id: Option<String>,
    name: String,
    public_key: String,
    tier: TrustTier,
    #[serde(default = "active")]
    status: EntityStatus,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    registered_at: Timestamp,
}

fn active() -> EntityStatus {
    EntityStatus::Active
}

impl TrustStoreEntity {
    fn into_entity(self) -> Result<Entity> {
        let key = Ed25519PublicKey::from_hex(&self.public_key)
            .map_err(|e| VerifyError::TrustStore(format!("{}: public key: {e}", self.name)))?;
        let mut entity = Entity::new(self.name, key, self.tier, self.registered_at);
        entity.status = self.status;
        if let Some(id) = &self.id {
            entity.id = EntityId::from_hex(id)
                .map_err(|e| VerifyError::TrustStore(format!("{}: id: {e}", entity.name)))?;
        }
        if let Some(subject) = &self.subject {
            entity.subject = Some(
                SubjectId::from_hex(subject)
                    .map_err(|e| VerifyError::TrustStore(format!("{}: subject: {e}", entity.name)))?,
            );
        }
        Ok(entity)
    }
}
