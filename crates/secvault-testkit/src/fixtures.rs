//! Test fixtures.
//!
//! Panics on setup failure; these helpers are for tests only.

use secvault::{Vault, VaultConfig};
use secvault_anchor::MemoryLedger;
use secvault_core::{
    Document, DocumentBuilder, DocumentType, Entity, EntityId, Keypair, SubjectId, TrustTier,
};
use secvault_perms::MemoryAuditLog;

/// A keypair and the entity registered for it.
#[derive(Debug)]
pub struct Party {
    pub keypair: Keypair,
    pub entity: Entity,
}

impl Party {
    /// A party with a random key. Not registered anywhere yet.
    pub fn new(name: &str, tier: TrustTier) -> Self {
        Self::from_keypair(name, tier, Keypair::generate())
    }

    /// A party with a deterministic key.
    pub fn with_seed(name: &str, tier: TrustTier, seed: [u8; 32]) -> Self {
        Self::from_keypair(name, tier, Keypair::from_seed(&seed))
    }

    fn from_keypair(name: &str, tier: TrustTier, keypair: Keypair) -> Self {
        let entity = Entity::new(name, keypair.public_key(), tier, 0);
        Self { keypair, entity }
    }

    /// Mark this party as the entity a subject acts through.
    pub fn acting_as(mut self, subject: SubjectId) -> Self {
        self.entity = self.entity.acting_as(subject);
        self
    }

    pub fn id(&self) -> EntityId {
        self.entity.id
    }

    /// The pair `Vault::seal` and `Vault::serialize` take.
    pub fn signer(&self) -> (EntityId, &Keypair) {
        (self.entity.id, &self.keypair)
    }
}

/// An in-memory vault with one registered clinical issuer.
pub struct TestFixture {
    pub vault: Vault<MemoryAuditLog, MemoryLedger>,
    pub issuer: Party,
}

impl TestFixture {
    pub fn new() -> Self {
        Self::with_config(VaultConfig::default())
    }

    pub fn with_config(config: VaultConfig) -> Self {
        let vault =
            Vault::in_memory(&config, Keypair::generate()).expect("in-memory vault must open");
        let issuer = Party::new("City Clinic", TrustTier::Clinical);
        vault
            .register(issuer.entity.clone())
            .expect("issuer registers");
        Self { vault, issuer }
    }

    /// Create and register a party.
    pub fn party(&self, name: &str, tier: TrustTier) -> Party {
        let party = Party::new(name, tier);
        self.vault
            .register(party.entity.clone())
            .expect("party registers");
        party
    }

    /// Create and register the entity a subject acts through.
    pub fn subject_party(&self, name: &str, subject: SubjectId) -> Party {
        let party = Party::new(name, TrustTier::Individual).acting_as(subject);
        self.vault
            .register(party.entity.clone())
            .expect("subject party registers");
        party
    }

    /// A builder for a document issued by the fixture's issuer.
    pub fn builder(&self, subject: &str, doc_type: &str) -> DocumentBuilder {
        DocumentBuilder::new(
            self.issuer.id(),
            SubjectId::derive(subject),
            DocumentType::new(doc_type).expect("valid document type"),
        )
        .content(b"test content".to_vec())
    }

    /// Issue through the vault and sign with the issuer's key.
    pub fn signed(&self, builder: DocumentBuilder) -> Document {
        let doc = self.vault.issue(builder).expect("issue");
        self.vault
            .seal(doc, &[self.issuer.signer()])
            .expect("seal")
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Several parties with fixed keys, for multi-signer scenarios.
pub fn cosigners(count: usize) -> Vec<Party> {
    (0..count)
        .map(|i| {
            Party::with_seed(
                &format!("Cosigner {i}"),
                TrustTier::Government,
                [i as u8 + 1; 32],
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_signs_with_registered_issuer() {
        let fixture = TestFixture::new();
        let doc = fixture.signed(fixture.builder("patient-1", "rx.dispensation"));
        assert_eq!(doc.issuer(), &fixture.issuer.id());
        assert!(doc.signature_by(&fixture.issuer.id()).is_some());
    }

    #[test]
    fn cosigners_are_distinct() {
        let parties = cosigners(3);
        assert_ne!(parties[0].id(), parties[1].id());
        assert_ne!(parties[1].id(), parties[2].id());
    }
}
