//! Entities, households and guardianship.
//!
//! An [`Entity`] is any party that signs or relies on documents. Households
//! and guardianship are modelled as a relation table in [`HouseholdGraph`]:
//! a guardian never owns a dependent's documents, it holds capabilities
//! towards the dependent.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::crypto::Ed25519PublicKey;
use crate::error::CoreError;
use crate::types::{EntityId, HouseholdId, SubjectId, Timestamp};

/// Trust tier of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustTier {
    Government,
    Clinical,
    Educational,
    Financial,
    Commercial,
    Individual,
}

/// Registration status.
///
/// `Suspended` can be reinstated; `Revoked` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    Active,
    Suspended,
    Revoked,
}

/// A registered issuing or relying party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    pub public_key: Ed25519PublicKey,
    pub key_version: u32,
    pub tier: TrustTier,
    pub status: EntityStatus,
    /// The subject this entity acts as, for individuals who also hold keys.
    pub subject: Option<SubjectId>,
    pub registered_at: Timestamp,
}

impl Entity {
    /// A new active entity. The id is derived from the name and first key.
    pub fn new(
        name: impl Into<String>,
        public_key: Ed25519PublicKey,
        tier: TrustTier,
        registered_at: Timestamp,
    ) -> Self {
        let name = name.into();
        Self {
            id: EntityId::derive(&name, &public_key),
            name,
            public_key,
            key_version: 1,
            tier,
            status: EntityStatus::Active,
            subject: None,
            registered_at,
        }
    }

    /// Link this entity to the subject it acts as.
    pub fn acting_as(mut self, subject: SubjectId) -> Self {
        self.subject = Some(subject);
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == EntityStatus::Active
    }

    /// Replace the signing key. The id is unchanged.
    pub fn rotate_key(&mut self, new_key: Ed25519PublicKey) -> Result<(), CoreError> {
        if self.status == EntityStatus::Revoked {
            return Err(CoreError::EntityRevoked(self.id));
        }
        self.public_key = new_key;
        self.key_version += 1;
        Ok(())
    }
}

/// What a guardian may do for a dependent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Grant and revoke consent as if the guardian were the dependent.
    ActOnBehalf,
    /// Receive emergency disclosure notices addressed to the dependent.
    ReceiveDisclosures,
}

/// A household: ordered members with one or more guardians.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Household {
    pub id: HouseholdId,
    pub name: String,
    pub members: Vec<SubjectId>,
    pub guardians: Vec<EntityId>,
}

/// Household membership and guardian relations.
#[derive(Debug, Clone, Default)]
pub struct HouseholdGraph {
    households: BTreeMap<HouseholdId, Household>,
    member_of: BTreeMap<SubjectId, HouseholdId>,
    relations: BTreeMap<(EntityId, SubjectId), BTreeSet<Capability>>,
}

impl HouseholdGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a household. Every guardian receives `capabilities` towards
    /// every member.
    pub fn add_household(
        &mut self,
        name: &str,
        guardians: &[EntityId],
        members: &[SubjectId],
        capabilities: &[Capability],
    ) -> Result<HouseholdId, CoreError> {
        if guardians.is_empty() {
            return Err(CoreError::InvalidHousehold(
                "household needs at least one guardian".into(),
            ));
        }
        let id = HouseholdId::derive(name);
        if self.households.contains_key(&id) {
            return Err(CoreError::InvalidHousehold(format!(
                "household {name:?} already exists"
            )));
        }
        if let Some(member) = members.iter().find(|m| self.member_of.contains_key(*m)) {
            return Err(CoreError::InvalidHousehold(format!(
                "subject {member} already belongs to a household"
            )));
        }

        for member in members {
            self.member_of.insert(*member, id);
            for guardian in guardians {
                self.grant(*guardian, *member, capabilities);
            }
        }
        self.households.insert(
            id,
            Household {
                id,
                name: name.to_string(),
                members: members.to_vec(),
                guardians: guardians.to_vec(),
            },
        );
        Ok(id)
    }

    /// Add capabilities to a guardian relation, creating it if needed.
    pub fn grant(&mut self, guardian: EntityId, dependent: SubjectId, capabilities: &[Capability]) {
        self.relations
            .entry((guardian, dependent))
            .or_default()
            .extend(capabilities.iter().copied());
    }

    /// Remove a guardian relation entirely.
    pub fn remove(&mut self, guardian: &EntityId, dependent: &SubjectId) -> bool {
        self.relations.remove(&(*guardian, *dependent)).is_some()
    }

    pub fn has_capability(
        &self,
        guardian: &EntityId,
        dependent: &SubjectId,
        capability: Capability,
    ) -> bool {
        self.relations
            .get(&(*guardian, *dependent))
            .map_or(false, |caps| caps.contains(&capability))
    }

    pub fn is_guardian(&self, guardian: &EntityId, dependent: &SubjectId) -> bool {
        self.relations.contains_key(&(*guardian, *dependent))
    }

    /// Guardians holding `capability` towards `dependent`.
    pub fn guardians_with(&self, dependent: &SubjectId, capability: Capability) -> Vec<EntityId> {
        self.relations
            .iter()
            .filter(|((_, d), caps)| d == dependent && caps.contains(&capability))
            .map(|((g, _), _)| *g)
            .collect()
    }

    pub fn household_of(&self, member: &SubjectId) -> Option<&Household> {
        self.member_of
            .get(member)
            .and_then(|id| self.households.get(id))
    }

    pub fn household(&self, id: &HouseholdId) -> Option<&Household> {
        self.households.get(id)
    }
}
