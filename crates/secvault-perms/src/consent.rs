//! Consent grants.
//!
//! A consent grant lets one entity read a subject's documents for one
//! purpose, optionally limited to a document, a document type and a set of
//! fields, until it expires or is revoked. Grants are created by the subject
//! or by a guardian holding [`Capability::ActOnBehalf`].
//!
//! When several active grants cover a request, any one of them suffices.
//! The most recently created is the one reported.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use secvault_core::{
    Capability, ConsentId, Document, DocumentId, DocumentType, Entity, EntityId, FieldScope,
    HouseholdGraph, Purpose, SubjectId, Timestamp,
};

use crate::error::{AccessError, PermsError, Result};

/// Which documents a grant covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentTarget {
    /// One document.
    Document(DocumentId),
    /// Every document of this type about the subject.
    DocumentType(DocumentType),
    /// Every document about the subject.
    AnyDocument,
}

impl ConsentTarget {
    fn covers(&self, doc: &Document) -> bool {
        match self {
            ConsentTarget::Document(id) => id == doc.id(),
            ConsentTarget::DocumentType(t) => t == doc.doc_type(),
            ConsentTarget::AnyDocument => true,
        }
    }
}

/// Documents and fields a grant covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentScope {
    pub target: ConsentTarget,
    pub fields: FieldScope,
}

impl ConsentScope {
    pub fn document(id: DocumentId) -> Self {
        Self {
            target: ConsentTarget::Document(id),
            fields: FieldScope::All,
        }
    }

    pub fn doc_type(doc_type: DocumentType) -> Self {
        Self {
            target: ConsentTarget::DocumentType(doc_type),
            fields: FieldScope::All,
        }
    }

    pub fn any() -> Self {
        Self {
            target: ConsentTarget::AnyDocument,
            fields: FieldScope::All,
        }
    }

    pub fn fields(mut self, fields: FieldScope) -> Self {
        self.fields = fields;
        self
    }
}

/// A subject's permission for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentGrant {
    pub id: ConsentId,

    /// Whose documents.
    pub subject: SubjectId,

    /// Who may read them.
    pub entity: EntityId,

    pub scope: ConsentScope,
    pub purpose: Purpose,

    /// The subject's own entity or the guardian that created the grant.
    pub granted_by: EntityId,

    pub created_at: Timestamp,

    /// Last instant the grant is valid.
    pub expires_at: Option<Timestamp>,

    pub revoked_at: Option<Timestamp>,
}

impl ConsentGrant {
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.expires_at.map_or(false, |exp| now > exp)
    }

    pub fn is_active_at(&self, now: Timestamp) -> bool {
        self.revoked_at.is_none() && !self.is_expired_at(now) && now >= self.created_at
    }

    fn covers(&self, doc: &Document, entity: &EntityId, purpose: &Purpose, fields: &[String]) -> bool {
        self.subject == *doc.subject()
            && self.entity == *entity
            && self.purpose == *purpose
            && self.scope.target.covers(doc)
            && self.scope.fields.covers(fields)
    }
}

/// Whether `actor` may manage consent for `subject`.
pub fn may_act_for(actor: &Entity, subject: &SubjectId, households: &HouseholdGraph) -> bool {
    actor.is_active()
        && (actor.subject.as_ref() == Some(subject)
            || households.has_capability(&actor.id, subject, Capability::ActOnBehalf))
}

/// All consent grants, active and inactive.
#[derive(Debug, Clone, Default)]
pub struct ConsentBook {
    grants: BTreeMap<ConsentId, ConsentGrant>,
}

/// Request for a new consent grant.
#[derive(Debug, Clone)]
pub struct NewConsent {
    pub subject: SubjectId,
    pub entity: EntityId,
    pub scope: ConsentScope,
    pub purpose: Purpose,
    pub expires_at: Option<Timestamp>,
}

impl ConsentBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a grant created by `actor`.
    pub fn grant(
        &mut self,
        actor: &Entity,
        request: NewConsent,
        households: &HouseholdGraph,
        now: Timestamp,
    ) -> Result<&ConsentGrant> {
        if !may_act_for(actor, &request.subject, households) {
            return Err(PermsError::NotAuthorized {
                actor: actor.id,
                subject: request.subject,
            });
        }
        if request.expires_at.map_or(false, |exp| exp <= now) {
            return Err(PermsError::InvalidConsent(
                "expiry must be after creation".into(),
            ));
        }

        let id = ConsentId::generate(&request.subject, &request.entity, now);
        let grant = ConsentGrant {
            id,
            subject: request.subject,
            entity: request.entity,
            scope: request.scope,
            purpose: request.purpose,
            granted_by: actor.id,
            created_at: now,
            expires_at: request.expires_at,
            revoked_at: None,
        };
        Ok(&*self.grants.entry(id).or_insert(grant))
    }

    /// Withdraw a grant. Revoking twice keeps the first revocation time.
    pub fn revoke(
        &mut self,
        actor: &Entity,
        id: &ConsentId,
        households: &HouseholdGraph,
        now: Timestamp,
    ) -> Result<&ConsentGrant> {
        let grant = self
            .grants
            .get_mut(id)
            .ok_or(PermsError::ConsentNotFound(*id))?;
        if !may_act_for(actor, &grant.subject, households) {
            return Err(PermsError::NotAuthorized {
                actor: actor.id,
                subject: grant.subject,
            });
        }
        grant.revoked_at.get_or_insert(now);
        Ok(&*grant)
    }

    pub fn get(&self, id: &ConsentId) -> Option<&ConsentGrant> {
        self.grants.get(id)
    }

    /// Grants about `subject`, in id order.
    pub fn for_subject<'a>(&'a self, subject: &'a SubjectId) -> impl Iterator<Item = &'a ConsentGrant> + 'a {
        self.grants.values().filter(move |g| g.subject == *subject)
    }

    /// The active grant covering this request.
    ///
    /// The error code says why nothing matched: `consent_revoked` or
    /// `consent_expired` when only inactive grants cover the request,
    /// `no_consent` otherwise.
    pub fn find(
        &self,
        doc: &Document,
        entity: &EntityId,
        purpose: &Purpose,
        fields: &[String],
        now: Timestamp,
    ) -> std::result::Result<&ConsentGrant, AccessError> {
        let covering: Vec<&ConsentGrant> = self
            .grants
            .values()
            .filter(|g| g.covers(doc, entity, purpose, fields))
            .collect();

        if let Some(grant) = covering
            .iter()
            .filter(|g| g.is_active_at(now))
            .max_by_key(|g| (g.created_at, g.id))
            .copied()
        {
            return Ok(grant);
        }
        let code = if covering.is_empty() {
            "no_consent"
        } else if covering.iter().all(|g| g.revoked_at.is_some()) {
            "consent_revoked"
        } else {
            "consent_expired"
        };
        Err(AccessError::ConsentDenied(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secvault_core::{DocumentBuilder, Keypair, TrustTier};

    const T0: Timestamp = 1_700_000_000_000;

    struct Fixture {
        patient: Entity,
        parent: Entity,
        stranger: Entity,
        pharmacy: EntityId,
        child: SubjectId,
        households: HouseholdGraph,
    }

    fn fixture() -> Fixture {
        let patient = Entity::new("patient", Keypair::generate().public_key(), TrustTier::Individual, 0)
            .acting_as(SubjectId::derive("patient-7"));
        let parent = Entity::new("parent", Keypair::generate().public_key(), TrustTier::Individual, 0);
        let stranger = Entity::new("stranger", Keypair::generate().public_key(), TrustTier::Individual, 0);
        let child = SubjectId::derive("child-1");
        let mut households = HouseholdGraph::new();
        households
            .add_household("smith", &[parent.id], &[child], &[Capability::ActOnBehalf])
            .unwrap();
        Fixture {
            patient,
            parent,
            stranger,
            pharmacy: EntityId::from_bytes([9; 32]),
            child,
            households,
        }
    }

    fn doc_about(subject: SubjectId) -> Document {
        DocumentBuilder::new(
            EntityId::from_bytes([1; 32]),
            subject,
            DocumentType::new("rx.dispensation").unwrap(),
        )
        .issued_at(T0)
        .content(&b"x"[..])
        .build()
        .unwrap()
    }

    fn dispensing() -> Purpose {
        Purpose::new("dispensing").unwrap()
    }

    fn request(fx: &Fixture, subject: SubjectId, expires_at: Option<Timestamp>) -> NewConsent {
        NewConsent {
            subject,
            entity: fx.pharmacy,
            scope: ConsentScope::doc_type(DocumentType::new("rx.dispensation").unwrap()),
            purpose: dispensing(),
            expires_at,
        }
    }

    #[test]
    fn subject_and_guardian_may_grant() {
        let fx = fixture();
        let mut book = ConsentBook::new();
        let own = SubjectId::derive("patient-7");
        book.grant(&fx.patient, request(&fx, own, None), &fx.households, T0).unwrap();
        book.grant(&fx.parent, request(&fx, fx.child, None), &fx.households, T0).unwrap();

        let err = book
            .grant(&fx.stranger, request(&fx, fx.child, None), &fx.households, T0)
            .unwrap_err();
        assert!(matches!(err, PermsError::NotAuthorized { .. }));
    }

    #[test]
    fn expired_grant_never_matches() {
        let fx = fixture();
        let mut book = ConsentBook::new();
        book.grant(&fx.parent, request(&fx, fx.child, Some(T0 + 1000)), &fx.households, T0)
            .unwrap();
        let doc = doc_about(fx.child);

        assert!(book.find(&doc, &fx.pharmacy, &dispensing(), &[], T0 + 1000).is_ok());
        let err = book.find(&doc, &fx.pharmacy, &dispensing(), &[], T0 + 1001).unwrap_err();
        assert!(matches!(err, AccessError::ConsentDenied("consent_expired")));
    }

    #[test]
    fn revoked_grant_never_matches() {
        let fx = fixture();
        let mut book = ConsentBook::new();
        let id = book
            .grant(&fx.parent, request(&fx, fx.child, None), &fx.households, T0)
            .unwrap()
            .id;
        let first = book.revoke(&fx.parent, &id, &fx.households, T0 + 5).unwrap().revoked_at;
        let second = book.revoke(&fx.parent, &id, &fx.households, T0 + 9).unwrap().revoked_at;
        assert_eq!(first, Some(T0 + 5));
        assert_eq!(second, first);

        let err = book
            .find(&doc_about(fx.child), &fx.pharmacy, &dispensing(), &[], T0 + 10)
            .unwrap_err();
        assert!(matches!(err, AccessError::ConsentDenied("consent_revoked")));
    }

    #[test]
    fn purpose_and_fields_must_be_covered() {
        let fx = fixture();
        let mut book = ConsentBook::new();
        let mut req = request(&fx, fx.child, None);
        req.scope = ConsentScope::any().fields(FieldScope::only(["drug"]));
        book.grant(&fx.parent, req, &fx.households, T0).unwrap();
        let doc = doc_about(fx.child);

        assert!(book.find(&doc, &fx.pharmacy, &dispensing(), &["drug".into()], T0).is_ok());
        assert!(book.find(&doc, &fx.pharmacy, &dispensing(), &["diagnosis".into()], T0).is_err());
        let research = Purpose::new("research").unwrap();
        assert!(matches!(
            book.find(&doc, &fx.pharmacy, &research, &["drug".into()], T0),
            Err(AccessError::ConsentDenied("no_consent"))
        ));
    }

    #[test]
    fn most_recent_covering_grant_is_reported() {
        let fx = fixture();
        let mut book = ConsentBook::new();
        book.grant(&fx.parent, request(&fx, fx.child, None), &fx.households, T0).unwrap();
        let newer = book
            .grant(&fx.parent, request(&fx, fx.child, None), &fx.households, T0 + 50)
            .unwrap()
            .id;
        let found = book
            .find(&doc_about(fx.child), &fx.pharmacy, &dispensing(), &[], T0 + 60)
            .unwrap();
        assert_eq!(found.id, newer);
    }

    #[test]
    fn other_subjects_documents_not_covered() {
        let fx = fixture();
        let mut book = ConsentBook::new();
        book.grant(&fx.parent, request(&fx, fx.child, None), &fx.households, T0).unwrap();
        let other = doc_about(SubjectId::derive("someone-else"));
        assert!(book.find(&other, &fx.pharmacy, &dispensing(), &[], T0).is_err());
    }
}
