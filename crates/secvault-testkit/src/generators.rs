//! Proptest generators.

use proptest::prelude::*;

use secvault_core::{
    AclEntry, Document, DocumentBuilder, DocumentType, Entity, EntityId, FieldScope, GeoBox,
    Keypair, Permission, Predicate, Purpose, SubjectId, Timestamp, TrustTier,
};

/// A random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

pub fn entity_id() -> impl Strategy<Value = EntityId> {
    any::<[u8; 32]>().prop_map(EntityId::from_bytes)
}

/// A valid tag, usable as a document type or purpose.
pub fn tag() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9._-]{0,23}".prop_map(String::from)
}

pub fn doc_type() -> impl Strategy<Value = DocumentType> {
    tag().prop_filter_map("valid document type", |t| DocumentType::new(t).ok())
}

pub fn purpose() -> impl Strategy<Value = Purpose> {
    tag().prop_filter_map("valid purpose", |t| Purpose::new(t).ok())
}

/// A timestamp between 2001 and 2033.
pub fn timestamp() -> impl Strategy<Value = Timestamp> {
    1_000_000_000_000i64..=2_000_000_000_000i64
}

pub fn content(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

pub fn field_scope() -> impl Strategy<Value = FieldScope> {
    prop_oneof![
        Just(FieldScope::All),
        prop::collection::btree_set("[a-z]{1,12}", 1..4).prop_map(FieldScope::Only),
    ]
}

pub fn acl_entry() -> impl Strategy<Value = AclEntry> {
    (
        entity_id(),
        prop::sample::subsequence(vec![Permission::Read, Permission::Verify, Permission::Share], 1..=3),
        field_scope(),
        prop::option::of(purpose()),
    )
        .prop_map(|(entity, permissions, fields, purpose)| {
            let entry = AclEntry::new(entity, &permissions).fields(fields);
            match purpose {
                Some(p) => entry.purpose(p),
                None => entry,
            }
        })
}

/// A geofence with min <= max on both axes.
pub fn geo_box() -> impl Strategy<Value = GeoBox> {
    (
        -90_000_000i64..=90_000_000,
        -90_000_000i64..=90_000_000,
        -180_000_000i64..=180_000_000,
        -180_000_000i64..=180_000_000,
    )
        .prop_map(|(a, b, c, d)| GeoBox {
            min_lat_e6: a.min(b),
            max_lat_e6: a.max(b),
            min_lon_e6: c.min(d),
            max_lon_e6: c.max(d),
        })
}

fn leaf_predicate() -> impl Strategy<Value = Predicate> {
    prop_oneof![
        Just(Predicate::Always),
        ("[a-z_]{1,16}", 0u64..10).prop_map(|(counter, initial)| Predicate::quantity(counter, initial)),
        (prop::option::of(timestamp()), prop::option::of(timestamp())).prop_map(|(a, b)| {
            let (not_before, not_after) = match (a, b) {
                (Some(a), Some(b)) => (Some(a.min(b)), Some(a.max(b))),
                other => other,
            };
            Predicate::DateRange { not_before, not_after }
        }),
        geo_box().prop_map(Predicate::Geofence),
        prop::collection::btree_set(purpose(), 1..4).prop_map(Predicate::PurposeMatch),
    ]
}

/// A valid predicate tree, at most four levels deep.
pub fn predicate() -> impl Strategy<Value = Predicate> {
    leaf_predicate().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 1..4).prop_map(Predicate::All),
            prop::collection::vec(inner, 1..4).prop_map(Predicate::Any),
        ]
    })
}

/// Everything needed to build and sign one document deterministically.
#[derive(Debug, Clone)]
pub struct DocumentParams {
    pub issuer_seed: [u8; 32],
    pub subject: String,
    pub doc_type: DocumentType,
    pub issued_at: Timestamp,
    /// Lifetime in milliseconds, if the document expires.
    pub lifetime: Option<i64>,
    pub predicate: Predicate,
    pub acl: Vec<AclEntry>,
    pub content: Vec<u8>,
    pub nonce: [u8; 16],
}

impl Arbitrary for DocumentParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            any::<[u8; 32]>(),
            "[a-z]{1,12}-[0-9]{1,4}",
            doc_type(),
            timestamp(),
            prop::option::of(1i64..=365 * 24 * 3_600_000),
            predicate(),
            prop::collection::vec(acl_entry(), 0..3),
            content(512),
            any::<[u8; 16]>(),
        )
            .prop_map(
                |(issuer_seed, subject, doc_type, issued_at, lifetime, predicate, acl, content, nonce)| {
                    DocumentParams {
                        issuer_seed,
                        subject,
                        doc_type,
                        issued_at,
                        lifetime,
                        predicate,
                        acl,
                        content,
                        nonce,
                    }
                },
            )
            .boxed()
    }
}

/// Build and sign the document `params` describe.
///
/// Returns the issuer entity, its keypair and the signed document. The
/// same params always give the same document.
pub fn document_from_params(params: &DocumentParams) -> (Entity, Keypair, Document) {
    let keypair = Keypair::from_seed(&params.issuer_seed);
    let issuer = Entity::new("Generated Issuer", keypair.public_key(), TrustTier::Government, 0);

    let mut doc = DocumentBuilder::new(issuer.id, SubjectId::derive(&params.subject), params.doc_type.clone())
        .issued_at(params.issued_at)
        .expires_at(params.lifetime.map(|l| params.issued_at + l))
        .predicate(params.predicate.clone())
        .acl(params.acl.clone())
        .content(params.content.clone())
        .id_nonce(params.nonce)
        .build()
        .expect("generated params are valid");
    doc.sign(issuer.id, &keypair).expect("fresh document signs");
    (issuer, keypair, doc)
}
