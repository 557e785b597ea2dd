//! Documents: the signed unit a container carries.
//!
//! A [`Document`] is immutable once built. Its digest is computed over the
//! plaintext canonical metadata (which commits to the content hash) and the
//! canonical predicate, before any encryption. Signing and attaching an
//! anchor record do not touch the digest; every other change goes through
//! [`Document::revise`], which yields a new document that supersedes the old.

use bytes::Bytes;
use ciborium::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::canonical::{self, bytes, int, int_map, opt_bytes, opt_int, text, uint, MapReader};
use crate::cipher::{ContentKey, RecipientSecret, SealedContent};
use crate::container::{FORMAT_VERSION, MAGIC};
use crate::crypto::{domain, signing_message, Digest, Ed25519Signature, Keypair};
use crate::error::{CoreError, CryptoError, Result};
use crate::predicate::Predicate;
use crate::types::{
    now_millis, DocumentId, DocumentType, EntityId, Purpose, SubjectId, Timestamp,
};

/// Metadata schema version written into every document.
pub const SCHEMA_VERSION: u64 = 1;

/// Metadata map keys. Keys 0-23 encode as single bytes.
mod keys {
    pub const SCHEMA: u64 = 0;
    pub const ID: u64 = 1;
    pub const DOC_TYPE: u64 = 2;
    pub const ISSUER: u64 = 3;
    pub const SUBJECT: u64 = 4;
    pub const ISSUED_AT: u64 = 5;
    pub const EXPIRES_AT: u64 = 6;
    pub const ACL: u64 = 7;
    pub const CONTENT_HASH: u64 = 8;
    pub const CONTENT_LEN: u64 = 9;
    pub const SUPERSEDES: u64 = 10;
    pub const DIGEST: u64 = 11;

    pub const ALL: &[u64] = &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11];
}

/// ACL entry map keys.
mod acl_keys {
    pub const ENTITY: u64 = 0;
    pub const PERMISSIONS: u64 = 1;
    pub const FIELDS: u64 = 2;
    pub const PURPOSE: u64 = 3;
    pub const NOT_BEFORE: u64 = 4;
    pub const EXPIRES_AT: u64 = 5;

    pub const ALL: &[u64] = &[0, 1, 2, 3, 4, 5];
}

/// Hash of plaintext content as committed in the metadata.
pub fn content_hash(plaintext: &[u8]) -> Digest {
    Digest::derive(domain::CONTENT_HASH, &[plaintext])
}

// ─────────────────────────────────────────────────────────────────────────
// Access control list
// ─────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Verify,
    Share,
}

impl Permission {
    const fn bit(self) -> u8 {
        match self {
            Permission::Read => 0b001,
            Permission::Verify => 0b010,
            Permission::Share => 0b100,
        }
    }
}

/// A set of [`Permission`]s stored as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Permissions(u8);

impl Permissions {
    const KNOWN: u8 = 0b111;

    pub fn of(perms: &[Permission]) -> Self {
        Self(perms.iter().fold(0, |acc, p| acc | p.bit()))
    }

    pub fn contains(&self, perm: Permission) -> bool {
        self.0 & perm.bit() != 0
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    /// Rejects unknown bits.
    pub fn from_bits(bits: u8) -> Option<Self> {
        (bits & !Self::KNOWN == 0).then_some(Self(bits))
    }
}

/// Which content fields an entry or grant covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldScope {
    All,
    Only(BTreeSet<String>),
}

impl FieldScope {
    pub fn only<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldScope::Only(fields.into_iter().map(Into::into).collect())
    }

    /// Whether this scope covers every requested field. An empty request
    /// means "all fields" and is only covered by [`FieldScope::All`].
    pub fn covers(&self, requested: &[String]) -> bool {
        match self {
            FieldScope::All => true,
            FieldScope::Only(allowed) => {
                !requested.is_empty() && requested.iter().all(|f| allowed.contains(f))
            }
        }
    }

    fn to_value(&self) -> Value {
        match self {
            FieldScope::All => Value::Null,
            FieldScope::Only(fields) => Value::Array(fields.iter().map(|f| text(f)).collect()),
        }
    }

    fn from_value(value: &Value) -> std::result::Result<Self, String> {
        match value {
            Value::Null => Ok(FieldScope::All),
            Value::Array(items) => {
                let mut fields = BTreeSet::new();
                for item in items {
                    match item {
                        Value::Text(s) if fields.last().map_or(true, |l: &String| l < s) => {
                            fields.insert(s.clone());
                        }
                        _ => return Err("field list must be sorted unique strings".into()),
                    }
                }
                Ok(FieldScope::Only(fields))
            }
            _ => Err("invalid field scope".into()),
        }
    }
}

/// One access control entry embedded in a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclEntry {
    pub entity: EntityId,
    pub permissions: Permissions,
    pub fields: FieldScope,
    pub purpose: Option<Purpose>,
    pub not_before: Option<Timestamp>,
    pub expires_at: Option<Timestamp>,
}

impl AclEntry {
    /// Entry covering all fields for any purpose with no time window.
    pub fn new(entity: EntityId, permissions: &[Permission]) -> Self {
        Self {
            entity,
            permissions: Permissions::of(permissions),
            fields: FieldScope::All,
            purpose: None,
            not_before: None,
            expires_at: None,
        }
    }

    pub fn fields(mut self, fields: FieldScope) -> Self {
        self.fields = fields;
        self
    }

    pub fn purpose(mut self, purpose: Purpose) -> Self {
        self.purpose = Some(purpose);
        self
    }

    pub fn window(mut self, not_before: Option<Timestamp>, expires_at: Option<Timestamp>) -> Self {
        self.not_before = not_before;
        self.expires_at = expires_at;
        self
    }

    /// Inside `[not_before, expires_at]`.
    pub fn is_active_at(&self, now: Timestamp) -> bool {
        self.not_before.map_or(true, |nb| now >= nb) && self.expires_at.map_or(true, |exp| now <= exp)
    }

    fn to_value(&self) -> Value {
        int_map(vec![
            (acl_keys::ENTITY, bytes(self.entity.as_bytes())),
            (acl_keys::PERMISSIONS, uint(u64::from(self.permissions.bits()))),
            (acl_keys::FIELDS, self.fields.to_value()),
            (
                acl_keys::PURPOSE,
                self.purpose.as_ref().map_or(Value::Null, |p| text(p.as_str())),
            ),
            (acl_keys::NOT_BEFORE, opt_int(self.not_before)),
            (acl_keys::EXPIRES_AT, opt_int(self.expires_at)),
        ])
    }

    fn from_value(value: &Value) -> std::result::Result<Self, String> {
        let map = MapReader::new(value)?;
        map.only_keys(acl_keys::ALL)?;
        let bits = u8::try_from(map.u64(acl_keys::PERMISSIONS, "permissions")?)
            .ok()
            .and_then(Permissions::from_bits)
            .ok_or("invalid permissions")?;
        let purpose = map
            .opt_text(acl_keys::PURPOSE, "purpose")?
            .map(|p| Purpose::new(p))
            .transpose()
            .map_err(|e| e.to_string())?;
        Ok(Self {
            entity: EntityId(map.bytes32(acl_keys::ENTITY, "acl entity")?),
            permissions: bits,
            fields: FieldScope::from_value(map.require(acl_keys::FIELDS, "fields")?)?,
            purpose,
            not_before: map.opt_i64(acl_keys::NOT_BEFORE, "not_before")?,
            expires_at: map.opt_i64(acl_keys::EXPIRES_AT, "acl expires_at")?,
        })
    }
}

/// Sort entries into canonical order (by their encoded form) and drop exact
/// duplicates.
fn canonical_acl(entries: Vec<AclEntry>) -> Result<Vec<AclEntry>> {
    let mut keyed = entries
        .into_iter()
        .map(|e| {
            canonical::encode(&e.to_value())
                .map(|k| (k, e))
                .map_err(|err| CoreError::EncodingError(err.to_string()))
        })
        .collect::<Result<Vec<_>>>()?;
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    keyed.dedup_by(|a, b| a.0 == b.0);
    Ok(keyed.into_iter().map(|(_, e)| e).collect())
}

// ─────────────────────────────────────────────────────────────────────────
// Metadata
// ─────────────────────────────────────────────────────────────────────────

/// The metadata section of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub schema_version: u64,
    pub id: DocumentId,
    pub doc_type: DocumentType,
    pub issuer: EntityId,
    pub subject: SubjectId,
    pub issued_at: Timestamp,
    pub expires_at: Option<Timestamp>,
    pub acl: Vec<AclEntry>,
    pub content_hash: Digest,
    pub content_len: u64,
    pub supersedes: Option<DocumentId>,
    /// The digest as claimed by whoever produced this metadata.
    pub digest: Digest,
}

impl Metadata {
    pub(crate) fn to_value(&self, include_digest: bool) -> Value {
        let mut entries = vec![
            (keys::SCHEMA, uint(self.schema_version)),
            (keys::ID, bytes(self.id.as_bytes())),
            (keys::DOC_TYPE, text(self.doc_type.as_str())),
            (keys::ISSUER, bytes(self.issuer.as_bytes())),
            (keys::SUBJECT, bytes(self.subject.as_bytes())),
            (keys::ISSUED_AT, int(self.issued_at)),
            (keys::EXPIRES_AT, opt_int(self.expires_at)),
            (
                keys::ACL,
                Value::Array(self.acl.iter().map(AclEntry::to_value).collect()),
            ),
            (keys::CONTENT_HASH, bytes(self.content_hash.as_bytes())),
            (keys::CONTENT_LEN, uint(self.content_len)),
            (
                keys::SUPERSEDES,
                opt_bytes(self.supersedes.as_ref().map(|id| id.as_bytes().as_slice())),
            ),
        ];
        if include_digest {
            entries.push((keys::DIGEST, bytes(self.digest.as_bytes())));
        }
        int_map(entries)
    }

    /// Canonical bytes, with or without the digest field.
    pub fn to_bytes(&self, include_digest: bool) -> Result<Vec<u8>> {
        canonical::encode(&self.to_value(include_digest))
            .map_err(|e| CoreError::EncodingError(e.to_string()))
    }

    pub(crate) fn from_value(value: &Value) -> std::result::Result<Self, String> {
        let map = MapReader::new(value)?;
        map.only_keys(keys::ALL)?;

        let schema_version = map.u64(keys::SCHEMA, "schema version")?;
        if schema_version != SCHEMA_VERSION {
            return Err(format!("unsupported schema version {schema_version}"));
        }

        let acl = map
            .array(keys::ACL, "acl")?
            .iter()
            .map(AclEntry::from_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            schema_version,
            id: DocumentId(map.bytes32(keys::ID, "document id")?),
            doc_type: DocumentType::new(map.text(keys::DOC_TYPE, "document type")?)
                .map_err(|e| e.to_string())?,
            issuer: EntityId(map.bytes32(keys::ISSUER, "issuer")?),
            subject: SubjectId(map.bytes32(keys::SUBJECT, "subject")?),
            issued_at: map.i64(keys::ISSUED_AT, "issued_at")?,
            expires_at: map.opt_i64(keys::EXPIRES_AT, "expires_at")?,
            acl,
            content_hash: Digest(map.bytes32(keys::CONTENT_HASH, "content hash")?),
            content_len: map.u64(keys::CONTENT_LEN, "content length")?,
            supersedes: map.opt_bytes32(keys::SUPERSEDES, "supersedes")?.map(DocumentId),
            digest: Digest(map.bytes32(keys::DIGEST, "digest")?),
        })
    }

    /// True when the ACL is in canonical order without duplicates.
    pub(crate) fn acl_is_canonical(&self) -> bool {
        let encoded: Option<Vec<Vec<u8>>> = self
            .acl
            .iter()
            .map(|e| canonical::encode(&e.to_value()).ok())
            .collect();
        encoded.map_or(false, |list| list.windows(2).all(|w| w[0] < w[1]))
    }
}

/// Digest over canonical metadata (without the digest field) and the
/// canonical predicate.
pub fn compute_digest(metadata: &Metadata, predicate: &Predicate) -> Result<Digest> {
    let meta = metadata.to_bytes(false)?;
    let pred = predicate.to_bytes()?;
    Ok(Digest::derive(domain::DOCUMENT_DIGEST, &[&meta, &pred]))
}

// ─────────────────────────────────────────────────────────────────────────
// Document
// ─────────────────────────────────────────────────────────────────────────

/// A signature by a registered entity over the document's signing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureEntry {
    pub signer: EntityId,
    pub signature: Ed25519Signature,
}

/// Reference to an external anchor plus the encoded proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorRecord {
    pub reference: String,
    pub proof: Vec<u8>,
}

/// Document content, either readable or still sealed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentContent {
    Plain(Bytes),
    Sealed(SealedContent),
}

/// Lifecycle status at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Active,
    Expired,
    Revoked,
}

/// A document with its signatures and optional anchor record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    meta: Metadata,
    predicate: Predicate,
    content: DocumentContent,
    signatures: Vec<SignatureEntry>,
    anchor: Option<AnchorRecord>,
}

impl Document {
    pub(crate) fn from_parts(
        meta: Metadata,
        predicate: Predicate,
        content: DocumentContent,
        signatures: Vec<SignatureEntry>,
        anchor: Option<AnchorRecord>,
    ) -> Self {
        Self {
            meta,
            predicate,
            content,
            signatures,
            anchor,
        }
    }

    pub fn metadata(&self) -> &Metadata {
        &self.meta
    }

    pub fn id(&self) -> &DocumentId {
        &self.meta.id
    }

    pub fn doc_type(&self) -> &DocumentType {
        &self.meta.doc_type
    }

    pub fn issuer(&self) -> &EntityId {
        &self.meta.issuer
    }

    pub fn subject(&self) -> &SubjectId {
        &self.meta.subject
    }

    pub fn issued_at(&self) -> Timestamp {
        self.meta.issued_at
    }

    pub fn expires_at(&self) -> Option<Timestamp> {
        self.meta.expires_at
    }

    pub fn acl(&self) -> &[AclEntry] {
        &self.meta.acl
    }

    pub fn supersedes(&self) -> Option<&DocumentId> {
        self.meta.supersedes.as_ref()
    }

    /// The digest carried by this document.
    pub fn digest(&self) -> &Digest {
        &self.meta.digest
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    pub fn content(&self) -> &DocumentContent {
        &self.content
    }

    /// Plaintext content, if it is not sealed.
    pub fn plaintext(&self) -> Option<&[u8]> {
        match &self.content {
            DocumentContent::Plain(b) => Some(b),
            DocumentContent::Sealed(_) => None,
        }
    }

    pub fn is_sealed(&self) -> bool {
        matches!(self.content, DocumentContent::Sealed(_))
    }

    pub fn signatures(&self) -> &[SignatureEntry] {
        &self.signatures
    }

    pub fn signature_by(&self, signer: &EntityId) -> Option<&SignatureEntry> {
        self.signatures.iter().find(|s| &s.signer == signer)
    }

    pub fn anchor(&self) -> Option<&AnchorRecord> {
        self.anchor.as_ref()
    }

    /// Recompute the digest from metadata and predicate.
    pub fn compute_digest(&self) -> Result<Digest> {
        compute_digest(&self.meta, &self.predicate)
    }

    /// The bytes every signer signs.
    pub fn signing_message(&self) -> Vec<u8> {
        signing_message(&MAGIC, FORMAT_VERSION, &self.meta.digest)
    }

    /// Sign as `signer`. Signing twice with the same key is a no-op; a
    /// different signature from an existing signer is rejected.
    pub fn sign(&mut self, signer: EntityId, keypair: &Keypair) -> Result<()> {
        if self.compute_digest()? != self.meta.digest {
            return Err(CoreError::InvalidDocument(
                "refusing to sign: digest does not match contents".into(),
            ));
        }
        let signature = keypair.sign(&self.signing_message());
        self.add_signature(SignatureEntry { signer, signature })
    }

    /// Attach a signature produced elsewhere. Entries are kept ordered by
    /// signer id.
    pub fn add_signature(&mut self, entry: SignatureEntry) -> Result<()> {
        match self.signatures.binary_search_by(|s| s.signer.cmp(&entry.signer)) {
            Ok(i) if self.signatures[i] == entry => Ok(()),
            Ok(_) => Err(CoreError::DuplicateSigner(entry.signer)),
            Err(i) => {
                self.signatures.insert(i, entry);
                Ok(())
            }
        }
    }

    /// Attach the anchor record. An anchor, once attached, is never replaced.
    pub fn attach_anchor(&mut self, record: AnchorRecord) -> Result<()> {
        match &self.anchor {
            Some(existing) if existing == &record => Ok(()),
            Some(_) => Err(CoreError::InvalidDocument("anchor already attached".into())),
            None => {
                self.anchor = Some(record);
                Ok(())
            }
        }
    }

    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.meta.expires_at.map_or(false, |exp| now > exp)
    }

    pub fn status_at(&self, now: Timestamp, revoked: bool) -> DocumentStatus {
        if revoked {
            DocumentStatus::Revoked
        } else if self.is_expired_at(now) {
            DocumentStatus::Expired
        } else {
            DocumentStatus::Active
        }
    }

    /// Encrypt the plaintext for the holder of `secret`.
    pub fn seal_content(
        &self,
        secret: &RecipientSecret,
    ) -> std::result::Result<SealedContent, CryptoError> {
        match &self.content {
            DocumentContent::Sealed(sealed) => Ok(sealed.clone()),
            DocumentContent::Plain(plain) => {
                ContentKey::derive(secret, &self.meta.id).seal(plain, &self.meta.digest)
            }
        }
    }

    /// A copy with sealed content opened.
    pub fn open(&self, secret: &RecipientSecret) -> std::result::Result<Document, CryptoError> {
        match &self.content {
            DocumentContent::Plain(_) => Ok(self.clone()),
            DocumentContent::Sealed(sealed) => {
                let plain =
                    ContentKey::derive(secret, &self.meta.id).open(sealed, &self.meta.digest)?;
                let mut opened = self.clone();
                opened.content = DocumentContent::Plain(Bytes::from(plain));
                Ok(opened)
            }
        }
    }

    /// Start a new version of this document. The new document gets a fresh
    /// id and points back at this one; signatures and anchor are not carried.
    pub fn revise(&self) -> DocumentBuilder {
        DocumentBuilder {
            issuer: self.meta.issuer,
            subject: self.meta.subject,
            doc_type: self.meta.doc_type.clone(),
            issued_at: None,
            expires_at: self.meta.expires_at,
            predicate: self.predicate.clone(),
            acl: self.meta.acl.clone(),
            content: self.plaintext().map(Bytes::copy_from_slice).unwrap_or_default(),
            supersedes: Some(self.meta.id),
            id_nonce: None,
        }
    }
}

/// Builder for new documents.
///
/// ```rust,no_run
/// use secvault_core::{DocumentBuilder, DocumentType, EntityId, Predicate, SubjectId};
///
/// let doc = DocumentBuilder::new(
///     EntityId::from_bytes([1; 32]),
///     SubjectId::derive("patient-7"),
///     DocumentType::new("rx.dispensation").unwrap(),
/// )
/// .content(&b"amoxicillin 500mg"[..])
/// .predicate(Predicate::quantity("remaining_uses", 3))
/// .build()
/// .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct DocumentBuilder {
    issuer: EntityId,
    subject: SubjectId,
    doc_type: DocumentType,
    issued_at: Option<Timestamp>,
    expires_at: Option<Timestamp>,
    predicate: Predicate,
    acl: Vec<AclEntry>,
    content: Bytes,
    supersedes: Option<DocumentId>,
    id_nonce: Option<[u8; 16]>,
}

impl DocumentBuilder {
    pub fn new(issuer: EntityId, subject: SubjectId, doc_type: DocumentType) -> Self {
        Self {
            issuer,
            subject,
            doc_type,
            issued_at: None,
            expires_at: None,
            predicate: Predicate::Always,
            acl: Vec::new(),
            content: Bytes::new(),
            supersedes: None,
            id_nonce: None,
        }
    }

    /// Defaults to the current time.
    pub fn issued_at(mut self, ts: Timestamp) -> Self {
        self.issued_at = Some(ts);
        self
    }

    pub fn expires_at(mut self, ts: Option<Timestamp>) -> Self {
        self.expires_at = ts;
        self
    }

    pub fn predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn acl(mut self, acl: Vec<AclEntry>) -> Self {
        self.acl = acl;
        self
    }

    pub fn acl_entry(mut self, entry: AclEntry) -> Self {
        self.acl.push(entry);
        self
    }

    pub fn content(mut self, content: impl Into<Bytes>) -> Self {
        self.content = content.into();
        self
    }

    pub fn supersedes(mut self, previous: DocumentId) -> Self {
        self.supersedes = Some(previous);
        self
    }

    /// Fix the id nonce for reproducible ids. Random by default.
    pub fn id_nonce(mut self, nonce: [u8; 16]) -> Self {
        self.id_nonce = Some(nonce);
        self
    }

    pub fn build(self) -> Result<Document> {
        let issued_at = self.issued_at.unwrap_or_else(now_millis);
        if let Some(exp) = self.expires_at {
            if exp <= issued_at {
                return Err(CoreError::InvalidDocument(
                    "expiry must be after issue time".into(),
                ));
            }
        }
        self.predicate.validate()?;

        let id = match &self.id_nonce {
            Some(nonce) => {
                DocumentId::derive(&self.issuer, &self.subject, &self.doc_type, issued_at, nonce)
            }
            None => DocumentId::generate(&self.issuer, &self.subject, &self.doc_type, issued_at),
        };
        if self.supersedes == Some(id) {
            return Err(CoreError::InvalidDocument(
                "document cannot supersede itself".into(),
            ));
        }

        let mut meta = Metadata {
            schema_version: SCHEMA_VERSION,
            id,
            doc_type: self.doc_type,
            issuer: self.issuer,
            subject: self.subject,
            issued_at,
            expires_at: self.expires_at,
            acl: canonical_acl(self.acl)?,
            content_hash: content_hash(&self.content),
            content_len: self.content.len() as u64,
            supersedes: self.supersedes,
            digest: Digest::ZERO,
        };
        meta.digest = compute_digest(&meta, &self.predicate)?;

        Ok(Document {
            meta,
            predicate: self.predicate,
            content: DocumentContent::Plain(self.content),
            signatures: Vec::new(),
            anchor: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> DocumentBuilder {
        DocumentBuilder::new(
            EntityId::from_bytes([1; 32]),
            SubjectId::derive("patient-7"),
            DocumentType::new("rx.dispensation").unwrap(),
        )
        .issued_at(1_700_000_000_000)
        .content(&b"amoxicillin 500mg"[..])
    }

    #[test]
    fn digest_is_deterministic() {
        let a = builder().id_nonce([9; 16]).build().unwrap();
        let b = builder().id_nonce([9; 16]).build().unwrap();
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.compute_digest().unwrap(), *a.digest());
    }

    #[test]
    fn acl_order_does_not_change_digest() {
        let e1 = AclEntry::new(EntityId::from_bytes([2; 32]), &[Permission::Read]);
        let e2 = AclEntry::new(EntityId::from_bytes([3; 32]), &[Permission::Verify]);
        let a = builder()
            .id_nonce([1; 16])
            .acl(vec![e1.clone(), e2.clone()])
            .build()
            .unwrap();
        let b = builder()
            .id_nonce([1; 16])
            .acl(vec![e2, e1])
            .build()
            .unwrap();
        assert_eq!(a.digest(), b.digest());
        assert!(a.metadata().acl_is_canonical());
    }

    #[test]
    fn predicate_is_committed() {
        let a = builder().id_nonce([1; 16]).build().unwrap();
        let b = builder()
            .id_nonce([1; 16])
            .predicate(Predicate::quantity("remaining_uses", 3))
            .build()
            .unwrap();
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn expiry_must_follow_issue() {
        let err = builder().expires_at(Some(1_700_000_000_000)).build();
        assert!(err.is_err());
    }

    #[test]
    fn signing_is_idempotent_per_signer() {
        let kp = Keypair::from_seed(&[5; 32]);
        let signer = EntityId::from_bytes([1; 32]);
        let mut doc = builder().build().unwrap();
        doc.sign(signer, &kp).unwrap();
        doc.sign(signer, &kp).unwrap();
        assert_eq!(doc.signatures().len(), 1);

        let other_key = Keypair::from_seed(&[6; 32]);
        assert!(matches!(
            doc.sign(signer, &other_key),
            Err(CoreError::DuplicateSigner(_))
        ));
    }

    #[test]
    fn signatures_sorted_by_signer() {
        let mut doc = builder().build().unwrap();
        doc.sign(EntityId::from_bytes([9; 32]), &Keypair::generate())
            .unwrap();
        doc.sign(EntityId::from_bytes([2; 32]), &Keypair::generate())
            .unwrap();
        let signers: Vec<_> = doc.signatures().iter().map(|s| s.signer).collect();
        assert_eq!(
            signers,
            vec![EntityId::from_bytes([2; 32]), EntityId::from_bytes([9; 32])]
        );
    }

    #[test]
    fn signature_verifies_over_signing_message() {
        let kp = Keypair::generate();
        let mut doc = builder().build().unwrap();
        doc.sign(EntityId::from_bytes([1; 32]), &kp).unwrap();
        let entry = doc.signatures()[0];
        assert!(kp
            .public_key()
            .verify(&doc.signing_message(), &entry.signature)
            .is_ok());
    }

    #[test]
    fn revise_links_and_changes_id() {
        let original = builder().build().unwrap();
        let revised = original
            .revise()
            .issued_at(1_700_000_100_000)
            .content(&b"amoxicillin 250mg"[..])
            .build()
            .unwrap();
        assert_ne!(revised.id(), original.id());
        assert_eq!(revised.supersedes(), Some(original.id()));
        assert!(revised.signatures().is_empty());
    }

    #[test]
    fn seal_and_open_content() {
        let secret = RecipientSecret::generate();
        let doc = builder().build().unwrap();
        let sealed = doc.seal_content(&secret).unwrap();

        let sealed_doc = Document::from_parts(
            doc.metadata().clone(),
            doc.predicate().clone(),
            DocumentContent::Sealed(sealed),
            Vec::new(),
            None,
        );
        assert!(sealed_doc.is_sealed());
        let opened = sealed_doc.open(&secret).unwrap();
        assert_eq!(opened, doc);
        assert!(sealed_doc.open(&RecipientSecret::generate()).is_err());
    }

    #[test]
    fn status_transitions() {
        let doc = builder()
            .expires_at(Some(1_700_000_001_000))
            .build()
            .unwrap();
        assert_eq!(doc.status_at(1_700_000_000_500, false), DocumentStatus::Active);
        assert_eq!(doc.status_at(1_700_000_001_001, false), DocumentStatus::Expired);
        assert_eq!(doc.status_at(1_700_000_000_500, true), DocumentStatus::Revoked);
    }

    #[test]
    fn anchor_is_attached_once() {
        let mut doc = builder().build().unwrap();
        let record = AnchorRecord {
            reference: "ledger:1".into(),
            proof: vec![1, 2, 3],
        };
        doc.attach_anchor(record.clone()).unwrap();
        doc.attach_anchor(record).unwrap();
        assert!(doc
            .attach_anchor(AnchorRecord {
                reference: "ledger:2".into(),
                proof: vec![],
            })
            .is_err());
    }

    #[test]
    fn field_scope_coverage() {
        let scope = FieldScope::only(["dosage", "drug"]);
        assert!(scope.covers(&["drug".to_string()]));
        assert!(!scope.covers(&["diagnosis".to_string()]));
        assert!(!scope.covers(&[]));
        assert!(FieldScope::All.covers(&[]));
    }

    #[test]
    fn acl_window() {
        let entry = AclEntry::new(EntityId::from_bytes([2; 32]), &[Permission::Read])
            .window(Some(100), Some(200));
        assert!(!entry.is_active_at(99));
        assert!(entry.is_active_at(100));
        assert!(entry.is_active_at(200));
        assert!(!entry.is_active_at(201));
    }

    #[test]
    fn permission_bits_reject_unknown() {
        assert!(Permissions::from_bits(0b1000).is_none());
        let p = Permissions::of(&[Permission::Read, Permission::Share]);
        assert!(p.contains(Permission::Read));
        assert!(!p.contains(Permission::Verify));
    }
}
