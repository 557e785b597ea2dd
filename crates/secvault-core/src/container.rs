//! The binary container codec.
//!
//! ```text
//! offset  size  field
//! 0       4     magic "SEC\x01"
//! 4       2     format version (1)
//! 6       1     encryption mode (0 none, 1 ChaCha20-Poly1305)
//! 7       1     compression mode (0 none)
//! 8       8     metadata offset
//! 16      8     content offset
//! 24      8     predicate offset
//! 32      8     signature offset
//! 40      8     anchor offset (0 = absent)
//! 48      208   reserved, zero
//! 256     ...   sections, each `u32 length || bytes`
//! ```
//!
//! All integers are big-endian. Sections are contiguous, in the order above,
//! and the buffer ends exactly where the last section ends. Decoding checks
//! the fixed header before trusting any offset and never returns a partially
//! parsed document.

use bytes::Bytes;
use std::fmt;

use crate::canonical::{self, CanonicalError};
use crate::cipher::{ContentKey, RecipientSecret, SealedContent};
use crate::crypto::Ed25519Signature;
use crate::document::{AnchorRecord, Document, DocumentContent, Metadata, SignatureEntry};
use crate::error::{CoreError, ParseError};
use crate::predicate::Predicate;
use crate::types::EntityId;

pub const MAGIC: [u8; 4] = *b"SEC\x01";
pub const FORMAT_VERSION: u16 = 1;
pub const HEADER_LEN: usize = 256;

const OFFSETS_START: usize = 8;
const RESERVED_START: usize = 48;
const SIGNATURE_RECORD_LEN: usize = 32 + 64;

/// The sections of a container, in layout order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Metadata,
    Content,
    Predicate,
    Signature,
    Anchor,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Section::Metadata => "metadata",
            Section::Content => "content",
            Section::Predicate => "predicate",
            Section::Signature => "signature",
            Section::Anchor => "anchor",
        })
    }
}

/// How the content section is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EncryptionMode {
    None = 0,
    ChaCha20Poly1305 = 1,
}

impl EncryptionMode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(EncryptionMode::None),
            1 => Some(EncryptionMode::ChaCha20Poly1305),
            _ => None,
        }
    }
}

/// Serialize a document.
///
/// With a recipient secret, plaintext content is sealed under the
/// document's content key. Content that is already sealed is carried as is.
pub fn encode(doc: &Document, recipient: Option<&RecipientSecret>) -> Result<Vec<u8>, CoreError> {
    let metadata = doc.metadata().to_bytes(true)?;
    let (mode, content) = match (doc.content(), recipient) {
        (DocumentContent::Plain(plain), None) => (EncryptionMode::None, plain.to_vec()),
        (DocumentContent::Plain(_), Some(secret)) => (
            EncryptionMode::ChaCha20Poly1305,
            doc.seal_content(secret)?.to_bytes(),
        ),
        (DocumentContent::Sealed(sealed), _) => {
            (EncryptionMode::ChaCha20Poly1305, sealed.to_bytes())
        }
    };
    let predicate = doc.predicate().to_bytes()?;

    let mut signatures = Vec::with_capacity(doc.signatures().len() * SIGNATURE_RECORD_LEN);
    for entry in doc.signatures() {
        signatures.extend_from_slice(entry.signer.as_bytes());
        signatures.extend_from_slice(entry.signature.as_bytes());
    }

    let anchor = match doc.anchor() {
        Some(record) => {
            let mut buf = Vec::new();
            put_blob(&mut buf, record.reference.as_bytes())?;
            put_blob(&mut buf, &record.proof)?;
            Some(buf)
        }
        None => None,
    };

    assemble(
        mode,
        [&metadata, &content, &predicate, &signatures],
        anchor.as_deref(),
    )
}

/// Lay out header and sections.
fn assemble(
    mode: EncryptionMode,
    sections: [&[u8]; 4],
    anchor: Option<&[u8]>,
) -> Result<Vec<u8>, CoreError> {
    let body_len: usize = sections.iter().map(|s| 4 + s.len()).sum::<usize>()
        + anchor.map_or(0, |a| 4 + a.len());
    let mut buf = vec![0u8; HEADER_LEN];
    buf.reserve(body_len);

    buf[0..4].copy_from_slice(&MAGIC);
    buf[4..6].copy_from_slice(&FORMAT_VERSION.to_be_bytes());
    buf[6] = mode as u8;
    buf[7] = 0;

    let mut slot = OFFSETS_START;
    for section in sections.iter().copied().map(Some).chain(std::iter::once(anchor)) {
        let offset = match section {
            Some(bytes) => {
                let offset = buf.len() as u64;
                put_blob(&mut buf, bytes)?;
                offset
            }
            None => 0,
        };
        buf[slot..slot + 8].copy_from_slice(&offset.to_be_bytes());
        slot += 8;
    }
    Ok(buf)
}

fn put_blob(buf: &mut Vec<u8>, bytes: &[u8]) -> Result<(), CoreError> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| CoreError::EncodingError("section exceeds 4 GiB".into()))?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

/// Parse a container.
///
/// Sealed content is opened when a recipient secret is given; without one
/// the document keeps [`DocumentContent::Sealed`].
pub fn decode(bytes: &[u8], recipient: Option<&RecipientSecret>) -> Result<Document, ParseError> {
    if bytes.len() < HEADER_LEN {
        return Err(ParseError::Truncated {
            len: bytes.len(),
            needed: HEADER_LEN,
        });
    }
    if bytes[0..4] != MAGIC {
        return Err(ParseError::BadMagic);
    }
    let version = u16::from_be_bytes([bytes[4], bytes[5]]);
    if version != FORMAT_VERSION {
        return Err(ParseError::UnsupportedVersion(version));
    }
    let mode = EncryptionMode::from_u8(bytes[6]).ok_or(ParseError::UnsupportedEncryption(bytes[6]))?;
    if bytes[7] != 0 {
        return Err(ParseError::UnsupportedCompression(bytes[7]));
    }
    if bytes[RESERVED_START..HEADER_LEN].iter().any(|b| *b != 0) {
        return Err(ParseError::ReservedBytesSet);
    }

    let offset_at = |i: usize| {
        let start = OFFSETS_START + i * 8;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(&bytes[start..start + 8]);
        u64::from_be_bytes(arr)
    };

    let mut cursor = HEADER_LEN as u64;
    let metadata_bytes = take_section(bytes, &mut cursor, Section::Metadata, offset_at(0))?;
    let content_bytes = take_section(bytes, &mut cursor, Section::Content, offset_at(1))?;
    let predicate_bytes = take_section(bytes, &mut cursor, Section::Predicate, offset_at(2))?;
    let signature_bytes = take_section(bytes, &mut cursor, Section::Signature, offset_at(3))?;
    let anchor_bytes = match offset_at(4) {
        0 => None,
        offset => Some(take_section(bytes, &mut cursor, Section::Anchor, offset)?),
    };
    if cursor != bytes.len() as u64 {
        return Err(ParseError::TrailingBytes(bytes.len() - cursor as usize));
    }

    let meta = decode_metadata(metadata_bytes)?;
    let predicate = Predicate::from_bytes(predicate_bytes)?;
    let signatures = decode_signatures(signature_bytes)?;
    let anchor = anchor_bytes.map(decode_anchor).transpose()?;

    let content = match mode {
        EncryptionMode::None => DocumentContent::Plain(Bytes::copy_from_slice(content_bytes)),
        EncryptionMode::ChaCha20Poly1305 => {
            let sealed = SealedContent::from_bytes(content_bytes)?;
            match recipient {
                Some(secret) => DocumentContent::Plain(Bytes::from(
                    ContentKey::derive(secret, &meta.id).open(&sealed, &meta.digest)?,
                )),
                None => DocumentContent::Sealed(sealed),
            }
        }
    };

    Ok(Document::from_parts(meta, predicate, content, signatures, anchor))
}

/// Read the next section, which must start exactly at `cursor`.
fn take_section<'a>(
    bytes: &'a [u8],
    cursor: &mut u64,
    section: Section,
    offset: u64,
) -> Result<&'a [u8], ParseError> {
    if offset != *cursor {
        return Err(ParseError::BadOffset { section, offset });
    }
    let (body, next) = read_blob(bytes, offset, section)?;
    *cursor = next;
    Ok(body)
}

/// Read `u32 len || body` at `offset`, returning the body and the offset
/// just past it.
fn read_blob(bytes: &[u8], offset: u64, section: Section) -> Result<(&[u8], u64), ParseError> {
    let total = bytes.len() as u64;
    let body_start = offset
        .checked_add(4)
        .filter(|end| *end <= total)
        .ok_or(ParseError::BadOffset { section, offset })?;
    let start = offset as usize;
    let declared = u64::from(u32::from_be_bytes([
        bytes[start],
        bytes[start + 1],
        bytes[start + 2],
        bytes[start + 3],
    ]));
    let available = total - body_start;
    if declared > available {
        return Err(ParseError::SectionLength {
            section,
            declared,
            available,
        });
    }
    let end = body_start + declared;
    Ok((&bytes[body_start as usize..end as usize], end))
}

fn decode_metadata(bytes: &[u8]) -> Result<Metadata, ParseError> {
    let value = canonical::decode(bytes).map_err(|e| match e {
        CanonicalError::Malformed(reason) => ParseError::malformed(Section::Metadata, reason),
        _ => ParseError::NonCanonical(Section::Metadata),
    })?;
    let meta = Metadata::from_value(&value)
        .map_err(|reason| ParseError::malformed(Section::Metadata, reason))?;
    if !meta.acl_is_canonical() {
        return Err(ParseError::NonCanonical(Section::Metadata));
    }
    Ok(meta)
}

fn decode_signatures(bytes: &[u8]) -> Result<Vec<SignatureEntry>, ParseError> {
    if bytes.len() % SIGNATURE_RECORD_LEN != 0 {
        return Err(ParseError::malformed(
            Section::Signature,
            format!("length {} is not a multiple of {SIGNATURE_RECORD_LEN}", bytes.len()),
        ));
    }
    let mut entries: Vec<SignatureEntry> = Vec::with_capacity(bytes.len() / SIGNATURE_RECORD_LEN);
    for record in bytes.chunks_exact(SIGNATURE_RECORD_LEN) {
        let (id, sig) = record.split_at(32);
        let signer = EntityId(
            id.try_into()
                .map_err(|_| ParseError::malformed(Section::Signature, "bad signer id"))?,
        );
        let signature = Ed25519Signature::from_slice(sig)
            .ok_or_else(|| ParseError::malformed(Section::Signature, "bad signature"))?;
        if entries.last().map_or(false, |prev| prev.signer >= signer) {
            return Err(ParseError::malformed(
                Section::Signature,
                "signer ids must be unique and ascending",
            ));
        }
        entries.push(SignatureEntry { signer, signature });
    }
    Ok(entries)
}

fn decode_anchor(bytes: &[u8]) -> Result<AnchorRecord, ParseError> {
    let (reference, next) = read_blob(bytes, 0, Section::Anchor)?;
    let (proof, end) = read_blob(bytes, next, Section::Anchor)?;
    if end != bytes.len() as u64 {
        return Err(ParseError::malformed(Section::Anchor, "trailing bytes"));
    }
    let reference = std::str::from_utf8(reference)
        .map_err(|_| ParseError::malformed(Section::Anchor, "reference is not UTF-8"))?;
    Ok(AnchorRecord {
        reference: reference.to_string(),
        proof: proof.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;
    use crate::document::{content_hash, AclEntry, DocumentBuilder, Permission};
    use crate::predicate::MAX_PREDICATE_DEPTH;
    use crate::types::{DocumentType, SubjectId};

    fn signed_doc() -> Document {
        let issuer_key = Keypair::from_seed(&[1; 32]);
        let issuer = EntityId::from_bytes([1; 32]);
        let mut doc = DocumentBuilder::new(
            issuer,
            SubjectId::derive("patient-7"),
            DocumentType::new("rx.dispensation").unwrap(),
        )
        .issued_at(1_700_000_000_000)
        .expires_at(Some(1_800_000_000_000))
        .content(&b"amoxicillin 500mg, 3 fills"[..])
        .predicate(Predicate::quantity("remaining_uses", 3))
        .acl_entry(AclEntry::new(EntityId::from_bytes([4; 32]), &[Permission::Read]))
        .build()
        .unwrap();
        doc.sign(issuer, &issuer_key).unwrap();
        doc
    }

    #[test]
    fn plain_roundtrip() {
        let doc = signed_doc();
        let bytes = encode(&doc, None).unwrap();
        assert_eq!(&bytes[0..4], b"SEC\x01");
        assert_eq!(bytes[6], 0);
        assert_eq!(decode(&bytes, None).unwrap(), doc);
    }

    #[test]
    fn sealed_roundtrip() {
        let doc = signed_doc();
        let secret = RecipientSecret::generate();
        let bytes = encode(&doc, Some(&secret)).unwrap();
        assert_eq!(bytes[6], 1);

        let opened = decode(&bytes, Some(&secret)).unwrap();
        assert_eq!(opened, doc);

        let sealed = decode(&bytes, None).unwrap();
        assert!(sealed.is_sealed());
        assert_eq!(sealed.digest(), doc.digest());
        // Re-encoding sealed content carries it unchanged.
        assert_eq!(encode(&sealed, None).unwrap(), bytes);
    }

    #[test]
    fn wrong_secret_fails_to_open() {
        let bytes = encode(&signed_doc(), Some(&RecipientSecret::generate())).unwrap();
        let err = decode(&bytes, Some(&RecipientSecret::generate())).unwrap_err();
        assert_eq!(err.code(), "decryption_failed");
    }

    #[test]
    fn anchor_record_roundtrip() {
        let mut doc = signed_doc();
        doc.attach_anchor(AnchorRecord {
            reference: "memory-ledger:42".into(),
            proof: vec![0xde, 0xad],
        })
        .unwrap();
        let bytes = encode(&doc, None).unwrap();
        assert_ne!(&bytes[40..48], &[0u8; 8]);
        assert_eq!(decode(&bytes, None).unwrap(), doc);
    }

    #[test]
    fn header_checks() {
        let bytes = encode(&signed_doc(), None).unwrap();

        let mut bad = bytes.clone();
        bad[0] = b'X';
        assert_eq!(decode(&bad, None), Err(ParseError::BadMagic));

        let mut bad = bytes.clone();
        bad[5] = 2;
        assert_eq!(decode(&bad, None), Err(ParseError::UnsupportedVersion(2)));

        let mut bad = bytes.clone();
        bad[6] = 7;
        assert_eq!(decode(&bad, None), Err(ParseError::UnsupportedEncryption(7)));

        let mut bad = bytes.clone();
        bad[7] = 1;
        assert_eq!(decode(&bad, None), Err(ParseError::UnsupportedCompression(1)));

        let mut bad = bytes.clone();
        bad[200] = 1;
        assert_eq!(decode(&bad, None), Err(ParseError::ReservedBytesSet));

        assert!(matches!(
            decode(&bytes[..100], None),
            Err(ParseError::Truncated { .. })
        ));
    }

    #[test]
    fn offsets_must_be_contiguous() {
        let mut bytes = encode(&signed_doc(), None).unwrap();
        // Point the content offset one byte further.
        let content = u64::from_be_bytes(bytes[16..24].try_into().unwrap());
        bytes[16..24].copy_from_slice(&(content + 1).to_be_bytes());
        assert!(matches!(
            decode(&bytes, None),
            Err(ParseError::BadOffset {
                section: Section::Content,
                ..
            })
        ));
    }

    #[test]
    fn offset_past_end_rejected() {
        let mut bytes = encode(&signed_doc(), None).unwrap();
        bytes[8..16].copy_from_slice(&u64::MAX.to_be_bytes());
        assert!(matches!(
            decode(&bytes, None),
            Err(ParseError::BadOffset { .. })
        ));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = encode(&signed_doc(), None).unwrap();
        bytes.push(0);
        assert_eq!(decode(&bytes, None), Err(ParseError::TrailingBytes(1)));
    }

    #[test]
    fn section_length_overrun_rejected() {
        let doc = signed_doc();
        let mut bytes = encode(&doc, None).unwrap();
        // Inflate the signature section length.
        let sig = u64::from_be_bytes(bytes[32..40].try_into().unwrap()) as usize;
        bytes[sig..sig + 4].copy_from_slice(&1_000u32.to_be_bytes());
        assert!(matches!(
            decode(&bytes, None),
            Err(ParseError::SectionLength {
                section: Section::Signature,
                ..
            })
        ));
    }

    #[test]
    fn content_tamper_parses_but_breaks_hash() {
        let doc = signed_doc();
        let mut bytes = encode(&doc, None).unwrap();
        let content = u64::from_be_bytes(bytes[16..24].try_into().unwrap()) as usize;
        bytes[content + 4] ^= 0x01;
        let parsed = decode(&bytes, None).unwrap();
        let plain = parsed.plaintext().unwrap();
        assert_ne!(content_hash(plain), parsed.metadata().content_hash);
    }

    #[test]
    fn deep_predicate_rejected() {
        let doc = signed_doc();
        let mut deep = Predicate::Always;
        for _ in 0..MAX_PREDICATE_DEPTH {
            deep = Predicate::All(vec![deep]);
        }
        let predicate = canonical::encode(&deep.to_value()).unwrap();
        let metadata = doc.metadata().to_bytes(true).unwrap();
        let bytes = assemble(
            EncryptionMode::None,
            [&metadata, b"x", &predicate, &[]],
            None,
        )
        .unwrap();
        assert_eq!(
            decode(&bytes, None),
            Err(ParseError::PredicateTooDeep(MAX_PREDICATE_DEPTH))
        );
    }

    #[test]
    fn non_canonical_metadata_rejected() {
        let doc = signed_doc();
        let metadata = doc.metadata().to_bytes(true).unwrap();
        // Re-encode the leading map header with a one-byte length argument.
        let mut padded = vec![0xb8, metadata[0] & 0x1f];
        padded.extend_from_slice(&metadata[1..]);
        let predicate = doc.predicate().to_bytes().unwrap();
        let bytes = assemble(
            EncryptionMode::None,
            [&padded, b"x", &predicate, &[]],
            None,
        )
        .unwrap();
        assert_eq!(
            decode(&bytes, None),
            Err(ParseError::NonCanonical(Section::Metadata))
        );
    }

    #[test]
    fn unordered_signatures_rejected() {
        let doc = signed_doc();
        let metadata = doc.metadata().to_bytes(true).unwrap();
        let predicate = doc.predicate().to_bytes().unwrap();
        let mut sigs = Vec::new();
        for id in [[9u8; 32], [2u8; 32]] {
            sigs.extend_from_slice(&id);
            sigs.extend_from_slice(&[0u8; 64]);
        }
        let bytes = assemble(
            EncryptionMode::None,
            [&metadata, b"x", &predicate, &sigs],
            None,
        )
        .unwrap();
        assert!(matches!(
            decode(&bytes, None),
            Err(ParseError::Malformed {
                section: Section::Signature,
                ..
            })
        ));
    }
}
