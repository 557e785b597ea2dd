//! Identifier and tag types.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::crypto::{domain, Digest, Ed25519PublicKey};
use crate::error::CoreError;

/// Unix time in milliseconds.
pub type Timestamp = i64;

/// Current wall-clock time in Unix milliseconds.
pub fn now_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            pub const fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            pub const fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
                let mut arr = [0u8; 32];
                hex::decode_to_slice(s, &mut arr)?;
                Ok(Self(arr))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), &self.to_hex()[..16])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", &self.to_hex()[..16])
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }
    };
}

id_type!(
    /// Stable identifier of an issuing or relying party.
    ///
    /// Derived once at registration from the entity's name and first key.
    /// Key rotation does not change it.
    EntityId
);

id_type!(
    /// Identifier of the individual a document is about.
    SubjectId
);

id_type!(
    /// Globally unique document identifier.
    DocumentId
);

id_type!(
    /// Identifier of a consent grant.
    ConsentId
);

id_type!(
    /// Identifier of a household.
    HouseholdId
);

impl EntityId {
    pub fn derive(name: &str, first_key: &Ed25519PublicKey) -> Self {
        Self(Digest::derive(domain::ENTITY_ID, &[name.as_bytes(), first_key.as_bytes()]).0)
    }
}

impl SubjectId {
    /// Derive a subject id from an issuer-scoped external identifier.
    pub fn derive(identifier: &str) -> Self {
        Self(Digest::derive(domain::SUBJECT_ID, &[identifier.as_bytes()]).0)
    }
}

impl HouseholdId {
    pub fn derive(name: &str) -> Self {
        Self(Digest::derive(domain::HOUSEHOLD_ID, &[name.as_bytes()]).0)
    }
}

impl DocumentId {
    /// Deterministic id from the issuing context and a nonce.
    pub fn derive(
        issuer: &EntityId,
        subject: &SubjectId,
        doc_type: &DocumentType,
        issued_at: Timestamp,
        nonce: &[u8; 16],
    ) -> Self {
        Self(
            Digest::derive(
                domain::DOCUMENT_ID,
                &[
                    issuer.as_bytes(),
                    subject.as_bytes(),
                    doc_type.as_str().as_bytes(),
                    &issued_at.to_be_bytes(),
                    nonce,
                ],
            )
            .0,
        )
    }

    /// Fresh id with a random nonce.
    pub fn generate(
        issuer: &EntityId,
        subject: &SubjectId,
        doc_type: &DocumentType,
        issued_at: Timestamp,
    ) -> Self {
        Self::derive(issuer, subject, doc_type, issued_at, &random_nonce())
    }
}

impl ConsentId {
    pub fn generate(subject: &SubjectId, entity: &EntityId, created_at: Timestamp) -> Self {
        Self(
            Digest::derive(
                domain::CONSENT_ID,
                &[
                    subject.as_bytes(),
                    entity.as_bytes(),
                    &created_at.to_be_bytes(),
                    &random_nonce(),
                ],
            )
            .0,
        )
    }
}

fn random_nonce() -> [u8; 16] {
    let mut nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

const MAX_TAG_LEN: usize = 64;

fn validate_tag(kind: &str, value: &str) -> Result<(), CoreError> {
    let valid_first = value
        .chars()
        .next()
        .map_or(false, |c| c.is_ascii_lowercase() || c.is_ascii_digit());
    let valid_rest = value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'));
    if value.len() > MAX_TAG_LEN || !valid_first || !valid_rest {
        return Err(CoreError::InvalidIdentifier(format!("{kind} {value:?}")));
    }
    Ok(())
}

macro_rules! tag_type {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Result<Self, CoreError> {
                let value = value.into();
                validate_tag($kind, &value)?;
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = CoreError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(tag: $name) -> String {
                tag.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

tag_type!(
    /// Document type tag, e.g. `rx.dispensation` or `license.driver`.
    DocumentType,
    "document type"
);

tag_type!(
    /// Declared purpose of an access, e.g. `treatment`.
    Purpose,
    "purpose"
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;

    #[test]
    fn entity_id_is_stable_per_name_and_key() {
        let kp = Keypair::from_seed(&[1u8; 32]);
        let a = EntityId::derive("City Clinic", &kp.public_key());
        let b = EntityId::derive("City Clinic", &kp.public_key());
        let c = EntityId::derive("Other Clinic", &kp.public_key());
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn id_hex_roundtrip() {
        let id = SubjectId::derive("patient-42");
        assert_eq!(SubjectId::from_hex(&id.to_hex()).unwrap(), id);
        assert!(SubjectId::from_hex("abcd").is_err());
    }

    #[test]
    fn display_is_abbreviated() {
        let id = DocumentId::from_bytes([0xab; 32]);
        assert_eq!(id.to_string(), "abababababababab");
        assert_eq!(format!("{id:?}"), "DocumentId(abababababababab)");
    }

    #[test]
    fn generated_document_ids_differ() {
        let issuer = EntityId::from_bytes([1; 32]);
        let subject = SubjectId::from_bytes([2; 32]);
        let ty = DocumentType::new("rx.dispensation").unwrap();
        let a = DocumentId::generate(&issuer, &subject, &ty, 1_000);
        let b = DocumentId::generate(&issuer, &subject, &ty, 1_000);
        assert_ne!(a, b);
    }

    #[test]
    fn tags_are_validated() {
        assert!(DocumentType::new("rx.dispensation").is_ok());
        assert!(DocumentType::new("license_v2-b").is_ok());
        assert!(DocumentType::new("").is_err());
        assert!(DocumentType::new("Upper").is_err());
        assert!(DocumentType::new(".leading-dot").is_err());
        assert!(Purpose::new("a".repeat(65)).is_err());
    }

    #[test]
    fn tags_deserialize_with_validation() {
        let ok: Purpose = serde_json::from_str("\"treatment\"").unwrap();
        assert_eq!(ok.as_str(), "treatment");
        assert!(serde_json::from_str::<Purpose>("\"Not Valid\"").is_err());
    }
}
