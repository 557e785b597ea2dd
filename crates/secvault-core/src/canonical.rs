//! Canonical CBOR encoding for deterministic serialization.
//!
//! Implements RFC 8949 core deterministic encoding:
//! - Map keys sorted by encoded byte comparison, no duplicates
//! - Integers use the smallest valid encoding
//! - Definite lengths only
//! - No floats and no tags (timestamps are i64 milliseconds)
//!
//! Decoding is strict: a buffer is accepted only if re-encoding the decoded
//! value reproduces it byte for byte. This makes the digest of any accepted
//! section unambiguous.

use ciborium::value::{Integer, Value};
use thiserror::Error;

/// Canonical encoding failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CanonicalError {
    #[error("malformed CBOR: {0}")]
    Malformed(String),

    #[error("value is not canonically encoded")]
    NonCanonical,

    #[error("trailing bytes after CBOR value")]
    TrailingBytes,

    #[error("unsupported CBOR value: {0}")]
    Unsupported(&'static str),

    #[error("duplicate map key")]
    DuplicateKey,
}

/// Encode a value canonically.
pub fn encode(value: &Value) -> Result<Vec<u8>, CanonicalError> {
    let mut buf = Vec::new();
    encode_value_to(&mut buf, value)?;
    Ok(buf)
}

/// Decode a single canonical value that spans the whole buffer.
pub fn decode(bytes: &[u8]) -> Result<Value, CanonicalError> {
    let value: Value = ciborium::de::from_reader(bytes)
        .map_err(|e| CanonicalError::Malformed(e.to_string()))?;

    let reencoded = encode(&value).map_err(|_| CanonicalError::NonCanonical)?;
    if reencoded == bytes {
        Ok(value)
    } else if bytes.starts_with(&reencoded) {
        Err(CanonicalError::TrailingBytes)
    } else {
        Err(CanonicalError::NonCanonical)
    }
}

fn encode_value_to(buf: &mut Vec<u8>, value: &Value) -> Result<(), CanonicalError> {
    match value {
        Value::Integer(i) => encode_integer(buf, *i),
        Value::Bytes(b) => {
            encode_uint(buf, 2, b.len() as u64);
            buf.extend_from_slice(b);
        }
        Value::Text(s) => {
            encode_uint(buf, 3, s.len() as u64);
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Array(items) => {
            encode_uint(buf, 4, items.len() as u64);
            for item in items {
                encode_value_to(buf, item)?;
            }
        }
        Value::Map(entries) => encode_map(buf, entries)?,
        Value::Bool(b) => buf.push(if *b { 0xf5 } else { 0xf4 }),
        Value::Null => buf.push(0xf6),
        Value::Float(_) => return Err(CanonicalError::Unsupported("float")),
        Value::Tag(..) => return Err(CanonicalError::Unsupported("tag")),
        _ => return Err(CanonicalError::Unsupported("unknown value kind")),
    }
    Ok(())
}

fn encode_integer(buf: &mut Vec<u8>, i: Integer) {
    let n = i128::from(i);
    if n >= 0 {
        encode_uint(buf, 0, n as u64);
    } else {
        // -1 encodes as 0, -2 as 1, ...
        encode_uint(buf, 1, (-1 - n) as u64);
    }
}

fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

fn encode_map(buf: &mut Vec<u8>, entries: &[(Value, Value)]) -> Result<(), CanonicalError> {
    let mut pairs = Vec::with_capacity(entries.len());
    for (k, v) in entries {
        let mut key_buf = Vec::new();
        encode_value_to(&mut key_buf, k)?;
        pairs.push((key_buf, v));
    }
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    if pairs.windows(2).any(|w| w[0].0 == w[1].0) {
        return Err(CanonicalError::DuplicateKey);
    }

    encode_uint(buf, 5, pairs.len() as u64);
    for (key_bytes, value) in pairs {
        buf.extend_from_slice(&key_bytes);
        encode_value_to(buf, value)?;
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────
// Value construction and access helpers
// ─────────────────────────────────────────────────────────────────────────

pub(crate) fn uint(n: u64) -> Value {
    Value::Integer(n.into())
}

pub(crate) fn int(n: i64) -> Value {
    Value::Integer(n.into())
}

pub(crate) fn bytes(b: &[u8]) -> Value {
    Value::Bytes(b.to_vec())
}

pub(crate) fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

pub(crate) fn opt_int(n: Option<i64>) -> Value {
    n.map_or(Value::Null, int)
}

pub(crate) fn opt_bytes(b: Option<&[u8]>) -> Value {
    b.map_or(Value::Null, bytes)
}

/// Map with small integer keys, built in key order.
pub(crate) fn int_map(entries: Vec<(u64, Value)>) -> Value {
    Value::Map(entries.into_iter().map(|(k, v)| (uint(k), v)).collect())
}

pub(crate) fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Integer(i) => u64::try_from(i128::from(*i)).ok(),
        _ => None,
    }
}

pub(crate) fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(i) => i64::try_from(i128::from(*i)).ok(),
        _ => None,
    }
}

/// Typed lookups into a map with small integer keys.
///
/// Errors are plain strings naming the offending field; callers wrap them in
/// their own section-specific error.
pub(crate) struct MapReader<'a> {
    entries: &'a [(Value, Value)],
}

impl<'a> MapReader<'a> {
    pub(crate) fn new(value: &'a Value) -> Result<Self, String> {
        match value {
            Value::Map(entries) => Ok(Self { entries }),
            _ => Err("expected map".into()),
        }
    }

    /// Reject any key that is not a known field.
    pub(crate) fn only_keys(&self, known: &[u64]) -> Result<(), String> {
        for (k, _) in self.entries {
            match as_u64(k) {
                Some(key) if known.contains(&key) => {}
                _ => return Err(format!("unexpected key {k:?}")),
            }
        }
        Ok(())
    }

    pub(crate) fn get(&self, key: u64) -> Option<&'a Value> {
        self.entries
            .iter()
            .find(|(k, _)| as_u64(k) == Some(key))
            .map(|(_, v)| v)
    }

    pub(crate) fn require(&self, key: u64, name: &str) -> Result<&'a Value, String> {
        self.get(key).ok_or_else(|| format!("missing {name}"))
    }

    pub(crate) fn u64(&self, key: u64, name: &str) -> Result<u64, String> {
        as_u64(self.require(key, name)?).ok_or_else(|| format!("invalid {name}"))
    }

    pub(crate) fn i64(&self, key: u64, name: &str) -> Result<i64, String> {
        as_i64(self.require(key, name)?).ok_or_else(|| format!("invalid {name}"))
    }

    pub(crate) fn opt_i64(&self, key: u64, name: &str) -> Result<Option<i64>, String> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => as_i64(v).map(Some).ok_or_else(|| format!("invalid {name}")),
        }
    }

    pub(crate) fn text(&self, key: u64, name: &str) -> Result<&'a str, String> {
        match self.require(key, name)? {
            Value::Text(s) => Ok(s),
            _ => Err(format!("invalid {name}")),
        }
    }

    pub(crate) fn opt_text(&self, key: u64, name: &str) -> Result<Option<&'a str>, String> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Text(s)) => Ok(Some(s)),
            Some(_) => Err(format!("invalid {name}")),
        }
    }

    pub(crate) fn bytes(&self, key: u64, name: &str) -> Result<&'a [u8], String> {
        match self.require(key, name)? {
            Value::Bytes(b) => Ok(b),
            _ => Err(format!("invalid {name}")),
        }
    }

    pub(crate) fn bytes32(&self, key: u64, name: &str) -> Result<[u8; 32], String> {
        self.bytes(key, name)?
            .try_into()
            .map_err(|_| format!("{name} must be 32 bytes"))
    }

    pub(crate) fn opt_bytes32(&self, key: u64, name: &str) -> Result<Option<[u8; 32]>, String> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bytes(b)) => b
                .as_slice()
                .try_into()
                .map(Some)
                .map_err(|_| format!("{name} must be 32 bytes")),
            Some(_) => Err(format!("invalid {name}")),
        }
    }

    pub(crate) fn array(&self, key: u64, name: &str) -> Result<&'a [Value], String> {
        match self.require(key, name)? {
            Value::Array(items) => Ok(items),
            _ => Err(format!("invalid {name}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_use_smallest_encoding() {
        assert_eq!(encode(&uint(23)).unwrap(), vec![0x17]);
        assert_eq!(encode(&uint(24)).unwrap(), vec![0x18, 24]);
        assert_eq!(encode(&uint(256)).unwrap(), vec![0x19, 0x01, 0x00]);
        assert_eq!(encode(&int(-1)).unwrap(), vec![0x20]);
        assert_eq!(encode(&int(-25)).unwrap(), vec![0x38, 24]);
    }

    #[test]
    fn map_keys_are_sorted() {
        let unsorted = Value::Map(vec![(uint(10), uint(1)), (uint(2), uint(2))]);
        let sorted = Value::Map(vec![(uint(2), uint(2)), (uint(10), uint(1))]);
        assert_eq!(encode(&unsorted).unwrap(), encode(&sorted).unwrap());
    }

    #[test]
    fn duplicate_keys_rejected() {
        let dup = Value::Map(vec![(uint(1), uint(1)), (uint(1), uint(2))]);
        assert_eq!(encode(&dup), Err(CanonicalError::DuplicateKey));
    }

    #[test]
    fn floats_are_errors_not_panics() {
        assert_eq!(
            encode(&Value::Float(1.5)),
            Err(CanonicalError::Unsupported("float"))
        );
    }

    #[test]
    fn decode_roundtrip() {
        let value = int_map(vec![
            (0, uint(1)),
            (1, bytes(&[0xaa; 32])),
            (2, text("rx.dispensation")),
            (3, Value::Null),
            (4, Value::Array(vec![int(-5), Value::Bool(true)])),
        ]);
        let encoded = encode(&value).unwrap();
        assert_eq!(decode(&encoded).unwrap(), value);
    }

    #[test]
    fn decode_rejects_non_minimal_integer() {
        // 5 encoded with a one-byte argument instead of inline.
        assert_eq!(decode(&[0x18, 0x05]), Err(CanonicalError::NonCanonical));
    }

    #[test]
    fn decode_rejects_unsorted_map() {
        // {2: 0, 1: 0}
        assert_eq!(
            decode(&[0xa2, 0x02, 0x00, 0x01, 0x00]),
            Err(CanonicalError::NonCanonical)
        );
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        assert_eq!(decode(&[0x01, 0x02]), Err(CanonicalError::TrailingBytes));
    }

    #[test]
    fn decode_rejects_indefinite_length() {
        // [_ 1]
        assert_eq!(
            decode(&[0x9f, 0x01, 0xff]),
            Err(CanonicalError::NonCanonical)
        );
    }

    #[test]
    fn map_reader_lookups() {
        let value = int_map(vec![
            (0, uint(7)),
            (1, int(-3)),
            (2, Value::Null),
            (3, bytes(&[1; 32])),
        ]);
        let reader = MapReader::new(&value).unwrap();
        assert_eq!(reader.u64(0, "a").unwrap(), 7);
        assert_eq!(reader.i64(1, "b").unwrap(), -3);
        assert_eq!(reader.opt_i64(2, "c").unwrap(), None);
        assert_eq!(reader.bytes32(3, "d").unwrap(), [1; 32]);
        assert!(reader.u64(1, "b").is_err());
        assert!(reader.only_keys(&[0, 1, 2]).is_err());
        assert!(reader.only_keys(&[0, 1, 2, 3]).is_ok());
    }
}
