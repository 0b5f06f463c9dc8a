//! Composite key encoding and ordering

use std::cmp::Ordering;
use std::fmt;

use serde::Serialize;

use super::error::{BPlusTreeError, BPlusTreeResult};
use crate::record::RecordId;

/// Type of one key attribute. Every attribute has a fixed on-disk length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AttrType {
    /// Signed 4-byte integer
    Int,
    /// 4-byte IEEE float
    Float,
    /// Fixed-length byte string, zero padded
    Char(usize),
}

impl AttrType {
    pub fn len(&self) -> usize {
        match self {
            AttrType::Int | AttrType::Float => 4,
            AttrType::Char(len) => *len,
        }
    }

    /// Type code stored in the index header
    pub fn code(&self) -> u32 {
        match self {
            AttrType::Int => 0,
            AttrType::Float => 1,
            AttrType::Char(_) => 2,
        }
    }

    pub fn from_code(code: u32, len: usize) -> BPlusTreeResult<Self> {
        let attr = match code {
            0 => AttrType::Int,
            1 => AttrType::Float,
            2 => AttrType::Char(len),
            _ => {
                return Err(BPlusTreeError::CorruptedHeader(format!(
                    "unknown attribute type code {code}"
                )));
            }
        };
        if attr.len() != len {
            return Err(BPlusTreeError::CorruptedHeader(format!(
                "attribute type {code} stored with length {len}"
            )));
        }
        Ok(attr)
    }
}

impl fmt::Display for AttrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrType::Int => write!(f, "INT"),
            AttrType::Float => write!(f, "FLOAT"),
            AttrType::Char(len) => write!(f, "CHAR({len})"),
        }
    }
}

/// A decoded attribute value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum KeyValue {
    Int(i32),
    Float(f32),
    Str(String),
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Int(v) => write!(f, "{v}"),
            KeyValue::Float(v) => write!(f, "{v}"),
            KeyValue::Str(v) => write!(f, "'{v}'"),
        }
    }
}

/// Ordered list of key attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeySchema {
    attrs: Vec<AttrType>,
    key_len: usize,
}

impl KeySchema {
    pub fn new(attrs: Vec<AttrType>) -> BPlusTreeResult<Self> {
        if attrs.is_empty() {
            return Err(BPlusTreeError::InvalidKeySchema(
                "at least one attribute is required".to_string(),
            ));
        }
        if let Some(attr) = attrs.iter().find(|attr| attr.len() == 0) {
            return Err(BPlusTreeError::InvalidKeySchema(format!(
                "zero-length attribute {attr}"
            )));
        }

        let key_len = attrs.iter().map(AttrType::len).sum();
        Ok(Self { attrs, key_len })
    }

    pub fn attrs(&self) -> &[AttrType] {
        &self.attrs
    }

    /// Combined byte length of an encoded key
    pub fn key_len(&self) -> usize {
        self.key_len
    }

    /// Encode one value per attribute into a key buffer
    pub fn encode(&self, values: &[KeyValue]) -> BPlusTreeResult<Vec<u8>> {
        if values.len() != self.attrs.len() {
            return Err(BPlusTreeError::KeyValueMismatch(format!(
                "expected {} values, got {}",
                self.attrs.len(),
                values.len()
            )));
        }

        let mut key = Vec::with_capacity(self.key_len);
        for (attr, value) in self.attrs.iter().zip(values) {
            match (attr, value) {
                (AttrType::Int, KeyValue::Int(v)) => key.extend_from_slice(&v.to_le_bytes()),
                (AttrType::Float, KeyValue::Float(v)) => key.extend_from_slice(&v.to_le_bytes()),
                (AttrType::Char(len), KeyValue::Str(s)) => {
                    if s.len() > *len {
                        return Err(BPlusTreeError::KeyValueMismatch(format!(
                            "string of {} bytes does not fit {attr}",
                            s.len()
                        )));
                    }
                    key.extend_from_slice(s.as_bytes());
                    key.resize(key.len() + *len - s.len(), 0);
                }
                _ => {
                    return Err(BPlusTreeError::KeyValueMismatch(format!(
                        "{value} is not a valid {attr}"
                    )));
                }
            }
        }
        Ok(key)
    }

    pub fn decode(&self, key: &[u8]) -> BPlusTreeResult<Vec<KeyValue>> {
        self.check_len(key)?;

        let mut offset = 0;
        let mut values = Vec::with_capacity(self.attrs.len());
        for attr in &self.attrs {
            let bytes = &key[offset..offset + attr.len()];
            values.push(match attr {
                AttrType::Int => KeyValue::Int(i32::from_le_bytes(word(bytes))),
                AttrType::Float => KeyValue::Float(f32::from_le_bytes(word(bytes))),
                AttrType::Char(_) => {
                    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                    KeyValue::Str(String::from_utf8_lossy(&bytes[..end]).into_owned())
                }
            });
            offset += attr.len();
        }
        Ok(values)
    }

    pub fn check_len(&self, key: &[u8]) -> BPlusTreeResult<()> {
        if key.len() != self.key_len {
            return Err(BPlusTreeError::KeyLength {
                expected: self.key_len,
                actual: key.len(),
            });
        }
        Ok(())
    }

    /// Compare two encoded keys attribute by attribute in declared order.
    ///
    /// Floats that are not comparable (NaN) count as equal on that attribute.
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        let mut offset = 0;
        for attr in &self.attrs {
            let end = offset + attr.len();
            let (x, y) = (&a[offset..end], &b[offset..end]);
            let ord = match attr {
                AttrType::Int => i32::from_le_bytes(word(x)).cmp(&i32::from_le_bytes(word(y))),
                AttrType::Float => f32::from_le_bytes(word(x))
                    .partial_cmp(&f32::from_le_bytes(word(y)))
                    .unwrap_or(Ordering::Equal),
                AttrType::Char(_) => x.cmp(y),
            };
            if ord != Ordering::Equal {
                return ord;
            }
            offset = end;
        }
        Ordering::Equal
    }

    pub fn keys_equal(&self, a: &[u8], b: &[u8]) -> bool {
        self.compare(a, b) == Ordering::Equal
    }
}

fn word(bytes: &[u8]) -> [u8; 4] {
    [bytes[0], bytes[1], bytes[2], bytes[3]]
}

/// RID side of an ordering probe.
///
/// `Min` sorts below and `Max` above every real record id, so a probe with a
/// sentinel lands before or after all entries sharing its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RidBound {
    Min,
    Exact(RecordId),
    Max,
}
