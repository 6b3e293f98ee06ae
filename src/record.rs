//! Record payload shapes (§3 "Record") shared by the write and read engines.
//!
//! A `Value` is one field's worth of data in an object record; a `Record` is
//! the whole per-ordinal payload for whichever of the four schema shapes a
//! type has.

use crate::bitset::Ordinal;
use crate::schema::FieldType;

/// A single object-field value. `Reference(None)` is the null reference
/// (§3: "-1 for null").
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Boolean.
    Bool(bool),
    /// 32-bit signed integer.
    Int(i32),
    /// 64-bit signed integer.
    Long(i64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// UTF-8 string.
    String(String),
    /// Opaque bytes.
    Bytes(Vec<u8>),
    /// Reference to an ordinal in another type, or null.
    Reference(Option<Ordinal>),
}

impl Value {
    /// Whether this value matches `field_type`'s shape.
    pub fn matches_type(&self, field_type: &FieldType) -> bool {
        matches!(
            (self, field_type),
            (Value::Bool(_), FieldType::Bool)
                | (Value::Int(_), FieldType::Int)
                | (Value::Long(_), FieldType::Long)
                | (Value::Float(_), FieldType::Float)
                | (Value::Double(_), FieldType::Double)
                | (Value::String(_), FieldType::String)
                | (Value::Bytes(_), FieldType::Bytes)
                | (Value::Reference(_), FieldType::Reference(_))
        )
    }

    /// Append a canonical byte-level encoding, used for content hashing and
    /// primary-key projection. Deterministic and order-sensitive.
    pub fn encode_canonical(&self, out: &mut Vec<u8>) {
        match self {
            Value::Bool(b) => out.push(*b as u8),
            Value::Int(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::Long(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::Float(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::Double(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::String(s) => {
                crate::varint::encode_uvarint(s.len() as u64, out);
                out.extend_from_slice(s.as_bytes());
            }
            Value::Bytes(b) => {
                crate::varint::encode_uvarint(b.len() as u64, out);
                out.extend_from_slice(b);
            }
            Value::Reference(ord) => match ord {
                Some(o) => out.extend_from_slice(&(*o as i64).to_le_bytes()),
                None => out.extend_from_slice(&(-1i64).to_le_bytes()),
            },
        }
    }

    /// Parse a scalar value out of free-form query text, per the field's
    /// native type (§4.H: "parse the text into the field's native type").
    /// References can't be parsed from text and always fail.
    pub fn parse_text(field_type: &FieldType, text: &str) -> Option<Value> {
        match field_type {
            FieldType::Bool => text.parse::<bool>().ok().map(Value::Bool),
            FieldType::Int => text.parse::<i32>().ok().map(Value::Int),
            FieldType::Long => text.parse::<i64>().ok().map(Value::Long),
            FieldType::Float => text.parse::<f32>().ok().map(Value::Float),
            FieldType::Double => text.parse::<f64>().ok().map(Value::Double),
            FieldType::String => Some(Value::String(text.to_string())),
            FieldType::Bytes => None,
            FieldType::Reference(_) => None,
        }
    }
}

/// The payload at one ordinal, shaped by the owning type's schema variant.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// Object record: one value per field, in schema field order.
    Object(Vec<Value>),
    /// List record: ordered element ordinals.
    List(Vec<Ordinal>),
    /// Set record: element ordinals (placement in the hashed slot happens in the read state).
    Set(Vec<Ordinal>),
    /// Map record: key/value ordinal pairs.
    Map(Vec<(Ordinal, Ordinal)>),
}

impl Record {
    /// Canonical byte-level payload, used as the FNV content-hash input for
    /// primary-key-less dedup (§4.B) and as the round-trip comparison basis
    /// for the integrity check (§4.F).
    pub fn content_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Record::Object(values) => {
                for v in values {
                    v.encode_canonical(&mut out);
                }
            }
            Record::List(elements) => {
                for e in elements {
                    out.extend_from_slice(&e.to_le_bytes());
                }
            }
            Record::Set(elements) => {
                let mut sorted = elements.clone();
                sorted.sort_unstable();
                for e in sorted {
                    out.extend_from_slice(&e.to_le_bytes());
                }
            }
            Record::Map(pairs) => {
                let mut sorted = pairs.clone();
                sorted.sort_unstable();
                for (k, v) in sorted {
                    out.extend_from_slice(&k.to_le_bytes());
                    out.extend_from_slice(&v.to_le_bytes());
                }
            }
        }
        out
    }

    /// Project the dotted primary-key field paths out of an object record
    /// into canonical bytes used as the identity key.
    pub fn project_key(&self, field_indices: &[usize]) -> Option<Vec<u8>> {
        let Record::Object(values) = self else { return None };
        let mut out = Vec::new();
        for &idx in field_indices {
            values.get(idx)?.encode_canonical(&mut out);
        }
        Some(out)
    }
}
