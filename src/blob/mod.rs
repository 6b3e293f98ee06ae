//! Blob writer/reader (§4.E, §6): framing, header, and typed sections of
//! the stable, versioned blob wire format.
//!
//! `<magic:4 bytes = "HOLW"><formatVersion:uvarint><schemaHeader><typedSection*>`
//!
//! Per-type sections carry the type name, kind, the populated-ordinals
//! delta bitset, and the field payloads for added/changed ordinals. Field
//! payloads are framed with a presence byte per value rather than
//! replicating the read state's in-memory bit-packing verbatim — the wire
//! format only has to be stable and self-describing, not byte-identical to
//! the packed columns (see DESIGN.md).

use crate::bitset::{Ordinal, OrdinalSet};
use crate::delta::{DeltaSet, TypeDelta};
use crate::error::BlobError;
use crate::record::{Record, Value};
use crate::schema::{FieldType, Schema, SchemaSet};
use crate::varint::{decode_uvarint, encode_uvarint};
use bytes::Bytes;

const MAGIC: &[u8; 4] = b"HOLW";
const FORMAT_VERSION: u64 = 1;

/// Which of the three blob kinds a typed section belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKind {
    /// Full populated set and field payloads for every type.
    Snapshot,
    /// `R_prev -> R_new`.
    Delta,
    /// `R_new -> R_prev`.
    ReverseDelta,
}

impl BlobKind {
    fn tag(self) -> u8 {
        match self {
            BlobKind::Snapshot => 0x10,
            BlobKind::Delta => 0x11,
            BlobKind::ReverseDelta => 0x12,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x10 => Some(BlobKind::Snapshot),
            0x11 => Some(BlobKind::Delta),
            0x12 => Some(BlobKind::ReverseDelta),
            _ => None,
        }
    }
}

/// An in-memory blob: everything needed to frame one of the three kinds for
/// a given [`DeltaSet`].
#[derive(Debug, Clone)]
pub struct Blob {
    /// Which kind of blob this is.
    pub kind: BlobKind,
    /// The version this blob was produced for.
    pub version: u64,
    bytes: Bytes,
}

impl Blob {
    /// Raw framed bytes, ready to hand to a publisher. Cheaply cloneable
    /// (refcounted), so a publisher and a retained local copy can share the
    /// same backing allocation.
    pub fn bytes(&self) -> Bytes {
        self.bytes.clone()
    }
}

/// Frame `delta` as a blob of `kind` against `schema_set` (§4.E). `version`
/// is carried alongside the blob as producer-side provenance (handed to the
/// publisher/announcer) — it is not part of the bit-exact wire grammar in
/// §6, which an external `BlobRetriever` already indexes by version.
pub fn write_blob(kind: BlobKind, version: u64, schema_set: &SchemaSet, delta: &DeltaSet) -> Blob {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    encode_uvarint(FORMAT_VERSION, &mut out);
    schema_set.write_to(&mut out);

    let type_names: Vec<&str> = schema_set.names().collect();
    encode_uvarint(type_names.len() as u64, &mut out);
    for name in type_names {
        let schema = schema_set.get(name).expect("schema set is self-consistent");
        let empty = TypeDelta::default();
        let type_delta = delta.types.get(name).unwrap_or(&empty);
        write_type_section(kind, schema, type_delta, &mut out);
    }
    Blob { kind, version, bytes: Bytes::from(out) }
}

fn write_type_section(kind: BlobKind, schema: &Schema, delta: &TypeDelta, out: &mut Vec<u8>) {
    out.push(kind.tag());
    crate::varint::encode_utf(schema.name(), out);
    delta.removed.encode(out);
    encode_uvarint(delta.added.len() as u64, out);
    for (ordinal, record) in &delta.added {
        encode_uvarint(*ordinal as u64, out);
        encode_record(schema, record, out);
    }
}

/// Parse a blob previously produced by [`write_blob`], validating it against
/// `expected_schema`. Returns the blob's kind and the [`DeltaSet`] it carries.
pub fn read_blob(bytes: &[u8], expected_schema: &SchemaSet) -> Result<(BlobKind, DeltaSet), BlobError> {
    if bytes.len() < 4 || &bytes[0..4] != MAGIC {
        return Err(BlobError::BadMagic);
    }
    let mut off = 4;
    let (format_version, n) = decode_uvarint(&bytes[off..]).ok_or(BlobError::TruncatedBlob)?;
    off += n;
    if format_version != FORMAT_VERSION {
        return Err(BlobError::UnknownFormatVersion(format_version as u32));
    }
    let (schema_set, n) = SchemaSet::load_from(&bytes[off..])
        .map_err(|_| BlobError::SchemaMismatch("embedded schema header failed to parse".to_string()))?;
    off += n;
    for name in expected_schema.names() {
        if schema_set.get(name).map(|s| s.name()) != Some(name) {
            return Err(BlobError::SchemaMismatch(format!("blob is missing type {name}")));
        }
    }
    let (section_count, n) = decode_uvarint(&bytes[off..]).ok_or(BlobError::TruncatedBlob)?;
    off += n;

    let mut kind = None;
    let mut types = std::collections::HashMap::new();
    for _ in 0..section_count {
        let tag = *bytes.get(off).ok_or(BlobError::TruncatedBlob)?;
        let section_kind = BlobKind::from_tag(tag).ok_or(BlobError::TruncatedBlob)?;
        kind = Some(kind.unwrap_or(section_kind));
        off += 1;
        let (type_name, n) = crate::varint::decode_utf(&bytes[off..]).ok_or(BlobError::TruncatedBlob)?;
        off += n;
        let schema = expected_schema
            .get(&type_name)
            .ok_or_else(|| BlobError::SchemaMismatch(format!("unknown type in blob: {type_name}")))?;
        let (removed, n) = OrdinalSet::decode(&bytes[off..]).ok_or(BlobError::TruncatedBlob)?;
        off += n;
        let (added_count, n) = decode_uvarint(&bytes[off..]).ok_or(BlobError::TruncatedBlob)?;
        off += n;
        let mut added = Vec::with_capacity(added_count as usize);
        for _ in 0..added_count {
            let (ordinal, n) = decode_uvarint(&bytes[off..]).ok_or(BlobError::TruncatedBlob)?;
            off += n;
            let (record, n) = decode_record(schema, &bytes[off..])?;
            off += n;
            added.push((ordinal as Ordinal, record));
        }
        types.insert(type_name, TypeDelta { removed, added });
    }
    let kind = kind.ok_or(BlobError::TruncatedBlob)?;
    Ok((kind, DeltaSet { types }))
}

fn encode_record(schema: &Schema, record: &Record, out: &mut Vec<u8>) {
    match (schema, record) {
        (Schema::Object(obj), Record::Object(values)) => {
            for (field, value) in obj.fields.iter().zip(values.iter()) {
                encode_value(&field.field_type, value, out);
            }
        }
        (Schema::List(_), Record::List(elements)) | (Schema::Set(_), Record::Set(elements)) => {
            encode_uvarint(elements.len() as u64, out);
            for e in elements {
                encode_uvarint(*e as u64, out);
            }
        }
        (Schema::Map(_), Record::Map(pairs)) => {
            encode_uvarint(pairs.len() as u64, out);
            for (k, v) in pairs {
                encode_uvarint(*k as u64, out);
                encode_uvarint(*v as u64, out);
            }
        }
        _ => unreachable!("record shape must match its schema variant"),
    }
}

fn decode_record(schema: &Schema, bytes: &[u8]) -> Result<(Record, usize), BlobError> {
    let mut off = 0;
    let record = match schema {
        Schema::Object(obj) => {
            let mut values = Vec::with_capacity(obj.fields.len());
            for field in &obj.fields {
                let (value, n) = decode_value(&field.field_type, &bytes[off..])?;
                off += n;
                values.push(value);
            }
            Record::Object(values)
        }
        Schema::List(_) => {
            let (count, n) = decode_uvarint(&bytes[off..]).ok_or(BlobError::TruncatedBlob)?;
            off += n;
            let mut elements = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let (e, n) = decode_uvarint(&bytes[off..]).ok_or(BlobError::TruncatedBlob)?;
                off += n;
                elements.push(e as Ordinal);
            }
            Record::List(elements)
        }
        Schema::Set(_) => {
            let (count, n) = decode_uvarint(&bytes[off..]).ok_or(BlobError::TruncatedBlob)?;
            off += n;
            let mut elements = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let (e, n) = decode_uvarint(&bytes[off..]).ok_or(BlobError::TruncatedBlob)?;
                off += n;
                elements.push(e as Ordinal);
            }
            Record::Set(elements)
        }
        Schema::Map(_) => {
            let (count, n) = decode_uvarint(&bytes[off..]).ok_or(BlobError::TruncatedBlob)?;
            off += n;
            let mut pairs = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let (k, n) = decode_uvarint(&bytes[off..]).ok_or(BlobError::TruncatedBlob)?;
                off += n;
                let (v, n) = decode_uvarint(&bytes[off..]).ok_or(BlobError::TruncatedBlob)?;
                off += n;
                pairs.push((k as Ordinal, v as Ordinal));
            }
            Record::Map(pairs)
        }
    };
    Ok((record, off))
}

fn encode_value(field_type: &FieldType, value: &Value, out: &mut Vec<u8>) {
    match (field_type, value) {
        (FieldType::Bool, Value::Bool(b)) => out.push(*b as u8),
        (FieldType::Int, Value::Int(v)) => encode_uvarint(zigzag(*v as i64), out),
        (FieldType::Long, Value::Long(v)) => encode_uvarint(zigzag(*v), out),
        (FieldType::Float, Value::Float(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (FieldType::Double, Value::Double(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (FieldType::String, Value::String(s)) => crate::varint::encode_utf(s, out),
        (FieldType::Bytes, Value::Bytes(b)) => {
            encode_uvarint(b.len() as u64, out);
            out.extend_from_slice(b);
        }
        (FieldType::Reference(_), Value::Reference(r)) => match r {
            Some(o) => {
                out.push(1);
                encode_uvarint(*o as u64, out);
            }
            None => out.push(0),
        },
        _ => unreachable!("value shape must match its declared field type"),
    }
}

fn decode_value(field_type: &FieldType, bytes: &[u8]) -> Result<(Value, usize), BlobError> {
    match field_type {
        FieldType::Bool => {
            let b = *bytes.first().ok_or(BlobError::TruncatedBlob)?;
            Ok((Value::Bool(b != 0), 1))
        }
        FieldType::Int => {
            let (v, n) = decode_uvarint(bytes).ok_or(BlobError::TruncatedBlob)?;
            Ok((Value::Int(unzigzag(v) as i32), n))
        }
        FieldType::Long => {
            let (v, n) = decode_uvarint(bytes).ok_or(BlobError::TruncatedBlob)?;
            Ok((Value::Long(unzigzag(v)), n))
        }
        FieldType::Float => {
            let arr: [u8; 4] = bytes.get(0..4).ok_or(BlobError::TruncatedBlob)?.try_into().unwrap();
            Ok((Value::Float(f32::from_le_bytes(arr)), 4))
        }
        FieldType::Double => {
            let arr: [u8; 8] = bytes.get(0..8).ok_or(BlobError::TruncatedBlob)?.try_into().unwrap();
            Ok((Value::Double(f64::from_le_bytes(arr)), 8))
        }
        FieldType::String => {
            let (s, n) = crate::varint::decode_utf(bytes).ok_or(BlobError::TruncatedBlob)?;
            Ok((Value::String(s), n))
        }
        FieldType::Bytes => {
            let (len, prefix) = decode_uvarint(bytes).ok_or(BlobError::TruncatedBlob)?;
            let end = prefix + len as usize;
            let b = bytes.get(prefix..end).ok_or(BlobError::TruncatedBlob)?.to_vec();
            Ok((Value::Bytes(b), end))
        }
        FieldType::Reference(_) => {
            let present = *bytes.first().ok_or(BlobError::TruncatedBlob)?;
            if present == 0 {
                Ok((Value::Reference(None), 1))
            } else {
                let (o, n) = decode_uvarint(&bytes[1..]).ok_or(BlobError::TruncatedBlob)?;
                Ok((Value::Reference(Some(o as Ordinal)), 1 + n))
            }
        }
    }
}

fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn unzigzag(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, ObjectSchema};
    use crate::write::WriteStateEngine;
    use std::sync::Arc;

    fn schema_set() -> Arc<SchemaSet> {
        Arc::new(
            SchemaSet::new(vec![Schema::Object(ObjectSchema {
                name: "Movie".to_string(),
                fields: vec![
                    Field { name: "id".to_string(), field_type: FieldType::Int },
                    Field { name: "title".to_string(), field_type: FieldType::String },
                ],
                primary_key: Some(vec!["id".to_string()]),
            })])
            .unwrap(),
        )
    }

    #[test]
    fn snapshot_blob_round_trips() {
        let schemas = schema_set();
        let mut write = WriteStateEngine::new(schemas.clone());
        write
            .add("Movie", Record::Object(vec![Value::Int(1), Value::String("A".into())]))
            .unwrap();
        write
            .add("Movie", Record::Object(vec![Value::Int(-7), Value::String("B".into())]))
            .unwrap();
        let snapshot = crate::delta::compute_snapshot(&write);
        let blob = write_blob(BlobKind::Snapshot, 42, &schemas, &snapshot);
        assert_eq!(blob.version, 42);
        let (kind, decoded) = read_blob(&blob.bytes(), &schemas).unwrap();
        assert_eq!(kind, BlobKind::Snapshot);
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let schemas = schema_set();
        let err = read_blob(b"NOPE", &schemas).unwrap_err();
        assert_eq!(err, BlobError::BadMagic);
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let schemas = schema_set();
        let write = WriteStateEngine::new(schemas.clone());
        let snapshot = crate::delta::compute_snapshot(&write);
        let blob = write_blob(BlobKind::Snapshot, 1, &schemas, &snapshot);
        let bytes = blob.bytes();
        let truncated = &bytes[..bytes.len() - 1];
        assert!(read_blob(truncated, &schemas).is_err());
    }
}
