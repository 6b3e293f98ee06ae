//! Schema model (§4.A): typed description of record shapes and their
//! key/element relations, plus the binary serialisation of the schema
//! header that sits at the front of every blob.
//!
//! Grounded on `types::schemas::ImmutableSchema` for the overall shape of a
//! schema-set-as-registry, generalised from the teacher's single ad hoc
//! object schema to the four record shapes spec.md's data model calls for.

use crate::error::SchemaError;
use crate::varint::{decode_utf, decode_uvarint, encode_utf, encode_uvarint};
use std::collections::HashMap;

/// Scalar/reference field types an object schema field may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// Boolean.
    Bool,
    /// 32-bit signed integer.
    Int,
    /// 64-bit signed integer.
    Long,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// UTF-8 string.
    String,
    /// Opaque byte string.
    Bytes,
    /// Reference to another schema by name.
    Reference(String),
}

impl FieldType {
    fn tag(&self) -> u8 {
        match self {
            FieldType::Bool => 0,
            FieldType::Int => 1,
            FieldType::Long => 2,
            FieldType::Float => 3,
            FieldType::Double => 4,
            FieldType::String => 5,
            FieldType::Bytes => 6,
            FieldType::Reference(_) => 7,
        }
    }

    /// Whether this field type holds a fixed-width numeric payload (bit-packed in
    /// the read state) as opposed to a variable-length or reference payload.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            FieldType::Bool | FieldType::Int | FieldType::Long | FieldType::Float | FieldType::Double
        )
    }

    /// Whether this field type is a REFERENCE and, if so, its target schema name.
    pub fn reference_target(&self) -> Option<&str> {
        match self {
            FieldType::Reference(name) => Some(name.as_str()),
            _ => None,
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.tag());
        if let FieldType::Reference(name) = self {
            encode_utf(name, out);
        }
    }

    fn decode(bytes: &[u8]) -> Result<(Self, usize), SchemaError> {
        let tag = *bytes.first().ok_or(SchemaError::Truncated)?;
        let ft = match tag {
            0 => (FieldType::Bool, 1),
            1 => (FieldType::Int, 1),
            2 => (FieldType::Long, 1),
            3 => (FieldType::Float, 1),
            4 => (FieldType::Double, 1),
            5 => (FieldType::String, 1),
            6 => (FieldType::Bytes, 1),
            7 => {
                let (name, consumed) = decode_utf(&bytes[1..]).ok_or(SchemaError::Truncated)?;
                (FieldType::Reference(name), 1 + consumed)
            }
            other => return Err(SchemaError::UnknownTag(other)),
        };
        Ok(ft)
    }
}

/// One (name, type) pair in an object schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Field name.
    pub name: String,
    /// Field type.
    pub field_type: FieldType,
}

/// A dotted field path, e.g. `address.zip`, used for primary/hash keys.
pub type FieldPath = String;

/// Sentinel key meaning "hash on the element/key ordinal itself" rather than
/// on a projected field path. Serialised as field-count zero (§3, §4.A).
pub const ORDINAL_HASH_KEY: &[FieldPath] = &[];

/// Object schema: ordered fields, optional primary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSchema {
    /// Schema name, unique within the set.
    pub name: String,
    /// Ordered field list.
    pub fields: Vec<Field>,
    /// Ordered dotted field paths used for identity-based dedup, if any.
    pub primary_key: Option<Vec<FieldPath>>,
}

impl ObjectSchema {
    /// Index of a field by name, if present.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// List schema: ordered sequence of references to `element`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListSchema {
    /// Schema name.
    pub name: String,
    /// Name of the element schema.
    pub element: String,
}

/// Set schema: unordered collection of references to `element`, placed in a
/// hashed slot by `hash_key` (or by element ordinal if `None`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetSchema {
    /// Schema name.
    pub name: String,
    /// Name of the element schema.
    pub element: String,
    /// Dotted field paths into the element type, or `None` for the ordinal sentinel.
    pub hash_key: Option<Vec<FieldPath>>,
}

/// Map schema: key/value reference pair, hashed by `hash_key` into the key type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapSchema {
    /// Schema name.
    pub name: String,
    /// Name of the key schema.
    pub key: String,
    /// Name of the value schema.
    pub value: String,
    /// Dotted field paths into the key type, or `None` for the ordinal sentinel.
    pub hash_key: Option<Vec<FieldPath>>,
}

/// One of the four schema variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schema {
    /// Object record.
    Object(ObjectSchema),
    /// List record.
    List(ListSchema),
    /// Set record.
    Set(SetSchema),
    /// Map record.
    Map(MapSchema),
}

impl Schema {
    /// The schema's name, regardless of variant.
    pub fn name(&self) -> &str {
        match self {
            Schema::Object(s) => &s.name,
            Schema::List(s) => &s.name,
            Schema::Set(s) => &s.name,
            Schema::Map(s) => &s.name,
        }
    }

    fn base_tag(&self) -> u8 {
        match self {
            Schema::Object(_) => 0x00,
            Schema::List(_) => 0x01,
            Schema::Set(_) => 0x02,
            Schema::Map(_) => 0x03,
        }
    }

    fn has_key(&self) -> bool {
        match self {
            Schema::Object(s) => s.primary_key.is_some(),
            Schema::List(_) => false,
            Schema::Set(s) => s.hash_key.is_some(),
            Schema::Map(s) => s.hash_key.is_some(),
        }
    }

    /// Serialise this schema's header into `out` (§4.A, §6 schema header format).
    pub fn write_to(&self, out: &mut Vec<u8>) {
        let tag = self.base_tag() | if self.has_key() { 0x80 } else { 0x00 };
        out.push(tag);
        encode_utf(self.name(), out);
        match self {
            Schema::Object(s) => {
                encode_uvarint(s.fields.len() as u64, out);
                for f in &s.fields {
                    encode_utf(&f.name, out);
                    f.field_type.encode(out);
                }
                if let Some(key) = &s.primary_key {
                    write_key(key, out);
                }
            }
            Schema::List(s) => {
                encode_utf(&s.element, out);
            }
            Schema::Set(s) => {
                encode_utf(&s.element, out);
                if let Some(key) = &s.hash_key {
                    write_key(key, out);
                }
            }
            Schema::Map(s) => {
                encode_utf(&s.key, out);
                encode_utf(&s.value, out);
                if let Some(key) = &s.hash_key {
                    write_key(key, out);
                }
            }
        }
    }

    /// Parse one schema header, returning the schema and bytes consumed.
    pub fn read_from(bytes: &[u8]) -> Result<(Self, usize), SchemaError> {
        let tag = *bytes.first().ok_or(SchemaError::Truncated)?;
        let has_key = tag & 0x80 != 0;
        let base = tag & 0x7f;
        let mut off = 1;
        let (name, n) = decode_utf(&bytes[off..]).ok_or(SchemaError::Truncated)?;
        off += n;
        let schema = match base {
            0x00 => {
                let (count, n) = decode_uvarint(&bytes[off..]).ok_or(SchemaError::Truncated)?;
                off += n;
                let mut fields = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let (fname, n) = decode_utf(&bytes[off..]).ok_or(SchemaError::Truncated)?;
                    off += n;
                    let (ftype, n) = FieldType::decode(&bytes[off..])?;
                    off += n;
                    fields.push(Field { name: fname, field_type: ftype });
                }
                let (key, n) = read_key(has_key, &bytes[off..])?;
                off += n;
                Schema::Object(ObjectSchema { name, fields, primary_key: key })
            }
            0x01 => {
                let (element, n) = decode_utf(&bytes[off..]).ok_or(SchemaError::Truncated)?;
                off += n;
                Schema::List(ListSchema { name, element })
            }
            0x02 => {
                let (element, n) = decode_utf(&bytes[off..]).ok_or(SchemaError::Truncated)?;
                off += n;
                let (key, n) = read_key(has_key, &bytes[off..])?;
                off += n;
                Schema::Set(SetSchema { name, element, hash_key: key })
            }
            0x03 => {
                let (key_name, n) = decode_utf(&bytes[off..]).ok_or(SchemaError::Truncated)?;
                off += n;
                let (value_name, n) = decode_utf(&bytes[off..]).ok_or(SchemaError::Truncated)?;
                off += n;
                let (key, n) = read_key(has_key, &bytes[off..])?;
                off += n;
                Schema::Map(MapSchema { name, key: key_name, value: value_name, hash_key: key })
            }
            other => return Err(SchemaError::UnknownTag(other)),
        };
        Ok((schema, off))
    }

    /// Render a human-readable textual form (`textual(schema)`), mainly for logs/debug.
    pub fn textual(&self) -> String {
        match self {
            Schema::Object(s) => {
                let fields: Vec<String> = s
                    .fields
                    .iter()
                    .map(|f| format!("{} {:?}", f.name, f.field_type))
                    .collect();
                format!("Object {} {{ {} }}", s.name, fields.join("; "))
            }
            Schema::List(s) => format!("List {} {{ {} }}", s.name, s.element),
            Schema::Set(s) => format!("Set {} {{ {} }}", s.name, s.element),
            Schema::Map(s) => format!("Map {} {{ {} -> {} }}", s.name, s.key, s.value),
        }
    }
}

fn write_key(paths: &[FieldPath], out: &mut Vec<u8>) {
    encode_uvarint(paths.len() as u64, out);
    for p in paths {
        encode_utf(p, out);
    }
}

/// Read a key payload. `has_key` gates whether the variant carries a key at
/// all; when it does, `fieldCount=0` still denotes the ordinal-hash-key
/// sentinel rather than "empty key", per §3/§6.
fn read_key(has_key: bool, bytes: &[u8]) -> Result<(Option<Vec<FieldPath>>, usize), SchemaError> {
    if !has_key {
        return Ok((None, 0));
    }
    let (count, mut off) = decode_uvarint(bytes).ok_or(SchemaError::Truncated)?;
    if count == 0 {
        return Ok((Some(Vec::new()), off));
    }
    let mut paths = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (p, n) = decode_utf(&bytes[off..]).ok_or(SchemaError::Truncated)?;
        off += n;
        paths.push(p);
    }
    Ok((Some(paths), off))
}

/// An immutable set of schemas, created once at data-model initialisation
/// (§3: "Schemas are created at data-model initialisation and immutable
/// thereafter"). Exposes `loadFrom`/`writeTo` for the blob schema header and
/// name-indexed lookup for the rest of the engine.
#[derive(Debug, Clone)]
pub struct SchemaSet {
    by_name: HashMap<String, Schema>,
    order: Vec<String>,
}

impl SchemaSet {
    /// Build a schema set from a list of schemas, validating the cross-schema
    /// invariants from §3: unique names, resolved references, valid key paths.
    pub fn new(schemas: Vec<Schema>) -> Result<Self, SchemaError> {
        let mut by_name = HashMap::with_capacity(schemas.len());
        let mut order = Vec::with_capacity(schemas.len());
        for schema in schemas {
            let name = schema.name().to_string();
            if by_name.contains_key(&name) {
                return Err(SchemaError::DuplicateName(name));
            }
            order.push(name.clone());
            by_name.insert(name, schema);
        }
        let set = SchemaSet { by_name, order };
        set.validate()?;
        Ok(set)
    }

    fn validate(&self) -> Result<(), SchemaError> {
        for schema in self.by_name.values() {
            match schema {
                Schema::Object(s) => {
                    for f in &s.fields {
                        if let FieldType::Reference(target) = &f.field_type {
                            self.require(target)?;
                        }
                    }
                    if let Some(key) = &s.primary_key {
                        for path in key {
                            self.validate_key_path(s, path)?;
                        }
                    }
                }
                Schema::List(s) => self.require(&s.element)?,
                Schema::Set(s) => {
                    self.require(&s.element)?;
                    if let Some(key) = &s.hash_key {
                        if let Some(Schema::Object(element)) = self.by_name.get(&s.element) {
                            for path in key {
                                self.validate_key_path(element, path)?;
                            }
                        }
                    }
                }
                Schema::Map(s) => {
                    self.require(&s.key)?;
                    self.require(&s.value)?;
                    if let Some(key) = &s.hash_key {
                        if let Some(Schema::Object(key_schema)) = self.by_name.get(&s.key) {
                            for path in key {
                                self.validate_key_path(key_schema, path)?;
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn require(&self, name: &str) -> Result<(), SchemaError> {
        if self.by_name.contains_key(name) {
            Ok(())
        } else {
            Err(SchemaError::UnresolvedReference(name.to_string()))
        }
    }

    /// Resolve a single-segment path against an object schema, rejecting
    /// paths that land on a REFERENCE leaf (only non-reference leaves can
    /// serve as key material, per §3).
    fn validate_key_path(&self, schema: &ObjectSchema, path: &str) -> Result<(), SchemaError> {
        let mut current = schema;
        let segments: Vec<&str> = path.split('.').collect();
        for (i, seg) in segments.iter().enumerate() {
            let field = current
                .field_index(seg)
                .map(|idx| &current.fields[idx])
                .ok_or_else(|| SchemaError::InvalidKeyPath(path.to_string()))?;
            let is_last = i == segments.len() - 1;
            match &field.field_type {
                FieldType::Reference(target) if !is_last => {
                    match self.by_name.get(target) {
                        Some(Schema::Object(next)) => current = next,
                        _ => return Err(SchemaError::InvalidKeyPath(path.to_string())),
                    }
                }
                FieldType::Reference(_) if is_last => {
                    return Err(SchemaError::InvalidKeyPath(path.to_string()))
                }
                _ if !is_last => return Err(SchemaError::InvalidKeyPath(path.to_string())),
                _ => {}
            }
        }
        Ok(())
    }

    /// Look up a schema by name.
    pub fn get(&self, name: &str) -> Option<&Schema> {
        self.by_name.get(name)
    }

    /// Names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    /// All schemas in declaration order.
    pub fn schemas(&self) -> impl Iterator<Item = &Schema> {
        self.order.iter().map(move |n| &self.by_name[n])
    }

    /// `writeTo(sink, schema)`: serialise the whole set's header in order.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        encode_uvarint(self.order.len() as u64, out);
        for schema in self.schemas() {
            schema.write_to(out);
        }
    }

    /// `loadFrom(bytes) -> schemaSet`: parse a schema header previously
    /// written by [`SchemaSet::write_to`].
    pub fn load_from(bytes: &[u8]) -> Result<(Self, usize), SchemaError> {
        let (count, mut off) = decode_uvarint(bytes).ok_or(SchemaError::Truncated)?;
        let mut schemas = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (schema, n) = Schema::read_from(&bytes[off..])?;
            off += n;
            schemas.push(schema);
        }
        Ok((Self::new(schemas)?, off))
    }
}

/// `equals(a, b)`: structural equality between two schemas, independent of
/// which `SchemaSet` they came from.
pub fn equals(a: &Schema, b: &Schema) -> bool {
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movie_schema() -> Schema {
        Schema::Object(ObjectSchema {
            name: "Movie".to_string(),
            fields: vec![
                Field { name: "id".to_string(), field_type: FieldType::Int },
                Field { name: "title".to_string(), field_type: FieldType::String },
            ],
            primary_key: Some(vec!["id".to_string()]),
        })
    }

    #[test]
    fn schema_wire_round_trip() {
        // Invariant 8: parseSchema(writeSchema(s)) = s.
        let schema = movie_schema();
        let mut buf = Vec::new();
        schema.write_to(&mut buf);
        let (decoded, consumed) = Schema::read_from(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(decoded, schema);
    }

    #[test]
    fn schema_set_round_trip() {
        let b = Schema::Object(ObjectSchema {
            name: "Actor".to_string(),
            fields: vec![Field { name: "name".to_string(), field_type: FieldType::String }],
            primary_key: None,
        });
        let a = Schema::Object(ObjectSchema {
            name: "A".to_string(),
            fields: vec![Field {
                name: "actor".to_string(),
                field_type: FieldType::Reference("Actor".to_string()),
            }],
            primary_key: None,
        });
        let set = SchemaSet::new(vec![a, b]).unwrap();
        let mut buf = Vec::new();
        set.write_to(&mut buf);
        let (loaded, consumed) = SchemaSet::load_from(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(loaded.names().collect::<Vec<_>>(), vec!["A", "Actor"]);
    }

    #[test]
    fn unresolved_reference_rejected() {
        let schema = Schema::Object(ObjectSchema {
            name: "A".to_string(),
            fields: vec![Field {
                name: "b".to_string(),
                field_type: FieldType::Reference("B".to_string()),
            }],
            primary_key: None,
        });
        let err = SchemaSet::new(vec![schema]).unwrap_err();
        assert_eq!(err, SchemaError::UnresolvedReference("B".to_string()));
    }

    #[test]
    fn duplicate_name_rejected() {
        let a = movie_schema();
        let b = movie_schema();
        let err = SchemaSet::new(vec![a, b]).unwrap_err();
        assert_eq!(err, SchemaError::DuplicateName("Movie".to_string()));
    }

    #[test]
    fn ordinal_hash_key_sentinel_round_trips() {
        let set_schema = Schema::Set(SetSchema {
            name: "Tags".to_string(),
            element: "Movie".to_string(),
            hash_key: Some(ORDINAL_HASH_KEY.to_vec()),
        });
        let movie = movie_schema();
        let set = SchemaSet::new(vec![set_schema, movie]).unwrap();
        let mut buf = Vec::new();
        set.write_to(&mut buf);
        let (loaded, _) = SchemaSet::load_from(&buf).unwrap();
        match loaded.get("Tags").unwrap() {
            Schema::Set(s) => assert_eq!(s.hash_key, Some(Vec::new())),
            _ => panic!("expected set schema"),
        }
    }

    #[test]
    fn unknown_tag_is_malformed() {
        let err = Schema::read_from(&[0x7f, 0x00]).unwrap_err();
        assert_eq!(err, SchemaError::UnknownTag(0x7f));
    }
}
