//! Read state engine (§4.C): compact immutable columnar state per type,
//! built by replaying a snapshot blob and zero or more deltas (or, for
//! round-trip testing, directly off a write state). Reads are lock-free on
//! an immutable state — nothing here takes `&mut self` once built.

pub mod packed;

use crate::bitset::{Ordinal, OrdinalSet};
use crate::record::{Record, Value};
use crate::schema::{FieldType, Schema, SchemaSet};
use packed::{bit_width_for, PackedArray};
use std::collections::HashMap;
use std::sync::Arc;

/// Map a signed integer into an unsigned domain via zigzag encoding, so a
/// value's packed bit width tracks its magnitude rather than always sitting
/// near 64 bits (a sign-bit flip would put every non-negative value above
/// 2^63, defeating the narrowest-width-that-fits point of packing).
fn map_signed(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn unmap_signed(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

/// Variable-length column: a `(start, len)` slice per ordinal into a shared
/// byte heap, `None` for null (§4.C: "a dense offset array and a shared byte heap").
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VarLenColumn {
    slices: Vec<Option<(u32, u32)>>,
    heap: Vec<u8>,
}

impl VarLenColumn {
    fn build(values: &[Option<Vec<u8>>]) -> Self {
        let mut heap = Vec::new();
        let mut slices = Vec::with_capacity(values.len());
        for v in values {
            match v {
                Some(bytes) => {
                    let start = heap.len() as u32;
                    heap.extend_from_slice(bytes);
                    slices.push(Some((start, bytes.len() as u32)));
                }
                None => slices.push(None),
            }
        }
        Self { slices, heap }
    }

    fn get(&self, ordinal: usize) -> Option<&[u8]> {
        let (start, len) = (*self.slices.get(ordinal)?)?;
        Some(&self.heap[start as usize..(start + len) as usize])
    }
}

/// One object field's column, shaped by its [`FieldType`] (§4.C).
#[derive(Debug, Clone, PartialEq)]
enum FieldColumn {
    Bool(PackedArray),
    Int(PackedArray),
    Long(PackedArray),
    Float(Vec<Option<f32>>),
    Double(Vec<Option<f64>>),
    String(VarLenColumn),
    Bytes(VarLenColumn),
    Reference(PackedArray),
}

impl FieldColumn {
    fn build(field_type: &FieldType, values: &[Value]) -> Self {
        match field_type {
            FieldType::Bool => {
                let max = values.iter().filter_map(|v| if let Value::Bool(b) = v { Some(*b as u64) } else { None }).max().unwrap_or(0);
                let width = bit_width_for(max);
                let mut arr = PackedArray::new_nulled(width, values.len());
                for (i, v) in values.iter().enumerate() {
                    if let Value::Bool(b) = v {
                        arr.set(i, *b as u64);
                    }
                }
                FieldColumn::Bool(arr)
            }
            FieldType::Int => {
                let mapped: Vec<Option<u64>> = values
                    .iter()
                    .map(|v| if let Value::Int(i) = v { Some(map_signed(*i as i64)) } else { None })
                    .collect();
                FieldColumn::Int(build_packed(&mapped))
            }
            FieldType::Long => {
                let mapped: Vec<Option<u64>> = values
                    .iter()
                    .map(|v| if let Value::Long(i) = v { Some(map_signed(*i)) } else { None })
                    .collect();
                FieldColumn::Long(build_packed(&mapped))
            }
            FieldType::Float => FieldColumn::Float(
                values.iter().map(|v| if let Value::Float(f) = v { Some(*f) } else { None }).collect(),
            ),
            FieldType::Double => FieldColumn::Double(
                values.iter().map(|v| if let Value::Double(f) = v { Some(*f) } else { None }).collect(),
            ),
            FieldType::String => {
                let raw: Vec<Option<Vec<u8>>> = values
                    .iter()
                    .map(|v| if let Value::String(s) = v { Some(s.clone().into_bytes()) } else { None })
                    .collect();
                FieldColumn::String(VarLenColumn::build(&raw))
            }
            FieldType::Bytes => {
                let raw: Vec<Option<Vec<u8>>> = values
                    .iter()
                    .map(|v| if let Value::Bytes(b) = v { Some(b.clone()) } else { None })
                    .collect();
                FieldColumn::Bytes(VarLenColumn::build(&raw))
            }
            FieldType::Reference(_) => {
                let mapped: Vec<Option<u64>> = values
                    .iter()
                    .map(|v| if let Value::Reference(r) = v { r.map(|o| o as u64) } else { None })
                    .collect();
                FieldColumn::Reference(build_packed(&mapped))
            }
        }
    }

    fn read(&self, ordinal: usize) -> Option<Value> {
        match self {
            FieldColumn::Bool(arr) => {
                if arr.is_null(ordinal) {
                    None
                } else {
                    Some(Value::Bool(arr.get(ordinal) != 0))
                }
            }
            FieldColumn::Int(arr) => {
                if arr.is_null(ordinal) {
                    None
                } else {
                    Some(Value::Int(unmap_signed(arr.get(ordinal)) as i32))
                }
            }
            FieldColumn::Long(arr) => {
                if arr.is_null(ordinal) {
                    None
                } else {
                    Some(Value::Long(unmap_signed(arr.get(ordinal))))
                }
            }
            FieldColumn::Float(v) => v.get(ordinal).copied().flatten().map(Value::Float),
            FieldColumn::Double(v) => v.get(ordinal).copied().flatten().map(Value::Double),
            FieldColumn::String(col) => col.get(ordinal).map(|b| Value::String(String::from_utf8_lossy(b).into_owned())),
            FieldColumn::Bytes(col) => col.get(ordinal).map(|b| Value::Bytes(b.to_vec())),
            FieldColumn::Reference(arr) => {
                if arr.is_null(ordinal) {
                    Some(Value::Reference(None))
                } else {
                    Some(Value::Reference(Some(arr.get(ordinal) as Ordinal)))
                }
            }
        }
    }
}

fn build_packed(mapped: &[Option<u64>]) -> PackedArray {
    let max = mapped.iter().filter_map(|v| *v).max().unwrap_or(0);
    let width = bit_width_for(max);
    let mut arr = PackedArray::new_nulled(width, mapped.len());
    for (i, v) in mapped.iter().enumerate() {
        if let Some(v) = v {
            arr.set(i, *v);
        }
    }
    arr
}

/// Read-side state for an object type: one [`FieldColumn`] per field.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectReadState {
    columns: Vec<FieldColumn>,
    populated: OrdinalSet,
}

/// Read-side state for a list type: ordered element ordinals per record ordinal.
#[derive(Debug, Clone, PartialEq)]
pub struct ListReadState {
    elements: Vec<Vec<Ordinal>>,
    populated: OrdinalSet,
}

/// Read-side state for a set type: element ordinals per record ordinal.
#[derive(Debug, Clone, PartialEq)]
pub struct SetReadState {
    elements: Vec<Vec<Ordinal>>,
    populated: OrdinalSet,
}

/// Read-side state for a map type: key/value ordinal pairs per record ordinal.
#[derive(Debug, Clone, PartialEq)]
pub struct MapReadState {
    pairs: Vec<Vec<(Ordinal, Ordinal)>>,
    populated: OrdinalSet,
}

/// One type's immutable read-side state, shaped by its schema variant.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeReadState {
    /// Object type.
    Object(ObjectReadState),
    /// List type.
    List(ListReadState),
    /// Set type.
    Set(SetReadState),
    /// Map type.
    Map(MapReadState),
}

impl TypeReadState {
    /// The populated-ordinals bitset for this type (§4.C `populatedOrdinals()`).
    pub fn populated_ordinals(&self) -> &OrdinalSet {
        match self {
            TypeReadState::Object(s) => &s.populated,
            TypeReadState::List(s) => &s.populated,
            TypeReadState::Set(s) => &s.populated,
            TypeReadState::Map(s) => &s.populated,
        }
    }

    /// `readField(ordinal, fieldIndex) -> typed value or null`. Only
    /// meaningful for object types; other variants return `None`.
    pub fn read_field(&self, ordinal: Ordinal, field_index: usize) -> Option<Value> {
        match self {
            TypeReadState::Object(s) => {
                if !s.populated.contains(ordinal) {
                    return None;
                }
                s.columns.get(field_index).and_then(|c| c.read(ordinal as usize))
            }
            _ => None,
        }
    }

    /// `iterate(ordinal, collectionType) -> element/key-value stream`.
    pub fn iterate_list(&self, ordinal: Ordinal) -> Option<&[Ordinal]> {
        match self {
            TypeReadState::List(s) => s.elements.get(ordinal as usize).map(|v| v.as_slice()),
            _ => None,
        }
    }

    /// Iterate a set's element ordinals.
    pub fn iterate_set(&self, ordinal: Ordinal) -> Option<&[Ordinal]> {
        match self {
            TypeReadState::Set(s) => s.elements.get(ordinal as usize).map(|v| v.as_slice()),
            _ => None,
        }
    }

    /// Iterate a map's key/value ordinal pairs.
    pub fn iterate_map(&self, ordinal: Ordinal) -> Option<&[(Ordinal, Ordinal)]> {
        match self {
            TypeReadState::Map(s) => s.pairs.get(ordinal as usize).map(|v| v.as_slice()),
            _ => None,
        }
    }

    /// Reconstruct the [`Record`] at `ordinal`, reversing the packing done
    /// in [`ReadState::from_write_state`]. Used by the reverse-delta
    /// computer to recover a previous cycle's content for ordinals whose
    /// payload only still exists in packed form.
    pub fn to_record(&self, ordinal: Ordinal) -> Option<Record> {
        if !self.populated_ordinals().contains(ordinal) {
            return None;
        }
        match self {
            TypeReadState::Object(s) => {
                let values: Vec<Value> = (0..s.columns.len())
                    .map(|i| s.columns[i].read(ordinal as usize).unwrap_or(Value::Reference(None)))
                    .collect();
                Some(Record::Object(values))
            }
            TypeReadState::List(s) => s.elements.get(ordinal as usize).map(|e| Record::List(e.clone())),
            TypeReadState::Set(s) => s.elements.get(ordinal as usize).map(|e| Record::Set(e.clone())),
            TypeReadState::Map(s) => s.pairs.get(ordinal as usize).map(|p| Record::Map(p.clone())),
        }
    }
}

/// The whole dataset's immutable read-side state, one [`TypeReadState`] per
/// schema in the set, plus a back-reference to the schema set itself (§9:
/// "hold this as a name→read-state lookup table owned by the engine", not
/// mutable pointers hung off the schema objects).
#[derive(Debug, Clone)]
pub struct ReadState {
    schema_set: Arc<SchemaSet>,
    types: HashMap<String, TypeReadState>,
}

impl ReadState {
    /// An empty read state over `schema_set` (no types populated). Used as
    /// `R_prev` at the start of a fresh delta chain.
    pub fn empty(schema_set: Arc<SchemaSet>) -> Self {
        let mut types = HashMap::new();
        for schema in schema_set.schemas() {
            types.insert(schema.name().to_string(), empty_type_state(schema));
        }
        Self { schema_set, types }
    }

    /// Build a read state directly from a write state's current content,
    /// freezing bit widths and packing columns in one pass — the "batched
    /// freeze" §9 calls for. This is `canonical_read_state(W)` /
    /// `snapshot_read_state(W)` from the invariants in §8.
    pub fn from_write_state(write: &crate::write::WriteStateEngine) -> Self {
        let schema_set = write.schema_set().clone();
        let mut types = HashMap::new();
        for schema in schema_set.schemas() {
            let type_state = write.type_state(schema.name()).expect("schema set and write engine in sync");
            let populated = type_state.populated().clone();
            let bound = populated.ordinal_bound().max(type_state.max_ordinal()) as usize;
            let read_state = build_type_read_state(schema, populated, bound, |ord| type_state.record(ord).cloned());
            types.insert(schema.name().to_string(), read_state);
        }
        Self { schema_set, types }
    }

    /// Build a read state by transforming `self` with a delta (§4.F
    /// integrity check: applying the forward/reverse delta must reach the
    /// same logical state as rebuilding from the write state directly).
    pub fn apply_delta(&self, delta: &crate::delta::DeltaSet) -> Self {
        let schema_set = self.schema_set.clone();
        let mut types = HashMap::new();
        for schema in schema_set.schemas() {
            let name = schema.name();
            let base = self.types.get(name);
            let base_populated = base.map(|b| b.populated_ordinals().clone()).unwrap_or_default();
            let type_delta = delta.types.get(name).cloned().unwrap_or_default();
            let added_ordinals: OrdinalSet = type_delta.added.iter().map(|(o, _)| *o).collect();
            let populated = base_populated.difference(&type_delta.removed).union(&added_ordinals);
            let bound = populated.ordinal_bound().max(
                type_delta.added.iter().map(|(o, _)| o + 1).max().unwrap_or(0),
            ) as usize;
            let read_state = build_type_read_state(schema, populated, bound, |ord| {
                type_delta
                    .added
                    .iter()
                    .find(|(o, _)| *o == ord)
                    .map(|(_, r)| r.clone())
                    .or_else(|| base.and_then(|b| b.to_record(ord)))
            });
            types.insert(name.to_string(), read_state);
        }
        Self { schema_set, types }
    }

    /// The schema set backing this state.
    pub fn schema_set(&self) -> &Arc<SchemaSet> {
        &self.schema_set
    }

    /// Look up one type's read state.
    pub fn type_state(&self, type_name: &str) -> Option<&TypeReadState> {
        self.types.get(type_name)
    }

    /// Iterate `(type_name, state)` pairs.
    pub fn types(&self) -> impl Iterator<Item = (&str, &TypeReadState)> {
        self.types.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Structural equality against another read state, field by field, used
    /// by the integrity check (§4.F). Unlike `PartialEq` this only compares
    /// the logical content (populated ordinals + field values), not the
    /// packing internals, so two states built by different paths (snapshot
    /// load vs. delta application) still compare equal.
    pub fn equals_logically(&self, other: &ReadState) -> bool {
        for name in self.schema_set.names() {
            let (Some(a), Some(b)) = (self.types.get(name), other.types.get(name)) else { return false };
            if a.populated_ordinals() != b.populated_ordinals() {
                return false;
            }
            match (a, b) {
                (TypeReadState::Object(oa), TypeReadState::Object(ob)) => {
                    for ord in oa.populated.iter() {
                        for field_idx in 0..oa.columns.len() {
                            if a.read_field(ord, field_idx) != b.read_field(ord, field_idx) {
                                return false;
                            }
                        }
                    }
                }
                (TypeReadState::List(la), TypeReadState::List(lb)) => {
                    for ord in la.populated.iter() {
                        if la.elements[ord as usize] != lb.elements[ord as usize] {
                            return false;
                        }
                    }
                }
                (TypeReadState::Set(sa), TypeReadState::Set(sb)) => {
                    for ord in sa.populated.iter() {
                        if sa.elements[ord as usize] != sb.elements[ord as usize] {
                            return false;
                        }
                    }
                }
                (TypeReadState::Map(ma), TypeReadState::Map(mb)) => {
                    for ord in ma.populated.iter() {
                        if ma.pairs[ord as usize] != mb.pairs[ord as usize] {
                            return false;
                        }
                    }
                }
                _ => return false,
            }
        }
        true
    }
}

fn empty_type_state(schema: &Schema) -> TypeReadState {
    match schema {
        Schema::Object(obj) => TypeReadState::Object(ObjectReadState {
            columns: obj.fields.iter().map(|f| FieldColumn::build(&f.field_type, &[])).collect(),
            populated: OrdinalSet::new(),
        }),
        Schema::List(_) => TypeReadState::List(ListReadState { elements: Vec::new(), populated: OrdinalSet::new() }),
        Schema::Set(_) => TypeReadState::Set(SetReadState { elements: Vec::new(), populated: OrdinalSet::new() }),
        Schema::Map(_) => TypeReadState::Map(MapReadState { pairs: Vec::new(), populated: OrdinalSet::new() }),
    }
}

/// Build one type's read state from an ordinal-addressed record source,
/// freezing bit widths and packing columns in one pass (§9 "batched
/// freeze"). Shared by the write-state snapshot path and the delta
/// application path so both produce identically-shaped read states.
fn build_type_read_state(
    schema: &Schema,
    populated: OrdinalSet,
    bound: usize,
    mut record_at: impl FnMut(Ordinal) -> Option<Record>,
) -> TypeReadState {
    match schema {
        Schema::Object(obj) => {
            let mut per_field_values: Vec<Vec<Value>> = vec![Vec::with_capacity(bound); obj.fields.len()];
            for ord in 0..bound as Ordinal {
                let record = if populated.contains(ord) { record_at(ord) } else { None };
                for (field_idx, field) in obj.fields.iter().enumerate() {
                    let value = match &record {
                        Some(Record::Object(values)) => values.get(field_idx).cloned(),
                        _ => None,
                    };
                    per_field_values[field_idx].push(value.unwrap_or(null_value_for(&field.field_type)));
                }
            }
            let columns: Vec<FieldColumn> = obj
                .fields
                .iter()
                .zip(per_field_values.iter())
                .map(|(f, values)| FieldColumn::build(&f.field_type, values))
                .collect();
            TypeReadState::Object(ObjectReadState { columns, populated })
        }
        Schema::List(_) => {
            let mut elements = vec![Vec::new(); bound];
            for ord in populated.iter() {
                if let Some(Record::List(els)) = record_at(ord) {
                    elements[ord as usize] = els;
                }
            }
            TypeReadState::List(ListReadState { elements, populated })
        }
        Schema::Set(_) => {
            let mut elements = vec![Vec::new(); bound];
            for ord in populated.iter() {
                if let Some(Record::Set(els)) = record_at(ord) {
                    let mut sorted = els;
                    sorted.sort_unstable();
                    elements[ord as usize] = sorted;
                }
            }
            TypeReadState::Set(SetReadState { elements, populated })
        }
        Schema::Map(_) => {
            let mut pairs = vec![Vec::new(); bound];
            for ord in populated.iter() {
                if let Some(Record::Map(p)) = record_at(ord) {
                    let mut sorted = p;
                    sorted.sort_unstable();
                    pairs[ord as usize] = sorted;
                }
            }
            TypeReadState::Map(MapReadState { pairs, populated })
        }
    }
}

fn null_value_for(field_type: &FieldType) -> Value {
    match field_type {
        FieldType::Bool => Value::Bool(false),
        FieldType::Int => Value::Int(0),
        FieldType::Long => Value::Long(0),
        FieldType::Float => Value::Float(0.0),
        FieldType::Double => Value::Double(0.0),
        FieldType::String => Value::String(String::new()),
        FieldType::Bytes => Value::Bytes(Vec::new()),
        FieldType::Reference(_) => Value::Reference(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Value;
    use crate::schema::{Field, ObjectSchema};
    use crate::write::WriteStateEngine;

    fn movie_schema_set() -> Arc<SchemaSet> {
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
    fn round_trip_from_write_state() {
        let schemas = movie_schema_set();
        let mut write = WriteStateEngine::new(schemas);
        write.add("Movie", Record::Object(vec![Value::Int(1), Value::String("A".into())])).unwrap();
        write.add("Movie", Record::Object(vec![Value::Int(2), Value::String("B".into())])).unwrap();
        let read = ReadState::from_write_state(&write);
        let movie = read.type_state("Movie").unwrap();
        assert_eq!(movie.populated_ordinals().iter().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(movie.read_field(0, 0), Some(Value::Int(1)));
        assert_eq!(movie.read_field(1, 1), Some(Value::String("B".to_string())));
    }

    #[test]
    fn negative_ints_round_trip() {
        let schemas = movie_schema_set();
        let mut write = WriteStateEngine::new(schemas);
        write.add("Movie", Record::Object(vec![Value::Int(-5), Value::String("neg".into())])).unwrap();
        let read = ReadState::from_write_state(&write);
        let movie = read.type_state("Movie").unwrap();
        assert_eq!(movie.read_field(0, 0), Some(Value::Int(-5)));
    }

    #[test]
    fn small_signed_values_pack_narrow() {
        // a handful of small non-negative ints must not force the column to
        // ~64 bits wide: zigzag keeps small magnitudes (either sign) small.
        let schemas = movie_schema_set();
        let mut write = WriteStateEngine::new(schemas);
        for id in 0..5 {
            write.add("Movie", Record::Object(vec![Value::Int(id), Value::String("x".into())])).unwrap();
        }
        let read = ReadState::from_write_state(&write);
        let movie = read.type_state("Movie").unwrap();
        match movie {
            TypeReadState::Object(obj) => match &obj.columns[0] {
                FieldColumn::Int(arr) => assert!(arr.width() <= 8, "width {} too wide for ids 0..5", arr.width()),
                other => panic!("expected Int column, got {other:?}"),
            },
            other => panic!("expected object read state, got {other:?}"),
        }
    }
}
