//! Write state engine (§4.B): the staging area user population tasks add
//! records into. Modelled as per-type slab arenas keyed by dense ordinal
//! indices, with the freelist and ghost set as side bitsets — the "staged
//! mutable state" shape §9 calls for, instead of a mutable pointer graph.

use crate::bitset::{Ordinal, OrdinalSet};
use crate::error::WriteError;
use crate::hash::fnv1a_64;
use crate::record::Record;
use crate::schema::{Schema, SchemaSet};
use std::collections::HashMap;
use std::sync::Arc;

/// How a type identifies a record for dedup: by content hash, or by a
/// projected primary key (object schemas only).
#[derive(Debug, Clone)]
enum IdentityKey {
    ContentHash(u64),
    PrimaryKey(Vec<u8>),
}

/// Per-type staging arena.
#[derive(Debug)]
pub struct TypeWriteState {
    schema_name: String,
    primary_key_indices: Option<Vec<usize>>,
    records: Vec<Option<Record>>,
    content_index: HashMap<u64, Ordinal>,
    key_index: HashMap<Vec<u8>, Ordinal>,
    reverse_key: HashMap<Ordinal, IdentityKey>,
    /// Ordinals live right now, in this in-progress or just-completed cycle.
    populated: OrdinalSet,
    /// Ordinals live as of the start of the current cycle (before this cycle's add/remove calls).
    prior_populated: OrdinalSet,
    /// Ordinals whose content changed via a primary-key replace this cycle.
    modified: OrdinalSet,
    freelist: Vec<Ordinal>,
    next_ordinal: Ordinal,
    sealed: bool,
}

impl TypeWriteState {
    fn new(schema_name: String, primary_key_indices: Option<Vec<usize>>) -> Self {
        Self {
            schema_name,
            primary_key_indices,
            records: Vec::new(),
            content_index: HashMap::new(),
            key_index: HashMap::new(),
            reverse_key: HashMap::new(),
            populated: OrdinalSet::new(),
            prior_populated: OrdinalSet::new(),
            modified: OrdinalSet::new(),
            freelist: Vec::new(),
            next_ordinal: 0,
            sealed: false,
        }
    }

    fn allocate(&mut self) -> Ordinal {
        if let Some(ord) = self.freelist.pop() {
            ord
        } else {
            let ord = self.next_ordinal;
            self.next_ordinal += 1;
            if ord as usize >= self.records.len() {
                self.records.resize((ord + 1) as usize, None);
            }
            ord
        }
    }

    fn identity_key(&self, record: &Record) -> Result<IdentityKey, WriteError> {
        match &self.primary_key_indices {
            Some(indices) => record
                .project_key(indices)
                .map(IdentityKey::PrimaryKey)
                .ok_or_else(|| WriteError::InvalidPrimaryKey(self.schema_name.clone())),
            None => Ok(IdentityKey::ContentHash(fnv1a_64(&record.content_bytes()))),
        }
    }

    /// Add a record, returning its (possibly pre-existing) ordinal.
    pub fn add(&mut self, record: Record) -> Result<Ordinal, WriteError> {
        if self.sealed {
            return Err(WriteError::SealedForCycle);
        }
        let key = self.identity_key(&record)?;
        let existing = match &key {
            IdentityKey::ContentHash(h) => self.content_index.get(h).copied(),
            IdentityKey::PrimaryKey(k) => self.key_index.get(k).copied(),
        };
        let ordinal = if let Some(ord) = existing {
            if let IdentityKey::PrimaryKey(_) = &key {
                let current = self.records[ord as usize].as_ref().expect("indexed ordinal has a record");
                if current.content_bytes() != record.content_bytes() {
                    self.records[ord as usize] = Some(record);
                    self.modified.insert(ord);
                }
            }
            ord
        } else {
            let ord = self.allocate();
            self.records[ord as usize] = Some(record);
            match &key {
                IdentityKey::ContentHash(h) => {
                    self.content_index.insert(*h, ord);
                }
                IdentityKey::PrimaryKey(k) => {
                    self.key_index.insert(k.clone(), ord);
                }
            }
            self.reverse_key.insert(ord, key);
            ord
        };
        self.populated.insert(ordinal);
        Ok(ordinal)
    }

    /// Remove by content (no-primary-key types) or primary key (keyed
    /// types); the record argument need only carry the identifying fields,
    /// but here we require the full record for simplicity. Returns the
    /// removed ordinal, if it was populated.
    pub fn remove(&mut self, record: &Record) -> Result<Option<Ordinal>, WriteError> {
        if self.sealed {
            return Err(WriteError::SealedForCycle);
        }
        let key = self.identity_key(record)?;
        let existing = match &key {
            IdentityKey::ContentHash(h) => self.content_index.get(h).copied(),
            IdentityKey::PrimaryKey(k) => self.key_index.get(k).copied(),
        };
        if let Some(ord) = existing {
            self.populated.remove(ord);
        }
        Ok(existing)
    }

    /// Seal the type against further `add`/`remove` for this cycle.
    pub fn populate_complete(&mut self) {
        self.sealed = true;
    }

    /// Ordinals added or re-added since the start of this cycle.
    pub fn added(&self) -> OrdinalSet {
        self.populated.difference(&self.prior_populated)
    }

    /// Ordinals that were live at the start of this cycle and are not now.
    pub fn removed(&self) -> OrdinalSet {
        self.prior_populated.difference(&self.populated)
    }

    /// Ordinals whose content changed via a primary-key replace this cycle.
    pub fn modified(&self) -> &OrdinalSet {
        &self.modified
    }

    /// Whether this type had any change this cycle (§4.F no-delta detection).
    pub fn has_changes(&self) -> bool {
        !self.added().is_empty() || !self.removed().is_empty() || !self.modified.is_empty()
    }

    /// Currently populated ordinals.
    pub fn populated(&self) -> &OrdinalSet {
        &self.populated
    }

    /// Fetch a record by ordinal, live or ghosted.
    pub fn record(&self, ordinal: Ordinal) -> Option<&Record> {
        self.records.get(ordinal as usize).and_then(|r| r.as_ref())
    }

    /// Highest assigned ordinal plus one.
    pub fn max_ordinal(&self) -> u32 {
        self.next_ordinal
    }

    /// Roll over to the next cycle: ordinals that were live last cycle but
    /// not re-added this cycle are ghosted through this call and then freed
    /// for reuse (§4.B: "ghost ordinals ... added to the freelist; re-seen
    /// ordinals stay").
    pub fn reset_for_next_cycle(&mut self) {
        let ghosted = self.prior_populated.difference(&self.populated);
        for ord in ghosted.iter() {
            self.records[ord as usize] = None;
            if let Some(key) = self.reverse_key.remove(&ord) {
                match key {
                    IdentityKey::ContentHash(h) => {
                        self.content_index.remove(&h);
                    }
                    IdentityKey::PrimaryKey(k) => {
                        self.key_index.remove(&k);
                    }
                }
            }
            self.freelist.push(ord);
        }
        self.prior_populated = self.populated.clone();
        self.modified = OrdinalSet::new();
        self.sealed = false;
    }
}

/// The write state engine: one [`TypeWriteState`] per schema in the set.
pub struct WriteStateEngine {
    schema_set: Arc<SchemaSet>,
    types: HashMap<String, TypeWriteState>,
}

impl WriteStateEngine {
    /// Build a fresh write state engine over `schema_set`, one empty type
    /// arena per schema.
    pub fn new(schema_set: Arc<SchemaSet>) -> Self {
        let mut types = HashMap::new();
        for schema in schema_set.schemas() {
            let primary_key_indices = match schema {
                Schema::Object(obj) => obj.primary_key.as_ref().map(|paths| {
                    paths
                        .iter()
                        .filter_map(|p| obj.field_index(p))
                        .collect::<Vec<_>>()
                }),
                _ => None,
            };
            types.insert(
                schema.name().to_string(),
                TypeWriteState::new(schema.name().to_string(), primary_key_indices),
            );
        }
        Self { schema_set, types }
    }

    /// The schema set this engine was built over.
    pub fn schema_set(&self) -> &Arc<SchemaSet> {
        &self.schema_set
    }

    fn type_state_mut(&mut self, type_name: &str) -> Result<&mut TypeWriteState, WriteError> {
        self.types
            .get_mut(type_name)
            .ok_or_else(|| WriteError::UnknownType(type_name.to_string()))
    }

    /// Add a record to `type_name`'s staging arena (§4.B `add`).
    pub fn add(&mut self, type_name: &str, record: Record) -> Result<Ordinal, WriteError> {
        self.type_state_mut(type_name)?.add(record)
    }

    /// Remove a record by content or primary key (§4.B `remove`).
    pub fn remove(&mut self, type_name: &str, record: &Record) -> Result<Option<Ordinal>, WriteError> {
        self.type_state_mut(type_name)?.remove(record)
    }

    /// Seal every type against further population for this cycle.
    pub fn populate_complete(&mut self) {
        for state in self.types.values_mut() {
            state.populate_complete();
        }
    }

    /// Roll every type over to the next cycle (§4.B `resetForNextCycle`).
    pub fn reset_for_next_cycle(&mut self) {
        for state in self.types.values_mut() {
            state.reset_for_next_cycle();
        }
    }

    /// Whether any type changed this cycle (§4.F no-delta detection).
    pub fn has_any_changes(&self) -> bool {
        self.types.values().any(|s| s.has_changes())
    }

    /// Access one type's staging arena.
    pub fn type_state(&self, type_name: &str) -> Option<&TypeWriteState> {
        self.types.get(type_name)
    }

    /// Iterate all type names.
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Value;
    use crate::schema::{Field, FieldType, ObjectSchema};

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

    fn movie(id: i32, title: &str) -> Record {
        Record::Object(vec![Value::Int(id), Value::String(title.to_string())])
    }

    #[test]
    fn dedup_by_content_hash_for_no_primary_key_type() {
        let schemas = Arc::new(
            SchemaSet::new(vec![Schema::Object(ObjectSchema {
                name: "Tag".to_string(),
                fields: vec![Field { name: "label".to_string(), field_type: FieldType::String }],
                primary_key: None,
            })])
            .unwrap(),
        );
        let mut engine = WriteStateEngine::new(schemas);
        let a = engine.add("Tag", Record::Object(vec![Value::String("x".into())])).unwrap();
        let b = engine.add("Tag", Record::Object(vec![Value::String("x".into())])).unwrap();
        assert_eq!(a, b); // invariant 4: dedup
    }

    #[test]
    fn primary_key_replace_marks_modified() {
        let mut engine = WriteStateEngine::new(movie_schema_set());
        let ord = engine.add("Movie", movie(1, "A")).unwrap();
        let ord2 = engine.add("Movie", movie(1, "A2")).unwrap();
        assert_eq!(ord, ord2);
        assert!(engine.type_state("Movie").unwrap().modified().contains(ord));
    }

    #[test]
    fn populate_after_complete_is_rejected() {
        let mut engine = WriteStateEngine::new(movie_schema_set());
        engine.populate_complete();
        let err = engine.add("Movie", movie(1, "A")).unwrap_err();
        assert_eq!(err, WriteError::SealedForCycle);
    }

    #[test]
    fn ordinal_stability_across_cycles() {
        // Invariant 3: unchanged primary key retains its ordinal.
        let mut engine = WriteStateEngine::new(movie_schema_set());
        let ord1 = engine.add("Movie", movie(1, "A")).unwrap();
        engine.populate_complete();
        engine.reset_for_next_cycle();
        let ord2 = engine.add("Movie", movie(1, "A")).unwrap();
        assert_eq!(ord1, ord2);
    }

    #[test]
    fn ghosted_ordinal_is_freed_and_reused() {
        let mut engine = WriteStateEngine::new(movie_schema_set());
        let ord1 = engine.add("Movie", movie(1, "A")).unwrap();
        engine.populate_complete();
        engine.reset_for_next_cycle();
        // don't re-add id=1 this cycle; it ghosts and frees
        engine.add("Movie", movie(2, "B")).unwrap();
        engine.populate_complete();
        engine.reset_for_next_cycle();
        let ord3 = engine.add("Movie", movie(3, "C")).unwrap();
        assert_eq!(ord3, ord1); // freelist reused the ghosted ordinal
    }
}
