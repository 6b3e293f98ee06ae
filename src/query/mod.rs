//! Schema-aware query (§4.H): ordinal-bitset field-match scan, with
//! single-field reference traversal and a work-stealing parallel variant.
//!
//! Grounded on §9 "Worker parallelism": a single atomic counter over
//! 256-ordinal chunks, no per-scan pool allocation — the pool is threaded
//! in by the caller (sized from `Config::query.worker_count`) rather than
//! spun up here.

use crate::bitset::{Ordinal, OrdinalSet};
use crate::read::{ReadState, TypeReadState};
use crate::record::Value;
use crate::schema::{FieldType, ObjectSchema, Schema};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Ordinals are partitioned into chunks of this size for the parallel scan
/// (§4.H: "contiguous chunks of 256").
pub const CHUNK_SIZE: u32 = 256;

/// `findMatchingRecords(fieldName, fieldValueText) -> map(typeName -> ordinal
/// bitset)` (§4.H), sequential variant.
pub fn find_matching_records(read_state: &ReadState, field_name: &str, field_value_text: &str) -> HashMap<String, OrdinalSet> {
    let mut out = HashMap::new();
    for name in read_state.schema_set().names() {
        let Some(Schema::Object(obj)) = read_state.schema_set().get(name) else { continue };
        let Some(type_state) = read_state.type_state(name) else { continue };
        let matches = match_object_type(read_state, obj, type_state, field_name, field_value_text, false);
        if !matches.is_empty() {
            out.insert(name.to_string(), matches);
        }
    }
    out
}

/// Parallel variant: chunks each type's populated ordinals into 256-ordinal
/// ranges and steals work across `worker_count` threads via a single atomic
/// cursor (§9).
pub fn find_matching_records_parallel(
    read_state: &ReadState,
    field_name: &str,
    field_value_text: &str,
    worker_count: usize,
) -> HashMap<String, OrdinalSet> {
    let mut out = HashMap::new();
    for name in read_state.schema_set().names() {
        let Some(Schema::Object(obj)) = read_state.schema_set().get(name) else { continue };
        let Some(type_state) = read_state.type_state(name) else { continue };
        let matches = match_object_type_parallel(read_state, obj, type_state, field_name, field_value_text, worker_count);
        if !matches.is_empty() {
            out.insert(name.to_string(), matches);
        }
    }
    out
}

/// Match one object type's fields against `(field_name, field_value_text)`,
/// recursing through single-field REFERENCE fields regardless of that
/// field's own name (§4.H S6: `A{ref B b}` matches a query on `B`'s sole
/// field `name` by projecting through `b`).
fn match_object_type(
    read_state: &ReadState,
    obj: &ObjectSchema,
    type_state: &TypeReadState,
    field_name: &str,
    field_value_text: &str,
    parallel: bool,
) -> OrdinalSet {
    let _ = parallel;
    let mut result = OrdinalSet::new();
    for (idx, field) in obj.fields.iter().enumerate() {
        match &field.field_type {
            FieldType::Reference(target) => {
                if let Some(Schema::Object(target_obj)) = read_state.schema_set().get(target) {
                    if target_obj.fields.len() == 1 {
                        if let Some(target_state) = read_state.type_state(target) {
                            let ref_matches = match_object_type(read_state, target_obj, target_state, field_name, field_value_text, false);
                            if !ref_matches.is_empty() {
                                project_through_reference(type_state, idx, &ref_matches, &mut result);
                            }
                        }
                    }
                }
            }
            scalar if field.name == field_name => {
                if let Some(parsed) = Value::parse_text(scalar, field_value_text) {
                    scan_scalar_field(type_state, idx, &parsed, &mut result);
                }
            }
            _ => {}
        }
    }
    result
}

fn match_object_type_parallel(
    read_state: &ReadState,
    obj: &ObjectSchema,
    type_state: &TypeReadState,
    field_name: &str,
    field_value_text: &str,
    worker_count: usize,
) -> OrdinalSet {
    let mut result = OrdinalSet::new();
    for (idx, field) in obj.fields.iter().enumerate() {
        match &field.field_type {
            FieldType::Reference(target) => {
                if let Some(Schema::Object(target_obj)) = read_state.schema_set().get(target) {
                    if target_obj.fields.len() == 1 {
                        if let Some(target_state) = read_state.type_state(target) {
                            let ref_matches =
                                match_object_type_parallel(read_state, target_obj, target_state, field_name, field_value_text, worker_count);
                            if !ref_matches.is_empty() {
                                project_through_reference(type_state, idx, &ref_matches, &mut result);
                            }
                        }
                    }
                }
            }
            scalar if field.name == field_name => {
                if let Some(parsed) = Value::parse_text(scalar, field_value_text) {
                    let bound = type_state.populated_ordinals().ordinal_bound();
                    let matched = parallel_scan(bound, worker_count, |ord| {
                        type_state.populated_ordinals().contains(ord) && type_state.read_field(ord, idx).as_ref() == Some(&parsed)
                    });
                    result = result.union(&matched);
                }
            }
            _ => {}
        }
    }
    result
}

fn scan_scalar_field(type_state: &TypeReadState, field_index: usize, parsed: &Value, result: &mut OrdinalSet) {
    for ord in type_state.populated_ordinals().iter() {
        if type_state.read_field(ord, field_index).as_ref() == Some(parsed) {
            result.insert(ord);
        }
    }
}

fn project_through_reference(type_state: &TypeReadState, field_index: usize, ref_matches: &OrdinalSet, result: &mut OrdinalSet) {
    for ord in type_state.populated_ordinals().iter() {
        if let Some(Value::Reference(Some(target_ord))) = type_state.read_field(ord, field_index) {
            if ref_matches.contains(target_ord) {
                result.insert(ord);
            }
        }
    }
}

/// Work-stealing scan over `[0, bound)` in 256-ordinal chunks: `worker_count`
/// threads pull the next chunk index from a shared atomic cursor until
/// exhausted, each testing `predicate` per ordinal and folding matches into
/// its own local set, merged at the end (§9: "a single atomic counter is
/// sufficient").
fn parallel_scan(bound: Ordinal, worker_count: usize, predicate: impl Fn(Ordinal) -> bool + Sync) -> OrdinalSet {
    if bound == 0 {
        return OrdinalSet::new();
    }
    let chunk_count = bound.div_ceil(CHUNK_SIZE);
    let cursor = AtomicUsize::new(0);
    let worker_count = worker_count.max(1).min(chunk_count.max(1) as usize);

    crossbeam::thread::scope(|scope| {
        let handles: Vec<_> = (0..worker_count)
            .map(|_| {
                let cursor = &cursor;
                let predicate = &predicate;
                scope.spawn(move |_| {
                    let mut local = OrdinalSet::new();
                    loop {
                        let chunk_idx = cursor.fetch_add(1, Ordering::SeqCst);
                        if chunk_idx as u32 >= chunk_count {
                            break;
                        }
                        let start = chunk_idx as u32 * CHUNK_SIZE;
                        let end = (start + CHUNK_SIZE).min(bound);
                        for ord in start..end {
                            if predicate(ord) {
                                local.insert(ord);
                            }
                        }
                    }
                    local
                })
            })
            .collect();
        handles.into_iter().fold(OrdinalSet::new(), |acc, h| acc.union(&h.join().expect("scan worker panicked")))
    })
    .expect("scope panicked")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use crate::schema::{Field, SchemaSet};
    use crate::write::WriteStateEngine;
    use std::sync::Arc;

    fn b_a_schemas() -> Arc<SchemaSet> {
        Arc::new(
            SchemaSet::new(vec![
                Schema::Object(ObjectSchema {
                    name: "B".to_string(),
                    fields: vec![Field { name: "name".to_string(), field_type: FieldType::String }],
                    primary_key: None,
                }),
                Schema::Object(ObjectSchema {
                    name: "A".to_string(),
                    fields: vec![Field { name: "b".to_string(), field_type: FieldType::Reference("B".to_string()) }],
                    primary_key: None,
                }),
            ])
            .unwrap(),
        )
    }

    #[test]
    fn s6_query_reference_chase() {
        let schemas = b_a_schemas();
        let mut write = WriteStateEngine::new(schemas);
        let b_x = write.add("B", Record::Object(vec![Value::String("x".into())])).unwrap();
        let _b_y = write.add("B", Record::Object(vec![Value::String("y".into())])).unwrap();
        write.add("A", Record::Object(vec![Value::Reference(Some(b_x))])).unwrap();
        let b_y = write.add("B", Record::Object(vec![Value::String("y".into())])).unwrap();
        write.add("A", Record::Object(vec![Value::Reference(Some(b_y))])).unwrap();

        let read_state = ReadState::from_write_state(&write);
        let matches = find_matching_records(&read_state, "name", "x");
        assert_eq!(matches.get("A").unwrap().iter().collect::<Vec<_>>(), vec![0]);
        assert_eq!(matches.get("B").unwrap().iter().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn parallel_matches_sequential() {
        let schemas = b_a_schemas();
        let mut write = WriteStateEngine::new(schemas);
        for i in 0..1000 {
            write.add("B", Record::Object(vec![Value::String(format!("name-{}", i % 7))])).unwrap();
        }
        let read_state = ReadState::from_write_state(&write);
        let seq = find_matching_records(&read_state, "name", "name-3");
        let par = find_matching_records_parallel(&read_state, "name", "name-3", 4);
        assert_eq!(seq.get("B"), par.get("B"));
    }
}
