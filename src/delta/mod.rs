//! Delta/snapshot computer (§4.D): computes the bit-packed payload for
//! snapshot / forward-delta / reverse-delta between a previous read state
//! and the current write state.

use crate::bitset::{Ordinal, OrdinalSet};
use crate::read::ReadState;
use crate::record::Record;
use crate::write::WriteStateEngine;
use std::collections::HashMap;

/// One type's contribution to a delta: ordinals to drop, plus the ordered
/// `(ordinal, payload)` pairs to (re)write, in strictly ascending ordinal
/// order (§4.D tie-break rule).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeDelta {
    /// Ordinals to clear when this delta is applied.
    pub removed: OrdinalSet,
    /// Ordinals to (re)write, ascending, with their full payload.
    pub added: Vec<(Ordinal, Record)>,
}

/// A full delta or snapshot: one [`TypeDelta`] per type, keyed by type name.
/// A snapshot is represented as a delta from an empty state (every type's
/// `removed` is empty and `added` covers every populated ordinal).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeltaSet {
    /// Per-type deltas.
    pub types: HashMap<String, TypeDelta>,
}

impl DeltaSet {
    /// Whether every type's delta is empty.
    pub fn is_empty(&self) -> bool {
        self.types.values().all(|d| d.removed.is_empty() && d.added.is_empty())
    }
}

/// `snapshot_read_state(W)`: the full populated-ordinals bitset and all
/// field payloads for every type, with no removed set.
pub fn compute_snapshot(write: &WriteStateEngine) -> DeltaSet {
    let mut types = HashMap::new();
    for name in write.type_names() {
        let state = write.type_state(name).expect("known type");
        let mut added: Vec<(Ordinal, Record)> = state
            .populated()
            .iter()
            .map(|ord| (ord, state.record(ord).expect("populated ordinal has a record").clone()))
            .collect();
        added.sort_by_key(|(ord, _)| *ord);
        types.insert(name.to_string(), TypeDelta { removed: OrdinalSet::new(), added });
    }
    DeltaSet { types }
}

/// Forward delta `R_prev -> R_new` (§4.D): `removed = R_prev.populated \
/// W.populated`; `added` (for payload purposes) is `(W.populated \
/// R_prev.populated) ∪ modified`, each sourced from `W`'s current content —
/// modified ordinals keep their prior ordinal (primary-key replace, §4.B)
/// but still need their new payload shipped forward.
pub fn compute_forward_delta(prev: &ReadState, write: &WriteStateEngine) -> DeltaSet {
    let mut types = HashMap::new();
    for name in write.type_names() {
        let state = write.type_state(name).expect("known type");
        let prev_populated = prev
            .type_state(name)
            .map(|t| t.populated_ordinals().clone())
            .unwrap_or_default();
        let removed = prev_populated.difference(state.populated());
        let mut changed: Vec<Ordinal> = state
            .populated()
            .difference(&prev_populated)
            .iter()
            .chain(state.modified().iter())
            .collect();
        changed.sort_unstable();
        changed.dedup();
        let added = changed
            .into_iter()
            .map(|ord| (ord, state.record(ord).expect("changed ordinal has a record").clone()))
            .collect();
        types.insert(name.to_string(), TypeDelta { removed, added });
    }
    DeltaSet { types }
}

/// Reverse delta `R_new -> R_prev` (§4.D), symmetric to the forward delta:
/// `removed = W.populated \ R_prev.populated` (undo the new additions);
/// `added` restores `(R_prev.populated \ W.populated) ∪ modified` from
/// `R_prev`'s packed content.
pub fn compute_reverse_delta(prev: &ReadState, write: &WriteStateEngine) -> DeltaSet {
    let mut types = HashMap::new();
    for name in write.type_names() {
        let state = write.type_state(name).expect("known type");
        let prev_type = prev.type_state(name);
        let prev_populated = prev_type.map(|t| t.populated_ordinals().clone()).unwrap_or_default();
        let removed = state.populated().difference(&prev_populated);
        let mut changed: Vec<Ordinal> = prev_populated
            .difference(state.populated())
            .iter()
            .chain(state.modified().iter())
            .collect();
        changed.sort_unstable();
        changed.dedup();
        let added = changed
            .into_iter()
            .filter_map(|ord| prev_type.and_then(|t| t.to_record(ord)).map(|r| (ord, r)))
            .collect();
        types.insert(name.to_string(), TypeDelta { removed, added });
    }
    DeltaSet { types }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Value;
    use crate::schema::{Field, FieldType, ObjectSchema, Schema, SchemaSet};
    use std::sync::Arc;

    fn schemas() -> Arc<SchemaSet> {
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
    fn s1_minimal_cycle_forward_delta_from_empty() {
        let mut write = WriteStateEngine::new(schemas());
        write.add("Movie", movie(1, "A")).unwrap();
        write.add("Movie", movie(2, "B")).unwrap();
        let prev = ReadState::empty(schemas());
        let fwd = compute_forward_delta(&prev, &write);
        let movie_delta = &fwd.types["Movie"];
        assert!(movie_delta.removed.is_empty());
        assert_eq!(movie_delta.added.len(), 2);
        assert_eq!(movie_delta.added[0].0, 0);
        assert_eq!(movie_delta.added[1].0, 1);
    }

    #[test]
    fn s2_add_then_remove() {
        let mut write = WriteStateEngine::new(schemas());
        write.add("Movie", movie(1, "A")).unwrap();
        write.add("Movie", movie(2, "B")).unwrap();
        let snapshot_read = ReadState::from_write_state(&write);

        write.populate_complete();
        write.reset_for_next_cycle();
        write.add("Movie", movie(2, "B")).unwrap(); // only re-add id=2

        let fwd = compute_forward_delta(&snapshot_read, &write);
        let md = &fwd.types["Movie"];
        assert_eq!(md.added.len(), 0);
        assert_eq!(md.removed.iter().collect::<Vec<_>>(), vec![0]); // ordinal of id=1

        let rev = compute_reverse_delta(&snapshot_read, &write);
        let rmd = &rev.types["Movie"];
        assert_eq!(rmd.added.len(), 1);
        assert_eq!(rmd.added[0], (0, movie(1, "A")));
    }

    #[test]
    fn modified_ordinal_carried_in_both_directions() {
        let mut write = WriteStateEngine::new(schemas());
        write.add("Movie", movie(1, "A")).unwrap();
        let prev = ReadState::from_write_state(&write);

        write.populate_complete();
        write.reset_for_next_cycle();
        write.add("Movie", movie(1, "A2")).unwrap(); // same key, new content

        let fwd = compute_forward_delta(&prev, &write);
        assert_eq!(fwd.types["Movie"].added, vec![(0, movie(1, "A2"))]);

        let rev = compute_reverse_delta(&prev, &write);
        assert_eq!(rev.types["Movie"].added, vec![(0, movie(1, "A"))]);
    }

    #[test]
    fn delta_closure_round_trip() {
        // Invariant 2: apply_forward(R_prev, forward_delta) = snapshot_read_state(W);
        // apply_reverse(that, reverse_delta) = R_prev.
        let mut write = WriteStateEngine::new(schemas());
        write.add("Movie", movie(1, "A")).unwrap();
        let r_prev = ReadState::empty(schemas());

        let fwd = compute_forward_delta(&r_prev, &write);
        let rev = compute_reverse_delta(&r_prev, &write);
        let r_new_expected = ReadState::from_write_state(&write);

        let r_new_via_delta = r_prev.apply_delta(&fwd);
        assert!(r_new_via_delta.equals_logically(&r_new_expected));

        let back_to_prev = r_new_via_delta.apply_delta(&rev);
        assert!(back_to_prev.equals_logically(&r_prev));
    }
}
