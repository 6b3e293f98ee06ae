use colonnade::delta::{compute_forward_delta, compute_snapshot};
use colonnade::read::ReadState;
use colonnade::record::{Record, Value};
use colonnade::schema::{Field, FieldType, ObjectSchema, Schema, SchemaSet};
use colonnade::write::WriteStateEngine;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::Arc;

fn schema() -> Arc<SchemaSet> {
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

fn populated_engine(schema_set: Arc<SchemaSet>, count: i32) -> WriteStateEngine {
    let mut write = WriteStateEngine::new(schema_set);
    for id in 0..count {
        write
            .add("Movie", Record::Object(vec![Value::Int(id), Value::String(format!("Movie {id}"))]))
            .unwrap();
    }
    write.populate_complete();
    write
}

fn bench_snapshot(c: &mut Criterion) {
    let schema_set = schema();
    c.bench_function("delta_compute/snapshot_10k", |b| {
        b.iter_batched(
            || populated_engine(schema_set.clone(), 10_000),
            |write| black_box(compute_snapshot(&write)),
            criterion::BatchSize::LargeInput,
        )
    });
}

fn bench_forward_delta(c: &mut Criterion) {
    let schema_set = schema();
    let baseline = populated_engine(schema_set.clone(), 10_000);
    let prev_read = ReadState::from_write_state(&baseline);

    c.bench_function("delta_compute/forward_delta_10pct_churn", |b| {
        b.iter_batched(
            || {
                let mut write = populated_engine(schema_set.clone(), 10_000);
                // churn a random 10% of ids, scattered rather than a trailing
                // run, so the delta scan can't rely on locality
                let mut rng = rand::rngs::StdRng::seed_from_u64(42);
                let mut ids: Vec<i32> = (0..10_000).collect();
                ids.shuffle(&mut rng);
                for id in ids.into_iter().take(1_000) {
                    write.remove("Movie", &Record::Object(vec![Value::Int(id), Value::String(format!("Movie {id}"))])).unwrap();
                    write.add("Movie", Record::Object(vec![Value::Int(id), Value::String(format!("Movie {id} updated"))])).unwrap();
                }
                write.populate_complete();
                write
            },
            |write| black_box(compute_forward_delta(&prev_read, &write)),
            criterion::BatchSize::LargeInput,
        )
    });
}

criterion_group!(benches, bench_snapshot, bench_forward_delta);
criterion_main!(benches);
