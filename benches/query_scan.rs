use colonnade::query::{find_matching_records, find_matching_records_parallel};
use colonnade::read::ReadState;
use colonnade::record::{Record, Value};
use colonnade::schema::{Field, FieldType, ObjectSchema, Schema, SchemaSet};
use colonnade::write::WriteStateEngine;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
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

fn read_state(count: i32) -> ReadState {
    let schema_set = schema();
    let mut write = WriteStateEngine::new(schema_set);
    for id in 0..count {
        write.add("Movie", Record::Object(vec![Value::Int(id), Value::String(format!("Movie {id}"))])).unwrap();
    }
    write.populate_complete();
    ReadState::from_write_state(&write)
}

fn bench_sequential_scan(c: &mut Criterion) {
    let state = read_state(100_000);
    c.bench_function("query_scan/sequential_100k", |b| {
        b.iter(|| black_box(find_matching_records(&state, "title", "Movie 99999")))
    });
}

fn bench_parallel_scan(c: &mut Criterion) {
    let state = read_state(100_000);
    let workers = num_cpus::get().max(1);
    c.bench_function("query_scan/parallel_100k", |b| {
        b.iter(|| black_box(find_matching_records_parallel(&state, "title", "Movie 99999", workers)))
    });
}

criterion_group!(benches, bench_sequential_scan, bench_parallel_scan);
criterion_main!(benches);
