//! colonnade CLI harness - drives a handful of cycles of a toy schema
//! against an in-memory blob store, logging each stage event.
//!
//! Not a server: this exists to demo the cycle orchestrator end to end
//! without a real blob store, announcer, or consumer.

use anyhow::Context;
use clap::Parser;
use colonnade::config::Config;
use colonnade::cycle::{CycleOrchestrator, FixedStepMinter, WallClockMinter};
use colonnade::interfaces::InMemoryBlobStore;
use colonnade::listener::ListenerRegistry;
use colonnade::record::{Record, Value};
use colonnade::schema::{Field, FieldType, ObjectSchema, Schema, SchemaSet};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "colonnade", version, about = "Versioned columnar dataset producer cycle demo")]
struct Cli {
    /// Configuration file path (TOML).
    #[arg(short, long)]
    config: Option<String>,

    /// Number of cycles to run before exiting.
    #[arg(short = 'n', long, default_value_t = 3)]
    cycles: u32,
}

fn toy_schema() -> anyhow::Result<Arc<SchemaSet>> {
    let schema_set = SchemaSet::new(vec![Schema::Object(ObjectSchema {
        name: "Movie".to_string(),
        fields: vec![
            Field { name: "id".to_string(), field_type: FieldType::Int },
            Field { name: "title".to_string(), field_type: FieldType::String },
        ],
        primary_key: Some(vec!["id".to_string()]),
    })])
    .context("building the demo Movie schema")?;
    Ok(Arc::new(schema_set))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    colonnade::init();

    let config = Config::load_or_default(cli.config.as_deref()).unwrap_or_else(|err| {
        tracing::warn!("failed to load configuration: {err}, using defaults");
        Config::default()
    });
    let schema_set = toy_schema().context("failed to build demo schema")?;

    let minter: Box<dyn colonnade::cycle::VersionMinter> = match config.cycle.version_minting_mode.as_str() {
        "fixed_step" => Box::new(FixedStepMinter::starting_at(config.cycle.fixed_step_start)),
        _ => Box::new(WallClockMinter),
    };

    let listeners = Arc::new(ListenerRegistry::new());
    let store = InMemoryBlobStore::new();
    let mut orchestrator = CycleOrchestrator::new(schema_set, minter, listeners);

    for i in 0..cli.cycles {
        let ordinal_base = i * 2;
        let event = orchestrator.run_cycle(
            || true,
            move |write| {
                write
                    .add(
                        "Movie",
                        Record::Object(vec![Value::Int(ordinal_base as i32), Value::String(format!("Movie {}", ordinal_base))]),
                    )
                    .map(|_| ())
                    .map_err(|e| e.to_string())?;
                write
                    .add(
                        "Movie",
                        Record::Object(vec![
                            Value::Int(ordinal_base as i32 + 1),
                            Value::String(format!("Movie {}", ordinal_base + 1)),
                        ]),
                    )
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            },
            &store,
            &store,
        );
        info!(cycle = i, version = event.version, success = event.success, cause = ?event.cause, "cycle complete");
    }

    info!("done, current version: {:?}", store.current_version());
    Ok(())
}
