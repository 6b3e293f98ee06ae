//! colonnade - a versioned, in-memory, columnar dataset producer cycle engine.
//!
//! Producers stage records into a write-side arena, and a cycle orchestrator
//! periodically freezes that arena into an immutable, column-packed read
//! state, computes the delta against the previous cycle, publishes
//! snapshot/delta/reverse-delta blobs, and announces the new version once an
//! integrity check and a validator fabric both pass.
#![warn(missing_docs)]

pub mod bitset;
pub mod blob;
pub mod config;
pub mod cycle;
pub mod delta;
pub mod error;
pub mod hash;
pub mod interfaces;
pub mod listener;
pub mod metrics;
pub mod query;
pub mod read;
pub mod record;
pub mod schema;
pub mod varint;
pub mod write;

pub use config::Config;
pub use error::{Error, Result};
pub use record::{Record, Value};

/// Crate version, as set in `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Install the process-wide tracing subscriber and register the metrics
/// registry. Call once at process startup.
pub fn init() {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();
    tracing::info!("initializing {} v{}", NAME, VERSION);
    metrics::init_registry();
}
