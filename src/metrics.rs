//! Cycle and query metrics, in the teacher's `prometheus` + `once_cell`
//! global-registry style (`system::metrics`).
//!
//! Registered once behind a `Lazy<Registry>`; stage durations are fed from
//! `listener::StageTimer::elapsed_ms()` rather than re-timed here.

use crate::error::Result;
use once_cell::sync::Lazy;
use prometheus::{register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter, IntGauge, Registry};

/// Cycle-level counters and gauges.
pub struct CycleMetrics {
    /// Cycles started.
    pub cycles_started: IntCounter,
    /// Cycles that announced successfully.
    pub cycles_completed: IntCounter,
    /// Cycles skipped because this producer wasn't primary.
    pub cycles_skipped: IntCounter,
    /// Cycles that failed some stage before announce.
    pub cycles_failed: IntCounter,
    /// Most recently announced version.
    pub current_version: IntGauge,
    /// Number of populated ordinals added in the last delta.
    pub last_delta_size: IntGauge,
    /// Duration of the populate stage.
    pub populate_duration_ms: Histogram,
    /// Duration of the integrity-check stage.
    pub integrity_duration_ms: Histogram,
}

/// Query-engine counters.
pub struct QueryMetrics {
    /// Queries served (sequential or parallel).
    pub queries_total: IntCounter,
    /// Matching ordinals returned, summed across queries.
    pub matches_total: IntCounter,
}

/// All registered metrics, built once.
pub struct Metrics {
    /// Cycle orchestrator metrics.
    pub cycle: CycleMetrics,
    /// Query engine metrics.
    pub query: QueryMetrics,
}

impl Metrics {
    fn new() -> Result<Self> {
        Ok(Self {
            cycle: CycleMetrics {
                cycles_started: register_int_counter!("colonnade_cycles_started_total", "Cycles started")?,
                cycles_completed: register_int_counter!("colonnade_cycles_completed_total", "Cycles that announced")?,
                cycles_skipped: register_int_counter!("colonnade_cycles_skipped_total", "Cycles skipped (not primary)")?,
                cycles_failed: register_int_counter!("colonnade_cycles_failed_total", "Cycles that failed before announce")?,
                current_version: register_int_gauge!("colonnade_current_version", "Most recently announced version")?,
                last_delta_size: register_int_gauge!("colonnade_last_delta_size", "Ordinals touched by the last delta")?,
                populate_duration_ms: register_histogram!(
                    "colonnade_populate_duration_ms",
                    "Populate stage duration in milliseconds",
                    vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0]
                )?,
                integrity_duration_ms: register_histogram!(
                    "colonnade_integrity_duration_ms",
                    "Integrity-check stage duration in milliseconds",
                    vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0]
                )?,
            },
            query: QueryMetrics {
                queries_total: register_int_counter!("colonnade_queries_total", "Queries served")?,
                matches_total: register_int_counter!("colonnade_query_matches_total", "Matching ordinals returned")?,
            },
        })
    }

    /// The global metrics instance, registered on first access.
    pub fn global() -> &'static Metrics {
        static INSTANCE: Lazy<Metrics> = Lazy::new(|| Metrics::new().expect("failed to register metrics"));
        &INSTANCE
    }
}

/// Force registration of the global metrics instance.
pub fn init_registry() {
    let _ = Metrics::global();
}

/// The Prometheus registry backing [`Metrics::global`] — the process-wide
/// default registry the `register_*!` macros target.
pub fn registry() -> &'static Registry {
    prometheus::default_registry()
}

/// Render all registered metrics in Prometheus text-exposition format.
pub fn collect_metrics() -> String {
    let encoder = prometheus::TextEncoder::new();
    let families = registry().gather();
    encoder.encode_to_string(&families).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_registers_once() {
        init_registry();
        Metrics::global().cycle.cycles_started.inc();
        assert!(collect_metrics().contains("colonnade_cycles_started_total"));
    }
}
