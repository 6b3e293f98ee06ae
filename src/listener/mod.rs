//! Listener/validator fabric (§4.G): registers heterogeneous stage
//! subscribers and dispatches typed events without letting one subscriber's
//! panic affect the others.
//!
//! Grounded on `core::delta_processor`'s trait-based storage abstraction for
//! the "role trait, caller registers against it" shape, generalised to the
//! nine stage roles §4.G names. The registration set itself is copy-on-write
//! (§5: "add/remove race-free with concurrent dispatch") via `arc_swap`,
//! mirroring the immutable-read-state swap the cycle orchestrator already
//! does for `R_prev -> R_new`.

use crate::read::ReadState;
use crate::schema::SchemaSet;
use arc_swap::ArcSwap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

/// One validator's verdict (§4.F `ValidationResult`). `Error` is distinct
/// from `Failed` per the open question in §9: `Failed` is a validator's own
/// considered judgement that the data is bad; `Error` is the validator
/// itself misbehaving (panicking) and is recorded rather than propagated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResultStatus {
    /// The validator inspected the state and approved it.
    Passed,
    /// The validator inspected the state and rejected it, with a reason.
    Failed(String),
    /// The validator panicked during validation; the panic message is kept.
    Error(String),
}

/// A single validator's result, named for log/report attribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    /// Validator name, for reporting.
    pub name: String,
    /// The validator's verdict.
    pub status: ValidationResultStatus,
}

impl ValidationResult {
    /// Whether this single result is `Passed`.
    pub fn is_passed(&self) -> bool {
        matches!(self.status, ValidationResultStatus::Passed)
    }
}

/// The aggregate of every registered validator's result for one cycle (§4.F
/// `ValidationStatus`). Invariant 7: `passed ⇔ ∀r ∈ results: r.status = Passed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationStatus {
    /// Every validator's result, in registration order.
    pub results: Vec<ValidationResult>,
    /// Whether every result passed.
    pub passed: bool,
}

impl ValidationStatus {
    fn from_results(results: Vec<ValidationResult>) -> Self {
        let passed = results.iter().all(|r| r.is_passed());
        Self { results, passed }
    }
}

/// Outcome of one cycle, carried by `CycleComplete` regardless of success
/// (§4.F: "cycle completion status is always fired, carrying success or the
/// first fatal cause").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleCompleteEvent {
    /// The version this cycle produced (or reused, on `NoDelta`/skip).
    pub version: u64,
    /// Whether the cycle completed successfully.
    pub success: bool,
    /// The first fatal cause, if the cycle failed.
    pub cause: Option<String>,
}

/// A `*Start`/`*Complete` pairing helper (§4.G: "every `*Start` event returns
/// a status builder capturing `startNanos`"). Each stage's start hook returns
/// one of these; its matching complete hook consumes it to compute elapsed
/// milliseconds.
pub struct StageTimer {
    start: Instant,
}

impl StageTimer {
    fn start() -> Self {
        Self { start: Instant::now() }
    }

    /// Milliseconds elapsed since this timer was started.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

/// Listener for data-model initialisation (schema set construction).
pub trait DataModelInitListener: Send + Sync {
    /// Fired once, when the schema set is finalised.
    fn on_data_model_init(&self, schema_set: &SchemaSet);
}

/// Listener for restore-from-blobs (not exercised by the in-memory harness,
/// but part of the role set per §4.G).
pub trait RestoreListener: Send + Sync {
    /// Fired when a prior read state is restored before the first cycle.
    fn on_restore(&self, version: u64);
}

/// Listener for cycle-level start/complete/skip events.
pub trait CycleListener: Send + Sync {
    /// Fired at `CYCLE_START`.
    fn on_cycle_start(&self, version: u64) {
        let _ = version;
    }
    /// Fired when a new delta chain begins (§4.F "no prior read state exists").
    fn on_new_delta_chain(&self, version: u64) {
        let _ = version;
    }
    /// Fired when the orchestrator is not the primary producer at entry.
    fn on_cycle_skip(&self, reason: &str) {
        let _ = reason;
    }
    /// Fired at `CYCLE_COMPLETE`, always, carrying the final outcome.
    fn on_cycle_complete(&self, event: &CycleCompleteEvent) {
        let _ = event;
    }
}

/// Listener for the populate stage.
pub trait PopulateListener: Send + Sync {
    /// Fired before the user population task runs.
    fn on_populate_start(&self) {}
    /// Fired after population, with elapsed time and whether any type changed.
    fn on_populate_complete(&self, elapsed_ms: f64, has_changes: bool) {
        let _ = (elapsed_ms, has_changes);
    }
    /// Fired instead of publish/announce when no type changed this cycle.
    fn on_no_delta_available(&self, version: u64) {
        let _ = version;
    }
}

/// Listener for the publish stage.
pub trait PublishListener: Send + Sync {
    /// Fired before blobs are staged.
    fn on_publish_start(&self) {}
    /// Fired once per staged blob.
    fn on_artifact_publish(&self, kind: crate::blob::BlobKind) {
        let _ = kind;
    }
}

/// Listener for the integrity-check stage.
pub trait IntegrityCheckListener: Send + Sync {
    /// Fired after the round-trip check, with the verdict.
    fn on_integrity_check(&self, passed: bool, elapsed_ms: f64) {
        let _ = (passed, elapsed_ms);
    }
}

/// Listener for the announce stage.
pub trait AnnouncementListener: Send + Sync {
    /// Fired after a successful `Announcer::announce`.
    fn on_announcement(&self, version: u64) {
        let _ = version;
    }
}

/// A registered validator (§4.F "invoke each registered validator with the
/// new read state").
pub trait Validator: Send + Sync {
    /// Human-readable name for the result report.
    fn name(&self) -> &str;
    /// Inspect `read_state` and return Pass/Fail. Panicking is caught by the
    /// fabric and recorded as `ValidationResultStatus::Error`.
    fn validate(&self, read_state: &ReadState) -> ValidationResultStatus;
}

/// Listener for the aggregated validation status.
pub trait ValidationStatusListener: Send + Sync {
    /// Fired once per cycle with every validator's result.
    fn on_validation_status(&self, status: &ValidationStatus) {
        let _ = status;
    }
}

/// One concurrent registration set per role, each swapped as a whole vector
/// on register/unregister (§5 "copy-on-write"). A listener implementing
/// several roles is registered once per applicable role with `register_*`;
/// all clones share the same underlying `Arc`.
#[derive(Default)]
pub struct ListenerRegistry {
    data_model_init: ArcSwap<Vec<Arc<dyn DataModelInitListener>>>,
    restore: ArcSwap<Vec<Arc<dyn RestoreListener>>>,
    cycle: ArcSwap<Vec<Arc<dyn CycleListener>>>,
    populate: ArcSwap<Vec<Arc<dyn PopulateListener>>>,
    publish: ArcSwap<Vec<Arc<dyn PublishListener>>>,
    integrity: ArcSwap<Vec<Arc<dyn IntegrityCheckListener>>>,
    announcement: ArcSwap<Vec<Arc<dyn AnnouncementListener>>>,
    validators: ArcSwap<Vec<Arc<dyn Validator>>>,
    validation_status: ArcSwap<Vec<Arc<dyn ValidationStatusListener>>>,
}

macro_rules! register_fn {
    ($name:ident, $field:ident, $trait:path) => {
        /// Register a listener against this role; it starts receiving the
        /// next event onward.
        pub fn $name(&self, listener: Arc<dyn $trait>) {
            let mut next = (**self.$field.load()).clone();
            next.push(listener);
            self.$field.store(Arc::new(next));
        }
    };
}

impl ListenerRegistry {
    /// Build an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    register_fn!(register_data_model_init, data_model_init, DataModelInitListener);
    register_fn!(register_restore, restore, RestoreListener);
    register_fn!(register_cycle, cycle, CycleListener);
    register_fn!(register_populate, populate, PopulateListener);
    register_fn!(register_publish, publish, PublishListener);
    register_fn!(register_integrity, integrity, IntegrityCheckListener);
    register_fn!(register_announcement, announcement, AnnouncementListener);
    register_fn!(register_validator, validators, Validator);
    register_fn!(register_validation_status, validation_status, ValidationStatusListener);

    /// Begin a stage; returns the timer its `*Complete` dispatch consumes.
    pub fn start_stage(&self) -> StageTimer {
        StageTimer::start()
    }

    /// Dispatch `on_data_model_init` to every registered listener, isolating panics.
    pub fn dispatch_data_model_init(&self, schema_set: &SchemaSet) {
        for listener in self.data_model_init.load().iter() {
            dispatch_isolated("data_model_init", || listener.on_data_model_init(schema_set));
        }
    }

    /// Dispatch `on_restore`.
    pub fn dispatch_restore(&self, version: u64) {
        for listener in self.restore.load().iter() {
            dispatch_isolated("restore", || listener.on_restore(version));
        }
    }

    /// Dispatch `on_cycle_start`.
    pub fn dispatch_cycle_start(&self, version: u64) {
        for listener in self.cycle.load().iter() {
            dispatch_isolated("cycle_start", || listener.on_cycle_start(version));
        }
    }

    /// Dispatch `on_new_delta_chain`.
    pub fn dispatch_new_delta_chain(&self, version: u64) {
        for listener in self.cycle.load().iter() {
            dispatch_isolated("new_delta_chain", || listener.on_new_delta_chain(version));
        }
    }

    /// Dispatch `on_cycle_skip`.
    pub fn dispatch_cycle_skip(&self, reason: &str) {
        for listener in self.cycle.load().iter() {
            dispatch_isolated("cycle_skip", || listener.on_cycle_skip(reason));
        }
    }

    /// Dispatch `on_cycle_complete`. Always fired (§4.F).
    pub fn dispatch_cycle_complete(&self, event: &CycleCompleteEvent) {
        for listener in self.cycle.load().iter() {
            dispatch_isolated("cycle_complete", || listener.on_cycle_complete(event));
        }
    }

    /// Dispatch `on_populate_start`.
    pub fn dispatch_populate_start(&self) {
        for listener in self.populate.load().iter() {
            dispatch_isolated("populate_start", || listener.on_populate_start());
        }
    }

    /// Dispatch `on_populate_complete`.
    pub fn dispatch_populate_complete(&self, elapsed_ms: f64, has_changes: bool) {
        for listener in self.populate.load().iter() {
            dispatch_isolated("populate_complete", || listener.on_populate_complete(elapsed_ms, has_changes));
        }
    }

    /// Dispatch `on_no_delta_available`.
    pub fn dispatch_no_delta_available(&self, version: u64) {
        for listener in self.populate.load().iter() {
            dispatch_isolated("no_delta_available", || listener.on_no_delta_available(version));
        }
    }

    /// Dispatch `on_publish_start`.
    pub fn dispatch_publish_start(&self) {
        for listener in self.publish.load().iter() {
            dispatch_isolated("publish_start", || listener.on_publish_start());
        }
    }

    /// Dispatch `on_artifact_publish`.
    pub fn dispatch_artifact_publish(&self, kind: crate::blob::BlobKind) {
        for listener in self.publish.load().iter() {
            dispatch_isolated("artifact_publish", || listener.on_artifact_publish(kind));
        }
    }

    /// Dispatch `on_integrity_check`.
    pub fn dispatch_integrity_check(&self, passed: bool, elapsed_ms: f64) {
        for listener in self.integrity.load().iter() {
            dispatch_isolated("integrity_check", || listener.on_integrity_check(passed, elapsed_ms));
        }
    }

    /// Dispatch `on_announcement`.
    pub fn dispatch_announcement(&self, version: u64) {
        for listener in self.announcement.load().iter() {
            dispatch_isolated("announcement", || listener.on_announcement(version));
        }
    }

    /// Invoke every registered validator against `read_state`, isolating
    /// panics as `Error` results, then dispatch the aggregate to
    /// validation-status listeners (§4.F, invariant 7).
    pub fn run_validators(&self, read_state: &ReadState) -> ValidationStatus {
        let validators = self.validators.load();
        let mut results = Vec::with_capacity(validators.len());
        for validator in validators.iter() {
            let name = validator.name().to_string();
            let status = catch_unwind(AssertUnwindSafe(|| validator.validate(read_state))).unwrap_or_else(|payload| {
                let message = panic_message(payload);
                tracing::warn!(validator = %name, error = %message, "validator panicked, recording as error");
                ValidationResultStatus::Error(message)
            });
            results.push(ValidationResult { name, status });
        }
        let status = ValidationStatus::from_results(results);
        for listener in self.validation_status.load().iter() {
            dispatch_isolated("validation_status", || listener.on_validation_status(&status));
        }
        status
    }
}

fn dispatch_isolated(role: &str, f: impl FnOnce() + std::panic::UnwindSafe) {
    if let Err(payload) = catch_unwind(f) {
        let message = panic_message(payload);
        tracing::warn!(role, error = %message, "listener panicked during dispatch, isolating");
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "listener panicked with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCycleListener {
        starts: AtomicUsize,
        completes: AtomicUsize,
    }

    impl CycleListener for CountingCycleListener {
        fn on_cycle_start(&self, _version: u64) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }
        fn on_cycle_complete(&self, _event: &CycleCompleteEvent) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct ThrowingCycleListener;
    impl CycleListener for ThrowingCycleListener {
        fn on_cycle_start(&self, _version: u64) {
            panic!("boom");
        }
    }

    #[test]
    fn listener_isolation_invariant_6() {
        let registry = ListenerRegistry::new();
        let throwing = Arc::new(ThrowingCycleListener);
        let counting = Arc::new(CountingCycleListener { starts: AtomicUsize::new(0), completes: AtomicUsize::new(0) });
        registry.register_cycle(throwing);
        registry.register_cycle(counting.clone());

        registry.dispatch_cycle_start(1);
        assert_eq!(counting.starts.load(Ordering::SeqCst), 1);

        // Throwing listener keeps receiving future events too.
        registry.dispatch_cycle_start(2);
        assert_eq!(counting.starts.load(Ordering::SeqCst), 2);
    }

    struct AlwaysPass;
    impl Validator for AlwaysPass {
        fn name(&self) -> &str {
            "always-pass"
        }
        fn validate(&self, _read_state: &ReadState) -> ValidationResultStatus {
            ValidationResultStatus::Passed
        }
    }

    struct AlwaysFail;
    impl Validator for AlwaysFail {
        fn name(&self) -> &str {
            "always-fail"
        }
        fn validate(&self, _read_state: &ReadState) -> ValidationResultStatus {
            ValidationResultStatus::Failed("bad".to_string())
        }
    }

    #[test]
    fn validation_aggregation_invariant_7() {
        let schemas = Arc::new(SchemaSet::new(vec![]).unwrap());
        let read_state = ReadState::empty(schemas);
        let registry = ListenerRegistry::new();
        registry.register_validator(Arc::new(AlwaysPass));
        registry.register_validator(Arc::new(AlwaysFail));
        let status = registry.run_validators(&read_state);
        assert_eq!(status.results.len(), 2);
        assert!(!status.passed);
    }
}
