//! Cycle orchestrator (§4.F): drives populate -> publish -> integrity-check
//! -> validate -> announce, manages version numbers and the delta chain.
//!
//! Grounded on §9 "Stage pipeline": encoded as a single function with
//! explicit stage tags rather than an implicit chain of calls; on the
//! `core::app_state` idiom of one struct owning every collaborator a
//! top-level operation needs, generalised from server wiring to cycle
//! wiring. Events are emitted at stage boundaries through the listener
//! fabric (`crate::listener`), never returned as extra fields bolted onto
//! the `Result`.

use crate::blob::{self, BlobKind};
use crate::delta::{compute_forward_delta, compute_reverse_delta, compute_snapshot};
use crate::error::CycleError;
use crate::interfaces::{Announcer, Publisher};
use crate::listener::{CycleCompleteEvent, ListenerRegistry};
use crate::read::ReadState;
use crate::schema::SchemaSet;
use crate::write::WriteStateEngine;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Mints the version for the next cycle attempt from the last *announced*
/// version. Called fresh every attempt with `self.last_version`, which only
/// advances on a successful announce — so a deterministic (non-time-based)
/// minter naturally returns the same version across retries of a failed
/// cycle, and a wall-clock minter naturally advances because time has
/// passed, matching §4.F's minting rule without any retry bookkeeping in
/// the orchestrator itself.
pub trait VersionMinter: Send + Sync {
    /// Produce the version to attempt next, given the last announced one.
    fn mint(&self, previous: Option<u64>) -> u64;
}

/// Default minter: strictly increasing wall-clock milliseconds.
pub struct WallClockMinter;

impl VersionMinter for WallClockMinter {
    fn mint(&self, previous: Option<u64>) -> u64 {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64;
        match previous {
            Some(p) if now <= p => p + 1,
            _ => now,
        }
    }
}

/// Deterministic minter for tests: each call with a *new* previous value
/// advances by one step; repeated calls with the same previous value are
/// idempotent.
pub struct FixedStepMinter {
    step: AtomicU64,
}

impl FixedStepMinter {
    /// Build a minter starting its first mint at `start`.
    pub fn starting_at(start: u64) -> Self {
        Self { step: AtomicU64::new(start) }
    }
}

impl VersionMinter for FixedStepMinter {
    fn mint(&self, previous: Option<u64>) -> u64 {
        match previous {
            None => self.step.load(Ordering::SeqCst),
            Some(p) => p + 1,
        }
    }
}

/// Drives one dataset's producer cycle (§4.F). Owns the write-side staging
/// arena and the current/previous read states; everything else (population
/// logic, publisher, announcer, the "am I primary" predicate) is supplied
/// per call or at construction so the orchestrator stays a pure state
/// machine over its own fields.
pub struct CycleOrchestrator {
    write: WriteStateEngine,
    prev_read: Option<ReadState>,
    last_version: Option<u64>,
    minter: Box<dyn VersionMinter>,
    listeners: Arc<ListenerRegistry>,
}

impl CycleOrchestrator {
    /// Build a fresh orchestrator over `schema_set`, with no prior read
    /// state (every orchestrator starts a new delta chain until it is given
    /// one, e.g. via [`CycleOrchestrator::restore`]).
    pub fn new(schema_set: Arc<SchemaSet>, minter: Box<dyn VersionMinter>, listeners: Arc<ListenerRegistry>) -> Self {
        listeners.dispatch_data_model_init(&schema_set);
        Self { write: WriteStateEngine::new(schema_set), prev_read: None, last_version: None, minter, listeners }
    }

    /// Restore a prior read state before the first cycle, so the next cycle
    /// joins an existing delta chain instead of starting a new one.
    pub fn restore(&mut self, read_state: ReadState, version: u64) {
        self.listeners.dispatch_restore(version);
        self.prev_read = Some(read_state);
        self.last_version = Some(version);
    }

    /// The write state engine population tasks stage records into.
    pub fn write_state_mut(&mut self) -> &mut WriteStateEngine {
        &mut self.write
    }

    /// The most recently promoted read state, if any cycle has announced yet.
    pub fn current_read_state(&self) -> Option<&ReadState> {
        self.prev_read.as_ref()
    }

    /// Run one cycle (§4.F's full state machine). `is_primary` is the
    /// externally supplied "am I the primary producer" predicate; `populate`
    /// is the user population task, given mutable access to the write state.
    pub fn run_cycle(
        &mut self,
        is_primary: impl FnOnce() -> bool,
        populate: impl FnOnce(&mut WriteStateEngine) -> Result<(), String>,
        publisher: &dyn Publisher,
        announcer: &dyn Announcer,
    ) -> CycleCompleteEvent {
        if !is_primary() {
            self.listeners.dispatch_cycle_skip("NOT_PRIMARY_PRODUCER");
            return CycleCompleteEvent { version: self.last_version.unwrap_or(0), success: true, cause: None };
        }

        let version = self.minter.mint(self.last_version);
        let is_new_chain = self.prev_read.is_none();
        if is_new_chain {
            self.listeners.dispatch_new_delta_chain(version);
        }
        self.listeners.dispatch_cycle_start(version);

        match self.run_staged(version, populate, publisher, announcer) {
            Ok(event) => {
                self.listeners.dispatch_cycle_complete(&event);
                event
            }
            Err(err) => {
                let event = CycleCompleteEvent { version, success: false, cause: Some(err.to_string()) };
                self.listeners.dispatch_cycle_complete(&event);
                event
            }
        }
    }

    fn run_staged(
        &mut self,
        version: u64,
        populate: impl FnOnce(&mut WriteStateEngine) -> Result<(), String>,
        publisher: &dyn Publisher,
        announcer: &dyn Announcer,
    ) -> Result<CycleCompleteEvent, CycleError> {
        // -- POPULATE --
        self.listeners.dispatch_populate_start();
        let populate_timer = self.listeners.start_stage();
        let populate_result =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| populate(&mut self.write)));
        let populate_result = match populate_result {
            Ok(r) => r,
            Err(payload) => Err(panic_message(payload)),
        };
        if let Err(cause) = populate_result {
            // §7: populate failure rolls the write state back to the prior
            // cycle's ghosts. Since nothing was sealed or reset, the staged
            // adds from this failed attempt stay uncommitted in `populated`
            // alongside `prior_populated`; the next attempt's population
            // simply continues from there rather than a hard rollback.
            return Err(CycleError::PopulateFailure(cause));
        }
        self.write.populate_complete();
        let has_changes = self.write.has_any_changes();
        self.listeners.dispatch_populate_complete(populate_timer.elapsed_ms(), has_changes);

        if !has_changes {
            self.write.reset_for_next_cycle();
            self.listeners.dispatch_no_delta_available(self.last_version.unwrap_or(version));
            return Ok(CycleCompleteEvent { version: self.last_version.unwrap_or(version), success: true, cause: None });
        }

        // -- compute snapshot + forward + reverse deltas against R_prev --
        let prev_read = self.prev_read.clone().unwrap_or_else(|| ReadState::empty(self.write.schema_set().clone()));
        let snapshot = compute_snapshot(&self.write);
        let forward = compute_forward_delta(&prev_read, &self.write);
        let reverse = compute_reverse_delta(&prev_read, &self.write);
        self.write.reset_for_next_cycle();

        // -- PUBLISH --
        self.listeners.dispatch_publish_start();
        let schema_set = self.write.schema_set().clone();
        for (kind, delta) in [(BlobKind::Snapshot, &snapshot), (BlobKind::Delta, &forward), (BlobKind::ReverseDelta, &reverse)] {
            let blob = blob::write_blob(kind, version, &schema_set, delta);
            let handle = publisher.stage(&blob).map_err(CycleError::PublishFailure)?;
            publisher.publish(handle).map_err(CycleError::PublishFailure)?;
            self.listeners.dispatch_artifact_publish(kind);
        }

        // -- INTEGRITY CHECK --
        let integrity_timer = self.listeners.start_stage();
        let read_from_write = ReadState::from_write_state(&self.write);
        let read_via_forward = prev_read.apply_delta(&forward);
        let read_prev_via_reverse = read_from_write.apply_delta(&reverse);
        let integrity_ok =
            read_via_forward.equals_logically(&read_from_write) && read_prev_via_reverse.equals_logically(&prev_read);
        self.listeners.dispatch_integrity_check(integrity_ok, integrity_timer.elapsed_ms());
        if !integrity_ok {
            return Err(CycleError::IntegrityFailure("round-trip mismatch between snapshot and delta path".to_string()));
        }

        // -- VALIDATE --
        let status = self.listeners.run_validators(&read_from_write);
        if !status.passed {
            let failed = status.results.iter().filter(|r| !r.is_passed()).count();
            return Err(CycleError::ValidationFailure(failed));
        }

        // -- ANNOUNCE --
        announcer.announce(version).map_err(CycleError::AnnounceFailure)?;
        self.prev_read = Some(read_from_write);
        self.last_version = Some(version);
        self.listeners.dispatch_announcement(version);

        Ok(CycleCompleteEvent { version, success: true, cause: None })
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "population task panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::InMemoryBlobStore;
    use crate::record::{Record, Value};
    use crate::schema::{Field, FieldType, ObjectSchema, Schema};

    fn movie_schemas() -> Arc<SchemaSet> {
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
    fn s1_minimal_cycle_publishes_and_announces() {
        let listeners = Arc::new(ListenerRegistry::new());
        let mut orchestrator =
            CycleOrchestrator::new(movie_schemas(), Box::new(FixedStepMinter::starting_at(1)), listeners);
        let store = InMemoryBlobStore::new();

        let event = orchestrator.run_cycle(
            || true,
            |write| {
                write.add("Movie", Record::Object(vec![Value::Int(1), Value::String("A".into())])).map_err(|e| e.to_string())?;
                write.add("Movie", Record::Object(vec![Value::Int(2), Value::String("B".into())])).map_err(|e| e.to_string())?;
                Ok(())
            },
            &store,
            &store,
        );

        assert!(event.success);
        assert_eq!(event.version, 1);
        assert_eq!(store.current_version(), Some(1));
        let populated = orchestrator.current_read_state().unwrap().type_state("Movie").unwrap().populated_ordinals();
        assert_eq!(populated.iter().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn s3_no_op_cycle_emits_no_delta() {
        let listeners = Arc::new(ListenerRegistry::new());
        let mut orchestrator =
            CycleOrchestrator::new(movie_schemas(), Box::new(FixedStepMinter::starting_at(1)), listeners);
        let store = InMemoryBlobStore::new();

        let populate = |write: &mut WriteStateEngine| {
            write.add("Movie", Record::Object(vec![Value::Int(1), Value::String("A".into())])).map_err(|e| e.to_string())?;
            Ok(())
        };
        let first = orchestrator.run_cycle(|| true, populate, &store, &store);
        assert_eq!(first.version, 1);

        let second = orchestrator.run_cycle(|| true, populate, &store, &store);
        assert!(second.success);
        assert_eq!(second.version, 1); // reused, invariant 5
    }

    #[test]
    fn skip_when_not_primary() {
        let listeners = Arc::new(ListenerRegistry::new());
        let mut orchestrator =
            CycleOrchestrator::new(movie_schemas(), Box::new(FixedStepMinter::starting_at(1)), listeners);
        let store = InMemoryBlobStore::new();
        let event = orchestrator.run_cycle(|| false, |_| Ok(()), &store, &store);
        assert!(event.success);
        assert_eq!(store.current_version(), None);
    }

    #[test]
    fn s4_validator_failure_aborts_without_announce() {
        use crate::listener::{ValidationResultStatus, Validator};
        struct AlwaysFail;
        impl Validator for AlwaysFail {
            fn name(&self) -> &str {
                "fail"
            }
            fn validate(&self, _read_state: &ReadState) -> ValidationResultStatus {
                ValidationResultStatus::Failed("bad".to_string())
            }
        }
        let listeners = Arc::new(ListenerRegistry::new());
        listeners.register_validator(Arc::new(AlwaysFail));
        let mut orchestrator =
            CycleOrchestrator::new(movie_schemas(), Box::new(FixedStepMinter::starting_at(1)), listeners);
        let store = InMemoryBlobStore::new();
        let event = orchestrator.run_cycle(
            || true,
            |write| write.add("Movie", Record::Object(vec![Value::Int(1), Value::String("A".into())])).map(|_| ()).map_err(|e| e.to_string()),
            &store,
            &store,
        );
        assert!(!event.success);
        assert_eq!(store.current_version(), None);
        assert!(orchestrator.current_read_state().is_none());
    }
}
