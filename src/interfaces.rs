//! External interfaces (§6): the collaborators the cycle orchestrator
//! consumes but does not implement — blob artifact storage, announcement,
//! and restore. Out of scope per §1 beyond these trait boundaries; an
//! in-memory implementation of each is provided here only to drive the CLI
//! harness without a real external store.
//!
//! Grounded on `core::delta_processor::DocumentStorage` for the shape of a
//! storage-agnostic trait boundary the core logic depends on without owning
//! an implementation.

use crate::blob::{Blob, BlobKind};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// An opaque handle to a staged-but-not-yet-published blob (§6 `stage(blob)
/// -> Handle`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlobHandle(pub u64);

/// Consumed by the cycle orchestrator's publish stage. `stage` is expected
/// to be idempotent and retryable by the caller; `publish` makes a
/// previously staged blob externally visible.
pub trait Publisher: Send + Sync {
    /// Stage `blob` for later publication, returning a handle.
    fn stage(&self, blob: &Blob) -> Result<BlobHandle, String>;
    /// Make a previously staged blob externally visible.
    fn publish(&self, handle: BlobHandle) -> Result<(), String>;
}

/// Consumed by the cycle orchestrator's announce stage. `announce` is
/// expected to be atomic: after it returns, every consumer polling the
/// announcement endpoint sees the new version.
pub trait Announcer: Send + Sync {
    /// Announce that `version` is now current.
    fn announce(&self, version: u64) -> Result<(), String>;
}

/// Consumed during optional restore, before the first cycle.
pub trait BlobRetriever: Send + Sync {
    /// Fetch the full snapshot blob for `version`.
    fn retrieve_snapshot(&self, version: u64) -> Result<Vec<u8>, String>;
    /// Fetch the forward-delta blob starting at `from_version`.
    fn retrieve_delta(&self, from_version: u64) -> Result<Vec<u8>, String>;
    /// Fetch the reverse-delta blob starting at `from_version`.
    fn retrieve_reverse_delta(&self, from_version: u64) -> Result<Vec<u8>, String>;
}

/// In-memory `Publisher` + `Announcer` + `BlobRetriever` for the CLI harness
/// and tests — not a substitute for a real artifact store (§1 non-goal).
#[derive(Default)]
pub struct InMemoryBlobStore {
    next_handle: AtomicU64,
    staged: DashMap<u64, Blob>,
    published: DashMap<u64, Blob>,
    current_version: AtomicU64,
}

impl InMemoryBlobStore {
    /// Build an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The version most recently announced, if any.
    pub fn current_version(&self) -> Option<u64> {
        let v = self.current_version.load(Ordering::SeqCst);
        if v == 0 && self.published.is_empty() {
            None
        } else {
            Some(v)
        }
    }

    /// Published blobs whose `kind` matches and whose bytes are retrievable.
    fn find_published(&self, kind: BlobKind) -> Option<Blob> {
        self.published.iter().find(|e| e.value().kind == kind).map(|e| e.value().clone())
    }
}

impl Publisher for InMemoryBlobStore {
    fn stage(&self, blob: &Blob) -> Result<BlobHandle, String> {
        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.staged.insert(handle, blob.clone());
        Ok(BlobHandle(handle))
    }

    fn publish(&self, handle: BlobHandle) -> Result<(), String> {
        let (_, blob) = self.staged.remove(&handle.0).ok_or_else(|| "unknown blob handle".to_string())?;
        self.published.insert(handle.0, blob);
        Ok(())
    }
}

impl Announcer for InMemoryBlobStore {
    fn announce(&self, version: u64) -> Result<(), String> {
        self.current_version.store(version, Ordering::SeqCst);
        Ok(())
    }
}

impl BlobRetriever for InMemoryBlobStore {
    fn retrieve_snapshot(&self, _version: u64) -> Result<Vec<u8>, String> {
        self.find_published(BlobKind::Snapshot).map(|b| b.bytes().to_vec()).ok_or_else(|| "no snapshot staged".to_string())
    }

    fn retrieve_delta(&self, _from_version: u64) -> Result<Vec<u8>, String> {
        self.find_published(BlobKind::Delta).map(|b| b.bytes().to_vec()).ok_or_else(|| "no delta staged".to_string())
    }

    fn retrieve_reverse_delta(&self, _from_version: u64) -> Result<Vec<u8>, String> {
        self.find_published(BlobKind::ReverseDelta)
            .map(|b| b.bytes().to_vec())
            .ok_or_else(|| "no reverse delta staged".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::DeltaSet;

    #[test]
    fn stage_then_publish_makes_blob_retrievable() {
        let store = InMemoryBlobStore::new();
        let blob = crate::blob::write_blob(
            BlobKind::Snapshot,
            1,
            &crate::schema::SchemaSet::new(vec![]).unwrap(),
            &DeltaSet::default(),
        );
        let handle = store.stage(&blob).unwrap();
        assert!(store.retrieve_snapshot(1).is_err());
        store.publish(handle).unwrap();
        assert!(store.retrieve_snapshot(1).is_ok());
    }

    #[test]
    fn announce_updates_current_version() {
        let store = InMemoryBlobStore::new();
        assert_eq!(store.current_version(), None);
        store.announce(7).unwrap();
        assert_eq!(store.current_version(), Some(7));
    }
}
