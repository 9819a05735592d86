//! In-memory collecting sink.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::dispatch::DataSink;
use crate::schema::Schema;
use crate::types::Snapshot;

#[derive(Debug, Default)]
struct MemorySinkState {
    schemas: BTreeMap<u64, Schema>,
    snapshot_counts: BTreeMap<u64, u64>,
    latest: Option<Snapshot>,
}

/// A sink that records everything it receives, for tests and in-process
/// inspection.
///
/// Keeps every announced schema (keyed by hash), a per-hash snapshot
/// count, and the latest snapshot seen. All accessors take `&self`; the
/// sink is safe to share between channels.
#[derive(Debug, Default)]
pub struct MemorySink {
    state: Mutex<MemorySinkState>,
}

impl MemorySink {
    /// An empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct schemas announced to this sink.
    pub fn schema_count(&self) -> usize {
        self.lock().schemas.len()
    }

    /// The announced schema with the given hash, if any.
    pub fn schema(&self, hash: u64) -> Option<Schema> {
        self.lock().schemas.get(&hash).cloned()
    }

    /// Hashes of every announced schema, in ascending order.
    pub fn schema_hashes(&self) -> Vec<u64> {
        self.lock().schemas.keys().copied().collect()
    }

    /// Snapshots received under the given schema hash.
    pub fn snapshot_count(&self, hash: u64) -> u64 {
        self.lock()
            .snapshot_counts
            .get(&hash)
            .copied()
            .unwrap_or(0)
    }

    /// Snapshots received across all schemas.
    pub fn total_snapshots(&self) -> u64 {
        self.lock().snapshot_counts.values().sum()
    }

    /// The most recently received snapshot.
    pub fn latest_snapshot(&self) -> Option<Snapshot> {
        self.lock().latest.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemorySinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DataSink for MemorySink {
    fn add_channel(&self, schema: &Schema) {
        self.lock().schemas.insert(schema.hash, schema.clone());
    }

    fn push_snapshot(&self, snapshot: &Snapshot) -> bool {
        let mut state = self.lock();
        *state
            .snapshot_counts
            .entry(snapshot.schema_hash)
            .or_insert(0) += 1;
        state.latest = Some(snapshot.clone());
        true
    }
}
