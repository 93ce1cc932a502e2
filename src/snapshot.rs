use arc_swap::ArcSwap;
use std::sync::Arc;

use crate::models::Snapshot;

/// Published-snapshot cell shared between the scan engine (single writer)
/// and the metrics endpoint (concurrent readers). Readers always see one
/// complete cycle's records; a cycle in progress is invisible until its
/// snapshot is installed in a single swap.
pub struct SnapshotStore {
    current: ArcSwap<Snapshot>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(Snapshot::default()),
        }
    }

    pub fn install(&self, snapshot: Snapshot) {
        self.current.store(Arc::new(snapshot));
    }

    /// Never blocks and never fails; before the first completed cycle this
    /// is the empty snapshot.
    pub fn read(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }
}
