//! Recording store interface.
//!
//! Output streams that serve a recording resolve its PTS bounds through a
//! [`RecordingStore`]. The storage layout behind it is not this crate's
//! concern; [`MemoryRecordingStore`] is a simple map for embedding and tests.

use std::collections::HashMap;

use parking_lot::RwLock;

/// Resolves a recording id (leaf id) to its PTS range in 45 kHz ticks.
pub trait RecordingStore: Send + Sync {
    /// `(start_pts, end_pts)` or `None` if the recording is unknown.
    fn resolve_pts_range(&self, record_id: i64) -> Option<(u32, u32)>;
}

/// In-memory [`RecordingStore`].
#[derive(Debug, Default)]
pub struct MemoryRecordingStore {
    ranges: RwLock<HashMap<i64, (u32, u32)>>,
}

impl MemoryRecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record_id: i64, start_pts: u32, end_pts: u32) {
        self.ranges.write().insert(record_id, (start_pts, end_pts));
        tracing::debug!(record_id, start_pts, end_pts, "recording indexed");
    }

    pub fn remove(&self, record_id: i64) -> bool {
        self.ranges.write().remove(&record_id).is_some()
    }
}

impl RecordingStore for MemoryRecordingStore {
    fn resolve_pts_range(&self, record_id: i64) -> Option<(u32, u32)> {
        self.ranges.read().get(&record_id).copied()
    }
}
