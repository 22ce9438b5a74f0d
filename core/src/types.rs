//! Shared primitive types used across the entire engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// A simulation tick. One tick = one step of the idle loop.
pub type Tick = u64;

/// Opaque per-snapshot tag. Unique per snapshot, never reused.
pub type SnapshotTag = uuid::Uuid;

/// Handle to one trackable object in the live graph.
/// Identity is the handle, never the object's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub u32);

impl ObjectId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Integer snapshot id carried across the transport boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(pub u64);

// Process-wide so main and worker contexts never hand out the same id.
static NEXT_SNAPSHOT_ID: AtomicU64 = AtomicU64::new(1);

impl SnapshotId {
    pub fn next() -> Self {
        Self(NEXT_SNAPSHOT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "snapshot-{}", self.0)
    }
}
