//! Snapshot/delta state recording for a live object graph.
//!
//! Register long-lived root objects with a `DataEngine`, record
//! checkpoints as full or delta snapshots, and move the live graph back
//! with `revert_to_snapshot` or `rewind_to_snapshot`.

pub mod algebra;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod game;
pub mod heap;
pub mod record;
pub mod rng;
pub mod snapshot;
pub mod snapshotable;
pub mod transport;
pub mod types;
pub mod value;

pub use config::EngineConfig;
pub use engine::{DataEngine, SnapshotRef};
pub use error::{DataError, DataResult};
pub use heap::Heap;
pub use record::{DeltaRecorder, Record, Recorder, Slot};
pub use snapshot::{Roots, Snapshot, SnapshotKind};
pub use snapshotable::Snapshotable;
pub use transport::{RecordExport, SnapshotExport};
pub use types::{ObjectId, SnapshotId, SnapshotTag, Tick};
pub use value::Value;
