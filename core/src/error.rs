use crate::types::SnapshotId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Snapshot '{identifier}' not found on the stack")]
    SnapshotNotFound { identifier: String },

    #[error("Snapshot stack is empty")]
    EmptyStack,

    #[error("Nothing to record: no registered root is reachable")]
    NothingToRecord,

    #[error("Snapshot '{name}' is not a delta snapshot")]
    NotADelta { name: String },

    #[error("Rewind never reached target snapshot '{target}'")]
    TargetNotReached { target: String },

    #[error("Delta '{name}' has a nominal base that is not on the stack")]
    BaseNotOnStack { name: String },

    #[error("Cannot import {id}: missing dependencies {missing:?}")]
    MissingDependencies { id: SnapshotId, missing: Vec<SnapshotId> },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type DataResult<T> = Result<T, DataError>;
