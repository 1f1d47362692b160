use crate::types::CheckpointId;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CheckpointError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("checkpoint not found: {0}")]
    NotFound(CheckpointId),

    #[error("no checkpoints available")]
    NoCheckpoints,

    #[error("checkpoint {id} failed integrity verification: {detail}")]
    Integrity { id: CheckpointId, detail: String },

    #[error("component {component}: {source}")]
    Provider {
        component: String,
        source: ProviderError,
    },

    #[error("checkpoint {id} does not cover component {component}")]
    ComponentNotCovered { id: CheckpointId, component: String },

    #[error("codec error: {0}")]
    Codec(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("rollback failed: restored {restored:?}, failed {failed:?}")]
    RollbackFailed {
        restored: Vec<String>,
        failed: Vec<String>,
    },

    #[error("rollback did not finish within {0:?}")]
    Timeout(std::time::Duration),
}

/// Failure reported by a [`StateProvider`](crate::StateProvider).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("unknown component")]
    UnknownComponent,

    #[error("snapshot failed: {0}")]
    Snapshot(String),

    #[error("restore failed: {0}")]
    Restore(String),
}

pub type Result<T> = std::result::Result<T, CheckpointError>;
