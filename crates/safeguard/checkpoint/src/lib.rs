//! # safeguard-checkpoint
//!
//! Point-in-time snapshots of named state components, used as rollback
//! targets.
//!
//! - Snapshots come from a caller-supplied [`StateProvider`]; payloads are
//!   opaque bytes passed through a [`PayloadCodec`] chain (compression,
//!   encryption) before storage.
//! - Every checkpoint carries a BLAKE3 digest over its stored payload. The
//!   digest is re-verified before any restore; a mismatch aborts the
//!   rollback with live state untouched.
//! - Creation and rollback take per-component locks in sorted order, so a
//!   checkpoint never observes a component mid-mutation and a rollback
//!   excludes other actions from the components it restores.
//! - Restores are all-or-nothing per component set: a failed restore
//!   reverts the components already restored and reports exactly what
//!   could not be reconciled.
//! - Automatic checkpoints are pruned by a tiered [`RetentionPolicy`].

#![deny(unsafe_code)]

pub mod codec;
pub mod error;
pub mod locks;
pub mod manager;
pub mod provider;
pub mod retention;
pub mod schedule;
pub mod store;
pub mod types;

pub use codec::{AesGcmCodec, CodecChain, GzipCodec, IdentityCodec, PayloadCodec};
pub use error::{CheckpointError, ProviderError, Result};
pub use locks::{ComponentGuard, ComponentLocks};
pub use manager::{CheckpointConfig, CheckpointManager, CheckpointSpec};
pub use provider::{InMemoryStateProvider, StateProvider};
pub use retention::{plan_eviction, CheckpointMeta, RetentionPolicy};
pub use schedule::ScheduleHandle;
pub use store::{CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore, StoredPayload};
pub use types::{
    Checkpoint, CheckpointFilter, CheckpointId, CheckpointKind, CheckpointSort, ComponentFailure,
    RollbackOptions, RollbackResult, RollbackTarget,
};
