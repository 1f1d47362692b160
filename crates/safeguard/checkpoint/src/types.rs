use crate::error::{CheckpointError, Result};
use crate::retention::CheckpointMeta;
use chrono::{DateTime, Utc};
use safeguard_types::ContentHash;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

/// Monotonically increasing checkpoint identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointId(pub u64);

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cp-{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointKind {
    /// Created on explicit request; exempt from tiered pruning.
    Manual,
    Automatic,
    Scheduled,
    EventTriggered,
}

impl CheckpointKind {
    pub fn is_manual(&self) -> bool {
        matches!(self, Self::Manual)
    }
}

impl fmt::Display for CheckpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Automatic => write!(f, "automatic"),
            Self::Scheduled => write!(f, "scheduled"),
            Self::EventTriggered => write!(f, "event_triggered"),
        }
    }
}

/// Checkpoint metadata. The payload itself lives in the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: CheckpointId,
    pub name: String,
    pub description: String,
    pub kind: CheckpointKind,
    pub created_at: DateTime<Utc>,
    pub components: BTreeSet<String>,
    /// BLAKE3 over every stored (encoded) component payload.
    pub digest: ContentHash,
    pub component_digests: BTreeMap<String, ContentHash>,
    /// Total stored payload size in bytes.
    pub size_bytes: u64,
    /// Codec chain the payload was encoded with.
    pub codec: String,
}

impl Checkpoint {
    pub fn meta(&self) -> CheckpointMeta {
        CheckpointMeta {
            id: self.id,
            kind: self.kind,
            created_at: self.created_at,
        }
    }

    pub fn covers(&self, component: &str) -> bool {
        self.components.contains(component)
    }
}

/// Selects checkpoints in [`list_checkpoints`](crate::CheckpointManager::list_checkpoints).
#[derive(Clone, Debug, Default)]
pub struct CheckpointFilter {
    pub kinds: Option<Vec<CheckpointKind>>,
    pub component: Option<String>,
    pub name_prefix: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

impl CheckpointFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: CheckpointKind) -> Self {
        self.kinds.get_or_insert_with(Vec::new).push(kind);
        self
    }

    pub fn component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = Some(prefix.into());
        self
    }

    pub fn created_after(mut self, at: DateTime<Utc>) -> Self {
        self.created_after = Some(at);
        self
    }

    pub fn created_before(mut self, at: DateTime<Utc>) -> Self {
        self.created_before = Some(at);
        self
    }

    pub fn matches(&self, checkpoint: &Checkpoint) -> bool {
        self.kinds.as_ref().map_or(true, |k| k.contains(&checkpoint.kind))
            && self.component.as_ref().map_or(true, |c| checkpoint.covers(c))
            && self
                .name_prefix
                .as_ref()
                .map_or(true, |p| checkpoint.name.starts_with(p.as_str()))
            && self.created_after.map_or(true, |t| checkpoint.created_at > t)
            && self.created_before.map_or(true, |t| checkpoint.created_at < t)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CheckpointSort {
    #[default]
    NewestFirst,
    OldestFirst,
    Name,
}

/// Options for [`rollback_to_checkpoint`](crate::CheckpointManager::rollback_to_checkpoint).
#[derive(Clone, Debug, PartialEq)]
pub struct RollbackOptions {
    /// Restrict the rollback to these components; all covered components
    /// when `None`.
    pub components: Option<Vec<String>>,
    /// Also verify each component digest (naming the corrupt component)
    /// before the combined digest, which is always verified.
    pub verify_integrity: bool,
    /// Checkpoint the current state of the selected components first.
    pub create_pre_rollback_checkpoint: bool,
}

impl Default for RollbackOptions {
    fn default() -> Self {
        Self {
            components: None,
            verify_integrity: true,
            create_pre_rollback_checkpoint: false,
        }
    }
}

impl RollbackOptions {
    pub fn components<I, S>(mut self, components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.components = Some(components.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_pre_rollback_checkpoint(mut self) -> Self {
        self.create_pre_rollback_checkpoint = true;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RollbackTarget {
    Latest,
    Checkpoint(CheckpointId),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentFailure {
    pub component: String,
    pub reason: String,
}

/// What a rollback did, component by component.
///
/// On failure every selected component appears in exactly one of
/// `restored`, `reverted`, `unreconciled` or `not_attempted`; components in
/// `failed` additionally carry the restore error. A result marked
/// `in_progress` lists every selected component in `pending` instead.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RollbackResult {
    pub checkpoint: Option<CheckpointId>,
    pub success: bool,
    /// The restore outlived its deadline and is still running; see
    /// `pending`.
    pub in_progress: bool,
    /// Components whose restore was still running when the result was
    /// returned.
    pub pending: Vec<String>,
    /// Components now holding the checkpoint state.
    pub restored: Vec<String>,
    pub failed: Vec<ComponentFailure>,
    /// Components put back to their pre-rollback state after a failure.
    pub reverted: Vec<String>,
    /// Components whose state could not be reconciled and need an operator.
    pub unreconciled: Vec<String>,
    pub not_attempted: Vec<String>,
    pub pre_rollback_checkpoint: Option<CheckpointId>,
    pub duration: Duration,
    pub error: Option<String>,
}

impl RollbackResult {
    pub(crate) fn aborted(checkpoint: Option<CheckpointId>, error: impl Into<String>, duration: Duration) -> Self {
        Self {
            checkpoint,
            success: false,
            in_progress: false,
            pending: Vec::new(),
            restored: Vec::new(),
            failed: Vec::new(),
            reverted: Vec::new(),
            unreconciled: Vec::new(),
            not_attempted: Vec::new(),
            pre_rollback_checkpoint: None,
            duration,
            error: Some(error.into()),
        }
    }

    /// Convert a failed rollback into [`CheckpointError::RollbackFailed`].
    pub fn into_result(self) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(CheckpointError::RollbackFailed {
                restored: self.restored,
                failed: self
                    .failed
                    .into_iter()
                    .map(|f| f.component)
                    .chain(self.unreconciled)
                    .collect(),
            })
        }
    }
}
