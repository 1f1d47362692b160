//! Checkpoint creation, listing and rollback.
//!
//! A rollback verifies integrity before it takes any component lock, and
//! compensates every touched component if a restore fails partway.
//! Checkpoints created by a running operation are pinned against retention
//! until that operation hands them back.

use crate::codec::CodecChain;
use crate::error::{CheckpointError, Result};
use crate::locks::{ComponentGuard, ComponentLocks};
use crate::provider::StateProvider;
use crate::retention::{plan_eviction, RetentionPolicy};
use crate::store::{CheckpointStore, StoredPayload};
use crate::types::{
    Checkpoint, CheckpointFilter, CheckpointId, CheckpointKind, CheckpointSort, ComponentFailure,
    RollbackOptions, RollbackResult, RollbackTarget,
};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use safeguard_types::ContentHash;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Clone, Debug, PartialEq, Default)]
pub struct CheckpointConfig {
    pub retention: RetentionPolicy,
    /// Require a compressing codec in the chain.
    pub compression: bool,
    /// Require an encrypting codec in the chain.
    pub encryption: bool,
}

impl CheckpointConfig {
    pub fn validate(&self, codec: &CodecChain) -> Result<()> {
        self.retention.validate()?;
        if self.compression && !codec.compresses() {
            return Err(CheckpointError::Configuration(
                "compression enabled but no compressing codec configured".into(),
            ));
        }
        if self.encryption && !codec.encrypts() {
            return Err(CheckpointError::Configuration(
                "encryption enabled but no encrypting codec configured".into(),
            ));
        }
        Ok(())
    }
}

/// Request to create a checkpoint.
#[derive(Clone, Debug, PartialEq)]
pub struct CheckpointSpec {
    pub name: String,
    pub description: String,
    pub kind: CheckpointKind,
    pub components: Vec<String>,
}

impl CheckpointSpec {
    pub fn new(name: impl Into<String>, kind: CheckpointKind) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            kind,
            components: Vec::new(),
        }
    }

    pub fn manual(name: impl Into<String>) -> Self {
        Self::new(name, CheckpointKind::Manual)
    }

    pub fn automatic(name: impl Into<String>) -> Self {
        Self::new(name, CheckpointKind::Automatic)
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn components<I, S>(mut self, components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.components = components.into_iter().map(Into::into).collect();
        self
    }
}

/// Creates, lists and restores checkpoints of provider-owned components.
pub struct CheckpointManager {
    provider: Arc<dyn StateProvider>,
    store: Arc<dyn CheckpointStore>,
    codec: CodecChain,
    config: CheckpointConfig,
    locks: Arc<ComponentLocks>,
    index: RwLock<BTreeMap<CheckpointId, Checkpoint>>,
    next_id: AtomicU64,
    retention_lock: tokio::sync::Mutex<()>,
    /// Checkpoints an operation still has to hand back; retention skips them.
    pinned: Mutex<BTreeSet<CheckpointId>>,
}

impl CheckpointManager {
    /// Open a manager over `store`, indexing the checkpoints it already
    /// holds. New ids continue after the highest stored id.
    pub async fn open(
        provider: Arc<dyn StateProvider>,
        store: Arc<dyn CheckpointStore>,
        codec: CodecChain,
        config: CheckpointConfig,
    ) -> Result<Self> {
        config.validate(&codec)?;
        let index: BTreeMap<_, _> = store
            .list()
            .await?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();
        let next_id = index.keys().next_back().map_or(1, |id| id.0 + 1);
        info!(
            checkpoints = index.len(),
            codec = codec.name(),
            "Checkpoint manager opened"
        );
        Ok(Self {
            provider,
            store,
            codec,
            config,
            locks: Arc::new(ComponentLocks::new()),
            index: RwLock::new(index),
            next_id: AtomicU64::new(next_id),
            retention_lock: tokio::sync::Mutex::new(()),
            pinned: Mutex::new(BTreeSet::new()),
        })
    }

    pub fn config(&self) -> &CheckpointConfig {
        &self.config
    }

    pub fn codec(&self) -> &CodecChain {
        &self.codec
    }

    /// Component locks shared with permitted actions.
    pub fn locks(&self) -> &Arc<ComponentLocks> {
        &self.locks
    }

    pub async fn lock_components<I, S>(&self, components: I) -> ComponentGuard
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.locks.acquire(components).await
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    pub async fn create_checkpoint(&self, spec: CheckpointSpec) -> Result<CheckpointId> {
        if spec.name.trim().is_empty() {
            return Err(CheckpointError::Configuration(
                "checkpoint name must not be empty".into(),
            ));
        }
        if spec.components.is_empty() {
            return Err(CheckpointError::Configuration(format!(
                "checkpoint {} names no components",
                spec.name
            )));
        }

        let guard = self.locks.acquire(&spec.components).await;
        let created = self.create_locked(&spec).await?;
        drop(guard);

        let id = created.id;
        match self.apply_retention().await {
            Ok(_) => {}
            Err(e @ CheckpointError::Configuration(_)) => {
                drop(created);
                self.discard(id).await;
                return Err(e);
            }
            Err(e) => warn!(checkpoint = %id, error = %e, "Retention failed after checkpoint creation"),
        }
        Ok(id)
    }

    /// Drop a checkpoint that is not handed to the caller.
    async fn discard(&self, id: CheckpointId) {
        if let Err(e) = self.store.remove(id).await {
            warn!(checkpoint = %id, error = %e, "Failed to discard checkpoint");
        }
        self.index.write().remove(&id);
    }

    /// Snapshot and persist. Caller holds the locks for `spec.components`.
    /// The new checkpoint stays pinned against retention until the returned
    /// handle is dropped.
    async fn create_locked(&self, spec: &CheckpointSpec) -> Result<PinnedCheckpoint<'_>> {
        let components: BTreeSet<String> = spec.components.iter().cloned().collect();
        let mut payload = StoredPayload::default();
        let mut component_digests = BTreeMap::new();

        for component in &components {
            let raw = self
                .provider
                .snapshot(component)
                .await
                .map_err(|source| CheckpointError::Provider {
                    component: component.clone(),
                    source,
                })?;
            let encoded = self.codec.encode(&raw)?;
            component_digests.insert(component.clone(), ContentHash::hash(&encoded));
            payload.components.insert(component.clone(), encoded);
        }

        let checkpoint = Checkpoint {
            id: CheckpointId(self.next_id.fetch_add(1, Ordering::SeqCst)),
            name: spec.name.clone(),
            description: spec.description.clone(),
            kind: spec.kind,
            created_at: Utc::now(),
            components,
            digest: combined_digest(&payload),
            component_digests,
            size_bytes: payload.size(),
            codec: self.codec.name().to_string(),
        };
        self.store.put(&checkpoint, &payload).await?;

        info!(
            checkpoint = %checkpoint.id,
            name = %checkpoint.name,
            kind = %checkpoint.kind,
            components = checkpoint.components.len(),
            bytes = checkpoint.size_bytes,
            digest = %checkpoint.digest,
            "Checkpoint created"
        );
        let id = checkpoint.id;
        self.pinned.lock().insert(id);
        self.index.write().insert(id, checkpoint);
        Ok(PinnedCheckpoint {
            pins: &self.pinned,
            id,
        })
    }

    pub fn list_checkpoints(&self, filter: &CheckpointFilter, sort: CheckpointSort) -> Vec<Checkpoint> {
        let mut matching: Vec<_> = self
            .index
            .read()
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        match sort {
            CheckpointSort::NewestFirst => matching.sort_by(|a, b| {
                b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id))
            }),
            CheckpointSort::OldestFirst => matching.sort_by(|a, b| {
                a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id))
            }),
            CheckpointSort::Name => matching.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id))),
        }
        matching
    }

    pub fn get_checkpoint(&self, id: CheckpointId) -> Result<Checkpoint> {
        self.index
            .read()
            .get(&id)
            .cloned()
            .ok_or(CheckpointError::NotFound(id))
    }

    /// Most recently created checkpoint.
    pub fn latest_checkpoint(&self) -> Option<Checkpoint> {
        self.index.read().values().next_back().cloned()
    }

    /// Restore the selected components from checkpoint `id`.
    ///
    /// Integrity is verified before any component lock is taken or any
    /// state is touched. A restore failure is reported in the returned
    /// [`RollbackResult`] after compensation, not as an `Err`.
    pub async fn rollback_to_checkpoint(
        &self,
        id: CheckpointId,
        options: RollbackOptions,
    ) -> Result<RollbackResult> {
        let started = Instant::now();
        let plan = self.prepare_rollback(id, &options).await?;
        let guard = self.locks.acquire(&plan.selected).await;
        self.restore_locked(plan, options.create_pre_rollback_checkpoint, guard, started)
            .await
    }

    /// Select, load and verify. Touches no state and takes no locks.
    async fn prepare_rollback(&self, id: CheckpointId, options: &RollbackOptions) -> Result<RollbackPlan> {
        let checkpoint = self.get_checkpoint(id)?;

        let selected: Vec<String> = match &options.components {
            Some(requested) => {
                let requested: BTreeSet<&String> = requested.iter().collect();
                for component in &requested {
                    if !checkpoint.covers(component) {
                        return Err(CheckpointError::ComponentNotCovered {
                            id,
                            component: (*component).clone(),
                        });
                    }
                }
                requested.into_iter().cloned().collect()
            }
            None => checkpoint.components.iter().cloned().collect(),
        };
        if selected.is_empty() {
            return Err(CheckpointError::Configuration(
                "rollback selects no components".into(),
            ));
        }

        let payload = self.store.load(id).await?;
        let decoded = self.verify(&checkpoint, &payload, &selected, options.verify_integrity)?;
        Ok(RollbackPlan {
            id,
            selected,
            decoded,
        })
    }

    /// Apply a verified plan. `guard` holds the locks for `plan.selected`
    /// and is released before retention runs.
    async fn restore_locked(
        &self,
        plan: RollbackPlan,
        pre_rollback: bool,
        guard: ComponentGuard,
        started: Instant,
    ) -> Result<RollbackResult> {
        let RollbackPlan {
            id,
            selected,
            decoded,
        } = plan;

        let pre_rollback_checkpoint = if pre_rollback {
            let spec = CheckpointSpec::new(format!("pre-rollback-{}", id), CheckpointKind::EventTriggered)
                .description(format!("state before rollback to {}", id))
                .components(selected.iter().cloned());
            Some(self.create_locked(&spec).await?)
        } else {
            None
        };

        let mut undo = BTreeMap::new();
        for component in &selected {
            let snapshot = self
                .provider
                .snapshot(component)
                .await
                .map_err(|source| CheckpointError::Provider {
                    component: component.clone(),
                    source,
                })?;
            undo.insert(component.clone(), snapshot);
        }

        let mut result = RollbackResult {
            checkpoint: Some(id),
            success: false,
            in_progress: false,
            pending: Vec::new(),
            restored: Vec::new(),
            failed: Vec::new(),
            reverted: Vec::new(),
            unreconciled: Vec::new(),
            not_attempted: Vec::new(),
            pre_rollback_checkpoint: pre_rollback_checkpoint.as_ref().map(|p| p.id),
            duration: Duration::ZERO,
            error: None,
        };

        let mut failed_at = None;
        for (i, component) in selected.iter().enumerate() {
            let Some(bytes) = decoded.get(component) else {
                continue;
            };
            match self.provider.restore(component, bytes).await {
                Ok(()) => {
                    debug!(checkpoint = %id, component = %component, "Component restored");
                    result.restored.push(component.clone());
                }
                Err(e) => {
                    result.failed.push(ComponentFailure {
                        component: component.clone(),
                        reason: e.to_string(),
                    });
                    result.error = Some(format!("restore of {} failed: {}", component, e));
                    failed_at = Some(i);
                    break;
                }
            }
        }

        match failed_at {
            None => {
                result.success = true;
                info!(
                    checkpoint = %id,
                    components = result.restored.len(),
                    "Rollback completed"
                );
            }
            Some(i) => {
                // The failed component may be partially written, so it is
                // compensated along with the ones already restored.
                for component in selected[..=i].iter().rev() {
                    let Some(snapshot) = undo.get(component) else {
                        continue;
                    };
                    match self.provider.restore(component, snapshot).await {
                        Ok(()) => {
                            warn!(checkpoint = %id, component = %component, "Component reverted after failed rollback");
                            result.reverted.push(component.clone());
                        }
                        Err(e) => {
                            error!(checkpoint = %id, component = %component, error = %e, "Component left unreconciled");
                            result.unreconciled.push(component.clone());
                        }
                    }
                }
                result.restored.clear();
                result.not_attempted = selected[i + 1..].to_vec();
                error!(
                    checkpoint = %id,
                    reverted = ?result.reverted,
                    unreconciled = ?result.unreconciled,
                    not_attempted = ?result.not_attempted,
                    error = result.error.as_deref().unwrap_or_default(),
                    "Rollback failed"
                );
            }
        }
        drop(guard);

        if let Some(pinned) = pre_rollback_checkpoint {
            if let Err(e) = self.apply_retention().await {
                warn!(checkpoint = %id, error = %e, "Retention failed after rollback");
            }
            drop(pinned);
        }
        result.duration = started.elapsed();
        Ok(result)
    }

    /// Check digests and decode every selected component.
    fn verify(
        &self,
        checkpoint: &Checkpoint,
        payload: &StoredPayload,
        selected: &[String],
        per_component: bool,
    ) -> Result<BTreeMap<String, Vec<u8>>> {
        let id = checkpoint.id;
        let integrity = |detail: String| CheckpointError::Integrity { id, detail };

        let stored: BTreeSet<&String> = payload.components.keys().collect();
        let expected: BTreeSet<&String> = checkpoint.components.iter().collect();
        if stored != expected {
            return Err(integrity("stored components do not match metadata".into()));
        }

        if per_component {
            for component in selected {
                let bytes = &payload.components[component];
                let expected = checkpoint
                    .component_digests
                    .get(component)
                    .ok_or_else(|| integrity(format!("no digest recorded for {}", component)))?;
                let actual = ContentHash::hash(bytes);
                if &actual != expected {
                    return Err(integrity(format!(
                        "component {} digest mismatch: expected {}, found {}",
                        component, expected, actual
                    )));
                }
            }
        }

        let actual = combined_digest(payload);
        if actual != checkpoint.digest {
            return Err(integrity(format!(
                "digest mismatch: expected {}, found {}",
                checkpoint.digest, actual
            )));
        }

        let mut decoded = BTreeMap::new();
        for component in selected {
            let bytes = self
                .codec
                .decode(&payload.components[component])
                .map_err(|e| integrity(format!("component {}: {}", component, e)))?;
            decoded.insert(component.clone(), bytes);
        }
        Ok(decoded)
    }

    /// Roll back within `timeout`.
    ///
    /// Verification and lock acquisition are bounded by the deadline; if
    /// either runs out, nothing has been touched and the result says so.
    /// Once the locks are held the restore runs to completion on its own
    /// task. If that outlasts the deadline the result is marked
    /// `in_progress` and the outcome is logged when the restore ends.
    pub async fn emergency_rollback(self: &Arc<Self>, target: RollbackTarget, timeout: Duration) -> RollbackResult {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + timeout;
        let id = match target {
            RollbackTarget::Checkpoint(id) => id,
            RollbackTarget::Latest => match self.latest_checkpoint() {
                Some(checkpoint) => checkpoint.id,
                None => {
                    error!("Emergency rollback requested with no checkpoints");
                    return RollbackResult::aborted(
                        None,
                        CheckpointError::NoCheckpoints.to_string(),
                        started.elapsed(),
                    );
                }
            },
        };

        warn!(checkpoint = %id, timeout_ms = timeout.as_millis() as u64, "Emergency rollback started");
        let abandoned = |stage: &str, not_attempted: Vec<String>| {
            error!(checkpoint = %id, stage, "Emergency rollback abandoned at deadline; no state touched");
            let mut result = RollbackResult::aborted(
                Some(id),
                CheckpointError::Timeout(timeout).to_string(),
                started.elapsed(),
            );
            result.not_attempted = not_attempted;
            result
        };

        let plan = match tokio::time::timeout_at(
            deadline,
            self.prepare_rollback(id, &RollbackOptions::default()),
        )
        .await
        {
            Ok(Ok(plan)) => plan,
            Ok(Err(e)) => return RollbackResult::aborted(Some(id), e.to_string(), started.elapsed()),
            Err(_) => return abandoned("verification", Vec::new()),
        };
        let locked = tokio::time::timeout_at(deadline, self.locks.acquire(&plan.selected)).await;
        let guard = match locked {
            Ok(guard) => guard,
            Err(_) => return abandoned("locking", plan.selected),
        };

        let selected = plan.selected.clone();
        let manager = Arc::clone(self);
        let mut task = tokio::spawn(async move {
            let outcome = manager.restore_locked(plan, false, guard, started).await;
            match &outcome {
                Ok(result) if result.success => {
                    info!(checkpoint = %id, "Emergency rollback finished")
                }
                Ok(result) => error!(
                    checkpoint = %id,
                    unreconciled = ?result.unreconciled,
                    "Emergency rollback finished with failures"
                ),
                Err(e) => error!(checkpoint = %id, error = %e, "Emergency rollback aborted"),
            }
            outcome
        });

        match tokio::time::timeout_at(deadline, &mut task).await {
            Ok(Ok(Ok(result))) => result,
            Ok(Ok(Err(e))) => RollbackResult::aborted(Some(id), e.to_string(), started.elapsed()),
            Ok(Err(join)) => RollbackResult::aborted(
                Some(id),
                format!("rollback task failed: {}", join),
                started.elapsed(),
            ),
            Err(_) => {
                error!(checkpoint = %id, "Emergency rollback exceeded its deadline; restore continuing");
                let mut result = RollbackResult::aborted(
                    Some(id),
                    CheckpointError::Timeout(timeout).to_string(),
                    started.elapsed(),
                );
                result.in_progress = true;
                result.pending = selected;
                result
            }
        }
    }

    /// Delete checkpoints the retention policy no longer keeps.
    pub async fn apply_retention(&self) -> Result<Vec<CheckpointId>> {
        let _serial = self.retention_lock.lock().await;
        let metas: Vec<_> = self.index.read().values().map(Checkpoint::meta).collect();
        let pinned = self.pinned.lock().clone();
        let evict = plan_eviction(&metas, &self.config.retention, &pinned);
        for id in &evict {
            self.store.remove(*id).await?;
            self.index.write().remove(id);
            debug!(checkpoint = %id, "Checkpoint evicted");
        }
        if !evict.is_empty() {
            info!(evicted = evict.len(), remaining = self.len(), "Checkpoint retention applied");
        }
        let max = self.config.retention.max_checkpoints;
        let remaining = metas.len() - evict.len();
        if remaining > max {
            return Err(CheckpointError::Configuration(format!(
                "{} checkpoints retained with {} pinned by running operations; max_checkpoints is {}",
                remaining,
                pinned.len(),
                max
            )));
        }
        Ok(evict)
    }
}

/// A verified rollback, ready to apply.
struct RollbackPlan {
    id: CheckpointId,
    selected: Vec<String>,
    decoded: BTreeMap<String, Vec<u8>>,
}

/// Keeps a freshly created checkpoint out of retention until dropped.
struct PinnedCheckpoint<'a> {
    pins: &'a Mutex<BTreeSet<CheckpointId>>,
    id: CheckpointId,
}

impl Drop for PinnedCheckpoint<'_> {
    fn drop(&mut self) {
        self.pins.lock().remove(&self.id);
    }
}

fn combined_digest(payload: &StoredPayload) -> ContentHash {
    ContentHash::of_parts(
        payload
            .components
            .iter()
            .map(|(name, bytes)| (name.as_str(), bytes.as_slice())),
    )
}
