use crate::error::{CheckpointError, Result};
use crate::types::{Checkpoint, CheckpointId};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Encoded payload bytes per component, exactly as digested.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StoredPayload {
    pub components: BTreeMap<String, Vec<u8>>,
}

impl StoredPayload {
    pub fn size(&self) -> u64 {
        self.components.values().map(|v| v.len() as u64).sum()
    }
}

/// Pluggable persistence for checkpoint metadata and payloads.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn put(&self, checkpoint: &Checkpoint, payload: &StoredPayload) -> Result<()>;

    async fn load(&self, id: CheckpointId) -> Result<StoredPayload>;

    /// Remove a checkpoint. Removing a missing checkpoint is not an error.
    async fn remove(&self, id: CheckpointId) -> Result<()>;

    /// Metadata of every stored checkpoint.
    async fn list(&self) -> Result<Vec<Checkpoint>>;
}

/// Checkpoints held in process memory.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    entries: RwLock<BTreeMap<CheckpointId, (Checkpoint, StoredPayload)>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite one stored component payload in place, bypassing digests.
    /// Used for fault injection.
    pub fn replace_payload(&self, id: CheckpointId, component: &str, bytes: Vec<u8>) -> bool {
        let mut entries = self.entries.write();
        match entries.get_mut(&id).and_then(|(_, p)| p.components.get_mut(component)) {
            Some(slot) => {
                *slot = bytes;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn put(&self, checkpoint: &Checkpoint, payload: &StoredPayload) -> Result<()> {
        let mut entries = self.entries.write();
        if entries.contains_key(&checkpoint.id) {
            return Err(CheckpointError::Storage(format!(
                "checkpoint {} already stored",
                checkpoint.id
            )));
        }
        entries.insert(checkpoint.id, (checkpoint.clone(), payload.clone()));
        Ok(())
    }

    async fn load(&self, id: CheckpointId) -> Result<StoredPayload> {
        self.entries
            .read()
            .get(&id)
            .map(|(_, p)| p.clone())
            .ok_or(CheckpointError::NotFound(id))
    }

    async fn remove(&self, id: CheckpointId) -> Result<()> {
        self.entries.write().remove(&id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Checkpoint>> {
        Ok(self.entries.read().values().map(|(c, _)| c.clone()).collect())
    }
}

/// One directory per checkpoint under `root`:
///
/// ```text
/// <root>/<id>/component-<n>.bin   encoded payload, n = position in sorted component order
/// <root>/<id>/checkpoint.json     metadata, written last
/// ```
///
/// A directory without `checkpoint.json` is an interrupted write and is
/// ignored by [`list`](CheckpointStore::list).
pub struct FileCheckpointStore {
    root: PathBuf,
}

const META_FILE: &str = "checkpoint.json";

impl FileCheckpointStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| io_error(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir(&self, id: CheckpointId) -> PathBuf {
        self.root.join(format!("{:016}", id.0))
    }

    fn payload_path(dir: &Path, index: usize) -> PathBuf {
        dir.join(format!("component-{}.bin", index))
    }

    async fn read_meta(dir: &Path) -> Result<Checkpoint> {
        let path = dir.join(META_FILE);
        let json = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| io_error(&path, e))?;
        serde_json::from_str(&json)
            .map_err(|e| CheckpointError::Storage(format!("{}: {}", path.display(), e)))
    }
}

fn io_error(path: &Path, e: std::io::Error) -> CheckpointError {
    CheckpointError::Storage(format!("{}: {}", path.display(), e))
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn put(&self, checkpoint: &Checkpoint, payload: &StoredPayload) -> Result<()> {
        let dir = self.dir(checkpoint.id);
        if tokio::fs::try_exists(dir.join(META_FILE)).await.unwrap_or(false) {
            return Err(CheckpointError::Storage(format!(
                "checkpoint {} already stored",
                checkpoint.id
            )));
        }
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error(&dir, e))?;

        for (index, component) in checkpoint.components.iter().enumerate() {
            let bytes = payload.components.get(component).ok_or_else(|| {
                CheckpointError::Storage(format!("payload missing for component {}", component))
            })?;
            let path = Self::payload_path(&dir, index);
            tokio::fs::write(&path, bytes)
                .await
                .map_err(|e| io_error(&path, e))?;
        }

        let json = serde_json::to_string_pretty(checkpoint)
            .map_err(|e| CheckpointError::Storage(e.to_string()))?;
        let path = dir.join(META_FILE);
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| io_error(&path, e))
    }

    async fn load(&self, id: CheckpointId) -> Result<StoredPayload> {
        let dir = self.dir(id);
        if !tokio::fs::try_exists(dir.join(META_FILE)).await.unwrap_or(false) {
            return Err(CheckpointError::NotFound(id));
        }
        let checkpoint = Self::read_meta(&dir).await?;
        let mut components = BTreeMap::new();
        for (index, component) in checkpoint.components.iter().enumerate() {
            let path = Self::payload_path(&dir, index);
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| io_error(&path, e))?;
            components.insert(component.clone(), bytes);
        }
        Ok(StoredPayload { components })
    }

    async fn remove(&self, id: CheckpointId) -> Result<()> {
        let dir = self.dir(id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&dir, e)),
        }
    }

    async fn list(&self) -> Result<Vec<Checkpoint>> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| io_error(&self.root, e))?;
        let mut checkpoints = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(&self.root, e))?
        {
            let dir = entry.path();
            if !tokio::fs::try_exists(dir.join(META_FILE)).await.unwrap_or(false) {
                warn!(path = %dir.display(), "Ignoring incomplete checkpoint directory");
                continue;
            }
            checkpoints.push(Self::read_meta(&dir).await?);
        }
        checkpoints.sort_by_key(|c| c.id);
        Ok(checkpoints)
    }
}
