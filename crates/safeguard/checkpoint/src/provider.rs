use crate::error::ProviderError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Snapshot/restore capability implemented by the stateful components
/// (memory stores, caches, ...) that checkpoints cover.
#[async_trait]
pub trait StateProvider: Send + Sync {
    /// Serialize the current state of `component`.
    async fn snapshot(&self, component: &str) -> Result<Vec<u8>, ProviderError>;

    /// Replace the state of `component` with a previously captured payload.
    async fn restore(&self, component: &str, payload: &[u8]) -> Result<(), ProviderError>;
}

/// Byte-blob components held in memory.
#[derive(Default)]
pub struct InMemoryStateProvider {
    components: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryStateProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_component(self, name: impl Into<String>, state: impl Into<Vec<u8>>) -> Self {
        self.set(name, state);
        self
    }

    pub fn set(&self, name: impl Into<String>, state: impl Into<Vec<u8>>) {
        self.components.write().insert(name.into(), state.into());
    }

    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.components.read().get(name).cloned()
    }

    pub fn component_names(&self) -> Vec<String> {
        self.components.read().keys().cloned().collect()
    }
}

#[async_trait]
impl StateProvider for InMemoryStateProvider {
    async fn snapshot(&self, component: &str) -> Result<Vec<u8>, ProviderError> {
        self.get(component).ok_or(ProviderError::UnknownComponent)
    }

    async fn restore(&self, component: &str, payload: &[u8]) -> Result<(), ProviderError> {
        let mut components = self.components.write();
        match components.get_mut(component) {
            Some(state) => {
                *state = payload.to_vec();
                Ok(())
            }
            None => Err(ProviderError::UnknownComponent),
        }
    }
}
