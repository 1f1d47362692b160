//! # safeguard-tests
//!
//! Shared fixtures for the end-to-end and property suites under `tests/`.

use async_trait::async_trait;
use parking_lot::Mutex;
use safeguard_checkpoint::{InMemoryStateProvider, ProviderError, StateProvider};
use std::collections::BTreeSet;

/// Memory components used across the suites, with their initial contents.
pub const COMPONENTS: [(&str, &[u8]); 3] = [
    ("episodic", b"episodic-v1"),
    ("semantic", b"semantic-v1"),
    ("working", b"working-v1"),
];

pub fn memory_provider() -> InMemoryStateProvider {
    COMPONENTS
        .iter()
        .fold(InMemoryStateProvider::new(), |p, (name, state)| {
            p.with_component(*name, state.to_vec())
        })
}

/// An in-memory provider whose snapshots or restores can be made to fail
/// per component.
#[derive(Default)]
pub struct FailingStateProvider {
    inner: InMemoryStateProvider,
    failing_restores: Mutex<BTreeSet<String>>,
    failing_snapshots: Mutex<BTreeSet<String>>,
    restores: Mutex<Vec<String>>,
}

impl FailingStateProvider {
    pub fn new(inner: InMemoryStateProvider) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    pub fn fail_restore(&self, component: &str) {
        self.failing_restores.lock().insert(component.to_string());
    }

    pub fn fail_snapshot(&self, component: &str) {
        self.failing_snapshots.lock().insert(component.to_string());
    }

    pub fn heal(&self) {
        self.failing_restores.lock().clear();
        self.failing_snapshots.lock().clear();
    }

    pub fn set(&self, component: &str, state: &[u8]) {
        self.inner.set(component, state.to_vec());
    }

    pub fn get(&self, component: &str) -> Option<Vec<u8>> {
        self.inner.get(component)
    }

    /// Every successful restore, in call order.
    pub fn restores(&self) -> Vec<String> {
        self.restores.lock().clone()
    }
}

#[async_trait]
impl StateProvider for FailingStateProvider {
    async fn snapshot(&self, component: &str) -> Result<Vec<u8>, ProviderError> {
        if self.failing_snapshots.lock().contains(component) {
            return Err(ProviderError::Snapshot("snapshot device offline".into()));
        }
        self.inner.snapshot(component).await
    }

    async fn restore(&self, component: &str, payload: &[u8]) -> Result<(), ProviderError> {
        if self.failing_restores.lock().contains(component) {
            return Err(ProviderError::Restore("restore device offline".into()));
        }
        self.inner.restore(component, payload).await?;
        self.restores.lock().push(component.to_string());
        Ok(())
    }
}
