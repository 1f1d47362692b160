use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-component exclusive locks.
///
/// Locks are always taken in sorted component order, so two holders of
/// overlapping sets cannot deadlock.
#[derive(Default)]
pub struct ComponentLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ComponentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, component: &str) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .entry(component.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Wait for exclusive access to every named component.
    pub async fn acquire<I, S>(&self, components: I) -> ComponentGuard
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let sorted: BTreeSet<String> = components
            .into_iter()
            .map(|c| c.as_ref().to_string())
            .collect();
        let mut guards = Vec::with_capacity(sorted.len());
        for component in &sorted {
            guards.push(self.lock_for(component).lock_owned().await);
        }
        ComponentGuard {
            components: sorted.into_iter().collect(),
            _guards: guards,
        }
    }

    /// Whether some holder currently has `component` locked.
    pub fn is_locked(&self, component: &str) -> bool {
        self.locks
            .lock()
            .get(component)
            .is_some_and(|m| m.try_lock().is_err())
    }
}

/// Exclusive access to a set of components, released on drop.
pub struct ComponentGuard {
    components: Vec<String>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl ComponentGuard {
    /// Locked components in sorted order.
    pub fn components(&self) -> &[String] {
        &self.components
    }
}

impl std::fmt::Debug for ComponentGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentGuard")
            .field("components", &self.components)
            .finish()
    }
}
