use crate::action::Action;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Read-only snapshot of system state that constraints are evaluated against.
///
/// Values are keyed by name; numeric metrics and boolean flags have typed
/// accessors, anything else is reachable through [`SystemState::get`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SystemState {
    values: BTreeMap<String, Value>,
}

impl SystemState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Numeric value for `key`, if present and numeric.
    pub fn number(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(Value::as_f64)
    }

    /// Boolean flag for `key`, if present and boolean.
    pub fn flag(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(Value::as_bool)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for SystemState {
    fn from_iter<T: IntoIterator<Item = (K, f64)>>(iter: T) -> Self {
        let mut state = SystemState::new();
        for (k, v) in iter {
            state.set(k, v);
        }
        state
    }
}

/// Context an evaluation runs in.
///
/// Holds caller-supplied values (adaptive thresholds, operation risk, ...)
/// and optionally the action and state under evaluation. Lookups check the
/// context's own values first and fall back to the attached state.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ActionContext {
    #[serde(default)]
    values: BTreeMap<String, Value>,
    #[serde(default)]
    action: Option<Action>,
    #[serde(default)]
    state: Option<SystemState>,
}

impl ActionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_state(mut self, state: SystemState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn action(&self) -> Option<&Action> {
        self.action.as_ref()
    }

    pub fn state(&self) -> Option<&SystemState> {
        self.state.as_ref()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values
            .get(key)
            .or_else(|| self.state.as_ref().and_then(|s| s.get(key)))
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    pub fn flag(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_accessors() {
        let state = SystemState::new()
            .with("memory_usage", 0.42)
            .with("maintenance", true)
            .with("label", "primary");
        assert_eq!(state.number("memory_usage"), Some(0.42));
        assert_eq!(state.flag("maintenance"), Some(true));
        assert_eq!(state.number("label"), None);
        assert_eq!(state.number("missing"), None);
        assert_eq!(state.len(), 3);
    }

    #[test]
    fn context_prefers_own_values_over_state() {
        let state = SystemState::new().with("limit", 0.5).with("cpu", 0.7);
        let ctx = ActionContext::new().with("limit", 0.9).with_state(state);
        assert_eq!(ctx.number("limit"), Some(0.9));
        assert_eq!(ctx.number("cpu"), Some(0.7));
    }

    #[test]
    fn state_collects_from_pairs() {
        let state: SystemState = [("a", 1.0), ("b", 2.0)].into_iter().collect();
        assert_eq!(state.number("b"), Some(2.0));
    }
}
