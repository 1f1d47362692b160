use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// A candidate state-changing action submitted for validation.
///
/// `components` names the state components the action will touch; an
/// approved action holds exclusive access to exactly these while it runs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: Uuid,
    pub name: String,
    pub components: BTreeSet<String>,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl Action {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            components: BTreeSet::new(),
            parameters: serde_json::Value::Null,
        }
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.components.insert(component.into());
        self
    }

    pub fn with_components<I, S>(mut self, components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.components.extend(components.into_iter().map(Into::into));
        self
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn touches(&self, component: &str) -> bool {
        self.components.contains(component)
    }
}
