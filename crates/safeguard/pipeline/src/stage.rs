use crate::validator::Validator;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A named pipeline stage.
///
/// Defaults: required, 5s timeout, no retries, no dependencies.
#[derive(Clone)]
pub struct ValidationStage {
    pub name: String,
    pub validator: Arc<dyn Validator>,
    pub timeout: Duration,
    pub required: bool,
    pub retries: u32,
    pub depends_on: Vec<String>,
}

impl ValidationStage {
    pub fn new(name: impl Into<String>, validator: impl Validator + 'static) -> Self {
        Self::from_arc(name, Arc::new(validator))
    }

    pub fn from_arc(name: impl Into<String>, validator: Arc<dyn Validator>) -> Self {
        Self {
            name: name.into(),
            validator,
            timeout: Duration::from_secs(5),
            required: true,
            retries: 0,
            depends_on: Vec::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Mark the stage optional: its failure is reported but does not make
    /// the overall result invalid.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn depends_on(mut self, stage: impl Into<String>) -> Self {
        self.depends_on.push(stage.into());
        self
    }
}

impl fmt::Debug for ValidationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationStage")
            .field("name", &self.name)
            .field("validator", &self.validator.name())
            .field("timeout", &self.timeout)
            .field("required", &self.required)
            .field("retries", &self.retries)
            .field("depends_on", &self.depends_on)
            .finish()
    }
}
