use crate::error::ValidatorError;
use async_trait::async_trait;
use safeguard_constraints::ConstraintViolation;
use safeguard_types::{Action, ActionContext, SystemState};
use serde::{Deserialize, Serialize};

/// The data a pipeline validates: a candidate action and the state it would
/// run against.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationRequest {
    pub action: Action,
    pub state: SystemState,
}

impl ValidationRequest {
    pub fn new(action: Action, state: SystemState) -> Self {
        Self { action, state }
    }
}

/// One itemized finding.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// What the issue is about (constraint name, field, factor, ...).
    pub subject: String,
    pub message: String,
    /// Set when the issue comes from a constraint violation.
    pub violation: Option<ConstraintViolation>,
}

impl ValidationIssue {
    pub fn new(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            message: message.into(),
            violation: None,
        }
    }
}

impl From<ConstraintViolation> for ValidationIssue {
    fn from(v: ConstraintViolation) -> Self {
        Self {
            subject: v.constraint.clone(),
            message: v.message.clone(),
            violation: Some(v),
        }
    }
}

/// What a validator returns for one request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StageOutcome {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    /// A sanitized copy of the request, if the validator produced one.
    pub sanitized: Option<ValidationRequest>,
}

impl StageOutcome {
    pub fn pass() -> Self {
        Self {
            valid: true,
            ..Self::default()
        }
    }

    pub fn fail(errors: Vec<ValidationIssue>) -> Self {
        Self {
            valid: false,
            errors,
            ..Self::default()
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<ValidationIssue>) -> Self {
        self.warnings = warnings;
        self
    }

    pub fn with_sanitized(mut self, request: ValidationRequest) -> Self {
        self.sanitized = Some(request);
        self
    }
}

/// A validation strategy.
///
/// Validators must be pure functions of `(request, context)`: they never
/// mutate shared state, and a sanitizing validator returns a new request
/// instead of editing the one it was given.
#[async_trait]
pub trait Validator: Send + Sync {
    fn name(&self) -> &str;

    async fn validate(
        &self,
        request: &ValidationRequest,
        context: &ActionContext,
    ) -> Result<StageOutcome, ValidatorError>;
}
