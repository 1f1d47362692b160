use crate::error::ValidatorError;
use crate::validator::{StageOutcome, ValidationIssue, ValidationRequest, Validator};
use async_trait::async_trait;
use safeguard_constraints::ConstraintEngine;
use safeguard_types::ActionContext;
use std::sync::Arc;

/// Evaluates the request's state against a [`ConstraintEngine`].
///
/// Hard and dynamic violations are errors. Soft violations are warnings,
/// which block only when the pipeline treats warnings as failures.
pub struct ConstraintValidator {
    engine: Arc<ConstraintEngine>,
}

impl ConstraintValidator {
    pub fn new(engine: Arc<ConstraintEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Validator for ConstraintValidator {
    fn name(&self) -> &str {
        "constraints"
    }

    async fn validate(
        &self,
        request: &ValidationRequest,
        context: &ActionContext,
    ) -> Result<StageOutcome, ValidatorError> {
        let context = context.clone().with_action(request.action.clone());
        let evaluation = self.engine.evaluate(&request.state, &context);

        let (errors, warnings): (Vec<_>, Vec<_>) = evaluation
            .violations
            .into_iter()
            .partition(|v| v.is_blocking());
        let errors: Vec<ValidationIssue> = errors.into_iter().map(Into::into).collect();
        let warnings: Vec<ValidationIssue> = warnings.into_iter().map(Into::into).collect();

        let outcome = if errors.is_empty() {
            StageOutcome::pass()
        } else {
            StageOutcome::fail(errors)
        };
        Ok(outcome.with_warnings(warnings))
    }
}
