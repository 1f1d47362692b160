use crate::error::ValidatorError;
use crate::validator::{StageOutcome, ValidationIssue, ValidationRequest, Validator};
use async_trait::async_trait;
use safeguard_risk::{RiskAssessor, RiskError};
use safeguard_types::{ActionContext, RiskLevel};
use std::sync::Arc;

/// Rejects requests whose assessed risk level is above `max_level`.
///
/// The assessment context is the caller's context with the request's
/// action and state attached, so factors can read state metrics.
pub struct RiskValidator {
    assessor: Arc<RiskAssessor>,
    max_level: RiskLevel,
}

impl RiskValidator {
    pub fn new(assessor: Arc<RiskAssessor>, max_level: RiskLevel) -> Self {
        Self { assessor, max_level }
    }
}

#[async_trait]
impl Validator for RiskValidator {
    fn name(&self) -> &str {
        "risk"
    }

    async fn validate(
        &self,
        request: &ValidationRequest,
        context: &ActionContext,
    ) -> Result<StageOutcome, ValidatorError> {
        let context = context
            .clone()
            .with_action(request.action.clone())
            .with_state(request.state.clone());
        let assessment = self.assessor.assess(&context);

        if assessment.level <= self.max_level {
            return Ok(StageOutcome::pass());
        }

        let exceeded = RiskError::ThresholdExceeded {
            level: assessment.level,
            score: assessment.overall_score,
            max: self.max_level,
        };
        let mut errors = vec![ValidationIssue::new("risk", exceeded.to_string())];
        errors.extend(
            assessment
                .recommendations
                .iter()
                .map(|r| ValidationIssue::new(r.factor.clone(), format!("mitigation: {}", r.recommendation))),
        );
        Ok(StageOutcome::fail(errors))
    }
}
