//! End-to-end test: actions flowing through constraints, risk and custom
//! stages in one pipeline.

use async_trait::async_trait;
use safeguard_constraints::{
    Constraint, ConstraintEngine, ConstraintKind, FlagRequired, MetricAtMost, ViolationAction,
};
use safeguard_pipeline::{
    ConstraintValidator, PipelineConfig, RiskValidator, StageErrorKind, StageOutcome, StageStatus,
    ValidationPipeline, ValidationRequest, ValidationStage, Validator, ValidatorError,
};
use safeguard_risk::RiskAssessor;
use safeguard_types::{Action, ActionContext, RiskLevel, SystemState};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Never answers.
struct Hung;

#[async_trait]
impl Validator for Hung {
    fn name(&self) -> &str {
        "hung"
    }

    async fn validate(
        &self,
        _: &ValidationRequest,
        _: &ActionContext,
    ) -> Result<StageOutcome, ValidatorError> {
        std::future::pending().await
    }
}

/// Answers after a fixed delay.
struct Slow(Duration);

#[async_trait]
impl Validator for Slow {
    fn name(&self) -> &str {
        "slow"
    }

    async fn validate(
        &self,
        _: &ValidationRequest,
        _: &ActionContext,
    ) -> Result<StageOutcome, ValidatorError> {
        tokio::time::sleep(self.0).await;
        Ok(StageOutcome::pass())
    }
}

fn engine() -> Arc<ConstraintEngine> {
    let engine = ConstraintEngine::new();
    engine
        .register(Constraint::hard(
            "memory_ceiling",
            MetricAtMost::new("memory_usage"),
            0.9,
        ))
        .unwrap();
    engine
        .register(Constraint::predicate(
            "sandboxed",
            ConstraintKind::Hard,
            FlagRequired::new("sandbox_enabled", true),
        ))
        .unwrap();
    engine
        .register(
            Constraint::soft("cpu_comfort", MetricAtMost::new("cpu_usage"), 0.7)
                .with_action(ViolationAction::Throttle),
        )
        .unwrap();
    Arc::new(engine)
}

fn standard_pipeline(config: PipelineConfig) -> ValidationPipeline {
    let mut pipeline = ValidationPipeline::new(config).unwrap();
    pipeline
        .add_stage(ValidationStage::new("constraints", ConstraintValidator::new(engine())))
        .unwrap();
    pipeline
        .add_stage(ValidationStage::new(
            "risk",
            RiskValidator::new(Arc::new(RiskAssessor::with_default_factors()), RiskLevel::High),
        ))
        .unwrap();
    pipeline
}

fn state(memory: f64, cpu: f64, sandboxed: bool) -> SystemState {
    SystemState::new()
        .with("memory_usage", memory)
        .with("cpu_usage", cpu)
        .with("operation_risk", 0.1)
        .with("sandbox_enabled", sandboxed)
}

fn request(state: SystemState) -> ValidationRequest {
    ValidationRequest::new(Action::new("write_memory").with_component("episodic"), state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn healthy_action_is_valid() {
    let pipeline = standard_pipeline(PipelineConfig::default());
    let result = pipeline
        .execute(&request(state(0.5, 0.3, true)), &ActionContext::new())
        .await;
    assert!(result.valid, "{:?}", result.errors);
    assert!(result.errors.is_empty());
    assert_eq!(result.stages.len(), 2);
}

#[tokio::test]
async fn hard_violation_is_listed_by_name_with_action() {
    let pipeline = standard_pipeline(PipelineConfig::default());
    let result = pipeline
        .execute(&request(state(0.95, 0.3, true)), &ActionContext::new())
        .await;

    assert!(!result.valid);
    let error = result.error_for("constraints").unwrap();
    assert_eq!(error.kind, StageErrorKind::Invalid);
    let violations: Vec<_> = result.violations().collect();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].constraint, "memory_ceiling");
    assert_eq!(violations[0].action, ViolationAction::EmergencyStop);
    assert!(violations[0].is_hard());
}

#[tokio::test]
async fn every_hard_violation_is_reported() {
    let pipeline = standard_pipeline(PipelineConfig::default());
    let result = pipeline
        .execute(&request(state(0.95, 0.3, false)), &ActionContext::new())
        .await;
    let mut names: Vec<_> = result.violations().map(|v| v.constraint.clone()).collect();
    names.sort();
    assert_eq!(names, vec!["memory_ceiling", "sandboxed"]);
}

#[tokio::test]
async fn soft_violation_warns_unless_configured_to_fail() {
    let pipeline = standard_pipeline(PipelineConfig::default());
    let result = pipeline
        .execute(&request(state(0.5, 0.8, true)), &ActionContext::new())
        .await;
    assert!(result.valid);
    assert_eq!(result.warnings.len(), 1);
    assert_eq!(
        result.violations().next().unwrap().action,
        ViolationAction::Throttle
    );

    let strict = standard_pipeline(PipelineConfig {
        warnings_as_failures: true,
        ..PipelineConfig::default()
    });
    let result = strict
        .execute(&request(state(0.5, 0.8, true)), &ActionContext::new())
        .await;
    assert!(!result.valid);
}

#[tokio::test(start_paused = true)]
async fn stage_timeout_fails_only_that_stage() {
    let mut pipeline = standard_pipeline(PipelineConfig {
        fail_fast: false,
        ..PipelineConfig::default()
    });
    pipeline
        .add_stage(ValidationStage::new("policy_lookup", Hung).with_timeout(Duration::from_secs(5)))
        .unwrap();
    pipeline
        .add_stage(ValidationStage::new("audit", Slow(Duration::from_secs(1))))
        .unwrap();

    let started = Instant::now();
    let result = pipeline
        .execute(&request(state(0.5, 0.3, true)), &ActionContext::new())
        .await;
    let elapsed = started.elapsed();

    assert!(!result.valid);
    assert!(!result.timed_out);
    assert!(elapsed >= Duration::from_secs(5));
    assert!(elapsed < Duration::from_secs(6));

    let error = result.error_for("policy_lookup").unwrap();
    assert_eq!(error.kind, StageErrorKind::Timeout);
    assert_eq!(result.errors.len(), 1);
    for stage in ["constraints", "risk", "audit"] {
        assert_eq!(
            result.report_for(stage).unwrap().status,
            StageStatus::Passed,
            "stage {}",
            stage
        );
    }
}

#[tokio::test(start_paused = true)]
async fn pipeline_deadline_bounds_the_whole_run() {
    let mut pipeline = standard_pipeline(PipelineConfig {
        total_timeout: Duration::from_secs(2),
        ..PipelineConfig::default()
    });
    pipeline
        .add_stage(ValidationStage::new("policy_lookup", Hung).with_timeout(Duration::from_secs(5)))
        .unwrap();

    let started = Instant::now();
    let result = pipeline
        .execute(&request(state(0.5, 0.3, true)), &ActionContext::new())
        .await;
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(!result.valid);
    assert!(result.timed_out);
}
