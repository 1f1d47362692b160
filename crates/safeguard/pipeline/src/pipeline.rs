//! Staged validation of a proposed action.
//!
//! Stages run in dependency waves, concurrently within a wave when
//! `parallel_execution` is set. Each stage has its own timeout and retry
//! budget; the whole run is bounded by `total_timeout`.

use crate::error::{PipelineError, Result, StageError, StageErrorKind};
use crate::stage::ValidationStage;
use crate::validator::{StageOutcome, ValidationIssue, ValidationRequest};
use futures::FutureExt;
use safeguard_constraints::ConstraintViolation;
use safeguard_types::ActionContext;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Pipeline-wide settings.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    /// Bound on the whole run. Stages still running at the deadline are
    /// cancelled.
    pub total_timeout: Duration,
    /// Stop at the first failed stage instead of running the rest.
    pub fail_fast: bool,
    /// Run stages with settled dependencies concurrently.
    pub parallel_execution: bool,
    /// Treat validator warnings (e.g. soft violations) as stage failures.
    pub warnings_as_failures: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            total_timeout: Duration::from_secs(30),
            fail_fast: false,
            parallel_execution: true,
            warnings_as_failures: false,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.total_timeout.is_zero() {
            return Err(PipelineError::Configuration(
                "pipeline total_timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Passed,
    Failed,
    Skipped,
    Cancelled,
}

/// Per-stage summary, in stage order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: String,
    pub status: StageStatus,
    pub required: bool,
    pub attempts: u32,
    pub duration: Duration,
}

/// Outcome of one pipeline run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    /// Failed stages in stage order, plus a pipeline entry on deadline.
    pub errors: Vec<StageError>,
    pub warnings: Vec<ValidationIssue>,
    pub stages: Vec<StageReport>,
    /// Latest sanitized copy of the request, if any stage produced one.
    pub sanitized: Option<ValidationRequest>,
    pub timed_out: bool,
    pub duration: Duration,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn error_for(&self, stage: &str) -> Option<&StageError> {
        self.errors.iter().find(|e| e.stage == stage)
    }

    pub fn report_for(&self, stage: &str) -> Option<&StageReport> {
        self.stages.iter().find(|r| r.stage == stage)
    }

    /// Every constraint violation surfaced as an error or a warning.
    pub fn violations(&self) -> impl Iterator<Item = &ConstraintViolation> {
        self.errors
            .iter()
            .flat_map(|e| e.issues.iter())
            .chain(self.warnings.iter())
            .filter_map(|issue| issue.violation.as_ref())
    }
}

struct StageRun {
    index: usize,
    outcome: std::result::Result<StageOutcome, (StageErrorKind, String)>,
    attempts: u32,
    duration: Duration,
}

struct Settled {
    status: StageStatus,
    kind: Option<StageErrorKind>,
    message: String,
    issues: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
    attempts: u32,
    duration: Duration,
}

impl Settled {
    fn not_run(status: StageStatus, kind: StageErrorKind, message: String) -> Self {
        Self {
            status,
            kind: Some(kind),
            message,
            issues: Vec::new(),
            warnings: Vec::new(),
            attempts: 0,
            duration: Duration::ZERO,
        }
    }

    fn passed(&self) -> bool {
        self.status == StageStatus::Passed
    }
}

/// Ordered set of validation stages.
pub struct ValidationPipeline {
    config: PipelineConfig,
    stages: Vec<Arc<ValidationStage>>,
    /// Dependency indices per stage; always point at earlier stages.
    deps: Vec<Vec<usize>>,
}

impl ValidationPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            stages: Vec::new(),
            deps: Vec::new(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Append a stage.
    ///
    /// Dependencies must name stages already added, which keeps the stage
    /// graph acyclic and insertion order a valid execution order.
    pub fn add_stage(&mut self, stage: ValidationStage) -> Result<()> {
        let fail = |msg: String| Err(PipelineError::Configuration(msg));
        if stage.name.trim().is_empty() {
            return fail("stage name must not be empty".into());
        }
        if self.stages.iter().any(|s| s.name == stage.name) {
            return fail(format!("duplicate stage name: {}", stage.name));
        }
        if stage.timeout.is_zero() {
            return fail(format!("stage {}: timeout must be greater than zero", stage.name));
        }
        let mut deps = Vec::with_capacity(stage.depends_on.len());
        for dep in &stage.depends_on {
            match self.stages.iter().position(|s| &s.name == dep) {
                Some(i) => deps.push(i),
                None => {
                    return fail(format!(
                        "stage {}: unknown dependency {} (dependencies must be added first)",
                        stage.name, dep
                    ))
                }
            }
        }
        debug!(stage = %stage.name, required = stage.required, "Added validation stage");
        self.stages.push(Arc::new(stage));
        self.deps.push(deps);
        Ok(())
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run the request through every stage.
    ///
    /// Blocks until all stages settle or the total timeout elapses. The
    /// caller's request is cloned, never modified.
    pub async fn execute(&self, request: &ValidationRequest, context: &ActionContext) -> ValidationResult {
        let started = Instant::now();
        let deadline = started + self.config.total_timeout;
        let context = Arc::new(context.clone());
        let mut current = Arc::new(request.clone());
        let mut sanitized_any = false;
        let mut settled: Vec<Option<Settled>> = (0..self.stages.len()).map(|_| None).collect();
        let mut timed_out = false;

        debug!(
            action = %request.action.name,
            stages = self.stages.len(),
            parallel = self.config.parallel_execution,
            "Validation started"
        );

        'waves: loop {
            let wave = self.next_wave(&mut settled);
            if wave.is_empty() {
                break;
            }

            let mut set = JoinSet::new();
            for &i in &wave {
                let run = run_stage(i, self.stages[i].clone(), current.clone(), context.clone());
                set.spawn(async move { AssertUnwindSafe(run).catch_unwind().await.map_err(|_| i) });
            }
            let mut running: BTreeSet<usize> = wave.iter().copied().collect();
            let mut produced: Vec<(usize, ValidationRequest)> = Vec::new();
            let mut halt = false;

            loop {
                let joined = match tokio::time::timeout_at(deadline, set.join_next()).await {
                    Ok(Some(Ok(joined))) => joined,
                    // Aborted task; its slot is filled below.
                    Ok(Some(Err(_))) => continue,
                    Ok(None) => break,
                    Err(_) => {
                        set.abort_all();
                        timed_out = true;
                        halt = true;
                        break;
                    }
                };
                let (index, result) = match joined {
                    Ok(run) => {
                        let index = run.index;
                        let (result, sanitized) = self.settle(run);
                        if let Some(req) = sanitized {
                            produced.push((index, req));
                        }
                        (index, result)
                    }
                    Err(index) => {
                        warn!(stage = %self.stages[index].name, "Stage task panicked");
                        (
                            index,
                            Settled::not_run(
                                StageStatus::Failed,
                                StageErrorKind::ValidatorError,
                                "stage task panicked".into(),
                            ),
                        )
                    }
                };
                running.remove(&index);
                let failed = !result.passed();
                settled[index] = Some(result);
                if failed && self.config.fail_fast {
                    set.abort_all();
                    halt = true;
                    break;
                }
            }

            let reason = if timed_out {
                "cancelled at pipeline deadline"
            } else if halt {
                "cancelled by fail-fast"
            } else {
                "stage task ended without a result"
            };
            for i in running {
                settled[i] = Some(Settled::not_run(
                    StageStatus::Cancelled,
                    StageErrorKind::Cancelled,
                    reason.into(),
                ));
            }

            produced.sort_by_key(|(i, _)| *i);
            if let Some((_, req)) = produced.pop() {
                current = Arc::new(req);
                sanitized_any = true;
            }

            if halt {
                break 'waves;
            }
        }

        let reason = if timed_out {
            "not started before pipeline deadline"
        } else {
            "not started after fail-fast stop"
        };
        for slot in settled.iter_mut().filter(|s| s.is_none()) {
            *slot = Some(Settled::not_run(
                StageStatus::Cancelled,
                StageErrorKind::Cancelled,
                reason.into(),
            ));
        }

        let mut result = self.assemble(settled, timed_out, started.elapsed());
        if sanitized_any {
            result.sanitized = Some((*current).clone());
        }

        if result.valid {
            info!(action = %request.action.name, duration_ms = result.duration.as_millis() as u64, "Validation passed");
        } else {
            warn!(
                action = %request.action.name,
                errors = result.errors.len(),
                timed_out,
                "Validation failed"
            );
        }
        result
    }

    /// Stages ready to run. Stages whose dependencies did not pass are
    /// settled as skipped on the way.
    fn next_wave(&self, settled: &mut [Option<Settled>]) -> Vec<usize> {
        let mut wave = Vec::new();
        for i in 0..self.stages.len() {
            if settled[i].is_some() {
                continue;
            }
            let failed_dep = self.deps[i]
                .iter()
                .find(|&&d| settled[d].as_ref().is_some_and(|s| !s.passed()));
            if let Some(&d) = failed_dep {
                debug!(stage = %self.stages[i].name, dependency = %self.stages[d].name, "Skipping stage");
                settled[i] = Some(Settled::not_run(
                    StageStatus::Skipped,
                    StageErrorKind::Skipped,
                    format!("dependency {} did not pass", self.stages[d].name),
                ));
                continue;
            }
            let ready = self.deps[i]
                .iter()
                .all(|&d| settled[d].as_ref().is_some_and(Settled::passed));
            if ready {
                wave.push(i);
                if !self.config.parallel_execution {
                    break;
                }
            }
        }
        wave
    }

    fn settle(&self, run: StageRun) -> (Settled, Option<ValidationRequest>) {
        let stage = &self.stages[run.index];
        match run.outcome {
            Ok(outcome) => {
                let blocked_by_warnings =
                    outcome.valid && self.config.warnings_as_failures && !outcome.warnings.is_empty();
                if outcome.valid && !blocked_by_warnings {
                    debug!(stage = %stage.name, attempts = run.attempts, "Stage passed");
                    return (
                        Settled {
                            status: StageStatus::Passed,
                            kind: None,
                            message: String::new(),
                            issues: Vec::new(),
                            warnings: outcome.warnings,
                            attempts: run.attempts,
                            duration: run.duration,
                        },
                        outcome.sanitized,
                    );
                }
                let (message, issues, warnings) = if blocked_by_warnings {
                    ("warnings treated as failures".to_string(), outcome.warnings, Vec::new())
                } else {
                    let message = outcome
                        .errors
                        .iter()
                        .map(|e| format!("{}: {}", e.subject, e.message))
                        .collect::<Vec<_>>()
                        .join("; ");
                    (message, outcome.errors, outcome.warnings)
                };
                warn!(stage = %stage.name, "Stage rejected request: {}", message);
                (
                    Settled {
                        status: StageStatus::Failed,
                        kind: Some(StageErrorKind::Invalid),
                        message,
                        issues,
                        warnings,
                        attempts: run.attempts,
                        duration: run.duration,
                    },
                    None,
                )
            }
            Err((kind, message)) => {
                warn!(stage = %stage.name, kind = %kind, attempts = run.attempts, "Stage failed: {}", message);
                (
                    Settled {
                        status: StageStatus::Failed,
                        kind: Some(kind),
                        message,
                        issues: Vec::new(),
                        warnings: Vec::new(),
                        attempts: run.attempts,
                        duration: run.duration,
                    },
                    None,
                )
            }
        }
    }

    fn assemble(&self, settled: Vec<Option<Settled>>, timed_out: bool, duration: Duration) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut stages = Vec::with_capacity(settled.len());
        let mut valid = !timed_out;

        for (stage, slot) in self.stages.iter().zip(settled) {
            let Some(s) = slot else { continue };
            if !s.passed() && stage.required {
                valid = false;
            }
            stages.push(StageReport {
                stage: stage.name.clone(),
                status: s.status,
                required: stage.required,
                attempts: s.attempts,
                duration: s.duration,
            });
            warnings.extend(s.warnings);
            if let Some(kind) = s.kind {
                errors.push(StageError {
                    stage: stage.name.clone(),
                    kind,
                    message: s.message,
                    issues: s.issues,
                    required: stage.required,
                    attempts: s.attempts,
                });
            }
        }

        if timed_out {
            errors.push(StageError {
                stage: "pipeline".into(),
                kind: StageErrorKind::Timeout,
                message: format!(
                    "pipeline exceeded total timeout of {:?}",
                    self.config.total_timeout
                ),
                issues: Vec::new(),
                required: true,
                attempts: 1,
            });
        }

        ValidationResult {
            valid,
            errors,
            warnings,
            stages,
            sanitized: None,
            timed_out,
            duration,
        }
    }
}

/// Run one stage with its timeout and retries.
///
/// Only timeouts and validator errors are retried; an invalid verdict is
/// final. Dropping the attempt future on timeout cancels its work.
async fn run_stage(
    index: usize,
    stage: Arc<ValidationStage>,
    request: Arc<ValidationRequest>,
    context: Arc<ActionContext>,
) -> StageRun {
    let started = Instant::now();
    let max_attempts = stage.retries.saturating_add(1);
    let mut attempts = 0;

    let outcome = loop {
        attempts += 1;
        let attempt =
            AssertUnwindSafe(stage.validator.validate(request.as_ref(), context.as_ref())).catch_unwind();
        let failure = match tokio::time::timeout(stage.timeout, attempt).await {
            Ok(Ok(Ok(outcome))) => break Ok(outcome),
            Ok(Ok(Err(e))) => (StageErrorKind::ValidatorError, e.to_string()),
            Ok(Err(_)) => (StageErrorKind::ValidatorError, "validator panicked".to_string()),
            Err(_) => (
                StageErrorKind::Timeout,
                format!("exceeded stage timeout of {:?}", stage.timeout),
            ),
        };
        if attempts >= max_attempts {
            break Err(failure);
        }
        debug!(stage = %stage.name, attempt = attempts, reason = %failure.1, "Retrying stage");
    };

    StageRun {
        index,
        outcome,
        attempts,
        duration: started.elapsed(),
    }
}
