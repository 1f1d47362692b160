//! The safety layer: every component wired together behind one handle.

use crate::config::{CriticalAction, SafetyConfig};
use crate::error::{Result, SafetyError};
use crate::handlers::{CheckpointOnCritical, EmergencyStopOnCritical};
use async_trait::async_trait;
use parking_lot::Mutex;
use safeguard_checkpoint::{
    CheckpointId, CheckpointManager, CheckpointSpec, CheckpointStore, CodecChain,
    ComponentGuard, FileCheckpointStore, GzipCodec, InMemoryCheckpointStore, RollbackOptions,
    RollbackResult, RollbackTarget, ScheduleHandle, StateProvider,
};
use safeguard_constraints::{Constraint, ConstraintEngine, ConstraintViolation, ViolationAction};
use safeguard_emergency::{
    EmergencyError, EmergencyStopController, EmergencyStopStatus, EmergencyTrigger, InFlightGuard,
    ResumeOptions, ResumeResult, SafetyContext, SafetyVerifier, SharedGauges, ShutdownHook,
    StopOutcome, StopReason,
};
use safeguard_monitor::{
    AlertSink, MetricsSource, MonitorHandle, Result as MonitorResult, SafetyMonitor,
    TracingAlertSink,
};
use safeguard_pipeline::{
    ConstraintValidator, RiskValidator, ValidationPipeline, ValidationRequest, ValidationResult,
    ValidationStage,
};
use safeguard_risk::{RiskAssessment, RiskAssessor};
use safeguard_types::{Action, ActionContext, SystemState};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Caller-supplied response to violations whose action is
/// [`ViolationAction::Adjust`].
#[async_trait]
pub trait AdjustmentPolicy: Send + Sync {
    async fn adjust(
        &self,
        violation: &ConstraintViolation,
        action: &Action,
        state: &SystemState,
    ) -> std::result::Result<(), String>;
}

/// Permission to execute one action: the action's components stay locked
/// and the action counts as in flight until this is dropped.
pub struct ActionPermit {
    action: Action,
    guard: ComponentGuard,
    _in_flight: InFlightGuard,
}

impl ActionPermit {
    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn components(&self) -> &[String] {
        self.guard.components()
    }
}

impl std::fmt::Debug for ActionPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionPermit")
            .field("action", &self.action.name)
            .field("components", &self.guard.components())
            .finish()
    }
}

/// Feeds every sample into the trigger gauges before the monitor sees it.
struct GaugeFeed {
    source: Arc<dyn MetricsSource>,
    gauges: Arc<SharedGauges>,
}

#[async_trait]
impl MetricsSource for GaugeFeed {
    async fn current_readings(&self) -> MonitorResult<BTreeMap<String, f64>> {
        let readings = self.source.current_readings().await?;
        self.gauges
            .update(readings.iter().map(|(metric, value)| (metric.clone(), *value)));
        Ok(readings)
    }
}

#[derive(Default)]
struct Background {
    monitor: Option<MonitorHandle>,
    schedule: Option<ScheduleHandle>,
}

struct LayerInner {
    config: SafetyConfig,
    engine: Arc<ConstraintEngine>,
    assessor: Arc<RiskAssessor>,
    pipeline: ValidationPipeline,
    checkpoints: Arc<CheckpointManager>,
    emergency: Arc<EmergencyStopController>,
    monitor: Arc<SafetyMonitor>,
    gauges: Arc<SharedGauges>,
    metrics: Option<Arc<dyn MetricsSource>>,
    adjustment: Option<Arc<dyn AdjustmentPolicy>>,
    background: Mutex<Background>,
}

/// Builds a [`SafetyLayer`] from a [`SafetyConfig`] plus the pieces only
/// the host can supply.
pub struct SafetyLayerBuilder {
    config: SafetyConfig,
    provider: Arc<dyn StateProvider>,
    store: Option<Arc<dyn CheckpointStore>>,
    codec: Option<CodecChain>,
    metrics: Option<Arc<dyn MetricsSource>>,
    sinks: Vec<Arc<dyn AlertSink>>,
    context: Option<SafetyContext>,
    constraints: Vec<Constraint>,
    stages: Vec<ValidationStage>,
    triggers: Vec<EmergencyTrigger>,
    verifiers: Vec<Arc<dyn SafetyVerifier>>,
    hooks: Vec<Arc<dyn ShutdownHook>>,
    adjustment: Option<Arc<dyn AdjustmentPolicy>>,
}

impl SafetyLayerBuilder {
    pub fn new(config: SafetyConfig, provider: Arc<dyn StateProvider>) -> Self {
        Self {
            config,
            provider,
            store: None,
            codec: None,
            metrics: None,
            sinks: Vec::new(),
            context: None,
            constraints: Vec::new(),
            stages: Vec::new(),
            triggers: Vec::new(),
            verifiers: Vec::new(),
            hooks: Vec::new(),
            adjustment: None,
        }
    }

    /// Checkpoint store. Defaults to a file store under
    /// `checkpoint.storage_dir`, or memory when that is unset.
    pub fn store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Payload codec. Defaults to gzip when `checkpoint.compression` is set
    /// and identity otherwise; encryption always needs an explicit chain.
    pub fn codec(mut self, codec: CodecChain) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn metrics_source(mut self, source: Arc<dyn MetricsSource>) -> Self {
        self.metrics = Some(source);
        self
    }

    /// Alert sink. Alerts go to tracing when none is added.
    pub fn alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Share an emergency context with other holders.
    pub fn context(mut self, context: SafetyContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Extra stage run after the constraint and risk stages.
    pub fn stage(mut self, stage: ValidationStage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn trigger(mut self, trigger: EmergencyTrigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn verifier(mut self, verifier: Arc<dyn SafetyVerifier>) -> Self {
        self.verifiers.push(verifier);
        self
    }

    pub fn shutdown_hook(mut self, hook: Arc<dyn ShutdownHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn adjustment_policy(mut self, policy: Arc<dyn AdjustmentPolicy>) -> Self {
        self.adjustment = Some(policy);
        self
    }

    pub async fn build(self) -> Result<SafetyLayer> {
        let config = self.config;
        config.validate()?;

        let engine = Arc::new(ConstraintEngine::new());
        for constraint in config.constraints()?.into_iter().chain(self.constraints) {
            engine.register(constraint)?;
        }
        let assessor = Arc::new(config.risk.build_assessor()?);

        let mut pipeline = ValidationPipeline::new(config.pipeline_config())?;
        pipeline.add_stage(ValidationStage::new(
            "constraints",
            ConstraintValidator::new(engine.clone()),
        ))?;
        pipeline.add_stage(ValidationStage::new(
            "risk",
            RiskValidator::new(assessor.clone(), config.risk.max_allowed_level),
        ))?;
        for stage in self.stages {
            pipeline.add_stage(stage)?;
        }

        let codec = match self.codec {
            Some(codec) => codec,
            None if config.checkpoint.compression => CodecChain::identity().then(GzipCodec::new(6)),
            None => CodecChain::identity(),
        };
        let store: Arc<dyn CheckpointStore> = match (self.store, &config.checkpoint.storage_dir) {
            (Some(store), _) => store,
            (None, Some(dir)) => Arc::new(FileCheckpointStore::open(dir.clone()).await?),
            (None, None) => Arc::new(InMemoryCheckpointStore::new()),
        };
        let checkpoints = Arc::new(
            CheckpointManager::open(self.provider, store, codec, config.checkpoint_config()).await?,
        );

        let emergency_config = config.emergency_config();
        let context = self
            .context
            .unwrap_or_else(|| SafetyContext::with_history_limit(emergency_config.history_limit));
        let emergency = Arc::new(EmergencyStopController::with_context(emergency_config, context)?);
        let gauges = Arc::new(SharedGauges::new());
        for spec in &config.emergency.triggers {
            emergency.register_trigger(spec.build(&gauges)?)?;
        }
        for trigger in self.triggers {
            emergency.register_trigger(trigger)?;
        }
        for verifier in self.verifiers {
            emergency.add_verifier(verifier);
        }
        for hook in self.hooks {
            emergency.add_shutdown_hook(hook);
        }

        let monitor = Arc::new(SafetyMonitor::new(config.monitor_config())?);
        for alert in &config.monitor.alerts {
            monitor.set_threshold(alert.threshold())?;
            match alert.on_critical {
                CriticalAction::None => {}
                CriticalAction::EmergencyStop => monitor.register_alert_handler(
                    alert.metric.clone(),
                    Arc::new(EmergencyStopOnCritical::new(emergency.clone())),
                ),
                CriticalAction::Checkpoint => monitor.register_alert_handler(
                    alert.metric.clone(),
                    Arc::new(CheckpointOnCritical::new(
                        checkpoints.clone(),
                        config.checkpoint.components.clone(),
                    )),
                ),
            }
        }
        if self.sinks.is_empty() {
            monitor.add_sink(Arc::new(TracingAlertSink));
        }
        for sink in self.sinks {
            monitor.add_sink(sink);
        }

        info!(
            constraints = engine.len(),
            risk_factors = assessor.factor_names().len(),
            stages = pipeline.len(),
            triggers = emergency.trigger_names().len(),
            alerts = config.monitor.alerts.len(),
            checkpoints = checkpoints.len(),
            "Safety layer built"
        );

        Ok(SafetyLayer {
            inner: Arc::new(LayerInner {
                config,
                engine,
                assessor,
                pipeline,
                checkpoints,
                emergency,
                monitor,
                gauges,
                metrics: self.metrics,
                adjustment: self.adjustment,
                background: Mutex::new(Background::default()),
            }),
        })
    }
}

/// Validation, checkpointing, emergency stop and monitoring for one agent.
///
/// Cheap to clone; clones share every component.
#[derive(Clone)]
pub struct SafetyLayer {
    inner: Arc<LayerInner>,
}

impl SafetyLayer {
    pub fn builder(config: SafetyConfig, provider: Arc<dyn StateProvider>) -> SafetyLayerBuilder {
        SafetyLayerBuilder::new(config, provider)
    }

    // ═══════════════════════════════════════════════════════════════════
    // VALIDATION
    // ═══════════════════════════════════════════════════════════════════

    /// Run the pipeline for `action` and enforce the declared action of
    /// every violation it reports.
    ///
    /// Refused while stopped. A result that would approve the action is
    /// discarded if a stop committed while the pipeline ran.
    pub async fn validate_action(
        &self,
        action: &Action,
        state: &SystemState,
        context: &ActionContext,
    ) -> Result<ValidationResult> {
        self.ensure_running()?;
        let request = ValidationRequest::new(action.clone(), state.clone());
        let result = self.inner.pipeline.execute(&request, context).await;
        self.enforce(&result, action, state).await;

        if result.valid {
            self.ensure_running()?;
        } else {
            warn!(
                action = %action.name,
                errors = result.errors.len(),
                timed_out = result.timed_out,
                "Action rejected"
            );
        }
        Ok(result)
    }

    async fn enforce(&self, result: &ValidationResult, action: &Action, state: &SystemState) {
        for violation in result.violations() {
            match violation.action {
                ViolationAction::EmergencyStop => {
                    if self.inner.emergency.is_stopped() {
                        continue;
                    }
                    self.inner
                        .emergency
                        .stop_with(
                            StopReason::HardConstraintViolation,
                            format!("{} during {}", violation, action.name),
                            Some(format!("constraint:{}", violation.constraint)),
                            true,
                        )
                        .await;
                }
                ViolationAction::Throttle => warn!(
                    action = %action.name,
                    constraint = %violation.constraint,
                    observed = ?violation.observed,
                    threshold = ?violation.threshold,
                    "Throttle requested"
                ),
                ViolationAction::Warning => warn!(
                    action = %action.name,
                    constraint = %violation.constraint,
                    "{}",
                    violation.message
                ),
                ViolationAction::Adjust => match &self.inner.adjustment {
                    Some(policy) => {
                        if let Err(e) = policy.adjust(violation, action, state).await {
                            error!(
                                constraint = %violation.constraint,
                                error = %e,
                                "Adjustment failed"
                            );
                        }
                    }
                    None => warn!(
                        constraint = %violation.constraint,
                        "Adjustment requested but no adjustment policy is configured"
                    ),
                },
            }
        }
    }

    /// Lock the action's components and register it as in flight.
    pub async fn begin_action(&self, action: &Action) -> Result<ActionPermit> {
        let in_flight = self.inner.emergency.enter().map_err(|e| match e {
            EmergencyError::StopActive { reason } => SafetyError::EmergencyStopActive { reason },
            other => other.into(),
        })?;
        let guard = self.inner.checkpoints.lock_components(&action.components).await;
        // A stop may have committed while waiting for the locks.
        self.ensure_running()?;
        Ok(ActionPermit {
            action: action.clone(),
            guard,
            _in_flight: in_flight,
        })
    }

    /// Validate, then issue a permit only for a valid result.
    pub async fn authorize(
        &self,
        action: &Action,
        state: &SystemState,
        context: &ActionContext,
    ) -> Result<ActionPermit> {
        let result = self.validate_action(action, state, context).await?;
        if !result.valid {
            let summary = result
                .errors
                .iter()
                .map(|e| format!("{}: {}", e.stage, e.message))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(SafetyError::ActionRejected {
                action: action.name.clone(),
                summary,
            });
        }
        self.begin_action(action).await
    }

    pub fn assess_risk(&self, context: &ActionContext) -> RiskAssessment {
        self.inner.assessor.assess(context)
    }

    // ═══════════════════════════════════════════════════════════════════
    // CHECKPOINTS
    // ═══════════════════════════════════════════════════════════════════

    pub async fn create_checkpoint(&self, spec: CheckpointSpec) -> Result<CheckpointId> {
        Ok(self.inner.checkpoints.create_checkpoint(spec).await?)
    }

    pub async fn rollback_to_checkpoint(
        &self,
        id: CheckpointId,
        options: RollbackOptions,
    ) -> Result<RollbackResult> {
        Ok(self.inner.checkpoints.rollback_to_checkpoint(id, options).await?)
    }

    pub async fn emergency_rollback(&self, target: RollbackTarget, timeout: Duration) -> RollbackResult {
        self.inner.checkpoints.emergency_rollback(target, timeout).await
    }

    // ═══════════════════════════════════════════════════════════════════
    // EMERGENCY STOP
    // ═══════════════════════════════════════════════════════════════════

    pub async fn trigger_emergency_stop(
        &self,
        reason: StopReason,
        message: impl Into<String>,
        immediate: bool,
    ) -> StopOutcome {
        self.inner
            .emergency
            .trigger_emergency_stop(reason, message, immediate)
            .await
    }

    pub async fn resume_system(&self, options: ResumeOptions) -> ResumeResult {
        self.inner.emergency.resume_system(options).await
    }

    pub fn get_status(&self) -> EmergencyStopStatus {
        self.inner.emergency.get_status()
    }

    fn ensure_running(&self) -> Result<()> {
        let status = self.get_status();
        if status.stopped {
            return Err(SafetyError::EmergencyStopActive {
                reason: status.reason.unwrap_or(StopReason::Manual),
            });
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    // LIFECYCLE
    // ═══════════════════════════════════════════════════════════════════

    /// Start the trigger thread, the monitor loop (when a metrics source
    /// was supplied) and the checkpoint schedule (when configured).
    pub async fn start(&self) -> Result<()> {
        self.inner.emergency.start_trigger_monitor()?;

        let mut background = self.inner.background.lock();
        if background.monitor.is_none() {
            match &self.inner.metrics {
                Some(source) => {
                    let feed = Arc::new(GaugeFeed {
                        source: source.clone(),
                        gauges: self.inner.gauges.clone(),
                    });
                    background.monitor = Some(self.inner.monitor.start_monitoring(feed));
                }
                None => info!("No metrics source configured; safety monitor not started"),
            }
        }
        if background.schedule.is_none() {
            let components = &self.inner.config.checkpoint.components;
            if let Some(interval) = self.inner.config.checkpoint.schedule_interval() {
                if components.is_empty() {
                    warn!("Checkpoint schedule configured without components; not started");
                } else {
                    background.schedule = Some(
                        self.inner
                            .checkpoints
                            .spawn_scheduled(interval, components.clone()),
                    );
                }
            }
        }
        info!("Safety layer started");
        Ok(())
    }

    /// Stop background work and commit a graceful, non-resumable stop.
    pub async fn shutdown(&self) -> StopOutcome {
        let background = std::mem::take(&mut *self.inner.background.lock());
        if let Some(monitor) = background.monitor {
            let samples = monitor.stop().await;
            info!(samples, "Monitor loop stopped");
        }
        if let Some(schedule) = background.schedule {
            let created = schedule.stop().await;
            info!(created, "Checkpoint schedule stopped");
        }
        self.inner.emergency.stop_trigger_monitor();
        self.inner
            .emergency
            .trigger_emergency_stop(StopReason::ShutdownRequested, "safety layer shutdown", false)
            .await
    }

    // ═══════════════════════════════════════════════════════════════════
    // ACCESSORS
    // ═══════════════════════════════════════════════════════════════════

    pub fn config(&self) -> &SafetyConfig {
        &self.inner.config
    }

    pub fn constraint_engine(&self) -> &Arc<ConstraintEngine> {
        &self.inner.engine
    }

    pub fn risk_assessor(&self) -> &Arc<RiskAssessor> {
        &self.inner.assessor
    }

    pub fn pipeline(&self) -> &ValidationPipeline {
        &self.inner.pipeline
    }

    pub fn checkpoints(&self) -> &Arc<CheckpointManager> {
        &self.inner.checkpoints
    }

    pub fn emergency(&self) -> &Arc<EmergencyStopController> {
        &self.inner.emergency
    }

    pub fn monitor(&self) -> &Arc<SafetyMonitor> {
        &self.inner.monitor
    }

    /// Gauges read by metric triggers. The monitor loop keeps them current;
    /// hosts without a metrics source may set them directly.
    pub fn gauges(&self) -> &Arc<SharedGauges> {
        &self.inner.gauges
    }
}
