//! The emergency stop state machine.
//!
//! Stops commit synchronously on the shared [`SafetyContext`]; shutdown
//! hooks run afterwards. Triggers are polled on a dedicated OS thread so a
//! busy runtime cannot delay a stop.

use crate::config::EmergencyConfig;
use crate::context::{InFlightGuard, SafetyContext};
use crate::error::{EmergencyError, Result};
use crate::hooks::{SafetyVerifier, ShutdownHook};
use crate::status::{EmergencyStopStatus, ShutdownMode, ShutdownReport, StopOutcome, StopReason};
use crate::trigger::EmergencyTrigger;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tokio::runtime::Handle;
use tracing::{error, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeOptions {
    /// Re-check triggers and verifiers before resuming.
    pub verify_safety: bool,
    /// Report every check in [`ResumeResult::diagnostics`].
    pub run_diagnostics: bool,
}

impl Default for ResumeOptions {
    fn default() -> Self {
        Self {
            verify_safety: true,
            run_diagnostics: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResumeResult {
    pub resumed: bool,
    /// Why the resume was refused.
    pub error: Option<EmergencyError>,
    pub failed_checks: Vec<String>,
    pub diagnostics: Vec<String>,
    /// Status after the call.
    pub status: EmergencyStopStatus,
}

struct Shared {
    config: EmergencyConfig,
    context: SafetyContext,
    /// Descending priority; equal priorities keep registration order.
    triggers: RwLock<Vec<EmergencyTrigger>>,
    verifiers: RwLock<Vec<Arc<dyn SafetyVerifier>>>,
    hooks: RwLock<Vec<Arc<dyn ShutdownHook>>>,
}

impl Shared {
    /// Evaluate triggers once and commit a stop for the first one met.
    fn poll_triggers(&self) -> Option<StopOutcome> {
        if self.context.is_stopped() {
            return None;
        }
        let detected_at = Instant::now();
        let (name, description) = {
            let triggers = self.triggers.read();
            let fired = triggers.iter().find(|t| t.condition.is_met())?;
            (fired.name.clone(), fired.condition.describe())
        };
        let outcome = self.context.commit_stop(
            StopReason::TriggerCondition,
            format!("trigger {} fired: {}", name, description),
            Some(name),
            detected_at,
        );
        if outcome.is_new_stop() {
            self.log_stop(outcome.status());
        }
        Some(outcome)
    }

    fn log_stop(&self, status: &EmergencyStopStatus) {
        let response = status.response_time.unwrap_or_default();
        error!(
            reason = ?status.reason,
            triggered_by = status.triggered_by.as_deref().unwrap_or("caller"),
            message = status.message.as_deref().unwrap_or_default(),
            response_us = response.as_micros() as u64,
            "Emergency stop committed"
        );
        if response > self.config.response_time_bound {
            warn!(
                response_ms = response.as_millis() as u64,
                bound_ms = self.config.response_time_bound.as_millis() as u64,
                "Emergency stop exceeded response time bound"
            );
        }
    }

    async fn shutdown(&self, mode: ShutdownMode, status: EmergencyStopStatus) -> ShutdownReport {
        let drained = match mode {
            ShutdownMode::Graceful => {
                self.context
                    .wait_for_drain(self.config.graceful_timeout)
                    .await
            }
            ShutdownMode::Forced => self.context.in_flight() == 0,
        };
        let bound = match mode {
            ShutdownMode::Graceful => self.config.graceful_timeout,
            ShutdownMode::Forced => self.config.forced_timeout,
        };
        let deadline = tokio::time::Instant::now() + bound;

        let hooks: Vec<_> = self.hooks.read().clone();
        let calls = hooks.iter().map(|hook| {
            let status = &status;
            async move {
                let outcome =
                    tokio::time::timeout_at(deadline, hook.on_emergency_stop(status, mode)).await;
                (hook.name().to_string(), outcome)
            }
        });

        let mut report = ShutdownReport {
            mode,
            drained,
            in_flight_remaining: self.context.in_flight(),
            hooks_completed: Vec::new(),
            hooks_failed: Vec::new(),
            hooks_timed_out: false,
        };
        for (name, outcome) in futures::future::join_all(calls).await {
            match outcome {
                Ok(Ok(())) => report.hooks_completed.push(name),
                Ok(Err(e)) => {
                    warn!(hook = %name, error = %e, "Shutdown hook failed");
                    report.hooks_failed.push(name);
                }
                Err(_) => {
                    warn!(hook = %name, "Shutdown hook timed out");
                    report.hooks_timed_out = true;
                    report.hooks_failed.push(name);
                }
            }
        }

        info!(
            mode = ?mode,
            drained = report.drained,
            in_flight = report.in_flight_remaining,
            hooks_completed = report.hooks_completed.len(),
            hooks_failed = report.hooks_failed.len(),
            "Emergency shutdown finished"
        );
        report
    }
}

struct TriggerMonitor {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Running/Stopped state machine with a dedicated trigger thread.
pub struct EmergencyStopController {
    shared: Arc<Shared>,
    monitor: Mutex<Option<TriggerMonitor>>,
}

impl EmergencyStopController {
    pub fn new(config: EmergencyConfig) -> Result<Self> {
        let context = SafetyContext::with_history_limit(config.history_limit);
        Self::with_context(config, context)
    }

    /// Controller over an existing context, e.g. one shared with other
    /// components.
    pub fn with_context(config: EmergencyConfig, context: SafetyContext) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                context,
                triggers: RwLock::new(Vec::new()),
                verifiers: RwLock::new(Vec::new()),
                hooks: RwLock::new(Vec::new()),
            }),
            monitor: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &EmergencyConfig {
        &self.shared.config
    }

    pub fn context(&self) -> &SafetyContext {
        &self.shared.context
    }

    pub fn register_trigger(&self, trigger: EmergencyTrigger) -> Result<()> {
        if trigger.name.trim().is_empty() {
            return Err(EmergencyError::Configuration(
                "trigger name must not be empty".into(),
            ));
        }
        let mut triggers = self.shared.triggers.write();
        if triggers.iter().any(|t| t.name == trigger.name) {
            return Err(EmergencyError::Configuration(format!(
                "duplicate trigger name: {}",
                trigger.name
            )));
        }
        let at = triggers
            .iter()
            .position(|t| t.priority < trigger.priority)
            .unwrap_or(triggers.len());
        info!(trigger = %trigger.name, priority = trigger.priority, "Registered emergency trigger");
        triggers.insert(at, trigger);
        Ok(())
    }

    /// Trigger names in evaluation order.
    pub fn trigger_names(&self) -> Vec<String> {
        self.shared.triggers.read().iter().map(|t| t.name.clone()).collect()
    }

    pub fn add_verifier(&self, verifier: Arc<dyn SafetyVerifier>) {
        self.shared.verifiers.write().push(verifier);
    }

    pub fn add_shutdown_hook(&self, hook: Arc<dyn ShutdownHook>) {
        self.shared.hooks.write().push(hook);
    }

    pub fn get_status(&self) -> EmergencyStopStatus {
        self.shared.context.status()
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.context.is_stopped()
    }

    /// Register an in-flight operation; refused while stopped.
    pub fn enter(&self) -> Result<InFlightGuard> {
        self.shared.context.enter()
    }

    /// Evaluate every trigger once, committing a stop for the first one
    /// met. Shutdown hooks are not run.
    pub fn poll_triggers(&self) -> Option<StopOutcome> {
        self.shared.poll_triggers()
    }

    /// Stop the system, then run the shutdown sequence.
    ///
    /// The transition is committed before the first await, so every
    /// observer sees `stopped` as soon as this call has been polled once.
    pub async fn trigger_emergency_stop(
        &self,
        reason: StopReason,
        message: impl Into<String>,
        immediate: bool,
    ) -> StopOutcome {
        self.stop_with(reason, message, None, immediate).await
    }

    /// As [`trigger_emergency_stop`](Self::trigger_emergency_stop),
    /// recording who requested the stop.
    pub async fn stop_with(
        &self,
        reason: StopReason,
        message: impl Into<String>,
        triggered_by: Option<String>,
        immediate: bool,
    ) -> StopOutcome {
        let outcome = self
            .shared
            .context
            .commit_stop(reason, message, triggered_by, Instant::now());
        match outcome {
            StopOutcome::Stopped { status, .. } => {
                self.shared.log_stop(&status);
                let shutdown = self
                    .shared
                    .shutdown(ShutdownMode::from_immediate(immediate), status.clone())
                    .await;
                StopOutcome::Stopped {
                    status,
                    shutdown: Some(shutdown),
                }
            }
            already @ StopOutcome::AlreadyStopped(_) => {
                info!(requested = %reason, "Emergency stop already in effect");
                already
            }
        }
    }

    /// Commit the stop now and run the shutdown sequence on a spawned task.
    /// The returned outcome never carries a shutdown report.
    pub fn stop_detached(
        &self,
        reason: StopReason,
        message: impl Into<String>,
        triggered_by: Option<String>,
        immediate: bool,
    ) -> StopOutcome {
        let outcome = self
            .shared
            .context
            .commit_stop(reason, message, triggered_by, Instant::now());
        match &outcome {
            StopOutcome::Stopped { status, .. } => {
                self.shared.log_stop(status);
                match Handle::try_current() {
                    Ok(handle) => {
                        let shared = self.shared.clone();
                        let status = status.clone();
                        handle.spawn(async move {
                            shared
                                .shutdown(ShutdownMode::from_immediate(immediate), status)
                                .await;
                        });
                    }
                    Err(_) => warn!("Stop committed outside a tokio runtime; shutdown hooks skipped"),
                }
            }
            StopOutcome::AlreadyStopped(_) => {
                info!(requested = %reason, "Emergency stop already in effect");
            }
        }
        outcome
    }

    /// Leave the stopped state after verification.
    pub async fn resume_system(&self, options: ResumeOptions) -> ResumeResult {
        let status = self.get_status();
        let refuse = |error: EmergencyError, failed_checks: Vec<String>, diagnostics: Vec<String>| {
            warn!(error = %error, "Resume refused");
            ResumeResult {
                resumed: false,
                error: Some(error),
                failed_checks,
                diagnostics,
                status: self.get_status(),
            }
        };

        if !status.stopped {
            return refuse(EmergencyError::NotStopped, Vec::new(), Vec::new());
        }
        let reason = status.reason.unwrap_or(StopReason::Manual);
        if !status.resumable {
            return refuse(EmergencyError::NotResumable { reason }, Vec::new(), Vec::new());
        }
        if !options.verify_safety && !self.shared.config.allow_unverified_resume {
            return refuse(EmergencyError::UnverifiedResume, Vec::new(), Vec::new());
        }

        let generation = self.shared.context.generation();
        let mut failed = Vec::new();
        let mut diagnostics = Vec::new();
        if options.verify_safety || options.run_diagnostics {
            for trigger in self.shared.triggers.read().iter() {
                if trigger.condition.is_met() {
                    failed.push(format!("trigger {} still active", trigger.name));
                    diagnostics.push(format!("trigger {}: active ({})", trigger.name, trigger.condition.describe()));
                } else {
                    diagnostics.push(format!("trigger {}: clear", trigger.name));
                }
            }
            let verifiers: Vec<_> = self.shared.verifiers.read().clone();
            for verifier in verifiers {
                match verifier.verify().await {
                    Ok(()) => diagnostics.push(format!("verifier {}: ok", verifier.name())),
                    Err(e) => {
                        diagnostics.push(format!("verifier {}: failed: {}", verifier.name(), e));
                        failed.push(format!("{}: {}", verifier.name(), e));
                    }
                }
            }
        }
        if !options.run_diagnostics {
            diagnostics.clear();
        }
        if options.verify_safety && !failed.is_empty() {
            return refuse(EmergencyError::VerificationFailed(failed.clone()), failed, diagnostics);
        }

        match self.shared.context.commit_resume(generation) {
            Ok(generation) => {
                info!(
                    previous_reason = %reason,
                    verified = options.verify_safety,
                    generation,
                    "System resumed"
                );
                ResumeResult {
                    resumed: true,
                    error: None,
                    failed_checks: failed,
                    diagnostics,
                    status: self.get_status(),
                }
            }
            Err(e) => refuse(e, failed, diagnostics),
        }
    }

    /// Start the trigger thread. Stops it commits are followed by a forced
    /// shutdown on the current tokio runtime, when there is one.
    pub fn start_trigger_monitor(&self) -> Result<()> {
        let mut monitor = self.monitor.lock();
        if monitor.as_ref().is_some_and(|m| !m.thread.is_finished()) {
            return Ok(());
        }
        let stop = Arc::new(AtomicBool::new(false));
        let runtime = Handle::try_current().ok();
        if runtime.is_none() {
            warn!("Trigger monitor started outside a tokio runtime; shutdown hooks will not run");
        }
        let thread = {
            let shared = self.shared.clone();
            let stop = stop.clone();
            std::thread::Builder::new()
                .name("safeguard-emergency".into())
                .spawn(move || run_trigger_monitor(shared, stop, runtime))
                .map_err(|e| EmergencyError::Monitor(e.to_string()))?
        };
        info!(
            interval_ms = self.shared.config.check_interval.as_millis() as u64,
            "Emergency trigger monitor started"
        );
        *monitor = Some(TriggerMonitor { stop, thread });
        Ok(())
    }

    /// Stop the trigger thread and wait for it to exit.
    pub fn stop_trigger_monitor(&self) {
        let Some(monitor) = self.monitor.lock().take() else {
            return;
        };
        monitor.stop.store(true, Ordering::Release);
        if monitor.thread.join().is_err() {
            error!("Emergency trigger monitor panicked");
        }
        info!("Emergency trigger monitor stopped");
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor
            .lock()
            .as_ref()
            .is_some_and(|m| !m.thread.is_finished())
    }
}

impl Drop for EmergencyStopController {
    fn drop(&mut self) {
        if let Some(monitor) = self.monitor.get_mut().as_ref() {
            monitor.stop.store(true, Ordering::Release);
        }
    }
}

fn run_trigger_monitor(shared: Arc<Shared>, stop: Arc<AtomicBool>, runtime: Option<Handle>) {
    let interval = shared.config.check_interval;
    while !stop.load(Ordering::Acquire) {
        if let Some(StopOutcome::Stopped { status, .. }) = shared.poll_triggers() {
            if let Some(handle) = &runtime {
                let shared = shared.clone();
                handle.spawn(async move {
                    shared.shutdown(ShutdownMode::Forced, status).await;
                });
            }
        }
        std::thread::sleep(interval);
    }
}
