//! End-to-end test: emergency stop latency, shutdown and verified resume.
//!
//! The trigger monitor runs on its own OS thread, so the latency checks use
//! the real clock on a multi-threaded runtime.

use async_trait::async_trait;
use parking_lot::Mutex;
use safeguard_emergency::{
    EmergencyConfig, EmergencyError, EmergencyStopController, EmergencyStopStatus,
    EmergencyTrigger, FlagCondition, MetricAbove, ResumeOptions, SafetyVerifier, SharedGauges,
    ShutdownHook, ShutdownMode, StopOutcome, StopReason, TransitionKind,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecordingHook {
    modes: Mutex<Vec<ShutdownMode>>,
}

#[async_trait]
impl ShutdownHook for RecordingHook {
    fn name(&self) -> &str {
        "recording"
    }

    async fn on_emergency_stop(
        &self,
        _status: &EmergencyStopStatus,
        mode: ShutdownMode,
    ) -> Result<(), String> {
        self.modes.lock().push(mode);
        Ok(())
    }
}

/// Passes only once `healthy` is set.
#[derive(Default)]
struct StorageCheck {
    healthy: AtomicBool,
}

#[async_trait]
impl SafetyVerifier for StorageCheck {
    fn name(&self) -> &str {
        "storage"
    }

    async fn verify(&self) -> Result<(), String> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err("journal not flushed".into())
        }
    }
}

fn controller() -> Arc<EmergencyStopController> {
    Arc::new(EmergencyStopController::new(EmergencyConfig::default()).unwrap())
}

async fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let until = Instant::now() + deadline;
    while Instant::now() < until {
        if done() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    done()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn trigger_stops_within_response_bound() {
    let ctl = controller();
    let flag = FlagCondition::new();
    ctl.register_trigger(EmergencyTrigger::new("operator_flag", flag.clone()).with_priority(10))
        .unwrap();
    let hook = Arc::new(RecordingHook::default());
    ctl.add_shutdown_hook(hook.clone());
    ctl.start_trigger_monitor().unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!ctl.is_stopped());

    let raised_at = Instant::now();
    flag.raise();
    assert!(wait_until(Duration::from_millis(500), || ctl.is_stopped()).await);
    let latency = raised_at.elapsed();
    assert!(
        latency <= Duration::from_millis(100),
        "stop took {:?}",
        latency
    );

    let status = ctl.get_status();
    assert_eq!(status.reason, Some(StopReason::TriggerCondition));
    assert_eq!(status.triggered_by.as_deref(), Some("operator_flag"));
    assert!(status.response_time.unwrap() <= Duration::from_millis(100));

    assert!(wait_until(Duration::from_secs(1), || !hook.modes.lock().is_empty()).await);
    assert_eq!(*hook.modes.lock(), vec![ShutdownMode::Forced]);
    ctl.stop_trigger_monitor();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn metric_trigger_fires_from_gauges() {
    let ctl = controller();
    let gauges = Arc::new(SharedGauges::new());
    ctl.register_trigger(EmergencyTrigger::new(
        "memory_exhausted",
        MetricAbove::new(gauges.clone(), "memory_usage", 0.98),
    ))
    .unwrap();
    ctl.start_trigger_monitor().unwrap();

    gauges.set("memory_usage", 0.5);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!ctl.is_stopped());

    gauges.set("memory_usage", 0.99);
    assert!(wait_until(Duration::from_millis(100), || ctl.is_stopped()).await);
    ctl.stop_trigger_monitor();
}

#[tokio::test]
async fn manual_immediate_stop_is_visible_at_once() {
    let ctl = controller();
    let before = chrono::Utc::now();

    let outcome = ctl
        .trigger_emergency_stop(StopReason::Manual, "operator pressed stop", true)
        .await;
    assert!(outcome.is_new_stop());

    let status = ctl.get_status();
    assert!(status.stopped);
    assert_eq!(status.reason, Some(StopReason::Manual));
    assert_eq!(status.message.as_deref(), Some("operator pressed stop"));
    assert!(status.stopped_at.unwrap() >= before);
    assert!(status.resumable);
    assert!(matches!(ctl.enter(), Err(EmergencyError::StopActive { .. })));
}

#[tokio::test]
async fn first_stop_reason_wins() {
    let ctl = controller();
    ctl.trigger_emergency_stop(StopReason::CriticalRisk, "risk 0.93", true)
        .await;
    let stopped_at = ctl.get_status().stopped_at;

    let again = ctl
        .trigger_emergency_stop(StopReason::Manual, "second request", true)
        .await;
    assert!(matches!(again, StopOutcome::AlreadyStopped(_)));
    let status = ctl.get_status();
    assert_eq!(status.reason, Some(StopReason::CriticalRisk));
    assert_eq!(status.stopped_at, stopped_at);
}

#[tokio::test(start_paused = true)]
async fn graceful_stop_waits_for_in_flight_work() {
    let ctl = controller();
    let guard = ctl.enter().unwrap();

    let stopper = {
        let ctl = ctl.clone();
        tokio::spawn(async move {
            ctl.trigger_emergency_stop(StopReason::Manual, "drain", false)
                .await
        })
    };
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(ctl.is_stopped());
    assert!(!stopper.is_finished());

    drop(guard);
    let outcome = stopper.await.unwrap();
    match outcome {
        StopOutcome::Stopped { shutdown, .. } => {
            let report = shutdown.unwrap();
            assert_eq!(report.mode, ShutdownMode::Graceful);
            assert!(report.drained);
            assert_eq!(report.in_flight_remaining, 0);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn resume_requires_passing_verification() {
    let ctl = controller();
    let flag = FlagCondition::new();
    ctl.register_trigger(EmergencyTrigger::new("operator_flag", flag.clone()))
        .unwrap();
    let storage = Arc::new(StorageCheck::default());
    ctl.add_verifier(storage.clone());

    flag.raise();
    assert!(ctl.poll_triggers().unwrap().is_new_stop());
    assert!(ctl.is_stopped());

    let refused = ctl.resume_system(ResumeOptions::default()).await;
    assert!(!refused.resumed);
    assert_eq!(refused.failed_checks.len(), 2);
    assert!(refused.status.stopped);

    flag.clear();
    let refused = ctl.resume_system(ResumeOptions::default()).await;
    assert!(!refused.resumed);
    assert_eq!(
        refused.error,
        Some(EmergencyError::VerificationFailed(vec![
            "storage: journal not flushed".to_string()
        ]))
    );

    let unverified = ctl
        .resume_system(ResumeOptions {
            verify_safety: false,
            run_diagnostics: false,
        })
        .await;
    assert_eq!(unverified.error, Some(EmergencyError::UnverifiedResume));

    storage.healthy.store(true, Ordering::SeqCst);
    let resumed = ctl
        .resume_system(ResumeOptions {
            verify_safety: true,
            run_diagnostics: true,
        })
        .await;
    assert!(resumed.resumed);
    assert!(!resumed.status.stopped);
    assert!(!resumed.diagnostics.is_empty());
    assert!(ctl.enter().is_ok());

    let kinds: Vec<_> = ctl.context().history().iter().map(|t| t.kind).collect();
    assert_eq!(kinds, vec![TransitionKind::Stopped, TransitionKind::Resumed]);
}
