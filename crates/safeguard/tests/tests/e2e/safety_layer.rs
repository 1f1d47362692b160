//! End-to-end test: a config file on disk driving the whole safety layer
//! through one agent session.

use safeguard_checkpoint::{CheckpointFilter, CheckpointKind, CheckpointSort, CheckpointSpec, RollbackTarget};
use safeguard_emergency::{EmergencyError, ResumeOptions, StopOutcome, StopReason};
use safeguard_monitor::{AlertSeverity, RecordingAlertSink, StaticMetricsSource};
use safeguard_runtime::{SafetyConfig, SafetyError, SafetyLayer};
use safeguard_tests::memory_provider;
use safeguard_types::{Action, ActionContext, SystemState};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn config_file(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let contents = format!(
        r#"
[pipeline]
total_timeout_ms = 5000

[checkpoint]
keep_recent = 10
compression = true
storage_dir = '{}'
schedule_interval_ms = 50
components = ["episodic", "semantic", "working"]

[emergency]
check_interval_ms = 5
[[emergency.triggers]]
name = "memory_exhausted"
metric = "memory_usage"
above = 0.98
priority = 100

[monitor]
sample_interval_ms = 10
hysteresis_ms = 50
[[monitor.alerts]]
metric = "error_rate"
warning = 0.05
critical = 0.2

[[constraints]]
name = "memory_ceiling"
kind = "hard"
metric = "memory_usage"
comparison = "at_most"
threshold = 0.95

[[constraints]]
name = "cpu_comfort"
kind = "soft"
metric = "cpu_usage"
comparison = "at_most"
threshold = 0.8
"#,
        dir.path().join("checkpoints").display()
    );
    let path = dir.path().join("safeguard.toml");
    std::fs::write(&path, contents).unwrap();
    path
}

fn healthy() -> SystemState {
    SystemState::new()
        .with("memory_usage", 0.4)
        .with("cpu_usage", 0.3)
        .with("operation_risk", 0.1)
}

async fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let until = Instant::now() + deadline;
    while Instant::now() < until {
        if done() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    done()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn agent_session_stop_rollback_resume() {
    let dir = tempfile::tempdir().unwrap();
    let config = SafetyConfig::load(config_file(&dir)).unwrap();
    let provider = Arc::new(memory_provider());
    let metrics = Arc::new(StaticMetricsSource::new());
    metrics.set("memory_usage", 0.4);
    metrics.set("error_rate", 0.0);
    let sink = Arc::new(RecordingAlertSink::new());

    let layer = SafetyLayer::builder(config, provider.clone())
        .metrics_source(metrics.clone())
        .alert_sink(sink.clone())
        .build()
        .await
        .unwrap();
    layer.start().await.unwrap();

    // Normal operation: validated, locked, checkpointed.
    let action = Action::new("consolidate").with_component("episodic");
    let permit = layer
        .authorize(&action, &healthy(), &ActionContext::new())
        .await
        .unwrap();
    assert_eq!(permit.action().name, "consolidate");
    drop(permit);

    let golden = layer
        .create_checkpoint(
            CheckpointSpec::manual("golden").components(["episodic", "semantic", "working"]),
        )
        .await
        .unwrap();
    provider.set("episodic", b"episodic-corrupted".to_vec());

    // Soft violations warn but do not reject.
    let result = layer
        .validate_action(&action, &healthy().with("cpu_usage", 0.9), &ActionContext::new())
        .await
        .unwrap();
    assert!(result.valid);
    assert_eq!(result.warnings.len(), 1);

    // Memory runs away: the sampled metric reaches the trigger thread.
    metrics.set("error_rate", 0.1);
    metrics.set("memory_usage", 0.99);
    assert!(wait_until(Duration::from_secs(2), || layer.get_status().stopped).await);
    let status = layer.get_status();
    assert_eq!(status.reason, Some(StopReason::TriggerCondition));
    assert_eq!(status.triggered_by.as_deref(), Some("memory_exhausted"));

    let refused = layer
        .authorize(&action, &healthy(), &ActionContext::new())
        .await;
    assert!(matches!(
        refused,
        Err(SafetyError::EmergencyStopActive {
            reason: StopReason::TriggerCondition
        })
    ));

    // Recovery: restore the golden checkpoint while stopped.
    let rollback = layer
        .emergency_rollback(RollbackTarget::Checkpoint(golden), Duration::from_secs(5))
        .await;
    assert!(rollback.success, "{:?}", rollback.error);
    assert_eq!(provider.get("episodic").unwrap(), b"episodic-v1".to_vec());

    let early = layer.resume_system(ResumeOptions::default()).await;
    assert!(!early.resumed);
    assert_eq!(
        early.failed_checks,
        vec!["trigger memory_exhausted still active".to_string()]
    );

    metrics.set("memory_usage", 0.5);
    assert!(
        wait_until(Duration::from_secs(2), || layer.gauges().get("memory_usage") == Some(0.5))
            .await
    );
    let resumed = layer.resume_system(ResumeOptions::default()).await;
    assert!(resumed.resumed, "{:?}", resumed.failed_checks);
    assert!(layer
        .authorize(&action, &healthy(), &ActionContext::new())
        .await
        .is_ok());

    // The monitor saw the error rate cross its warning threshold.
    assert!(
        wait_until(Duration::from_secs(1), || sink
            .notices()
            .iter()
            .any(|n| n.alert.metric == "error_rate" && n.alert.severity == AlertSeverity::Warning))
        .await
    );

    // The schedule kept producing checkpoints on disk.
    assert!(
        wait_until(Duration::from_secs(2), || !layer
            .checkpoints()
            .list_checkpoints(
                &CheckpointFilter::all().kind(CheckpointKind::Scheduled),
                CheckpointSort::NewestFirst,
            )
            .is_empty())
        .await
    );

    // Shutdown is final.
    let outcome = layer.shutdown().await;
    assert!(outcome.is_new_stop());
    assert_eq!(outcome.status().reason, Some(StopReason::ShutdownRequested));
    let after = layer.resume_system(ResumeOptions::default()).await;
    assert_eq!(
        after.error,
        Some(EmergencyError::NotResumable {
            reason: StopReason::ShutdownRequested
        })
    );
}

#[tokio::test]
async fn hard_violation_from_validation_stops_the_layer() {
    let dir = tempfile::tempdir().unwrap();
    let config = SafetyConfig::load(config_file(&dir)).unwrap();
    let layer = SafetyLayer::builder(config, Arc::new(memory_provider()))
        .build()
        .await
        .unwrap();

    let action = Action::new("bulk_import").with_component("semantic");
    let result = layer
        .validate_action(&action, &healthy().with("memory_usage", 0.97), &ActionContext::new())
        .await
        .unwrap();
    assert!(!result.valid);
    assert!(layer.get_status().stopped);
    assert_eq!(
        layer.get_status().reason,
        Some(StopReason::HardConstraintViolation)
    );

    // A second stop request keeps the first reason.
    let again = layer
        .trigger_emergency_stop(StopReason::Manual, "operator", true)
        .await;
    assert!(matches!(again, StopOutcome::AlreadyStopped(_)));
    assert_eq!(
        again.status().reason,
        Some(StopReason::HardConstraintViolation)
    );

    let resumed = layer.resume_system(ResumeOptions::default()).await;
    assert!(resumed.resumed);
    assert!(layer
        .validate_action(&action, &healthy(), &ActionContext::new())
        .await
        .unwrap()
        .valid);
}

#[tokio::test]
async fn checkpoints_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = config_file(&dir);
    let provider = Arc::new(memory_provider());

    let first = SafetyLayer::builder(SafetyConfig::load(&path).unwrap(), provider.clone())
        .build()
        .await
        .unwrap();
    let id = first
        .create_checkpoint(CheckpointSpec::manual("nightly").components(["working"]))
        .await
        .unwrap();
    provider.set("working", b"working-v2".to_vec());
    drop(first);

    let second = SafetyLayer::builder(SafetyConfig::load(&path).unwrap(), provider.clone())
        .build()
        .await
        .unwrap();
    assert_eq!(second.checkpoints().get_checkpoint(id).unwrap().name, "nightly");
    let result = second
        .rollback_to_checkpoint(id, Default::default())
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(provider.get("working").unwrap(), b"working-v1".to_vec());
}

#[test]
fn missing_config_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let err = SafetyConfig::load(dir.path().join("absent.toml")).unwrap_err();
    assert!(err.to_string().contains("absent.toml"), "{}", err);
}
