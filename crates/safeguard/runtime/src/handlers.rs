//! Alert handlers wiring critical monitor alerts to the emergency stop and
//! checkpoint components.

use async_trait::async_trait;
use safeguard_checkpoint::{CheckpointKind, CheckpointManager, CheckpointSpec};
use safeguard_emergency::{EmergencyStopController, StopReason};
use safeguard_monitor::{AlertHandler, AlertNotice, AlertSeverity};
use std::sync::Arc;
use tracing::info;

/// Forces an emergency stop when an alert turns critical. The stop is
/// committed before returning; shutdown hooks run on their own task.
pub struct EmergencyStopOnCritical {
    controller: Arc<EmergencyStopController>,
}

impl EmergencyStopOnCritical {
    pub fn new(controller: Arc<EmergencyStopController>) -> Self {
        Self { controller }
    }
}

#[async_trait]
impl AlertHandler for EmergencyStopOnCritical {
    async fn on_alert(&self, notice: &AlertNotice) -> Result<(), String> {
        let alert = &notice.alert;
        if alert.severity != AlertSeverity::Critical {
            return Ok(());
        }
        let message = format!(
            "critical alert on {}: {} crossed {}",
            alert.metric, alert.value, alert.threshold
        );
        self.controller.stop_detached(
            StopReason::SafetyAlert,
            message,
            Some(format!("alert:{}", alert.metric)),
            true,
        );
        Ok(())
    }
}

/// Captures an event-triggered checkpoint when an alert turns critical.
pub struct CheckpointOnCritical {
    manager: Arc<CheckpointManager>,
    components: Vec<String>,
}

impl CheckpointOnCritical {
    pub fn new(manager: Arc<CheckpointManager>, components: Vec<String>) -> Self {
        Self { manager, components }
    }
}

#[async_trait]
impl AlertHandler for CheckpointOnCritical {
    async fn on_alert(&self, notice: &AlertNotice) -> Result<(), String> {
        let alert = &notice.alert;
        if alert.severity != AlertSeverity::Critical {
            return Ok(());
        }
        let spec = CheckpointSpec::new(
            format!("alert-{}-{}", alert.metric, alert.id),
            CheckpointKind::EventTriggered,
        )
        .description(format!("critical {} = {}", alert.metric, alert.value))
        .components(self.components.iter().cloned());
        let id = self
            .manager
            .create_checkpoint(spec)
            .await
            .map_err(|e| e.to_string())?;
        info!(checkpoint = %id, metric = %alert.metric, "Checkpoint captured for critical alert");
        Ok(())
    }
}
