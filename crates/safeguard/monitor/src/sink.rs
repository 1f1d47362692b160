use crate::error::{MonitorError, Result};
use crate::types::{AlertEvent, AlertNotice, AlertSeverity};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use tracing::{error, info, warn};

/// Caller-supplied metric readings.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn current_readings(&self) -> Result<BTreeMap<String, f64>>;
}

/// Reacts to alerts raised or escalated on one metric.
#[async_trait]
pub trait AlertHandler: Send + Sync {
    async fn on_alert(&self, notice: &AlertNotice) -> std::result::Result<(), String>;
}

/// Forwards every alert change to external logging or paging.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, notice: &AlertNotice);
}

/// Readings set directly by the caller.
#[derive(Debug, Default)]
pub struct StaticMetricsSource {
    readings: RwLock<BTreeMap<String, f64>>,
    failing: RwLock<Option<String>>,
}

impl StaticMetricsSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, metric: impl Into<String>, value: f64) {
        self.readings.write().insert(metric.into(), value);
    }

    pub fn remove(&self, metric: &str) {
        self.readings.write().remove(metric);
    }

    /// Make subsequent reads fail with `reason`, or succeed again on `None`.
    pub fn fail_with(&self, reason: Option<String>) {
        *self.failing.write() = reason;
    }
}

#[async_trait]
impl MetricsSource for StaticMetricsSource {
    async fn current_readings(&self) -> Result<BTreeMap<String, f64>> {
        if let Some(reason) = self.failing.read().clone() {
            return Err(MonitorError::Source(reason));
        }
        Ok(self.readings.read().clone())
    }
}

/// Keeps every notice it receives.
#[derive(Debug, Default)]
pub struct RecordingAlertSink {
    notices: Mutex<Vec<AlertNotice>>,
}

impl RecordingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<AlertNotice> {
        self.notices.lock().clone()
    }
}

#[async_trait]
impl AlertSink for RecordingAlertSink {
    async fn notify(&self, notice: &AlertNotice) {
        self.notices.lock().push(notice.clone());
    }
}

/// Emits alerts as tracing events.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn notify(&self, notice: &AlertNotice) {
        let alert = &notice.alert;
        match (notice.event, alert.severity) {
            (AlertEvent::Resolved, _) => {
                info!(alert = %alert.id, metric = %alert.metric, "Alert resolved")
            }
            (_, AlertSeverity::Critical) => error!(
                alert = %alert.id,
                metric = %alert.metric,
                value = alert.value,
                threshold = alert.threshold,
                event = ?notice.event,
                "Critical alert"
            ),
            (_, AlertSeverity::Warning) => warn!(
                alert = %alert.id,
                metric = %alert.metric,
                value = alert.value,
                threshold = alert.threshold,
                event = ?notice.event,
                "Warning alert"
            ),
        }
    }
}
