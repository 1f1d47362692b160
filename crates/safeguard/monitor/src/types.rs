use crate::error::{MonitorError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Which side of the thresholds is unsafe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Alert when the value rises to or above a threshold.
    Above,
    /// Alert when the value falls to or below a threshold.
    Below,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertThreshold {
    pub metric: String,
    pub warning: f64,
    pub critical: f64,
    pub direction: Direction,
}

impl AlertThreshold {
    pub fn above(metric: impl Into<String>, warning: f64, critical: f64) -> Self {
        Self {
            metric: metric.into(),
            warning,
            critical,
            direction: Direction::Above,
        }
    }

    pub fn below(metric: impl Into<String>, warning: f64, critical: f64) -> Self {
        Self {
            metric: metric.into(),
            warning,
            critical,
            direction: Direction::Below,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.metric.trim().is_empty() {
            return Err(MonitorError::Configuration("alert metric must not be empty".into()));
        }
        if !self.warning.is_finite() || !self.critical.is_finite() {
            return Err(MonitorError::Configuration(format!(
                "alert {}: thresholds must be finite",
                self.metric
            )));
        }
        let ordered = match self.direction {
            Direction::Above => self.critical >= self.warning,
            Direction::Below => self.critical <= self.warning,
        };
        if !ordered {
            return Err(MonitorError::Configuration(format!(
                "alert {}: critical threshold must be at or beyond the warning threshold",
                self.metric
            )));
        }
        Ok(())
    }

    fn crosses(&self, value: f64, threshold: f64) -> bool {
        match self.direction {
            Direction::Above => value >= threshold,
            Direction::Below => value <= threshold,
        }
    }

    /// Severity for `value`, or `None` on the safe side of `warning`.
    pub fn classify(&self, value: f64) -> Option<AlertSeverity> {
        if self.crosses(value, self.critical) {
            Some(AlertSeverity::Critical)
        } else if self.crosses(value, self.warning) {
            Some(AlertSeverity::Warning)
        } else {
            None
        }
    }

    pub fn threshold_for(&self, severity: AlertSeverity) -> f64 {
        match severity {
            AlertSeverity::Warning => self.warning,
            AlertSeverity::Critical => self.critical,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub metric: String,
    pub severity: AlertSeverity,
    /// Reading that raised or last escalated the alert.
    pub value: f64,
    /// Threshold crossed at the current severity.
    pub threshold: f64,
    pub raised_at: u64,
    pub escalated_at: Option<u64>,
    pub resolved_at: Option<u64>,
}

impl Alert {
    pub fn is_active(&self) -> bool {
        self.resolved_at.is_none()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertEvent {
    Raised,
    Escalated,
    Resolved,
}

/// An alert together with the change that produced this notification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertNotice {
    pub event: AlertEvent,
    pub alert: Alert,
}
