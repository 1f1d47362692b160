use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Manual,
    TriggerCondition,
    HardConstraintViolation,
    CriticalRisk,
    SafetyAlert,
    /// Process shutdown; never resumable.
    ShutdownRequested,
}

impl StopReason {
    pub fn is_resumable(&self) -> bool {
        !matches!(self, Self::ShutdownRequested)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Manual => "manual",
            Self::TriggerCondition => "trigger_condition",
            Self::HardConstraintViolation => "hard_constraint_violation",
            Self::CriticalRisk => "critical_risk",
            Self::SafetyAlert => "safety_alert",
            Self::ShutdownRequested => "shutdown_requested",
        };
        f.write_str(s)
    }
}

/// Current emergency state. `Default` is the running state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EmergencyStopStatus {
    pub stopped: bool,
    pub reason: Option<StopReason>,
    pub message: Option<String>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub resumable: bool,
    /// Trigger name, or the caller that requested the stop.
    pub triggered_by: Option<String>,
    /// Time from detection to the committed transition.
    pub response_time: Option<Duration>,
}

impl EmergencyStopStatus {
    pub fn running() -> Self {
        Self::default()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownMode {
    /// Wait for in-flight operations to drain.
    Graceful,
    /// Do not wait; hooks are bounded by the forced timeout.
    Forced,
}

impl ShutdownMode {
    pub fn from_immediate(immediate: bool) -> Self {
        if immediate {
            Self::Forced
        } else {
            Self::Graceful
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShutdownReport {
    pub mode: ShutdownMode,
    /// Whether every in-flight operation finished before hooks ran.
    pub drained: bool,
    pub in_flight_remaining: usize,
    pub hooks_completed: Vec<String>,
    pub hooks_failed: Vec<String>,
    pub hooks_timed_out: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StopOutcome {
    /// This call performed the Running to Stopped transition.
    Stopped {
        status: EmergencyStopStatus,
        shutdown: Option<ShutdownReport>,
    },
    /// A stop was already in effect; its reason and time are unchanged.
    AlreadyStopped(EmergencyStopStatus),
}

impl StopOutcome {
    pub fn status(&self) -> &EmergencyStopStatus {
        match self {
            Self::Stopped { status, .. } | Self::AlreadyStopped(status) => status,
        }
    }

    pub fn is_new_stop(&self) -> bool {
        matches!(self, Self::Stopped { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Stopped,
    Resumed,
}

/// One entry of the transition history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub kind: TransitionKind,
    pub at: DateTime<Utc>,
    pub reason: Option<StopReason>,
    pub generation: u64,
}
