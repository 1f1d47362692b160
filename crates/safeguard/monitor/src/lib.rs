//! # safeguard-monitor
//!
//! Continuous safety monitoring: a sampling loop reads a caller-supplied
//! [`MetricsSource`], compares each reading against its
//! [`AlertThreshold`] and raises, escalates and resolves [`Alert`]s.
//!
//! An alert resolves only after its metric has stayed on the safe side of
//! the warning threshold for the configured hysteresis window, so a metric
//! oscillating around a threshold does not flap.

#![deny(unsafe_code)]

pub mod error;
pub mod monitor;
pub mod sink;
pub mod types;

pub use error::{MonitorError, Result};
pub use monitor::{MonitorConfig, MonitorHandle, SafetyMonitor};
pub use sink::{
    AlertHandler, AlertSink, MetricsSource, RecordingAlertSink, StaticMetricsSource,
    TracingAlertSink,
};
pub use types::{Alert, AlertEvent, AlertNotice, AlertSeverity, AlertThreshold, Direction};
