//! # safeguard-emergency
//!
//! Process-wide halt state for an agent, scoped to a [`SafetyContext`].
//!
//! The controller is a two-state machine (Running, Stopped). A stop is
//! committed synchronously, from a registered [`EmergencyTrigger`] polled
//! on a dedicated OS thread or from an explicit call, and is visible to
//! every clone of the context at once. Only [`resume_system`] leaves the
//! stopped state, and only after every trigger is clear and every
//! [`SafetyVerifier`] passes.
//!
//! [`resume_system`]: EmergencyStopController::resume_system

#![deny(unsafe_code)]

pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod hooks;
pub mod status;
pub mod trigger;

pub use config::EmergencyConfig;
pub use context::{InFlightGuard, SafetyContext};
pub use controller::{EmergencyStopController, ResumeOptions, ResumeResult};
pub use error::{EmergencyError, Result};
pub use hooks::{SafetyVerifier, ShutdownHook};
pub use status::{
    EmergencyStopStatus, ShutdownMode, ShutdownReport, StopOutcome, StopReason, Transition,
    TransitionKind,
};
pub use trigger::{
    EmergencyTrigger, FlagCondition, MetricAbove, MetricBelow, SharedGauges, TriggerCondition,
};
