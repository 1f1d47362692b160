//! # safeguard-runtime
//!
//! Entry point for hosts embedding the safety layer.
//!
//! [`SafetyConfig`] is loaded from TOML and mapped onto each component's
//! config. [`SafetyLayer`] wires the constraint engine, risk assessor,
//! validation pipeline, checkpoint manager, emergency stop controller and
//! safety monitor together and exposes the operations an agent calls:
//!
//! - `validate_action` / `authorize` / `begin_action` before acting
//! - `create_checkpoint`, `rollback_to_checkpoint`, `emergency_rollback`
//! - `trigger_emergency_stop`, `resume_system`, `get_status`
//! - `start` / `shutdown` for the background monitor, trigger thread and
//!   checkpoint schedule
//!
//! [`init_tracing`] installs the usual `RUST_LOG`-filtered subscriber.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod layer;
pub mod logging;

pub use config::{
    AlertSpec, CheckpointSection, Comparison, ConstraintSpec, CriticalAction, EmergencySection,
    MonitorSection, PipelineSection, RiskFactorSpec, RiskSection, SafetyConfig, TriggerSpec,
};
pub use error::{ConfigError, Result, SafetyError};
pub use handlers::{CheckpointOnCritical, EmergencyStopOnCritical};
pub use layer::{ActionPermit, AdjustmentPolicy, SafetyLayer, SafetyLayerBuilder};
pub use logging::init_tracing;
