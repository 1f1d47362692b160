use safeguard_checkpoint::CheckpointError;
use safeguard_constraints::ConstraintError;
use safeguard_emergency::{EmergencyError, StopReason};
use safeguard_monitor::MonitorError;
use safeguard_pipeline::PipelineError;
use safeguard_risk::RiskError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors loading or validating a [`SafetyConfig`](crate::SafetyConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors surfaced by [`SafetyLayer`](crate::SafetyLayer).
#[derive(Error, Debug)]
pub enum SafetyError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Constraint(#[from] ConstraintError),

    #[error(transparent)]
    Risk(#[from] RiskError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Emergency(#[from] EmergencyError),

    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error("emergency stop active: {reason}")]
    EmergencyStopActive { reason: StopReason },

    #[error("action {action} rejected: {summary}")]
    ActionRejected { action: String, summary: String },
}

pub type Result<T> = std::result::Result<T, SafetyError>;
