use crate::validator::ValidationIssue;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised while building a pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Unexpected failure inside a validator. Fails only the stage it came from.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidatorError {
    #[error("validator failed: {0}")]
    Failed(String),

    #[error("missing input: {0}")]
    MissingInput(String),
}

/// Why a stage failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageErrorKind {
    /// The validator judged the request invalid.
    Invalid,
    /// Every attempt exceeded the stage timeout.
    Timeout,
    /// Every attempt ended in a validator error.
    ValidatorError,
    /// A dependency did not pass, so the stage never ran.
    Skipped,
    /// Stopped by the pipeline deadline or by fail-fast.
    Cancelled,
}

impl fmt::Display for StageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid => write!(f, "invalid"),
            Self::Timeout => write!(f, "timeout"),
            Self::ValidatorError => write!(f, "validator error"),
            Self::Skipped => write!(f, "skipped"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A failed stage with its itemized issues.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageError {
    pub stage: String,
    pub kind: StageErrorKind,
    pub message: String,
    pub issues: Vec<ValidationIssue>,
    pub required: bool,
    pub attempts: u32,
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage {} ({}): {}", self.stage, self.kind, self.message)
    }
}
