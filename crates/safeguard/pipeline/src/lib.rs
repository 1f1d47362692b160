//! # safeguard-pipeline
//!
//! Runs an action through named validation stages.
//!
//! Each stage wraps a [`Validator`] with its own timeout, retry count and
//! required flag. Stages may declare dependencies on earlier stages; with
//! `parallel_execution` every stage whose dependencies are settled runs
//! concurrently on the tokio worker pool. A pipeline-wide deadline bounds
//! the whole run.
//!
//! The caller's request is never mutated. Validators that sanitize return a
//! new copy, which later stages see and which is returned in the result.

#![deny(unsafe_code)]

pub mod error;
pub mod pipeline;
pub mod stage;
pub mod validator;
pub mod validators;

pub use error::{PipelineError, Result, StageError, StageErrorKind, ValidatorError};
pub use pipeline::{PipelineConfig, StageReport, StageStatus, ValidationPipeline, ValidationResult};
pub use stage::ValidationStage;
pub use validator::{StageOutcome, ValidationIssue, ValidationRequest, Validator};
pub use validators::{ConstraintValidator, RiskValidator};
