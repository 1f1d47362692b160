//! # safeguard-constraints
//!
//! Named constraints evaluated against a [`SystemState`] snapshot.
//!
//! - **Hard** constraints always surface when violated (default action:
//!   emergency stop).
//! - **Soft** constraints surface as warnings by default.
//! - **Dynamic** constraints derive their threshold from the
//!   [`ActionContext`] at evaluation time.
//!
//! Every registered constraint is evaluated on every call; the engine has
//! no side effects beyond producing violations. Enforcing the declared
//! [`ViolationAction`] is the caller's job.
//!
//! [`SystemState`]: safeguard_types::SystemState
//! [`ActionContext`]: safeguard_types::ActionContext

#![deny(unsafe_code)]

pub mod constraint;
pub mod engine;
pub mod error;
pub mod rules;

pub use constraint::{Constraint, ConstraintKind, ConstraintViolation, Threshold, ViolationAction};
pub use engine::{ConstraintEngine, EvaluationResult};
pub use error::{ConstraintError, RuleError};
pub use rules::{
    ConstraintRule, ContextValueThreshold, FlagRequired, MetricAtLeast, MetricAtMost, RuleOutcome,
    ThresholdFunction,
};
