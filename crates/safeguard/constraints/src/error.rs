use thiserror::Error;

/// Errors raised while registering constraints.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConstraintError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("constraint not found: {0}")]
    NotFound(String),
}

/// Errors raised by a rule or threshold function during evaluation.
///
/// The engine never drops these: a failing rule is reported as a violation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuleError {
    #[error("metric missing from state: {0}")]
    MissingMetric(String),

    #[error("context value missing: {0}")]
    MissingContextValue(String),

    #[error("rule requires a threshold")]
    MissingThreshold,

    #[error("non-finite value for {key}: {value}")]
    NonFinite { key: String, value: f64 },
}

pub type Result<T> = std::result::Result<T, ConstraintError>;
