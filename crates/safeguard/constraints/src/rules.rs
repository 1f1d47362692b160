//! Rule and threshold strategies.
//!
//! A [`ConstraintRule`] is a predicate over a state snapshot compared to a
//! resolved threshold. A [`ThresholdFunction`] resolves that threshold from
//! context for dynamic constraints.

use crate::error::RuleError;
use safeguard_types::{ActionContext, SystemState};

/// Outcome of evaluating a rule once.
#[derive(Clone, Debug, PartialEq)]
pub struct RuleOutcome {
    /// Whether the rule holds.
    pub holds: bool,
    /// Observed value, when the rule reads a numeric metric.
    pub observed: Option<f64>,
}

impl RuleOutcome {
    pub fn holds(observed: Option<f64>) -> Self {
        Self {
            holds: true,
            observed,
        }
    }

    pub fn violated(observed: Option<f64>) -> Self {
        Self {
            holds: false,
            observed,
        }
    }
}

/// Predicate over a state snapshot.
pub trait ConstraintRule: Send + Sync {
    /// Human-readable form, e.g. `memory_usage <= threshold`.
    fn describe(&self) -> String;

    /// Whether this rule compares against a threshold.
    fn requires_threshold(&self) -> bool {
        true
    }

    fn evaluate(&self, state: &SystemState, threshold: Option<f64>)
        -> Result<RuleOutcome, RuleError>;
}

/// Derives a threshold from the evaluation context.
pub trait ThresholdFunction: Send + Sync {
    fn name(&self) -> &str;

    fn threshold(&self, context: &ActionContext) -> Result<f64, RuleError>;
}

fn read_metric(state: &SystemState, key: &str) -> Result<f64, RuleError> {
    let value = state
        .number(key)
        .ok_or_else(|| RuleError::MissingMetric(key.to_string()))?;
    if !value.is_finite() {
        return Err(RuleError::NonFinite {
            key: key.to_string(),
            value,
        });
    }
    Ok(value)
}

/// Holds while `metric <= threshold`.
#[derive(Clone, Debug)]
pub struct MetricAtMost {
    pub metric: String,
}

impl MetricAtMost {
    pub fn new(metric: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
        }
    }
}

impl ConstraintRule for MetricAtMost {
    fn describe(&self) -> String {
        format!("{} <= threshold", self.metric)
    }

    fn evaluate(
        &self,
        state: &SystemState,
        threshold: Option<f64>,
    ) -> Result<RuleOutcome, RuleError> {
        let threshold = threshold.ok_or(RuleError::MissingThreshold)?;
        let value = read_metric(state, &self.metric)?;
        Ok(if value <= threshold {
            RuleOutcome::holds(Some(value))
        } else {
            RuleOutcome::violated(Some(value))
        })
    }
}

/// Holds while `metric >= threshold`.
#[derive(Clone, Debug)]
pub struct MetricAtLeast {
    pub metric: String,
}

impl MetricAtLeast {
    pub fn new(metric: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
        }
    }
}

impl ConstraintRule for MetricAtLeast {
    fn describe(&self) -> String {
        format!("{} >= threshold", self.metric)
    }

    fn evaluate(
        &self,
        state: &SystemState,
        threshold: Option<f64>,
    ) -> Result<RuleOutcome, RuleError> {
        let threshold = threshold.ok_or(RuleError::MissingThreshold)?;
        let value = read_metric(state, &self.metric)?;
        Ok(if value >= threshold {
            RuleOutcome::holds(Some(value))
        } else {
            RuleOutcome::violated(Some(value))
        })
    }
}

/// Holds while a boolean flag has the expected value. A missing flag fails.
#[derive(Clone, Debug)]
pub struct FlagRequired {
    pub flag: String,
    pub expected: bool,
}

impl FlagRequired {
    pub fn new(flag: impl Into<String>, expected: bool) -> Self {
        Self {
            flag: flag.into(),
            expected,
        }
    }
}

impl ConstraintRule for FlagRequired {
    fn describe(&self) -> String {
        format!("{} == {}", self.flag, self.expected)
    }

    fn requires_threshold(&self) -> bool {
        false
    }

    fn evaluate(
        &self,
        state: &SystemState,
        _threshold: Option<f64>,
    ) -> Result<RuleOutcome, RuleError> {
        let value = state
            .flag(&self.flag)
            .ok_or_else(|| RuleError::MissingMetric(self.flag.clone()))?;
        Ok(if value == self.expected {
            RuleOutcome::holds(None)
        } else {
            RuleOutcome::violated(None)
        })
    }
}

/// Threshold read from a context value, with an optional fallback.
///
/// This is how adaptive limits are expressed: whoever builds the context
/// decides the current limit. The engine never adjusts it on its own.
#[derive(Clone, Debug)]
pub struct ContextValueThreshold {
    pub key: String,
    pub fallback: Option<f64>,
}

impl ContextValueThreshold {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: f64) -> Self {
        self.fallback = Some(fallback);
        self
    }
}

impl ThresholdFunction for ContextValueThreshold {
    fn name(&self) -> &str {
        &self.key
    }

    fn threshold(&self, context: &ActionContext) -> Result<f64, RuleError> {
        context
            .number(&self.key)
            .or(self.fallback)
            .ok_or_else(|| RuleError::MissingContextValue(self.key.clone()))
    }
}
