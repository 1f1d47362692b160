use crate::rules::{ConstraintRule, ThresholdFunction};
use safeguard_types::ViolationSeverity;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// How a constraint is enforced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintKind {
    /// Always blocks when violated.
    Hard,
    /// Warns when violated.
    Soft,
    /// Threshold is derived from context at evaluation time.
    Dynamic,
}

impl ConstraintKind {
    /// Action applied when a constraint does not declare one.
    pub fn default_action(&self) -> ViolationAction {
        match self {
            Self::Hard => ViolationAction::EmergencyStop,
            Self::Soft => ViolationAction::Warning,
            Self::Dynamic => ViolationAction::Throttle,
        }
    }

    pub fn severity(&self) -> ViolationSeverity {
        match self {
            Self::Hard => ViolationSeverity::Critical,
            Self::Dynamic => ViolationSeverity::Error,
            Self::Soft => ViolationSeverity::Warning,
        }
    }

    /// Rank among equal priorities; hard constraints go first.
    pub(crate) fn rank(&self) -> u8 {
        match self {
            Self::Hard => 0,
            Self::Soft | Self::Dynamic => 1,
        }
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hard => write!(f, "hard"),
            Self::Soft => write!(f, "soft"),
            Self::Dynamic => write!(f, "dynamic"),
        }
    }
}

/// Response declared by a constraint for when it is violated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationAction {
    EmergencyStop,
    Throttle,
    Warning,
    /// Delegated to a caller-supplied adjustment policy.
    Adjust,
}

impl fmt::Display for ViolationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmergencyStop => write!(f, "emergency_stop"),
            Self::Throttle => write!(f, "throttle"),
            Self::Warning => write!(f, "warning"),
            Self::Adjust => write!(f, "adjust"),
        }
    }
}

/// Threshold a rule is compared against.
#[derive(Clone)]
pub enum Threshold {
    /// The rule needs no threshold (e.g. flag checks).
    None,
    Fixed(f64),
    Derived(Arc<dyn ThresholdFunction>),
}

impl fmt::Debug for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Fixed(v) => write!(f, "Fixed({})", v),
            Self::Derived(func) => write!(f, "Derived({})", func.name()),
        }
    }
}

/// A named rule with its enforcement metadata.
#[derive(Clone)]
pub struct Constraint {
    pub name: String,
    pub kind: ConstraintKind,
    pub rule: Arc<dyn ConstraintRule>,
    pub threshold: Threshold,
    pub action: ViolationAction,
    /// 1 is the highest priority.
    pub priority: u32,
}

impl Constraint {
    fn build(
        name: impl Into<String>,
        kind: ConstraintKind,
        rule: impl ConstraintRule + 'static,
        threshold: Threshold,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            rule: Arc::new(rule),
            threshold,
            action: kind.default_action(),
            priority: 1,
        }
    }

    pub fn hard(name: impl Into<String>, rule: impl ConstraintRule + 'static, threshold: f64) -> Self {
        Self::build(name, ConstraintKind::Hard, rule, Threshold::Fixed(threshold))
    }

    pub fn soft(name: impl Into<String>, rule: impl ConstraintRule + 'static, threshold: f64) -> Self {
        Self::build(name, ConstraintKind::Soft, rule, Threshold::Fixed(threshold))
    }

    pub fn dynamic(
        name: impl Into<String>,
        rule: impl ConstraintRule + 'static,
        threshold: impl ThresholdFunction + 'static,
    ) -> Self {
        Self::build(
            name,
            ConstraintKind::Dynamic,
            rule,
            Threshold::Derived(Arc::new(threshold)),
        )
    }

    /// A constraint whose rule takes no threshold.
    pub fn predicate(
        name: impl Into<String>,
        kind: ConstraintKind,
        rule: impl ConstraintRule + 'static,
    ) -> Self {
        Self::build(name, kind, rule, Threshold::None)
    }

    pub fn with_action(mut self, action: ViolationAction) -> Self {
        self.action = action;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn severity(&self) -> ViolationSeverity {
        self.kind.severity()
    }
}

impl fmt::Debug for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constraint")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("rule", &self.rule.describe())
            .field("threshold", &self.threshold)
            .field("action", &self.action)
            .field("priority", &self.priority)
            .finish()
    }
}

/// A single violated constraint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConstraintViolation {
    pub constraint: String,
    pub kind: ConstraintKind,
    pub severity: ViolationSeverity,
    pub message: String,
    pub action: ViolationAction,
    pub observed: Option<f64>,
    pub threshold: Option<f64>,
}

impl ConstraintViolation {
    pub fn is_hard(&self) -> bool {
        self.kind == ConstraintKind::Hard
    }

    pub fn is_blocking(&self) -> bool {
        self.severity.is_blocking()
    }
}

impl fmt::Display for ConstraintViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} {}] {} (action: {})",
            self.kind, self.constraint, self.message, self.action
        )
    }
}
