use crate::constraint::{Constraint, ConstraintKind, ConstraintViolation, Threshold, ViolationAction};
use crate::error::{ConstraintError, Result};
use parking_lot::RwLock;
use safeguard_types::{ActionContext, SystemState};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

struct Registered {
    constraint: Constraint,
    seq: u64,
}

#[derive(Default)]
struct Registry {
    entries: Vec<Registered>,
    next_seq: u64,
}

/// Evaluates registered constraints against state snapshots.
///
/// Evaluation order is priority ascending (1 first), hard before soft and
/// dynamic at equal priority, then registration order. Evaluation never
/// short-circuits: every constraint runs on every call.
pub struct ConstraintEngine {
    registry: RwLock<Registry>,
}

impl ConstraintEngine {
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
        }
    }

    /// Register a constraint. Malformed definitions are rejected here rather
    /// than skipped at evaluation time.
    pub fn register(&self, constraint: Constraint) -> Result<()> {
        Self::check(&constraint)?;

        let mut registry = self.registry.write();
        if registry.entries.iter().any(|r| r.constraint.name == constraint.name) {
            return Err(ConstraintError::Configuration(format!(
                "duplicate constraint name: {}",
                constraint.name
            )));
        }

        registry.next_seq += 1;
        let seq = registry.next_seq;
        debug!(
            constraint = %constraint.name,
            kind = %constraint.kind,
            priority = constraint.priority,
            "Registered constraint"
        );
        registry.entries.push(Registered { constraint, seq });
        registry
            .entries
            .sort_by_key(|r| (r.constraint.priority, r.constraint.kind.rank(), r.seq));
        Ok(())
    }

    fn check(constraint: &Constraint) -> Result<()> {
        let fail = |msg: String| Err(ConstraintError::Configuration(msg));
        if constraint.name.trim().is_empty() {
            return fail("constraint name must not be empty".into());
        }
        if constraint.priority == 0 {
            return fail(format!(
                "constraint {}: priority must be >= 1",
                constraint.name
            ));
        }
        match (&constraint.kind, &constraint.threshold) {
            (_, Threshold::Fixed(v)) if !v.is_finite() => fail(format!(
                "constraint {}: threshold must be finite, got {}",
                constraint.name, v
            )),
            (ConstraintKind::Dynamic, Threshold::Derived(_)) => Ok(()),
            (ConstraintKind::Dynamic, _) => fail(format!(
                "constraint {}: dynamic constraints need a threshold function",
                constraint.name
            )),
            (_, Threshold::Derived(_)) => fail(format!(
                "constraint {}: only dynamic constraints may derive their threshold",
                constraint.name
            )),
            (_, Threshold::None) if constraint.rule.requires_threshold() => fail(format!(
                "constraint {}: rule '{}' needs a threshold",
                constraint.name,
                constraint.rule.describe()
            )),
            _ => Ok(()),
        }
    }

    /// Remove a constraint by name.
    pub fn unregister(&self, name: &str) -> Result<()> {
        let mut registry = self.registry.write();
        let before = registry.entries.len();
        registry.entries.retain(|r| r.constraint.name != name);
        if registry.entries.len() == before {
            return Err(ConstraintError::NotFound(name.to_string()));
        }
        Ok(())
    }

    /// Constraint names in evaluation order.
    pub fn constraint_names(&self) -> Vec<String> {
        self.registry
            .read()
            .entries
            .iter()
            .map(|r| r.constraint.name.clone())
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<Constraint> {
        self.registry
            .read()
            .entries
            .iter()
            .find(|r| r.constraint.name == name)
            .map(|r| r.constraint.clone())
    }

    pub fn len(&self) -> usize {
        self.registry.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.read().entries.is_empty()
    }

    /// Evaluate every constraint and aggregate the violations.
    pub fn evaluate(&self, state: &SystemState, context: &ActionContext) -> EvaluationResult {
        let registry = self.registry.read();
        let mut violations = Vec::new();

        for Registered { constraint, .. } in registry.entries.iter() {
            if let Some(v) = Self::evaluate_one(constraint, state, context) {
                if v.is_blocking() {
                    warn!(constraint = %v.constraint, kind = %v.kind, action = %v.action, "{}", v.message);
                } else {
                    debug!(constraint = %v.constraint, "{}", v.message);
                }
                violations.push(v);
            }
        }

        EvaluationResult {
            evaluated: registry.entries.len(),
            violations,
        }
    }

    fn evaluate_one(
        constraint: &Constraint,
        state: &SystemState,
        context: &ActionContext,
    ) -> Option<ConstraintViolation> {
        let violation = |message: String, observed: Option<f64>, threshold: Option<f64>| {
            Some(ConstraintViolation {
                constraint: constraint.name.clone(),
                kind: constraint.kind,
                severity: constraint.severity(),
                message,
                action: constraint.action,
                observed,
                threshold,
            })
        };

        let threshold = match &constraint.threshold {
            Threshold::None => None,
            Threshold::Fixed(v) => Some(*v),
            Threshold::Derived(func) => match func.threshold(context) {
                Ok(v) if v.is_finite() => Some(v),
                Ok(v) => {
                    return violation(
                        format!("threshold function '{}' returned non-finite {}", func.name(), v),
                        None,
                        None,
                    )
                }
                Err(e) => {
                    return violation(
                        format!("threshold function '{}' failed: {}", func.name(), e),
                        None,
                        None,
                    )
                }
            },
        };

        match constraint.rule.evaluate(state, threshold) {
            Ok(outcome) if outcome.holds => None,
            Ok(outcome) => {
                let detail = match (outcome.observed, threshold) {
                    (Some(o), Some(t)) => format!(" (observed {:.4}, threshold {:.4})", o, t),
                    _ => String::new(),
                };
                violation(
                    format!("{} violated{}", constraint.rule.describe(), detail),
                    outcome.observed,
                    threshold,
                )
            }
            Err(e) => violation(
                format!("{} could not be evaluated: {}", constraint.rule.describe(), e),
                None,
                threshold,
            ),
        }
    }
}

impl Default for ConstraintEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregated result of one evaluation pass.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Violations in evaluation order.
    pub violations: Vec<ConstraintViolation>,
    /// Number of constraints evaluated.
    pub evaluated: usize,
}

impl EvaluationResult {
    pub fn has_violations(&self) -> bool {
        !self.violations.is_empty()
    }

    pub fn hard_violations(&self) -> impl Iterator<Item = &ConstraintViolation> {
        self.violations.iter().filter(|v| v.is_hard())
    }

    pub fn blocking(&self) -> impl Iterator<Item = &ConstraintViolation> {
        self.violations.iter().filter(|v| v.is_blocking())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ConstraintViolation> {
        self.violations.iter().filter(|v| !v.is_blocking())
    }

    pub fn with_action(&self, action: ViolationAction) -> impl Iterator<Item = &ConstraintViolation> {
        self.violations.iter().filter(move |v| v.action == action)
    }

    pub fn requires_emergency_stop(&self) -> bool {
        self.violations
            .iter()
            .any(|v| v.action == ViolationAction::EmergencyStop)
    }
}
