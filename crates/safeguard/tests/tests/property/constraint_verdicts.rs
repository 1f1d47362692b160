//! Property tests: constraint verdicts follow the declared comparison and
//! every violated constraint is reported.

use proptest::prelude::*;
use safeguard_constraints::{Constraint, ConstraintEngine, MetricAtLeast, MetricAtMost, ViolationAction};
use safeguard_types::{ActionContext, SystemState};

// ---------------------------------------------------------------------------
// Helpers / Strategies
// ---------------------------------------------------------------------------

/// A ceiling (`true`) or floor constraint on its own metric.
fn arb_bound() -> impl Strategy<Value = (bool, f64, f64)> {
    (any::<bool>(), 0.0f64..100.0, 0.0f64..100.0)
}

fn arb_bounds() -> impl Strategy<Value = Vec<(bool, f64, f64)>> {
    prop::collection::vec(arb_bound(), 1..12)
}

fn engine_for(bounds: &[(bool, f64, f64)]) -> (ConstraintEngine, SystemState) {
    let engine = ConstraintEngine::new();
    let mut state = SystemState::new();
    for (i, (ceiling, threshold, value)) in bounds.iter().enumerate() {
        let metric = format!("metric_{}", i);
        let constraint = if *ceiling {
            Constraint::hard(format!("c{}", i), MetricAtMost::new(metric.clone()), *threshold)
        } else {
            Constraint::soft(format!("c{}", i), MetricAtLeast::new(metric.clone()), *threshold)
        };
        engine.register(constraint).unwrap();
        state.set(metric, *value);
    }
    (engine, state)
}

// ---------------------------------------------------------------------------
// Property Tests
// ---------------------------------------------------------------------------

proptest! {
    /// Exactly the constraints whose comparison fails are reported, each once.
    #[test]
    fn violations_match_comparisons(bounds in arb_bounds()) {
        let (engine, state) = engine_for(&bounds);
        let result = engine.evaluate(&state, &ActionContext::new());

        prop_assert_eq!(result.evaluated, bounds.len());
        let mut expected: Vec<String> = bounds
            .iter()
            .enumerate()
            .filter(|(_, (ceiling, threshold, value))| {
                if *ceiling { value > threshold } else { value < threshold }
            })
            .map(|(i, _)| format!("c{}", i))
            .collect();
        let mut reported: Vec<String> = result.violations.iter().map(|v| v.constraint.clone()).collect();
        expected.sort();
        reported.sort();
        prop_assert_eq!(reported, expected);
    }

    /// Hard violations default to an emergency stop, soft ones to a warning.
    #[test]
    fn default_actions_follow_kind(bounds in arb_bounds()) {
        let (engine, state) = engine_for(&bounds);
        let result = engine.evaluate(&state, &ActionContext::new());
        for violation in &result.violations {
            let expected = if violation.is_hard() {
                ViolationAction::EmergencyStop
            } else {
                ViolationAction::Warning
            };
            prop_assert_eq!(violation.action, expected);
            prop_assert_eq!(violation.is_blocking(), violation.is_hard());
        }
    }

    /// A metric missing from the state counts as a violation.
    #[test]
    fn missing_metric_is_a_violation(bounds in arb_bounds(), drop_at in any::<prop::sample::Index>()) {
        let (engine, _) = engine_for(&bounds);
        let missing = drop_at.index(bounds.len());
        let mut state = SystemState::new();
        for (i, (_, _, value)) in bounds.iter().enumerate() {
            if i != missing {
                state.set(format!("metric_{}", i), *value);
            }
        }
        let result = engine.evaluate(&state, &ActionContext::new());
        let name = format!("c{}", missing);
        prop_assert!(result.violations.iter().any(|v| v.constraint == name));
    }
}
