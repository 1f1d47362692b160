//! Property tests: risk scores stay in range and never fall when a risk
//! metric rises.

use proptest::prelude::*;
use safeguard_risk::{RiskAssessor, RiskThresholds};
use safeguard_types::{ActionContext, SystemState};

// ---------------------------------------------------------------------------
// Helpers / Strategies
// ---------------------------------------------------------------------------

const METRICS: [&str; 3] = ["memory_usage", "cpu_usage", "operation_risk"];

/// Readings for the default factors, including out-of-range values.
fn arb_readings() -> impl Strategy<Value = [f64; 3]> {
    [-0.5f64..1.5, -0.5f64..1.5, -0.5f64..1.5]
}

fn context(readings: &[f64; 3]) -> ActionContext {
    let state = METRICS
        .iter()
        .zip(readings)
        .fold(SystemState::new(), |s, (k, v)| s.with(*k, *v));
    ActionContext::new().with_state(state)
}

// ---------------------------------------------------------------------------
// Property Tests
// ---------------------------------------------------------------------------

proptest! {
    /// Overall score is always within [0, 1] and matches its level.
    #[test]
    fn score_is_bounded_and_classified(readings in arb_readings()) {
        let assessor = RiskAssessor::with_default_factors();
        let assessment = assessor.assess(&context(&readings));

        prop_assert!((0.0..=1.0).contains(&assessment.overall_score));
        prop_assert_eq!(
            assessment.level,
            RiskThresholds::default().classify(assessment.overall_score)
        );
        for factor in &assessment.factors {
            prop_assert!((0.0..=1.0).contains(&factor.score));
        }
    }

    /// Raising any one metric never lowers the score or the level.
    #[test]
    fn raising_a_metric_never_lowers_risk(
        readings in arb_readings(),
        which in 0usize..3,
        bump in 0.0f64..1.0,
    ) {
        let assessor = RiskAssessor::with_default_factors();
        let before = assessor.assess(&context(&readings));

        let mut raised = readings;
        raised[which] += bump;
        let after = assessor.assess(&context(&raised));

        prop_assert!(
            after.overall_score >= before.overall_score,
            "{} -> {}",
            before.overall_score,
            after.overall_score
        );
        prop_assert!(after.level >= before.level);
    }

    /// Mitigations are offered only above the alert threshold, and only for
    /// factors scoring at least half their ceiling.
    #[test]
    fn recommendations_follow_alert_threshold(readings in arb_readings()) {
        let assessor = RiskAssessor::with_default_factors();
        let assessment = assessor.assess(&context(&readings));

        if assessment.overall_score <= RiskThresholds::default().alert_threshold {
            prop_assert!(assessment.recommendations.is_empty());
        }
        for rec in &assessment.recommendations {
            let factor = assessment.factor(&rec.factor).unwrap();
            prop_assert!(factor.score >= 0.5);
        }
        for pair in assessment.recommendations.windows(2) {
            prop_assert!(pair[0].contribution >= pair[1].contribution);
        }
    }
}
