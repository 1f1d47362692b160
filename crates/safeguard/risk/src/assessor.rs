use crate::error::{Result, RiskError};
use crate::factor::{MetricRatioScorer, RiskFactor};
use crate::mitigation::{MitigationRule, Recommendation};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use safeguard_types::{ActionContext, RiskLevel};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{debug, warn};

/// Cut-points mapping a score to a [`RiskLevel`], plus the score above which
/// mitigations are recommended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskThresholds {
    /// Scores below this are low.
    pub low: f64,
    /// Scores below this (and at or above `low`) are medium.
    pub medium: f64,
    /// Scores below this (and at or above `medium`) are high; the rest critical.
    pub high: f64,
    pub alert_threshold: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            low: 0.3,
            medium: 0.6,
            high: 0.8,
            alert_threshold: 0.6,
        }
    }
}

impl RiskThresholds {
    pub fn validate(&self) -> Result<()> {
        let all = [self.low, self.medium, self.high, self.alert_threshold];
        if all.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(RiskError::Configuration(
                "risk thresholds must be finite and non-negative".into(),
            ));
        }
        if !(self.low > 0.0 && self.low < self.medium && self.medium < self.high) {
            return Err(RiskError::Configuration(format!(
                "risk thresholds must be strictly ascending: low {} < medium {} < high {}",
                self.low, self.medium, self.high
            )));
        }
        Ok(())
    }

    pub fn classify(&self, score: f64) -> RiskLevel {
        if score < self.low {
            RiskLevel::Low
        } else if score < self.medium {
            RiskLevel::Medium
        } else if score < self.high {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        }
    }
}

/// Score of one factor within an assessment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FactorScore {
    pub name: String,
    pub weight: f64,
    /// Score after clamping to `[0, 1]`.
    pub score: f64,
    /// `weight × score`.
    pub contribution: f64,
    /// The scorer returned a value outside `[0, 1]` (or NaN).
    pub clamped: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub overall_score: f64,
    pub level: RiskLevel,
    pub factors: Vec<FactorScore>,
    pub recommendations: Vec<Recommendation>,
    pub assessed_at: DateTime<Utc>,
}

impl RiskAssessment {
    pub fn factor(&self, name: &str) -> Option<&FactorScore> {
        self.factors.iter().find(|f| f.name == name)
    }

    pub fn has_clamped_factors(&self) -> bool {
        self.factors.iter().any(|f| f.clamped)
    }
}

/// Computes weighted risk scores from registered factors.
pub struct RiskAssessor {
    thresholds: RiskThresholds,
    factors: RwLock<Vec<RiskFactor>>,
    mitigations: RwLock<Vec<MitigationRule>>,
}

impl RiskAssessor {
    pub fn new(thresholds: RiskThresholds) -> Result<Self> {
        thresholds.validate()?;
        Ok(Self {
            thresholds,
            factors: RwLock::new(Vec::new()),
            mitigations: RwLock::new(Vec::new()),
        })
    }

    /// Assessor with memory (0.3), cpu (0.2) and operation (0.5) factors and
    /// a mitigation for each.
    pub fn with_default_factors() -> Self {
        Self::build_default(RiskThresholds::default())
    }

    /// The default factors scored against custom thresholds.
    pub fn default_factors_with(thresholds: RiskThresholds) -> Result<Self> {
        thresholds.validate()?;
        Ok(Self::build_default(thresholds))
    }

    fn build_default(thresholds: RiskThresholds) -> Self {
        Self {
            thresholds,
            factors: RwLock::new(vec![
                RiskFactor::new("memory_risk", 0.3, MetricRatioScorer::new("memory_usage", 1.0)),
                RiskFactor::new("cpu_risk", 0.2, MetricRatioScorer::new("cpu_usage", 1.0)),
                RiskFactor::new(
                    "operation_risk",
                    0.5,
                    MetricRatioScorer::new("operation_risk", 1.0),
                ),
            ]),
            mitigations: RwLock::new(vec![
                MitigationRule::new("memory_risk", 0.5, "run memory cleanup before executing"),
                MitigationRule::new("cpu_risk", 0.5, "defer or throttle compute-heavy work"),
                MitigationRule::new("operation_risk", 0.5, "create a checkpoint before executing"),
            ]),
        }
    }

    pub fn thresholds(&self) -> &RiskThresholds {
        &self.thresholds
    }

    pub fn add_factor(&self, factor: RiskFactor) -> Result<()> {
        if factor.name.trim().is_empty() {
            return Err(RiskError::Configuration("risk factor name must not be empty".into()));
        }
        if !factor.weight.is_finite() || factor.weight < 0.0 {
            return Err(RiskError::Configuration(format!(
                "risk factor {}: weight must be finite and non-negative, got {}",
                factor.name, factor.weight
            )));
        }
        let mut factors = self.factors.write();
        if factors.iter().any(|f| f.name == factor.name) {
            return Err(RiskError::Configuration(format!(
                "duplicate risk factor: {}",
                factor.name
            )));
        }
        factors.push(factor);
        Ok(())
    }

    pub fn add_mitigation(&self, rule: MitigationRule) -> Result<()> {
        if !(0.0..=1.0).contains(&rule.min_score) {
            return Err(RiskError::Configuration(format!(
                "mitigation for {}: min_score must be in [0, 1], got {}",
                rule.factor, rule.min_score
            )));
        }
        self.mitigations.write().push(rule);
        Ok(())
    }

    pub fn factor_names(&self) -> Vec<String> {
        self.factors.read().iter().map(|f| f.name.clone()).collect()
    }

    /// Score every factor against `context`.
    pub fn assess(&self, context: &ActionContext) -> RiskAssessment {
        let factors: Vec<FactorScore> = self
            .factors
            .read()
            .iter()
            .map(|factor| {
                let raw = factor.scorer.score(context);
                let (score, clamped) = if raw.is_nan() {
                    (1.0, true)
                } else if !(0.0..=1.0).contains(&raw) {
                    (raw.clamp(0.0, 1.0), true)
                } else {
                    (raw, false)
                };
                if clamped {
                    warn!(factor = %factor.name, raw, clamped_to = score, "Risk scorer returned out-of-range value");
                }
                FactorScore {
                    name: factor.name.clone(),
                    weight: factor.weight,
                    score,
                    contribution: factor.weight * score,
                    clamped,
                }
            })
            .collect();

        let overall_score: f64 = factors.iter().map(|f| f.contribution).sum();
        let level = self.thresholds.classify(overall_score);
        debug!(score = overall_score, level = %level, "Risk assessed");

        let mut assessment = RiskAssessment {
            overall_score,
            level,
            factors,
            recommendations: Vec::new(),
            assessed_at: Utc::now(),
        };
        assessment.recommendations = self.get_mitigation_recommendations(&assessment);
        assessment
    }

    /// Ranked mitigations for an assessment whose score exceeds the alert
    /// threshold.
    ///
    /// Ranked by factor contribution (descending), rule priority, factor
    /// name, then recommendation text, so equal inputs give equal output.
    pub fn get_mitigation_recommendations(&self, assessment: &RiskAssessment) -> Vec<Recommendation> {
        if assessment.overall_score <= self.thresholds.alert_threshold {
            return Vec::new();
        }

        let mut recs: Vec<Recommendation> = self
            .mitigations
            .read()
            .iter()
            .filter_map(|rule| {
                let factor = assessment.factor(&rule.factor)?;
                (factor.score >= rule.min_score).then(|| Recommendation {
                    factor: factor.name.clone(),
                    recommendation: rule.recommendation.clone(),
                    contribution: factor.contribution,
                    priority: rule.priority,
                })
            })
            .collect();

        recs.sort_by(|a, b| {
            b.contribution
                .partial_cmp(&a.contribution)
                .unwrap_or(Ordering::Equal)
                .then(a.priority.cmp(&b.priority))
                .then_with(|| a.factor.cmp(&b.factor))
                .then_with(|| a.recommendation.cmp(&b.recommendation))
        });
        recs
    }
}

impl Default for RiskAssessor {
    fn default() -> Self {
        Self::with_default_factors()
    }
}
