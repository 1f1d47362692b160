use safeguard_types::ActionContext;
use std::fmt;
use std::sync::Arc;

/// Scores one dimension of risk for a context.
///
/// Implementations should return a value in `[0, 1]`. The assessor clamps
/// anything else and flags the factor, so an out-of-range score is visible
/// as a scorer bug rather than silently absorbed.
pub trait RiskScorer: Send + Sync {
    fn score(&self, context: &ActionContext) -> f64;
}

/// A named, weighted risk factor.
#[derive(Clone)]
pub struct RiskFactor {
    pub name: String,
    pub weight: f64,
    pub scorer: Arc<dyn RiskScorer>,
}

impl RiskFactor {
    pub fn new(name: impl Into<String>, weight: f64, scorer: impl RiskScorer + 'static) -> Self {
        Self {
            name: name.into(),
            weight,
            scorer: Arc::new(scorer),
        }
    }
}

impl fmt::Debug for RiskFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RiskFactor")
            .field("name", &self.name)
            .field("weight", &self.weight)
            .finish()
    }
}

/// `value / ceiling`, saturating to `[0, 1]`.
///
/// Monotonically non-decreasing in the metric value. A missing metric
/// scores `missing` (1.0 unless overridden).
#[derive(Clone, Debug)]
pub struct MetricRatioScorer {
    pub key: String,
    pub ceiling: f64,
    pub missing: f64,
}

impl MetricRatioScorer {
    pub fn new(key: impl Into<String>, ceiling: f64) -> Self {
        Self {
            key: key.into(),
            ceiling,
            missing: 1.0,
        }
    }

    pub fn when_missing(mut self, score: f64) -> Self {
        self.missing = score;
        self
    }
}

impl RiskScorer for MetricRatioScorer {
    fn score(&self, context: &ActionContext) -> f64 {
        match context.number(&self.key) {
            Some(v) if v.is_finite() && self.ceiling > 0.0 => (v / self.ceiling).clamp(0.0, 1.0),
            _ => self.missing,
        }
    }
}

/// Scores `when_set` if a boolean flag is true, otherwise 0.
#[derive(Clone, Debug)]
pub struct FlagScorer {
    pub key: String,
    pub when_set: f64,
}

impl FlagScorer {
    pub fn new(key: impl Into<String>, when_set: f64) -> Self {
        Self {
            key: key.into(),
            when_set,
        }
    }
}

impl RiskScorer for FlagScorer {
    fn score(&self, context: &ActionContext) -> f64 {
        if context.flag(&self.key).unwrap_or(false) {
            self.when_set
        } else {
            0.0
        }
    }
}

/// Constant score.
#[derive(Clone, Debug)]
pub struct FixedScorer(pub f64);

impl RiskScorer for FixedScorer {
    fn score(&self, _context: &ActionContext) -> f64 {
        self.0
    }
}
