use serde::{Deserialize, Serialize};

/// Suggests a mitigation when a factor scores at or above `min_score`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MitigationRule {
    pub factor: String,
    pub min_score: f64,
    pub recommendation: String,
    /// Lower ranks first among equal contributions.
    pub priority: u32,
}

impl MitigationRule {
    pub fn new(factor: impl Into<String>, min_score: f64, recommendation: impl Into<String>) -> Self {
        Self {
            factor: factor.into(),
            min_score,
            recommendation: recommendation.into(),
            priority: 1,
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }
}

/// A ranked mitigation suggestion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub factor: String,
    pub recommendation: String,
    /// The factor's weighted contribution to the overall score.
    pub contribution: f64,
    pub priority: u32,
}
