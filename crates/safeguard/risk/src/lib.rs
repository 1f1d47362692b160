//! # safeguard-risk
//!
//! Risk assessment as a weighted sum of independent factors.
//!
//! ```text
//! overall = Σ weight_i × clamp(score_i, 0, 1)
//! ```
//!
//! Weights are not renormalized, so a set of weights summing above 1 can
//! push the overall score above 1 (classified as critical).

#![deny(unsafe_code)]

pub mod assessor;
pub mod error;
pub mod factor;
pub mod mitigation;

pub use assessor::{FactorScore, RiskAssessment, RiskAssessor, RiskThresholds};
pub use error::{RiskError, Result};
pub use factor::{FixedScorer, FlagScorer, MetricRatioScorer, RiskFactor, RiskScorer};
pub use mitigation::{MitigationRule, Recommendation};
