use safeguard_types::RiskLevel;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RiskError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("risk threshold exceeded: level {level} (score {score:.3}) above allowed {max}")]
    ThresholdExceeded {
        level: RiskLevel,
        score: f64,
        max: RiskLevel,
    },
}

pub type Result<T> = std::result::Result<T, RiskError>;
