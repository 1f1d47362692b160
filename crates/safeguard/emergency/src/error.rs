use crate::status::StopReason;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmergencyError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("emergency stop active ({reason})")]
    StopActive { reason: StopReason },

    #[error("system is not stopped")]
    NotStopped,

    #[error("emergency stop ({reason}) is not resumable")]
    NotResumable { reason: StopReason },

    #[error("unverified resume is not allowed")]
    UnverifiedResume,

    #[error("safety verification failed: {}", .0.join("; "))]
    VerificationFailed(Vec<String>),

    #[error("emergency state changed during resume")]
    Conflict,

    #[error("trigger monitor error: {0}")]
    Monitor(String),
}

pub type Result<T> = std::result::Result<T, EmergencyError>;
