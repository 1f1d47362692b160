use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MonitorError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("metrics source error: {0}")]
    Source(String),
}

pub type Result<T> = std::result::Result<T, MonitorError>;
