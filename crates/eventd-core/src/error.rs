use thiserror::Error;

use crate::types::IntervalUnit;

#[derive(Debug, Error)]
pub enum EventdError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported schedule granularity: {unit}")]
    UnsupportedGranularity { unit: IntervalUnit },

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EventdError>;
