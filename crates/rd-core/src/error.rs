//! Errors raised while building or manipulating core types

use thiserror::Error;

/// Core type error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("invalid object id: {0}")]
    InvalidObjectId(String),

    #[error("invalid date range: {0}")]
    InvalidDateRange(String),

    #[error("invalid model {model}: {reason}")]
    InvalidModel { model: String, reason: String },

    #[error("field {field}: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
