//! Storage engine error taxonomy
//!
//! Native `rocksdb::Error` values never cross the public API: every call site
//! wraps them into the variant naming what was being attempted.

use rd_core::CoreError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DbError {
    // open / lifecycle
    #[error("database already opened")]
    AlreadyOpen,
    #[error("database is not open")]
    NotOpen,
    #[error("failed to open database: {0}")]
    OpenFailed(String),
    #[error("failed to close database: {0}")]
    CloseFailed(String),
    #[error("failed to create database: {0}")]
    CreateFailed(String),
    #[error("failed to destroy database: {0}")]
    DestroyFailed(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("object not found")]
    NotFound,
    #[error("object already exists: {0}")]
    AlreadyExists(String),

    // consistency
    #[error("duplicate unique key in index {index}")]
    DuplicateUniqueKey { index: String },
    #[error("failed to save index: {0}")]
    SaveIndexFailed(String),
    #[error("failed to save object: {0}")]
    SaveObjectFailed(String),
    #[error("failed to delete object: {0}")]
    DeleteObjectFailed(String),
    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    // partitions
    #[error("failed to create partition {0}")]
    PartitionCreateFailed(String),
    #[error("failed to list partitions: {0}")]
    PartitionListFailed(String),
    #[error("failed to delete partition {0}")]
    PartitionDeleteFailed(String),

    // model-topic relations
    #[error("failed to save model-topic relation {0}")]
    ModelTopicSaveFailed(String),
    #[error("failed to list model topics: {0}")]
    ModelTopicListFailed(String),

    #[error("model {0} is not registered")]
    ModelNotRegistered(String),
    #[error("index {index} not found in model {model}")]
    IndexNotFound { model: String, index: String },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("storage error: {0}")]
    Storage(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl DbError {
    /// Whether retrying the operation with other data may succeed.
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, DbError::DuplicateUniqueKey { .. })
    }
}

impl From<CoreError> for DbError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Serialization(msg) => DbError::Codec(msg),
            CoreError::InvalidObjectId(_) => DbError::Codec(err.to_string()),
            other => DbError::InvalidArgument(other.to_string()),
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;
