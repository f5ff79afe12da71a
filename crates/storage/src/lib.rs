//! Embedded document storage on RocksDB
//!
//! - `rocksdb`: key encoding, TTL marks, partitions, index maintenance,
//!   transactional writes and index scans
//! - `client`: synchronous client with open/close lifecycle and CRUD
//! - `async_client`: tokio façade over the client
//! - `config`: YAML configuration
//! - `error`: error taxonomy

pub mod async_client;
pub mod client;
pub mod config;
pub mod error;
pub mod rocksdb;

pub use async_client::AsyncClient;
pub use client::Client;
pub use config::{Config, ConfigError, LogConfig, RocksdbConfig, StorageConfig};
pub use error::{DbError, DbResult};
pub use crate::rocksdb::{Partition, ScanHit, Transaction};

// Re-export core types so applications can depend on one crate
pub use rd_core::{
    DateInterval, DateRange, Document, FieldKind, Index, IndexQuery, Model, ModelRegistry, ModelsProvider, ModifyReturn,
    ObjectId, Operator, Order, RangeMode, Topic, Unit, UpdateRequest, Value, CREATED_AT_FIELD, ID_FIELD,
    UPDATED_AT_FIELD,
};
