//! Database configuration
//!
//! Loaded from YAML, sections mirror the layers they configure:
//!
//! ```yaml
//! storage:
//!   db_path: ./data/db
//!   create_if_missing: true
//! rocksdb:
//!   write_buffer_size: 67108864
//!   max_write_buffer_number: 4
//!   max_background_jobs: 4
//!   compression: true
//!   lock_timeout_ms: 1000
//! log:
//!   level: info
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub rocksdb: RocksdbConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Default configuration for a database at `path`.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.storage.db_path = path.into();
        config
    }

    /// Load configuration from YAML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_yaml(&content)
    }

    /// Load configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to YAML file
    pub fn to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), ConfigError> {
        let yaml =
            serde_yaml::to_string(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;
        std::fs::write(path, yaml).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Merge with another config (other takes precedence)
    pub fn merge(&mut self, other: Config) {
        self.storage.merge(other.storage);
        self.rocksdb.merge(other.rocksdb);
        self.log.merge(other.log);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database directory
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Create the database on open when it does not exist
    #[serde(default = "default_create_if_missing")]
    pub create_if_missing: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            create_if_missing: default_create_if_missing(),
        }
    }
}

impl StorageConfig {
    fn merge(&mut self, other: Self) {
        if !other.db_path.as_os_str().is_empty() {
            self.db_path = other.db_path;
        }
        self.create_if_missing = other.create_if_missing;
    }
}

/// RocksDB tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocksdbConfig {
    #[serde(default = "default_write_buffer_size")]
    pub write_buffer_size: usize,
    #[serde(default = "default_max_write_buffer_number")]
    pub max_write_buffer_number: i32,
    #[serde(default = "default_max_background_jobs")]
    pub max_background_jobs: i32,
    /// LZ4 block compression
    #[serde(default = "default_compression")]
    pub compression: bool,
    /// How long a transaction waits for a row lock, in milliseconds
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: i64,
}

impl Default for RocksdbConfig {
    fn default() -> Self {
        Self {
            write_buffer_size: default_write_buffer_size(),
            max_write_buffer_number: default_max_write_buffer_number(),
            max_background_jobs: default_max_background_jobs(),
            compression: default_compression(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl RocksdbConfig {
    fn merge(&mut self, other: Self) {
        if other.write_buffer_size > 0 {
            self.write_buffer_size = other.write_buffer_size;
        }
        if other.max_write_buffer_number > 0 {
            self.max_write_buffer_number = other.max_write_buffer_number;
        }
        if other.max_background_jobs > 0 {
            self.max_background_jobs = other.max_background_jobs;
        }
        self.compression = other.compression;
        if other.lock_timeout_ms != 0 {
            self.lock_timeout_ms = other.lock_timeout_ms;
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LogConfig {
    fn merge(&mut self, other: Self) {
        if !other.level.is_empty() {
            self.level = other.level;
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/db")
}

fn default_create_if_missing() -> bool {
    true
}

fn default_write_buffer_size() -> usize {
    64 * 1024 * 1024
}

fn default_max_write_buffer_number() -> i32 {
    4
}

fn default_max_background_jobs() -> i32 {
    4
}

fn default_compression() -> bool {
    true
}

fn default_lock_timeout_ms() -> i64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Serialize error: {0}")]
    SerializeError(String),
}
