//! RocksDB handle
//!
//! Owns the `TransactionDB`, the partition map and the expiry clock. Column
//! families are opened per partition (see `partition.rs`); index column
//! families carry the unique-key merge operator, collection column families
//! the model-topic counter, and both kinds carry the TTL compaction filter.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use parking_lot::Mutex;
use rd_core::{DateRange, Model, ObjectId};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBCompressionType, MultiThreaded, Options,
    TransactionDB, TransactionDBOptions, DB,
};
use tracing::{debug, info, warn};

use super::merge::{unique_full_merge, unique_partial_merge, TtlCompactionFilterFactory, UNIQUE_MERGE_OPERATOR};
use super::model_topics::{relation_full_merge, relation_partial_merge, MODEL_TOPICS_MERGE_OPERATOR};
use super::partition::{collection_cf_name, index_cf_name, object_range, parse_cf_name, Partition, PartitionMap};
use super::ttl_mark::ExpiryClock;
use crate::config::{Config, RocksdbConfig};
use crate::error::{DbError, DbResult};

pub(crate) type TxDb = TransactionDB<MultiThreaded>;

/// Transaction handle passed to storage operations.
///
/// Obtained from `Client::transaction`; operations given a transaction join
/// it instead of starting their own.
pub struct Transaction<'db> {
    pub(crate) handler: &'db RocksdbHandler,
    pub(crate) inner: rocksdb::Transaction<'db, TxDb>,
}

pub struct RocksdbHandler {
    pub(crate) db: TxDb,
    path: String,
    rocksdb_config: RocksdbConfig,
    pub(crate) partitions: PartitionMap,
    /// Serializes column family creation
    create_lock: Mutex<()>,
    pub(crate) clock: ExpiryClock,
}

fn db_options(config: &RocksdbConfig, create_if_missing: bool) -> Options {
    let mut opts = Options::default();
    opts.create_if_missing(create_if_missing);
    opts.create_missing_column_families(true);
    opts.set_write_buffer_size(config.write_buffer_size);
    opts.set_max_write_buffer_number(config.max_write_buffer_number);
    opts.set_max_background_jobs(config.max_background_jobs);
    if config.compression {
        opts.set_compression_type(DBCompressionType::Lz4);
    } else {
        opts.set_compression_type(DBCompressionType::None);
    }
    opts
}

fn collection_cf_options(config: &RocksdbConfig, clock: &ExpiryClock) -> Options {
    let mut opts = db_options(config, true);
    opts.set_merge_operator(
        MODEL_TOPICS_MERGE_OPERATOR,
        relation_full_merge(clock.clone()),
        relation_partial_merge,
    );
    opts.set_compaction_filter_factory(TtlCompactionFilterFactory);
    opts
}

fn index_cf_options(config: &RocksdbConfig, clock: &ExpiryClock) -> Options {
    let mut opts = db_options(config, true);
    opts.set_merge_operator(UNIQUE_MERGE_OPERATOR, unique_full_merge(clock.clone()), unique_partial_merge);
    opts.set_compaction_filter_factory(TtlCompactionFilterFactory);
    opts
}

impl RocksdbHandler {
    /// Open the database described by `config`, discovering existing partitions.
    pub fn open(config: &Config) -> DbResult<Self> {
        let path = config.storage.db_path.to_string_lossy().to_string();
        let rocksdb_config = config.rocksdb.clone();
        let clock = ExpiryClock::new();
        let opts = db_options(&rocksdb_config, config.storage.create_if_missing);

        if !config.storage.create_if_missing && !Path::new(&path).exists() {
            return Err(DbError::OpenFailed(format!("database {} does not exist", path)));
        }

        // only a directory with a CURRENT file holds a database to list
        let existing_cfs = if Path::new(&path).join("CURRENT").exists() {
            DB::list_cf(&opts, &path).map_err(|e| {
                DbError::PartitionListFailed(format!("list column families of {}: {}", path, e))
            })?
        } else {
            Vec::new()
        };

        let partitions = PartitionMap::new();
        let cf_options = |is_index: bool| {
            if is_index {
                index_cf_options(&rocksdb_config, &clock)
            } else {
                collection_cf_options(&rocksdb_config, &clock)
            }
        };
        let mut descriptors = vec![ColumnFamilyDescriptor::new(
            rocksdb::DEFAULT_COLUMN_FAMILY_NAME,
            Options::default(),
        )];
        let mut cf_names: HashSet<String> = HashSet::new();
        for name in &existing_cfs {
            if name == rocksdb::DEFAULT_COLUMN_FAMILY_NAME {
                continue;
            }
            let (range, is_index) = parse_cf_name(name)?;
            descriptors.push(ColumnFamilyDescriptor::new(name, cf_options(is_index)));
            cf_names.insert(name.clone());
            partitions.insert(range);
        }

        // the default partition always exists, and every partition gets its
        // sibling column family back if it went missing
        partitions.insert(DateRange::null());
        for partition in partitions.list() {
            for (name, is_index) in [(partition.collection_cf(), false), (partition.index_cf(), true)] {
                if cf_names.insert(name.to_string()) {
                    debug!("Creating missing column family {}", name);
                    descriptors.push(ColumnFamilyDescriptor::new(name, cf_options(is_index)));
                }
            }
        }

        let mut txn_opts = TransactionDBOptions::default();
        txn_opts.set_txn_lock_timeout(rocksdb_config.lock_timeout_ms);

        let db = TxDb::open_cf_descriptors(&opts, &txn_opts, &path, descriptors)
            .map_err(|e| DbError::OpenFailed(format!("{}: {}", path, e)))?;

        info!(
            "Opened database {} with {} partition(s)",
            path,
            partitions.list().len()
        );

        Ok(Self {
            db,
            path,
            rocksdb_config,
            partitions,
            create_lock: Mutex::new(()),
            clock,
        })
    }

    /// Get database path
    pub fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn cf(&self, name: &str) -> DbResult<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| DbError::Storage(format!("column family {} not found", name)))
    }

    /// Get or create the partition for `range`.
    pub fn get_or_create_partition(&self, range: DateRange) -> DbResult<Arc<Partition>> {
        if let Some(partition) = self.partitions.get(range) {
            return Ok(partition);
        }

        let _guard = self.create_lock.lock();
        if let Some(partition) = self.partitions.get(range) {
            return Ok(partition);
        }

        let collection = collection_cf_name(range);
        let index = index_cf_name(range);
        if self.db.cf_handle(&collection).is_none() {
            self.db
                .create_cf(&collection, &collection_cf_options(&self.rocksdb_config, &self.clock))
                .map_err(|e| DbError::PartitionCreateFailed(format!("{}: {}", collection, e)))?;
        }
        if self.db.cf_handle(&index).is_none() {
            self.db
                .create_cf(&index, &index_cf_options(&self.rocksdb_config, &self.clock))
                .map_err(|e| DbError::PartitionCreateFailed(format!("{}: {}", index, e)))?;
        }

        info!("Created partition {}", range);
        Ok(self.partitions.insert(range))
    }

    /// Partition holding an object of `model`, `None` when it was never created.
    pub fn object_partition(
        &self,
        model: &Model,
        id: Option<&ObjectId>,
        date: Option<NaiveDate>,
        create: bool,
    ) -> DbResult<Option<Arc<Partition>>> {
        let range = object_range(model, id, date)?;
        if create {
            self.get_or_create_partition(range).map(Some)
        } else {
            Ok(self.partitions.get(range))
        }
    }

    pub fn list_partitions(&self) -> Vec<DateRange> {
        self.partitions
            .list()
            .iter()
            .map(|p| p.range())
            .filter(|r| !r.is_null())
            .collect()
    }

    /// Drop the column families of a date partition and everything in them.
    pub fn delete_partition(&self, range: DateRange) -> DbResult<bool> {
        if range.is_null() {
            return Err(DbError::InvalidArgument("the default partition cannot be deleted".to_string()));
        }
        let _guard = self.create_lock.lock();
        let partition = match self.partitions.remove(range) {
            Some(p) => p,
            None => return Ok(false),
        };
        for name in [partition.collection_cf(), partition.index_cf()] {
            if self.db.cf_handle(name).is_some() {
                self.db
                    .drop_cf(name)
                    .map_err(|e| DbError::PartitionDeleteFailed(format!("{}: {}", name, e)))?;
            }
        }
        info!("Deleted partition {}", range);
        Ok(true)
    }

    pub(crate) fn begin(&self) -> Transaction<'_> {
        Transaction {
            handler: self,
            inner: self.db.transaction(),
        }
    }

    /// Run `f` inside `tx` when given, otherwise inside a transaction of its own.
    ///
    /// Joining an outer transaction rolls back to a savepoint on error, so a
    /// failed step never leaves half of its writes in the outer transaction.
    pub(crate) fn with_transaction<'a, T>(
        &'a self,
        tx: Option<&Transaction<'a>>,
        f: impl FnOnce(&Transaction<'a>) -> DbResult<T>,
    ) -> DbResult<T> {
        if let Some(tx) = tx {
            tx.inner.set_savepoint();
            let result = f(tx);
            if result.is_err() {
                if let Err(e) = tx.inner.rollback_to_savepoint() {
                    warn!("Failed to roll back to savepoint: {}", e);
                }
            }
            return result;
        }

        let tx = self.begin();
        match f(&tx) {
            Ok(value) => {
                tx.inner
                    .commit()
                    .map_err(|e| DbError::TransactionFailed(e.to_string()))?;
                Ok(value)
            }
            Err(err) => {
                debug!("Rolling back transaction: {}", err);
                if let Err(e) = tx.inner.rollback() {
                    warn!("Failed to roll back transaction: {}", e);
                }
                Err(err)
            }
        }
    }
}
