//! Transactional object writes and reads
//!
//! Every mutation writes the object row first, then the index entries in the
//! order produced by the index maintainer, then the model-topic relation, all
//! inside one transaction.
//! Unique entries go through the merge operator; the merge is forced with a
//! locked read so a conflict surfaces here rather than at a later read.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rd_core::{Model, ObjectId, Topic, Unit, UpdateRequest};
use rocksdb::BoundColumnFamily;
use tracing::{debug, warn};

use super::handler::{RocksdbHandler, Transaction};
use super::index_update::{IndexKeyUpdate, IndexKeyUpdateSet, IndexOp};
use super::key_encoding::{object_key, validate_topic};
use super::merge::{reset_duplicate_flag, take_duplicate_flag};
use super::partition::Partition;
use super::ttl_mark::{fill_expire_at, is_expired, strip};
use crate::error::{DbError, DbResult};

/// Serialized object followed by its TTL mark.
fn object_value<U: Unit>(model: &Model, unit: &U) -> DbResult<Vec<u8>> {
    let mut value = unit.serialize()?;
    fill_expire_at(&mut value, model.expire_at(unit));
    Ok(value)
}

impl RocksdbHandler {
    /// Partition an object is written to, derived from its own fields.
    fn unit_partition<U: Unit>(&self, model: &Model, unit: &U) -> DbResult<Arc<Partition>> {
        let range = model.object_range(unit).map_err(|e| {
            DbError::InvalidArgument(format!("partition of {} object: {}", model.name(), e))
        })?;
        if let Some(partition) = model.partition() {
            if range.is_null() {
                return Err(DbError::InvalidArgument(format!(
                    "partition field {} of model {} is not set",
                    partition.field,
                    model.name()
                )));
            }
        }
        self.get_or_create_partition(range)
    }

    /// Store a new object and its index entries.
    ///
    /// A null object id is replaced by a fresh one, unset creation time by now.
    pub fn create<U: Unit>(
        &self,
        topic: &Topic,
        model: &Model,
        unit: &mut U,
        tx: Option<&Transaction<'_>>,
    ) -> DbResult<ObjectId> {
        validate_topic(topic)?;

        let now = Utc::now();
        if unit.object_id().is_null() {
            unit.set_object_id(ObjectId::generate());
        }
        if unit.created_at() == DateTime::<Utc>::UNIX_EPOCH {
            unit.set_created_at(now);
        }
        unit.set_updated_at(now);

        let id = unit.object_id();
        let key = object_key(model, topic, &id);
        let value = object_value(model, unit)?;
        let updates = IndexKeyUpdateSet::for_create(model, topic, unit)?;
        let partition = self.unit_partition(model, unit)?;

        self.with_transaction(tx, |tx| {
            let cf = self.cf(partition.collection_cf())?;
            let existing = tx
                .inner
                .get_for_update_cf(&cf, &key, true)
                .map_err(|e| DbError::SaveObjectFailed(e.to_string()))?;
            if let Some(existing) = existing {
                if !is_expired(&existing, self.clock.now()) {
                    return Err(DbError::AlreadyExists(id.to_string()));
                }
            }
            tx.inner
                .put_cf(&cf, &key, &value)
                .map_err(|e| DbError::SaveObjectFailed(e.to_string()))?;
            self.apply_index_updates(tx, &partition, &updates)?;
            self.update_model_topic(tx, &partition, model, topic, 1, model.expire_at(unit))
        })?;

        debug!("Created {} object {} in partition {}", model.name(), id, partition.range());
        Ok(id)
    }

    /// Read a live object from `partition`.
    pub(crate) fn read_in<U: Unit>(
        &self,
        partition: &Partition,
        topic: &Topic,
        model: &Model,
        id: &ObjectId,
        tx: Option<&Transaction<'_>>,
        for_update: bool,
    ) -> DbResult<U> {
        let cf = self.cf(partition.collection_cf())?;
        let key = object_key(model, topic, id);
        let value = match tx {
            Some(tx) if for_update => tx.inner.get_for_update_cf(&cf, &key, true),
            Some(tx) => tx.inner.get_cf(&cf, &key),
            None => self.db.get_cf(&cf, &key),
        }
        .map_err(|e| DbError::Storage(e.to_string()))?
        .ok_or(DbError::NotFound)?;

        if is_expired(&value, self.clock.now()) {
            return Err(DbError::NotFound);
        }
        Ok(U::parse(strip(&value))?)
    }

    /// Apply `request` to a stored object, returning it before and after.
    pub(crate) fn update_in<U: Unit>(
        &self,
        partition: &Partition,
        topic: &Topic,
        model: &Model,
        id: &ObjectId,
        request: &UpdateRequest,
        tx: Option<&Transaction<'_>>,
    ) -> DbResult<(U, U)> {
        if let Some(p) = model.partition() {
            if request.touches(&p.field) {
                return Err(DbError::InvalidArgument(format!(
                    "partition field {} of model {} cannot be updated",
                    p.field,
                    model.name()
                )));
            }
        }

        self.with_transaction(tx, |tx| {
            let before: U = self.read_in(partition, topic, model, id, Some(tx), true)?;
            let mut after = before.clone();
            request.apply(&mut after)?;
            after.set_updated_at(Utc::now());

            let updates = IndexKeyUpdateSet::for_update(model, topic, &before, &after)?;
            let cf = self.cf(partition.collection_cf())?;
            tx.inner
                .put_cf(&cf, object_key(model, topic, id), object_value(model, &after)?)
                .map_err(|e| DbError::SaveObjectFailed(e.to_string()))?;
            self.apply_index_updates(tx, partition, &updates)?;
            if model.has_ttl() {
                self.update_model_topic(tx, partition, model, topic, 0, model.expire_at(&after))?;
            }
            Ok((before, after))
        })
    }

    /// Remove a stored object and all its index entries, returning it.
    pub(crate) fn delete_in<U: Unit>(
        &self,
        partition: &Partition,
        topic: &Topic,
        model: &Model,
        id: &ObjectId,
        tx: Option<&Transaction<'_>>,
    ) -> DbResult<U> {
        self.with_transaction(tx, |tx| {
            let existing: U = self.read_in(partition, topic, model, id, Some(tx), true)?;
            let updates = IndexKeyUpdateSet::for_delete(model, topic, &existing)?;
            let cf = self.cf(partition.collection_cf())?;
            tx.inner
                .delete_cf(&cf, object_key(model, topic, id))
                .map_err(|e| DbError::DeleteObjectFailed(e.to_string()))?;
            self.apply_index_updates(tx, partition, &updates)?;
            self.update_model_topic(tx, partition, model, topic, -1, 0)?;
            Ok(existing)
        })
    }

    fn apply_index_updates(
        &self,
        tx: &Transaction<'_>,
        partition: &Partition,
        updates: &IndexKeyUpdateSet,
    ) -> DbResult<()> {
        let cf = self.cf(partition.index_cf())?;
        for entry in updates.entries() {
            let index_error = |e: rocksdb::Error| DbError::SaveIndexFailed(format!("{}: {}", entry.index.name(), e));
            match entry.op {
                IndexOp::Put => tx.inner.put_cf(&cf, &entry.key, &entry.value).map_err(index_error)?,
                IndexOp::Delete => tx.inner.delete_cf(&cf, &entry.key).map_err(index_error)?,
                IndexOp::Merge => self.merge_unique(tx, &cf, entry)?,
            }
        }
        Ok(())
    }

    fn merge_unique(
        &self,
        tx: &Transaction<'_>,
        cf: &Arc<BoundColumnFamily<'_>>,
        entry: &IndexKeyUpdate,
    ) -> DbResult<()> {
        reset_duplicate_flag();
        tx.inner
            .merge_cf(cf, &entry.key, &entry.value)
            .map_err(|e| DbError::SaveIndexFailed(format!("{}: {}", entry.index.name(), e)))?;

        match tx.inner.get_for_update_cf(cf, &entry.key, true) {
            Ok(_) => Ok(()),
            Err(e) => {
                if take_duplicate_flag() {
                    debug!("Duplicate unique key in index {}", entry.index.name());
                    Err(DbError::DuplicateUniqueKey {
                        index: entry.index.name().to_string(),
                    })
                } else {
                    warn!("Failed to save unique key in index {}: {}", entry.index.name(), e);
                    Err(DbError::SaveIndexFailed(format!("{}: {}", entry.index.name(), e)))
                }
            }
        }
    }
}
