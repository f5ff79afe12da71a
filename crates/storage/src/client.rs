//! Synchronous client
//!
//! Entry point for applications: open/close lifecycle, model registration,
//! CRUD, queries and date partition administration. Every call blocks the
//! calling thread; see [`AsyncClient`](crate::AsyncClient) for the async
//! façade.
//!
//! Operations accept an optional [`Transaction`]. Without one they run in a
//! transaction of their own; with one they join it, so several writes can be
//! committed together through [`Client::transaction`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use parking_lot::RwLock;
use rd_core::{DateRange, IndexQuery, Model, ModelsProvider, ModifyReturn, ObjectId, Topic, Unit, UpdateRequest};
use rocksdb::{Options, DB};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{DbError, DbResult};
use crate::rocksdb::{key_encoding::validate_topic, RocksdbHandler, Transaction};

#[derive(Default)]
pub struct Client {
    handler: RwLock<Option<Arc<RocksdbHandler>>>,
    models: RwLock<HashMap<String, Arc<Model>>>,
}

impl Client {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, config: &Config) -> DbResult<()> {
        let mut handler = self.handler.write();
        if handler.is_some() {
            return Err(DbError::AlreadyOpen);
        }
        *handler = Some(Arc::new(RocksdbHandler::open(config)?));
        Ok(())
    }

    /// Release the database. Operations still running on other threads keep
    /// it alive until they finish.
    pub fn close(&self) -> DbResult<()> {
        let handler = self.handler.write().take().ok_or(DbError::NotOpen)?;
        info!("Closing database {}", handler.path());
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.handler.read().is_some()
    }

    /// Create an empty database with its default partition.
    pub fn create_db(config: &Config) -> DbResult<()> {
        let mut config = config.clone();
        config.storage.create_if_missing = true;
        let handler = RocksdbHandler::open(&config).map_err(|e| DbError::CreateFailed(e.to_string()))?;
        info!("Created database {}", handler.path());
        Ok(())
    }

    /// Remove a database and its directory.
    pub fn destroy_db(config: &Config) -> DbResult<()> {
        let path = &config.storage.db_path;
        if !path.exists() {
            return Ok(());
        }
        DB::destroy(&Options::default(), path).map_err(|e| DbError::DestroyFailed(e.to_string()))?;
        if Path::new(path).exists() {
            std::fs::remove_dir_all(path).map_err(|e| DbError::DestroyFailed(e.to_string()))?;
        }
        info!("Destroyed database {}", path.display());
        Ok(())
    }

    pub fn register_models(&self, provider: &dyn ModelsProvider) {
        let mut models = self.models.write();
        for model in provider.models() {
            if let Some(existing) = models.get(model.name()) {
                if existing.id() != model.id() {
                    warn!(
                        "Model {} re-registered with id {} (was {})",
                        model.name(),
                        model.id(),
                        existing.id()
                    );
                }
            }
            models.insert(model.name().to_string(), model);
        }
    }

    pub fn unregister_models(&self, provider: &dyn ModelsProvider) {
        let mut models = self.models.write();
        for model in provider.models() {
            models.remove(model.name());
        }
    }

    pub fn is_registered(&self, model: &Model) -> bool {
        self.models
            .read()
            .get(model.name())
            .map(|m| m.id() == model.id())
            .unwrap_or(false)
    }

    fn check_model(&self, model: &Model) -> DbResult<()> {
        if self.is_registered(model) {
            Ok(())
        } else {
            Err(DbError::ModelNotRegistered(model.name().to_string()))
        }
    }

    fn handler(&self) -> DbResult<Arc<RocksdbHandler>> {
        let handler = self.handler.read().clone().ok_or(DbError::NotOpen)?;
        handler.clock.refresh();
        Ok(handler)
    }

    /// Run `f` on the handler owning `tx`, or on the open database.
    fn with_handler<T>(
        &self,
        tx: Option<&Transaction<'_>>,
        f: impl FnOnce(&RocksdbHandler) -> DbResult<T>,
    ) -> DbResult<T> {
        match tx {
            Some(tx) => {
                tx.handler.clock.refresh();
                f(tx.handler)
            }
            None => {
                let handler = self.handler()?;
                f(&handler)
            }
        }
    }

    /// Run `f` in one transaction: committed when it returns `Ok`, rolled
    /// back otherwise.
    pub fn transaction<T>(&self, f: impl FnOnce(&Transaction<'_>) -> DbResult<T>) -> DbResult<T> {
        let handler = self.handler()?;
        handler.with_transaction(None, f)
    }

    pub fn create<U: Unit>(
        &self,
        topic: &Topic,
        model: &Model,
        unit: &mut U,
        tx: Option<&Transaction<'_>>,
    ) -> DbResult<ObjectId> {
        self.check_model(model)?;
        self.with_handler(tx, |h| h.create(topic, model, unit, tx))
    }

    pub fn read<U: Unit>(&self, topic: &Topic, model: &Model, id: &ObjectId, tx: Option<&Transaction<'_>>) -> DbResult<U> {
        self.read_object(topic, model, id, None, tx, false)
    }

    /// Read an object of a model partitioned by a field other than `_id`.
    pub fn read_with_date<U: Unit>(
        &self,
        topic: &Topic,
        model: &Model,
        id: &ObjectId,
        date: NaiveDate,
        tx: Option<&Transaction<'_>>,
    ) -> DbResult<U> {
        self.read_object(topic, model, id, Some(date), tx, false)
    }

    /// Read and lock an object until `tx` finishes.
    pub fn read_for_update<U: Unit>(
        &self,
        topic: &Topic,
        model: &Model,
        id: &ObjectId,
        date: Option<NaiveDate>,
        tx: &Transaction<'_>,
    ) -> DbResult<U> {
        self.read_object(topic, model, id, date, Some(tx), true)
    }

    fn read_object<U: Unit>(
        &self,
        topic: &Topic,
        model: &Model,
        id: &ObjectId,
        date: Option<NaiveDate>,
        tx: Option<&Transaction<'_>>,
        for_update: bool,
    ) -> DbResult<U> {
        self.check_model(model)?;
        validate_topic(topic)?;
        self.with_handler(tx, |h| {
            let partition = h.object_partition(model, Some(id), date, false)?.ok_or(DbError::NotFound)?;
            h.read_in(&partition, topic, model, id, tx, for_update)
        })
    }

    pub fn update<U: Unit>(
        &self,
        topic: &Topic,
        model: &Model,
        id: &ObjectId,
        request: &UpdateRequest,
        tx: Option<&Transaction<'_>>,
    ) -> DbResult<()> {
        self.update_object::<U>(topic, model, id, None, request, tx).map(|_| ())
    }

    pub fn update_with_date<U: Unit>(
        &self,
        topic: &Topic,
        model: &Model,
        id: &ObjectId,
        date: NaiveDate,
        request: &UpdateRequest,
        tx: Option<&Transaction<'_>>,
    ) -> DbResult<()> {
        self.update_object::<U>(topic, model, id, Some(date), request, tx).map(|_| ())
    }

    /// Update an object and return it as it was before or after the update.
    pub fn read_update<U: Unit>(
        &self,
        topic: &Topic,
        model: &Model,
        id: &ObjectId,
        request: &UpdateRequest,
        ret: ModifyReturn,
        tx: Option<&Transaction<'_>>,
    ) -> DbResult<U> {
        let (before, after) = self.update_object::<U>(topic, model, id, None, request, tx)?;
        Ok(match ret {
            ModifyReturn::Before => before,
            ModifyReturn::After => after,
        })
    }

    fn update_object<U: Unit>(
        &self,
        topic: &Topic,
        model: &Model,
        id: &ObjectId,
        date: Option<NaiveDate>,
        request: &UpdateRequest,
        tx: Option<&Transaction<'_>>,
    ) -> DbResult<(U, U)> {
        self.check_model(model)?;
        validate_topic(topic)?;
        self.with_handler(tx, |h| {
            let partition = h.object_partition(model, Some(id), date, false)?.ok_or(DbError::NotFound)?;
            h.update_in(&partition, topic, model, id, request, tx)
        })
    }

    pub fn delete<U: Unit>(&self, topic: &Topic, model: &Model, id: &ObjectId, tx: Option<&Transaction<'_>>) -> DbResult<()> {
        self.delete_object::<U>(topic, model, id, None, tx)
    }

    pub fn delete_with_date<U: Unit>(
        &self,
        topic: &Topic,
        model: &Model,
        id: &ObjectId,
        date: NaiveDate,
        tx: Option<&Transaction<'_>>,
    ) -> DbResult<()> {
        self.delete_object::<U>(topic, model, id, Some(date), tx)
    }

    fn delete_object<U: Unit>(
        &self,
        topic: &Topic,
        model: &Model,
        id: &ObjectId,
        date: Option<NaiveDate>,
        tx: Option<&Transaction<'_>>,
    ) -> DbResult<()> {
        self.check_model(model)?;
        validate_topic(topic)?;
        self.with_handler(tx, |h| {
            let partition = h.object_partition(model, Some(id), date, false)?.ok_or(DbError::NotFound)?;
            h.delete_in::<U>(&partition, topic, model, id, tx).map(|_| ())
        })
    }

    /// Objects matching `query`, in index order.
    pub fn find<U: Unit>(&self, model: &Model, query: &IndexQuery) -> DbResult<Vec<U>> {
        self.check_model(model)?;
        let handler = self.handler()?;
        let hits = handler.scan(model, query)?;
        let mut objects = Vec::with_capacity(hits.len());
        for hit in hits {
            match handler.read_in(&hit.partition, &hit.topic, model, &hit.object_id, None, false) {
                Ok(object) => objects.push(object),
                // expired or removed between the index scan and the read
                Err(DbError::NotFound) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(objects)
    }

    pub fn find_one<U: Unit>(&self, model: &Model, query: &IndexQuery) -> DbResult<Option<U>> {
        let query = query.clone().limit(1);
        Ok(self.find(model, &query)?.into_iter().next())
    }

    pub fn count(&self, model: &Model, query: &IndexQuery) -> DbResult<usize> {
        self.check_model(model)?;
        self.handler()?.count(model, query)
    }

    /// Delete every object matching `query` in one transaction.
    pub fn delete_many<U: Unit>(&self, model: &Model, query: &IndexQuery, tx: Option<&Transaction<'_>>) -> DbResult<usize> {
        self.check_model(model)?;
        self.with_handler(tx, |h| {
            let hits = h.scan(model, query)?;
            h.with_transaction(tx, |tx| {
                let mut deleted = 0;
                for hit in &hits {
                    match h.delete_in::<U>(&hit.partition, &hit.topic, model, &hit.object_id, Some(tx)) {
                        Ok(_) => deleted += 1,
                        Err(DbError::NotFound) => continue,
                        Err(e) => return Err(e),
                    }
                }
                Ok(deleted)
            })
        })
    }

    /// Apply `request` to every object matching `query` in one transaction.
    pub fn update_many<U: Unit>(
        &self,
        model: &Model,
        query: &IndexQuery,
        request: &UpdateRequest,
        tx: Option<&Transaction<'_>>,
    ) -> DbResult<usize> {
        self.check_model(model)?;
        self.with_handler(tx, |h| {
            let hits = h.scan(model, query)?;
            h.with_transaction(tx, |tx| {
                let mut updated = 0;
                for hit in &hits {
                    match h.update_in::<U>(&hit.partition, &hit.topic, model, &hit.object_id, request, Some(tx)) {
                        Ok(_) => updated += 1,
                        Err(DbError::NotFound) => continue,
                        Err(e) => return Err(e),
                    }
                }
                Ok(updated)
            })
        })
    }

    pub fn add_date_partitions(&self, ranges: &[DateRange]) -> DbResult<()> {
        let handler = self.handler()?;
        for range in ranges {
            if range.is_null() {
                return Err(DbError::InvalidArgument("null date range".to_string()));
            }
            handler.get_or_create_partition(*range)?;
        }
        Ok(())
    }

    pub fn list_date_partitions(&self) -> DbResult<Vec<DateRange>> {
        Ok(self.handler()?.list_partitions())
    }

    /// Topics that hold objects of `model`, sorted.
    ///
    /// Without a range every partition is consulted. `DateRange::null()`
    /// selects the default partition, any other range the matching date
    /// partition, which yields nothing when it does not exist.
    pub fn list_model_topics(&self, model: &Model, range: Option<DateRange>) -> DbResult<Vec<Topic>> {
        self.check_model(model)?;
        self.handler()?.model_topics(model, range)
    }

    /// Drop date partitions with all their objects; returns how many existed.
    pub fn delete_date_partitions(&self, ranges: &[DateRange]) -> DbResult<usize> {
        let handler = self.handler()?;
        let mut deleted = 0;
        for range in ranges {
            if handler.delete_partition(*range)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}
