//! Asynchronous façade over [`Client`]
//!
//! Each call moves its arguments onto tokio's blocking pool and resolves
//! with the same result the synchronous client would return, so the calling
//! task never blocks on RocksDB.

use std::sync::Arc;

use chrono::NaiveDate;
use rd_core::{DateRange, IndexQuery, Model, ModifyReturn, ObjectId, Topic, Unit, UpdateRequest};

use crate::client::Client;
use crate::config::Config;
use crate::error::{DbError, DbResult};
use crate::rocksdb::Transaction;

#[derive(Clone, Default)]
pub struct AsyncClient {
    client: Arc<Client>,
}

impl AsyncClient {
    pub fn new(client: Arc<Client>) -> Self {
        Self { client }
    }

    /// The wrapped synchronous client.
    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    async fn run<T, F>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(&Client) -> DbResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let client = self.client.clone();
        tokio::task::spawn_blocking(move || f(&client))
            .await
            .map_err(|e| DbError::Internal(format!("storage task failed: {}", e)))?
    }

    pub async fn open(&self, config: Config) -> DbResult<()> {
        self.run(move |c| c.open(&config)).await
    }

    pub async fn close(&self) -> DbResult<()> {
        self.run(|c| c.close()).await
    }

    /// Store `unit` and return it with its id and timestamps filled in.
    pub async fn create<U: Unit>(&self, topic: Topic, model: Arc<Model>, mut unit: U) -> DbResult<U> {
        self.run(move |c| {
            c.create(&topic, &model, &mut unit, None)?;
            Ok(unit)
        })
        .await
    }

    pub async fn read<U: Unit>(&self, topic: Topic, model: Arc<Model>, id: ObjectId) -> DbResult<U> {
        self.run(move |c| c.read(&topic, &model, &id, None)).await
    }

    pub async fn read_with_date<U: Unit>(
        &self,
        topic: Topic,
        model: Arc<Model>,
        id: ObjectId,
        date: NaiveDate,
    ) -> DbResult<U> {
        self.run(move |c| c.read_with_date(&topic, &model, &id, date, None))
            .await
    }

    pub async fn update<U: Unit>(
        &self,
        topic: Topic,
        model: Arc<Model>,
        id: ObjectId,
        request: UpdateRequest,
    ) -> DbResult<()> {
        self.run(move |c| c.update::<U>(&topic, &model, &id, &request, None))
            .await
    }

    pub async fn read_update<U: Unit>(
        &self,
        topic: Topic,
        model: Arc<Model>,
        id: ObjectId,
        request: UpdateRequest,
        ret: ModifyReturn,
    ) -> DbResult<U> {
        self.run(move |c| c.read_update(&topic, &model, &id, &request, ret, None))
            .await
    }

    pub async fn delete<U: Unit>(&self, topic: Topic, model: Arc<Model>, id: ObjectId) -> DbResult<()> {
        self.run(move |c| c.delete::<U>(&topic, &model, &id, None)).await
    }

    pub async fn find<U: Unit>(&self, model: Arc<Model>, query: IndexQuery) -> DbResult<Vec<U>> {
        self.run(move |c| c.find(&model, &query)).await
    }

    pub async fn find_one<U: Unit>(&self, model: Arc<Model>, query: IndexQuery) -> DbResult<Option<U>> {
        self.run(move |c| c.find_one(&model, &query)).await
    }

    pub async fn count(&self, model: Arc<Model>, query: IndexQuery) -> DbResult<usize> {
        self.run(move |c| c.count(&model, &query)).await
    }

    pub async fn delete_many<U: Unit>(&self, model: Arc<Model>, query: IndexQuery) -> DbResult<usize> {
        self.run(move |c| c.delete_many::<U>(&model, &query, None)).await
    }

    pub async fn update_many<U: Unit>(
        &self,
        model: Arc<Model>,
        query: IndexQuery,
        request: UpdateRequest,
    ) -> DbResult<usize> {
        self.run(move |c| c.update_many::<U>(&model, &query, &request, None))
            .await
    }

    /// Run `f` in one transaction on the blocking pool.
    pub async fn transaction<T, F>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(&Client, &Transaction<'_>) -> DbResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.run(move |c| c.transaction(|tx| f(c, tx))).await
    }

    pub async fn add_date_partitions(&self, ranges: Vec<DateRange>) -> DbResult<()> {
        self.run(move |c| c.add_date_partitions(&ranges)).await
    }

    pub async fn list_date_partitions(&self) -> DbResult<Vec<DateRange>> {
        self.run(|c| c.list_date_partitions()).await
    }

    pub async fn list_model_topics(&self, model: Arc<Model>, range: Option<DateRange>) -> DbResult<Vec<Topic>> {
        self.run(move |c| c.list_model_topics(&model, range)).await
    }

    pub async fn delete_date_partitions(&self, ranges: Vec<DateRange>) -> DbResult<usize> {
        self.run(move |c| c.delete_date_partitions(&ranges)).await
    }

    pub async fn create_db(config: Config) -> DbResult<()> {
        tokio::task::spawn_blocking(move || Client::create_db(&config))
            .await
            .map_err(|e| DbError::Internal(format!("storage task failed: {}", e)))?
    }

    pub async fn destroy_db(config: Config) -> DbResult<()> {
        tokio::task::spawn_blocking(move || Client::destroy_db(&config))
            .await
            .map_err(|e| DbError::Internal(format!("storage task failed: {}", e)))?
    }
}
