#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use storage::{Client, Config, FieldKind, Index, Model, ModelRegistry, RangeMode, CREATED_AT_FIELD, ID_FIELD};

/// Models shared by the integration tests
pub struct Models {
    /// unique `email`, non-unique `age`
    pub user: Arc<Model>,
    /// unique `token`, TTL of 60s on `seen_at`
    pub session: Arc<Model>,
    /// partitioned by month on `created_at`, indexed by `customer`
    pub invoice: Arc<Model>,
    /// partitioned by day on `_id`, indexed by `kind`
    pub event: Arc<Model>,
    /// compound index on `kind` and `price`
    pub item: Arc<Model>,
    /// repeated `tags`, unique repeated `slugs`
    pub post: Arc<Model>,
}

impl Models {
    pub fn new() -> Self {
        let mut registry = ModelRegistry::new();
        let user = Model::builder("user")
            .index(Index::builder("email").field("email", FieldKind::String).unique())
            .index(Index::builder("age").field("age", FieldKind::Int))
            .build(&mut registry)
            .unwrap();
        let session = Model::builder("session")
            .index(Index::builder("token").field("token", FieldKind::String).unique())
            .index(Index::builder("seen").field("seen_at", FieldKind::DateTime).ttl(60))
            .build(&mut registry)
            .unwrap();
        let invoice = Model::builder("invoice")
            .index(
                Index::builder("created")
                    .field(CREATED_AT_FIELD, FieldKind::DateTime)
                    .date_partition(RangeMode::Month),
            )
            .index(Index::builder("customer").field("customer", FieldKind::String))
            .build(&mut registry)
            .unwrap();
        let event = Model::builder("event")
            .index(
                Index::builder("id")
                    .field(ID_FIELD, FieldKind::ObjectId)
                    .date_partition(RangeMode::Day),
            )
            .index(Index::builder("kind").field("kind", FieldKind::String))
            .build(&mut registry)
            .unwrap();
        let item = Model::builder("item")
            .index(
                Index::builder("kind_price")
                    .field("kind", FieldKind::String)
                    .field("price", FieldKind::UInt),
            )
            .build(&mut registry)
            .unwrap();
        let post = Model::builder("post")
            .index(Index::builder("tags").field("tags", FieldKind::String))
            .index(Index::builder("slugs").field("slugs", FieldKind::String).unique())
            .build(&mut registry)
            .unwrap();
        Self {
            user,
            session,
            invoice,
            event,
            item,
            post,
        }
    }

    pub fn all(&self) -> Vec<Arc<Model>> {
        vec![
            self.user.clone(),
            self.session.clone(),
            self.invoice.clone(),
            self.event.clone(),
            self.item.clone(),
            self.post.clone(),
        ]
    }
}

/// Config for a database that does not exist yet, inside `dir`.
pub fn temp_config(dir: &TempDir) -> Config {
    Config::with_path(dir.path().join("db"))
}

/// An open client over a throwaway database, removed with its directory.
pub struct TestDb {
    pub client: Arc<Client>,
    pub models: Models,
    pub config: Config,
    _dir: TempDir,
}

impl TestDb {
    pub fn open() -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let dir = TempDir::new().unwrap();
        let config = temp_config(&dir);
        let client = Client::new();
        let models = Models::new();
        client.register_models(&models.all());
        client.open(&config).unwrap();
        Self {
            client: Arc::new(client),
            models,
            config,
            _dir: dir,
        }
    }

    pub fn path(&self) -> PathBuf {
        self.config.storage.db_path.clone()
    }
}
