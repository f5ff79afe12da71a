//! Model and index descriptors
//!
//! Models are described with builders at startup and registered in an
//! explicitly owned [`ModelRegistry`], which assigns the numeric id used as
//! the key-space prefix. Descriptors are immutable once built and shared as
//! `Arc<Model>`.
//!
//! Constraints checked by [`ModelBuilder::build`]:
//! - index names are unique within the model and every index has fields
//! - TTL indexes have exactly one `DateTime` field
//! - a partition index has exactly one dated field (`DateTime`, `Date` or
//!   object id) and a model has at most one of them
//! - `Double` fields are not indexable

use std::collections::HashMap;
use std::sync::Arc;

use crate::date_range::{DateRange, RangeMode};
use crate::error::{CoreError, CoreResult};
use crate::object_id::ObjectId;
use crate::unit::{Unit, ID_FIELD};
use crate::value::{FieldKind, Value};

/// Length of the hex index id embedded in index keys
pub const INDEX_ID_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexField {
    pub name: String,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    name: String,
    id: String,
    fields: Vec<IndexField>,
    unique: bool,
    ttl: Option<u32>,
    date_partition: Option<RangeMode>,
}

impl Index {
    pub fn builder(name: &str) -> IndexBuilder {
        IndexBuilder {
            name: name.to_string(),
            fields: Vec::new(),
            unique: false,
            ttl: None,
            date_partition: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 8 hex chars of CRC32 over `model/index`
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn fields(&self) -> &[IndexField] {
        &self.fields
    }

    pub fn field_position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Seconds after the indexed datetime at which the object expires.
    pub fn ttl(&self) -> Option<u32> {
        self.ttl
    }

    pub fn is_date_partition(&self) -> bool {
        self.date_partition.is_some()
    }

    pub fn covers(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f.name == field)
    }
}

pub struct IndexBuilder {
    name: String,
    fields: Vec<IndexField>,
    unique: bool,
    ttl: Option<u32>,
    date_partition: Option<RangeMode>,
}

impl IndexBuilder {
    pub fn field(mut self, name: &str, kind: FieldKind) -> Self {
        self.fields.push(IndexField {
            name: name.to_string(),
            kind,
        });
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn ttl(mut self, seconds: u32) -> Self {
        self.ttl = Some(seconds);
        self
    }

    /// Bucket objects into partitions by this index's only field.
    pub fn date_partition(mut self, mode: RangeMode) -> Self {
        self.date_partition = Some(mode);
        self
    }

    fn build(self, model: &str) -> CoreResult<Index> {
        let invalid = |reason: String| CoreError::InvalidModel {
            model: model.to_string(),
            reason,
        };
        if self.fields.is_empty() {
            return Err(invalid(format!("index {} has no fields", self.name)));
        }
        if let Some(field) = self.fields.iter().find(|f| !f.kind.is_indexable()) {
            return Err(invalid(format!("field {} of index {} is not indexable", field.name, self.name)));
        }
        if self.ttl.is_some() && (self.fields.len() != 1 || self.fields[0].kind != FieldKind::DateTime) {
            return Err(invalid(format!(
                "ttl index {} must have a single datetime field",
                self.name
            )));
        }
        if self.date_partition.is_some() && (self.fields.len() != 1 || !self.fields[0].kind.is_dated()) {
            return Err(invalid(format!(
                "partition index {} must have a single dated field",
                self.name
            )));
        }

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(model.as_bytes());
        hasher.update(b"/");
        hasher.update(self.name.as_bytes());
        let id = format!("{:08x}", hasher.finalize());

        Ok(Index {
            name: self.name,
            id,
            fields: self.fields,
            unique: self.unique,
            ttl: self.ttl,
            date_partition: self.date_partition,
        })
    }
}

/// Which field drives date partitioning and at which granularity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatePartition {
    pub field: String,
    pub mode: RangeMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    name: String,
    id: u32,
    indexes: Vec<Arc<Index>>,
    partition: Option<DatePartition>,
}

impl Model {
    pub fn builder(name: &str) -> ModelBuilder {
        ModelBuilder {
            name: name.to_string(),
            indexes: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Key-space prefix: the model id in big-endian order.
    pub fn id_prefix(&self) -> [u8; 4] {
        self.id.to_be_bytes()
    }

    pub fn indexes(&self) -> &[Arc<Index>] {
        &self.indexes
    }

    pub fn index(&self, name: &str) -> Option<&Arc<Index>> {
        self.indexes.iter().find(|idx| idx.name == name)
    }

    pub fn partition(&self) -> Option<&DatePartition> {
        self.partition.as_ref()
    }

    pub fn is_partitioned(&self) -> bool {
        self.partition.is_some()
    }

    /// Whether partitions are derived from the object id timestamp.
    pub fn is_partitioned_by_id(&self) -> bool {
        self.partition
            .as_ref()
            .map(|p| p.field == ID_FIELD)
            .unwrap_or(false)
    }

    pub fn ttl_indexes(&self) -> impl Iterator<Item = &Arc<Index>> {
        self.indexes.iter().filter(|idx| idx.ttl.is_some())
    }

    pub fn has_ttl(&self) -> bool {
        self.ttl_indexes().next().is_some()
    }

    /// Partition range of a stored object, from its partition field.
    ///
    /// Null for non-partitioned models or when the field is unset.
    pub fn object_range<U: Unit>(&self, unit: &U) -> CoreResult<DateRange> {
        let partition = match &self.partition {
            Some(p) => p,
            None => return Ok(DateRange::null()),
        };
        match unit.field(&partition.field).and_then(|v| v.as_date()) {
            Some(date) => DateRange::from_date(date, partition.mode),
            None => Ok(DateRange::null()),
        }
    }

    /// Partition range for an id when the model is partitioned by `_id`.
    pub fn id_range(&self, id: &ObjectId) -> CoreResult<Option<DateRange>> {
        match &self.partition {
            Some(p) if p.field == ID_FIELD => DateRange::from_date(id.to_date(), p.mode).map(Some),
            _ => Ok(None),
        }
    }

    /// Epoch seconds of the partition field, stored next to index entries.
    pub fn partition_timestamp<U: Unit>(&self, unit: &U) -> u32 {
        self.partition
            .as_ref()
            .and_then(|p| unit.field(&p.field))
            .and_then(|v: Value| v.as_epoch())
            .map(|secs| secs.clamp(0, u32::MAX as i64) as u32)
            .unwrap_or(0)
    }

    /// Absolute expiry of an object: the earliest `field + ttl` over the TTL
    /// indexes whose field is set. Zero means no expiry.
    pub fn expire_at<U: Unit>(&self, unit: &U) -> u32 {
        self.ttl_indexes()
            .filter_map(|idx| {
                let ttl = idx.ttl? as i64;
                let at = unit.field(&idx.fields[0].name)?.as_datetime()?;
                Some((at.timestamp() + ttl).clamp(1, u32::MAX as i64) as u32)
            })
            .min()
            .unwrap_or(0)
    }
}

pub struct ModelBuilder {
    name: String,
    indexes: Vec<IndexBuilder>,
}

impl ModelBuilder {
    pub fn index(mut self, index: IndexBuilder) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn build(self, registry: &mut ModelRegistry) -> CoreResult<Arc<Model>> {
        if self.name.is_empty() {
            return Err(CoreError::InvalidModel {
                model: self.name,
                reason: "empty model name".to_string(),
            });
        }

        let mut indexes: Vec<Arc<Index>> = Vec::with_capacity(self.indexes.len());
        let mut partition = None;
        for builder in self.indexes {
            let index = builder.build(&self.name)?;
            if indexes.iter().any(|i| i.name == index.name || i.id == index.id) {
                return Err(CoreError::InvalidModel {
                    model: self.name,
                    reason: format!("duplicate index {}", index.name),
                });
            }
            if let Some(mode) = index.date_partition {
                if partition.is_some() {
                    return Err(CoreError::InvalidModel {
                        model: self.name,
                        reason: "more than one partition index".to_string(),
                    });
                }
                partition = Some(DatePartition {
                    field: index.fields[0].name.clone(),
                    mode,
                });
            }
            indexes.push(Arc::new(index));
        }

        let id = registry.register_model(&self.name);
        Ok(Arc::new(Model {
            name: self.name,
            id,
            indexes,
            partition,
        }))
    }
}

/// Assigns stable numeric ids to model names.
///
/// Owned by the application's composition root; mutate it during startup and
/// share it read-only afterwards.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    ids: HashMap<String, u32>,
    counter: u32,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the existing id for `name`, or assigns the next one.
    pub fn register_model(&mut self, name: &str) -> u32 {
        if let Some(id) = self.ids.get(name) {
            return *id;
        }
        self.counter += 1;
        self.ids.insert(name.to_string(), self.counter);
        self.counter
    }

    pub fn model_id(&self, name: &str) -> Option<u32> {
        self.ids.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Forget every registration and restart numbering.
    pub fn free(&mut self) {
        self.ids.clear();
        self.counter = 0;
    }
}

/// Supplies the models an application wants wired into a database.
pub trait ModelsProvider: Send + Sync {
    fn models(&self) -> Vec<Arc<Model>>;
}

impl ModelsProvider for Vec<Arc<Model>> {
    fn models(&self) -> Vec<Arc<Model>> {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::{Document, CREATED_AT_FIELD};
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_registry_is_idempotent() {
        let mut registry = ModelRegistry::new();
        assert_eq!(registry.register_model("user"), 1);
        assert_eq!(registry.register_model("session"), 2);
        assert_eq!(registry.register_model("user"), 1);
        assert_eq!(registry.len(), 2);
        registry.free();
        assert!(registry.is_empty());
        assert_eq!(registry.register_model("session"), 1);
    }

    #[test]
    fn test_build_model() {
        let mut registry = ModelRegistry::new();
        let model = Model::builder("user")
            .index(Index::builder("email").field("email", FieldKind::String).unique())
            .index(
                Index::builder("created")
                    .field(CREATED_AT_FIELD, FieldKind::DateTime)
                    .date_partition(RangeMode::Month),
            )
            .build(&mut registry)
            .unwrap();

        assert_eq!(model.id(), 1);
        assert_eq!(model.id_prefix(), [0, 0, 0, 1]);
        assert!(model.index("email").unwrap().is_unique());
        assert_eq!(model.index("email").unwrap().id().len(), INDEX_ID_LEN);
        assert_ne!(model.index("email").unwrap().id(), model.index("created").unwrap().id());
        assert_eq!(model.partition().unwrap().field, CREATED_AT_FIELD);
        assert!(!model.is_partitioned_by_id());
    }

    #[test]
    fn test_invalid_descriptors() {
        let mut registry = ModelRegistry::new();
        let ttl_on_string = Model::builder("a")
            .index(Index::builder("t").field("name", FieldKind::String).ttl(10))
            .build(&mut registry);
        assert!(ttl_on_string.is_err());

        let two_partitions = Model::builder("b")
            .index(Index::builder("p1").field("d1", FieldKind::Date).date_partition(RangeMode::Day))
            .index(Index::builder("p2").field("d2", FieldKind::Date).date_partition(RangeMode::Day))
            .build(&mut registry);
        assert!(two_partitions.is_err());

        let double = Model::builder("c")
            .index(Index::builder("score").field("score", FieldKind::Double))
            .build(&mut registry);
        assert!(double.is_err());

        let duplicate = Model::builder("d")
            .index(Index::builder("x").field("x", FieldKind::Int))
            .index(Index::builder("x").field("y", FieldKind::Int))
            .build(&mut registry);
        assert!(duplicate.is_err());
    }

    #[test]
    fn test_expire_at_takes_earliest_ttl() {
        let mut registry = ModelRegistry::new();
        let model = Model::builder("session")
            .index(Index::builder("login").field("login_at", FieldKind::DateTime).ttl(100))
            .index(Index::builder("seen").field("seen_at", FieldKind::DateTime).ttl(10))
            .build(&mut registry)
            .unwrap();

        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let doc = Document::new().with("login_at", at);
        assert_eq!(model.expire_at(&doc) as i64, at.timestamp() + 100);

        let doc = doc.with("seen_at", at);
        assert_eq!(model.expire_at(&doc) as i64, at.timestamp() + 10);

        assert_eq!(model.expire_at(&Document::new()), 0);
    }

    #[test]
    fn test_object_range_rejects_unpackable_years() {
        let mut registry = ModelRegistry::new();
        let model = Model::builder("invoice")
            .index(
                Index::builder("issued")
                    .field("issued", FieldKind::Date)
                    .date_partition(RangeMode::Month),
            )
            .build(&mut registry)
            .unwrap();

        assert!(model.object_range(&Document::new()).unwrap().is_null());

        let issued = |y| chrono::NaiveDate::from_ymd_opt(y, 7, 4).unwrap();
        let range = model
            .object_range(&Document::new().with("issued", issued(2024)))
            .unwrap();
        assert_eq!(range.to_string(), "32024007");
        assert!(model
            .object_range(&Document::new().with("issued", issued(9999)))
            .is_ok());
        for year in [-5, 0, 10_000] {
            let err = model
                .object_range(&Document::new().with("issued", issued(year)))
                .unwrap_err();
            assert!(matches!(err, CoreError::InvalidDateRange(_)));
        }
    }
}
