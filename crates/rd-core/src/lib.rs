//! Core types for the rockdoc document store
//!
//! Shared by the storage engine and its callers:
//! - `ObjectId`: time-ordered 12-byte object identity
//! - `DateRange`: calendar buckets used for date partitioning
//! - `Topic`, `Value`, `FieldKind`: keys and field values
//! - `Unit`, `Document`: the field-access contract and its stock implementation
//! - `Model`, `Index`, `ModelRegistry`: model descriptors
//! - `IndexQuery`, `UpdateRequest`: query and update requests

pub mod date_range;
pub mod error;
pub mod model;
pub mod object_id;
pub mod query;
pub mod topic;
pub mod unit;
pub mod update;
pub mod value;

pub use date_range::{DateRange, RangeMode};
pub use error::{CoreError, CoreResult};
pub use model::{DatePartition, Index, IndexBuilder, IndexField, Model, ModelBuilder, ModelRegistry, ModelsProvider};
pub use object_id::ObjectId;
pub use query::{Condition, DateInterval, IndexQuery, Operator, Order};
pub use topic::Topic;
pub use unit::{Document, Unit, CREATED_AT_FIELD, ID_FIELD, UPDATED_AT_FIELD};
pub use update::{FieldOp, ModifyReturn, UpdateRequest};
pub use value::{FieldKind, Value};
