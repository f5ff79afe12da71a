//! Dynamically typed field values

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::object_id::ObjectId;

/// Field type, as declared by index descriptors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    Bool,
    Int,
    UInt,
    Double,
    String,
    Bytes,
    DateTime,
    Date,
    ObjectId,
    /// Repeated field. Indexes declare the element kind instead.
    Array,
}

impl FieldKind {
    /// Whether values of this kind have an order-preserving key encoding.
    pub fn is_indexable(self) -> bool {
        !matches!(self, FieldKind::Double | FieldKind::Array)
    }

    /// Whether the kind carries a calendar date usable for partitioning.
    pub fn is_dated(self) -> bool {
        matches!(self, FieldKind::DateTime | FieldKind::Date | FieldKind::ObjectId)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
    ObjectId(ObjectId),
    /// Repeated field; an index over it gets one entry per distinct element.
    Array(Vec<Value>),
}

impl Value {
    pub fn array<T: Into<Value>>(items: impl IntoIterator<Item = T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            Value::Bool(_) => FieldKind::Bool,
            Value::Int(_) => FieldKind::Int,
            Value::UInt(_) => FieldKind::UInt,
            Value::Double(_) => FieldKind::Double,
            Value::String(_) => FieldKind::String,
            Value::Bytes(_) => FieldKind::Bytes,
            Value::DateTime(_) => FieldKind::DateTime,
            Value::Date(_) => FieldKind::Date,
            Value::ObjectId(_) => FieldKind::ObjectId,
            Value::Array(_) => FieldKind::Array,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Calendar date carried by dated values.
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::DateTime(dt) => Some(dt.date_naive()),
            Value::Date(d) => Some(*d),
            Value::ObjectId(id) => Some(id.to_date()),
            _ => None,
        }
    }

    /// Epoch seconds carried by dated values. Dates map to their midnight.
    pub fn as_epoch(&self) -> Option<i64> {
        match self {
            Value::DateTime(dt) => Some(dt.timestamp()),
            Value::Date(d) => d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp()),
            Value::ObjectId(id) => Some(id.to_epoch() as i64),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt(v as u64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::DateTime(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<ObjectId> for Value {
    fn from(v: ObjectId) -> Self {
        Value::ObjectId(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}
