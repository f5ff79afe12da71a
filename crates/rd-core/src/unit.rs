//! Field-access contract for storable objects
//!
//! The storage engine never assumes an in-memory layout. It reads index
//! fields through [`Unit::field`], stamps identity and timestamps through the
//! setters, and stores whatever [`Unit::serialize`] produces.
//!
//! [`Document`] is the stock implementation: reserved fields plus a sorted
//! map of named values, stored as bincode.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::object_id::ObjectId;
use crate::value::Value;

pub const ID_FIELD: &str = "_id";
pub const CREATED_AT_FIELD: &str = "created_at";
pub const UPDATED_AT_FIELD: &str = "updated_at";

pub fn is_reserved_field(name: &str) -> bool {
    matches!(name, ID_FIELD | CREATED_AT_FIELD | UPDATED_AT_FIELD)
}

pub trait Unit: Clone + Send + Sync + 'static {
    fn object_id(&self) -> ObjectId;

    fn set_object_id(&mut self, id: ObjectId);

    fn created_at(&self) -> DateTime<Utc>;

    fn set_created_at(&mut self, at: DateTime<Utc>);

    fn updated_at(&self) -> DateTime<Utc>;

    fn set_updated_at(&mut self, at: DateTime<Utc>);

    /// Value of a field by name, reserved fields included. `None` when unset.
    fn field(&self, name: &str) -> Option<Value>;

    fn set_field(&mut self, name: &str, value: Value) -> CoreResult<()>;

    fn unset_field(&mut self, name: &str) -> CoreResult<()>;

    fn serialize(&self) -> CoreResult<Vec<u8>>;

    fn parse(data: &[u8]) -> CoreResult<Self>
    where
        Self: Sized;
}

/// Schemaless document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id")]
    id: ObjectId,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    fields: BTreeMap<String, Value>,
}

impl Default for Document {
    fn default() -> Self {
        Self {
            id: ObjectId::default(),
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
            fields: BTreeMap::new(),
        }
    }
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter for plain fields.
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn to_json(&self) -> CoreResult<String> {
        serde_json::to_string(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> CoreResult<Self> {
        serde_json::from_str(json).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}

impl Unit for Document {
    fn object_id(&self) -> ObjectId {
        self.id
    }

    fn set_object_id(&mut self, id: ObjectId) {
        self.id = id;
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn set_created_at(&mut self, at: DateTime<Utc>) {
        self.created_at = at;
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn set_updated_at(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }

    fn field(&self, name: &str) -> Option<Value> {
        match name {
            ID_FIELD => Some(Value::ObjectId(self.id)),
            CREATED_AT_FIELD => Some(Value::DateTime(self.created_at)),
            UPDATED_AT_FIELD => Some(Value::DateTime(self.updated_at)),
            _ => self.fields.get(name).cloned(),
        }
    }

    fn set_field(&mut self, name: &str, value: Value) -> CoreResult<()> {
        let mismatch = |expected: &str| CoreError::InvalidField {
            field: name.to_string(),
            reason: format!("expected {} value", expected),
        };
        match name {
            ID_FIELD => match value {
                Value::ObjectId(id) => self.id = id,
                _ => return Err(mismatch("object id")),
            },
            CREATED_AT_FIELD => self.created_at = value.as_datetime().ok_or_else(|| mismatch("datetime"))?,
            UPDATED_AT_FIELD => self.updated_at = value.as_datetime().ok_or_else(|| mismatch("datetime"))?,
            _ => {
                self.fields.insert(name.to_string(), value);
            }
        }
        Ok(())
    }

    fn unset_field(&mut self, name: &str) -> CoreResult<()> {
        if is_reserved_field(name) {
            return Err(CoreError::InvalidField {
                field: name.to_string(),
                reason: "reserved field cannot be unset".to_string(),
            });
        }
        self.fields.remove(name);
        Ok(())
    }

    fn serialize(&self) -> CoreResult<Vec<u8>> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| CoreError::Serialization(e.to_string()))
    }

    fn parse(data: &[u8]) -> CoreResult<Self> {
        let (doc, _) = bincode::serde::decode_from_slice(data, bincode::config::standard())
            .map_err(|e| CoreError::Serialization(e.to_string()))?;
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_reserved_fields() {
        let mut doc = Document::new().with("name", "alice");
        let id = ObjectId::generate();
        doc.set_object_id(id);
        assert_eq!(doc.field(ID_FIELD), Some(Value::ObjectId(id)));
        assert!(doc.set_field(CREATED_AT_FIELD, Value::from("x")).is_err());
        assert!(doc.unset_field(UPDATED_AT_FIELD).is_err());
        assert_eq!(doc.field("name"), Some(Value::from("alice")));
        assert_eq!(doc.field("missing"), None);
    }

    #[test]
    fn test_binary_and_json_forms() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let mut doc = Document::new()
            .with("email", "a@x.com")
            .with("age", 42i64)
            .with("score", 1.5f64)
            .with("seen", at);
        doc.set_object_id(ObjectId::generate());
        doc.set_created_at(at);

        let parsed = Document::parse(&Unit::serialize(&doc).unwrap()).unwrap();
        assert_eq!(parsed, doc);

        let json = doc.to_json().unwrap();
        assert!(json.contains("a@x.com"));
        assert_eq!(Document::from_json(&json).unwrap(), doc);
    }
}
