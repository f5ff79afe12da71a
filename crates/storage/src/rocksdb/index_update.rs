//! Index maintenance
//!
//! Computes, without any I/O, the index writes that keep secondary indexes
//! consistent with an object across create, update and delete. The write
//! path applies the resulting [`IndexKeyUpdateSet`] in order inside the
//! object's transaction.
//!
//! Index value layout: `{object_id:24 hex}{partition timestamp:4 BE}{ttl mark}`.

use std::collections::BTreeSet;
use std::sync::Arc;

use rd_core::object_id::OBJECT_ID_LEN;
use rd_core::{Index, Model, ObjectId, Topic, Unit};

use super::key_encoding::index_keys;
use super::ttl_mark::fill_expire_at;
use crate::error::{DbError, DbResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOp {
    /// Checked insert through the unique-key merge operator
    Merge,
    /// Plain overwrite of a key the object already owns, or a new non-unique key
    Put,
    Delete,
}

#[derive(Debug, Clone)]
pub struct IndexKeyUpdate {
    pub index: Arc<Index>,
    pub key: Vec<u8>,
    /// Empty for deletes
    pub value: Vec<u8>,
    pub op: IndexOp,
    pub existed_before: bool,
}

#[derive(Debug, Clone, Default)]
pub struct IndexKeyUpdateSet {
    entries: Vec<IndexKeyUpdate>,
}

pub fn index_value(id: &ObjectId, partition_ts: u32, expire_at: u32) -> Vec<u8> {
    let mut value = Vec::with_capacity(OBJECT_ID_LEN + 4 + 5);
    id.write_hex(&mut value);
    value.extend_from_slice(&partition_ts.to_be_bytes());
    fill_expire_at(&mut value, expire_at);
    value
}

/// Object id and partition timestamp stored in an index value.
pub fn decode_index_value(value: &[u8]) -> DbResult<(ObjectId, u32)> {
    if value.len() < OBJECT_ID_LEN + 4 + 1 {
        return Err(DbError::Codec("truncated index value".to_string()));
    }
    let id = ObjectId::parse_hex(&value[..OBJECT_ID_LEN])?;
    let ts = &value[OBJECT_ID_LEN..OBJECT_ID_LEN + 4];
    Ok((id, u32::from_be_bytes([ts[0], ts[1], ts[2], ts[3]])))
}

fn insert_op(index: &Index) -> IndexOp {
    if index.is_unique() {
        IndexOp::Merge
    } else {
        IndexOp::Put
    }
}

impl IndexKeyUpdateSet {
    pub fn for_create<U: Unit>(model: &Model, topic: &Topic, unit: &U) -> DbResult<Self> {
        let value = index_value(&unit.object_id(), model.partition_timestamp(unit), model.expire_at(unit));
        let mut set = Self::default();
        for index in model.indexes() {
            for key in index_keys(model, topic, index, unit)? {
                set.entries.push(IndexKeyUpdate {
                    index: index.clone(),
                    key,
                    value: value.clone(),
                    op: insert_op(index),
                    existed_before: false,
                });
            }
        }
        Ok(set)
    }

    /// Only keys that appeared or disappeared are written; for repeated
    /// fields that is the difference of the element sets. When the expiry
    /// moved, kept keys are refreshed in place so their TTL mark follows.
    pub fn for_update<U: Unit>(model: &Model, topic: &Topic, before: &U, after: &U) -> DbResult<Self> {
        if model.partition_timestamp(before) != model.partition_timestamp(after) {
            return Err(DbError::InvalidArgument(format!(
                "partition field of model {} cannot be updated",
                model.name()
            )));
        }
        let expire_changed = model.expire_at(before) != model.expire_at(after);
        let value = index_value(&after.object_id(), model.partition_timestamp(after), model.expire_at(after));

        let mut set = Self::default();
        for index in model.indexes() {
            let old_keys: BTreeSet<Vec<u8>> = index_keys(model, topic, index, before)?.into_iter().collect();
            let new_keys: BTreeSet<Vec<u8>> = index_keys(model, topic, index, after)?.into_iter().collect();

            for key in old_keys.difference(&new_keys) {
                set.entries.push(IndexKeyUpdate {
                    index: index.clone(),
                    key: key.clone(),
                    value: Vec::new(),
                    op: IndexOp::Delete,
                    existed_before: true,
                });
            }
            for key in &new_keys {
                let existed_before = old_keys.contains(key);
                if existed_before && !expire_changed {
                    continue;
                }
                set.entries.push(IndexKeyUpdate {
                    index: index.clone(),
                    key: key.clone(),
                    value: value.clone(),
                    op: if existed_before { IndexOp::Put } else { insert_op(index) },
                    existed_before,
                });
            }
        }
        Ok(set)
    }

    pub fn for_delete<U: Unit>(model: &Model, topic: &Topic, unit: &U) -> DbResult<Self> {
        let mut set = Self::default();
        for index in model.indexes() {
            for key in index_keys(model, topic, index, unit)? {
                set.entries.push(IndexKeyUpdate {
                    index: index.clone(),
                    key,
                    value: Vec::new(),
                    op: IndexOp::Delete,
                    existed_before: true,
                });
            }
        }
        Ok(set)
    }

    pub fn entries(&self) -> &[IndexKeyUpdate] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use rd_core::{Document, FieldKind, ModelRegistry, UpdateRequest, Value};

    fn user_model() -> Arc<Model> {
        let mut registry = ModelRegistry::new();
        Model::builder("user")
            .index(Index::builder("email").field("email", FieldKind::String).unique())
            .index(Index::builder("age").field("age", FieldKind::Int))
            .index(Index::builder("seen").field("seen_at", FieldKind::DateTime).ttl(3600))
            .build(&mut registry)
            .unwrap()
    }

    fn user() -> Document {
        let mut doc = Document::new()
            .with("email", "a@x.com")
            .with("age", 30i64)
            .with("bio", "hi");
        doc.set_object_id(ObjectId::generate());
        doc
    }

    #[test]
    fn test_create_schedules_every_index() {
        let model = user_model();
        let doc = user();
        let set = IndexKeyUpdateSet::for_create(&model, &Topic::from("t"), &doc).unwrap();
        let ops: Vec<IndexOp> = set.entries().iter().map(|e| e.op).collect();
        assert_eq!(ops, vec![IndexOp::Merge, IndexOp::Put, IndexOp::Put]);
        assert!(set.entries().iter().all(|e| !e.existed_before));

        let (id, ts) = decode_index_value(&set.entries()[0].value).unwrap();
        assert_eq!(id, doc.object_id());
        assert_eq!(ts, 0);
    }

    #[test]
    fn test_update_of_unindexed_field_touches_nothing() {
        let model = user_model();
        let before = user();
        let mut after = before.clone();
        UpdateRequest::new().set("bio", "changed").apply(&mut after).unwrap();
        let set = IndexKeyUpdateSet::for_update(&model, &Topic::from("t"), &before, &after).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_update_moves_changed_keys() {
        let model = user_model();
        let before = user();
        let mut after = before.clone();
        UpdateRequest::new().set("email", "b@x.com").apply(&mut after).unwrap();
        let set = IndexKeyUpdateSet::for_update(&model, &Topic::from("t"), &before, &after).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.entries()[0].op, IndexOp::Delete);
        assert!(set.entries()[0].existed_before);
        assert_eq!(set.entries()[1].op, IndexOp::Merge);
        assert_eq!(set.entries()[0].index.name(), "email");
    }

    #[test]
    fn test_ttl_change_refreshes_untouched_keys() {
        let model = user_model();
        let seen = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let before = user().with("seen_at", seen);
        let mut after = before.clone();
        UpdateRequest::new()
            .set("seen_at", seen + Duration::hours(1))
            .apply(&mut after)
            .unwrap();
        let set = IndexKeyUpdateSet::for_update(&model, &Topic::from("t"), &before, &after).unwrap();

        let ops: Vec<(&str, IndexOp)> = set.entries().iter().map(|e| (e.index.name(), e.op)).collect();
        assert_eq!(
            ops,
            vec![
                ("email", IndexOp::Put),
                ("age", IndexOp::Put),
                ("seen", IndexOp::Delete),
                ("seen", IndexOp::Put),
            ]
        );
    }

    #[test]
    fn test_delete_removes_every_key() {
        let model = user_model();
        let doc = user();
        let topic = Topic::from("t");
        let created = IndexKeyUpdateSet::for_create(&model, &topic, &doc).unwrap();
        let deleted = IndexKeyUpdateSet::for_delete(&model, &topic, &doc).unwrap();
        assert!(deleted.entries().iter().all(|e| e.op == IndexOp::Delete));
        let created_keys: Vec<&Vec<u8>> = created.entries().iter().map(|e| &e.key).collect();
        let deleted_keys: Vec<&Vec<u8>> = deleted.entries().iter().map(|e| &e.key).collect();
        assert_eq!(created_keys, deleted_keys);
    }

    fn post_model() -> Arc<Model> {
        let mut registry = ModelRegistry::new();
        Model::builder("post")
            .index(Index::builder("tags").field("tags", FieldKind::String))
            .index(Index::builder("slug").field("slugs", FieldKind::String).unique())
            .build(&mut registry)
            .unwrap()
    }

    #[test]
    fn test_repeated_field_gets_entry_per_element() {
        let model = post_model();
        let mut doc = Document::new()
            .with("tags", Value::array(["a", "b", "a"]))
            .with("slugs", Value::array(["first"]));
        doc.set_object_id(ObjectId::generate());
        let set = IndexKeyUpdateSet::for_create(&model, &Topic::from("t"), &doc).unwrap();
        let ops: Vec<(&str, IndexOp)> = set.entries().iter().map(|e| (e.index.name(), e.op)).collect();
        assert_eq!(
            ops,
            vec![("tags", IndexOp::Put), ("tags", IndexOp::Put), ("slug", IndexOp::Merge)]
        );
        let deleted = IndexKeyUpdateSet::for_delete(&model, &Topic::from("t"), &doc).unwrap();
        assert_eq!(deleted.len(), 3);
    }

    #[test]
    fn test_repeated_field_update_diffs_elements() {
        let model = post_model();
        let topic = Topic::from("t");
        let mut before = Document::new()
            .with("tags", Value::array(["a", "b"]))
            .with("slugs", Value::array(["first"]));
        before.set_object_id(ObjectId::generate());

        let mut after = before.clone();
        UpdateRequest::new()
            .erase_element("tags", 0)
            .push("tags", "c")
            .push_unique("slugs", "first")
            .apply(&mut after)
            .unwrap();
        let set = IndexKeyUpdateSet::for_update(&model, &topic, &before, &after).unwrap();
        let ops: Vec<(&str, IndexOp)> = set.entries().iter().map(|e| (e.index.name(), e.op)).collect();
        assert_eq!(ops, vec![("tags", IndexOp::Delete), ("tags", IndexOp::Put)]);

        let created = IndexKeyUpdateSet::for_create(&model, &topic, &before).unwrap();
        assert_eq!(set.entries()[0].key, created.entries()[0].key);

        let mut cleared = before.clone();
        UpdateRequest::new()
            .set("tags", Value::Array(Vec::new()))
            .apply(&mut cleared)
            .unwrap();
        let set = IndexKeyUpdateSet::for_update(&model, &topic, &before, &cleared).unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.entries().iter().all(|e| e.op == IndexOp::Delete));
    }
}
