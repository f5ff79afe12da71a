//! Model-topic relations
//!
//! Each collection column family keeps one relation row per (model, topic)
//! that has objects in the partition:
//!
//! - key: `[0, 0, 0, 0]{model_id:4 BE}{topic}`
//! - value: `{count:8 LE}{ttl mark}`
//!
//! Model ids start at 1, so the all-zero prefix never collides with object
//! keys. Rows are only ever merged with `{delta:8 LE}{ttl mark}` operands. The
//! relation expires with the last object that carries a TTL, and a row whose
//! count dropped to zero is left for the compaction filter.

use std::collections::BTreeSet;
use std::sync::Arc;

use rd_core::{DateRange, Model, Topic};
use rocksdb::{IteratorMode, MergeOperands, ReadOptions};
use tracing::debug;

use super::handler::{RocksdbHandler, Transaction};
use super::key_encoding::prefix_successor;
use super::partition::Partition;
use super::ttl_mark::{expire_at, fill_expire_at, is_expired, strip, ExpiryClock};
use crate::error::{DbError, DbResult};

pub const MODEL_TOPICS_MERGE_OPERATOR: &str = "ModelTopics";

const RELATION_PREFIX: [u8; 4] = [0; 4];
const COUNT_LEN: usize = 8;

/// `[0, 0, 0, 0]{model_id}`
pub fn model_relations_prefix(model: &Model) -> Vec<u8> {
    let mut key = Vec::with_capacity(RELATION_PREFIX.len() * 2);
    key.extend_from_slice(&RELATION_PREFIX);
    key.extend_from_slice(&model.id_prefix());
    key
}

pub fn relation_key(model: &Model, topic: &Topic) -> Vec<u8> {
    let mut key = model_relations_prefix(model);
    key.extend_from_slice(topic.as_bytes());
    key
}

pub fn is_relation_key(key: &[u8]) -> bool {
    key.starts_with(&RELATION_PREFIX)
}

/// Merge operand adding `delta` objects that expire at `expire_at` (0: never).
pub fn relation_operand(delta: i64, expire_at: u32) -> Vec<u8> {
    let mut operand = delta.to_le_bytes().to_vec();
    fill_expire_at(&mut operand, expire_at);
    operand
}

fn read_count(value: &[u8]) -> Option<[u8; COUNT_LEN]> {
    strip(value).try_into().ok()
}

/// Object count of a stored relation row.
pub fn relation_count(value: &[u8]) -> Option<u64> {
    read_count(value).map(u64::from_le_bytes)
}

/// Fold `operands` into `existing`.
///
/// An expired row starts over from zero. The count never goes negative.
/// Operands that add objects, including zero deltas that refresh an expiry,
/// extend the relation's expiry; any of them without expiry makes the
/// relation permanent.
pub fn merge_relation(existing: Option<&[u8]>, operands: &mut dyn Iterator<Item = &[u8]>, now: u32) -> Option<Vec<u8>> {
    let live = existing.filter(|value| !is_expired(value, now));
    let mut count = match live {
        Some(value) => relation_count(value)?,
        None => 0,
    };
    // None until an operand or a live row fixes it; Some(0) means never
    let mut expiry: Option<u32> = live.map(|value| expire_at(value).unwrap_or(0));

    for operand in operands {
        let delta = i64::from_le_bytes(read_count(operand)?);
        if delta < 0 {
            count = count.saturating_sub(delta.unsigned_abs());
            continue;
        }
        count = count.saturating_add(delta as u64);
        let at = expire_at(operand).unwrap_or(0);
        expiry = Some(match expiry {
            None => at,
            Some(0) => 0,
            Some(_) if at == 0 => 0,
            Some(current) => current.max(at),
        });
    }

    let mut value = count.to_le_bytes().to_vec();
    fill_expire_at(&mut value, expiry.unwrap_or(0));
    Some(value)
}

/// Full merge callback bound to `clock`.
pub fn relation_full_merge(
    clock: ExpiryClock,
) -> impl Fn(&[u8], Option<&[u8]>, &MergeOperands) -> Option<Vec<u8>> + Send + Sync + Clone + 'static {
    move |_key, existing, operands| merge_relation(existing, &mut operands.iter(), clock.now())
}

/// Operands are never combined without their base value.
pub fn relation_partial_merge(_key: &[u8], _existing: Option<&[u8]>, _operands: &MergeOperands) -> Option<Vec<u8>> {
    None
}

impl RocksdbHandler {
    /// Record `delta` objects of `model` under `topic` in `partition`.
    pub(crate) fn update_model_topic(
        &self,
        tx: &Transaction<'_>,
        partition: &Partition,
        model: &Model,
        topic: &Topic,
        delta: i64,
        expire_at: u32,
    ) -> DbResult<()> {
        let cf = self.cf(partition.collection_cf())?;
        tx.inner
            .merge_cf(&cf, relation_key(model, topic), relation_operand(delta, expire_at))
            .map_err(|e| DbError::ModelTopicSaveFailed(format!("{}/{}: {}", model.name(), topic, e)))
    }

    /// Topics holding live objects of `model`, sorted and without repeats.
    ///
    /// `None` looks at every partition, a null range only at the default
    /// partition, and a date range only at that partition.
    pub fn model_topics(&self, model: &Model, range: Option<DateRange>) -> DbResult<Vec<Topic>> {
        let partitions: Vec<Arc<Partition>> = match range {
            None => self.partitions.list(),
            Some(range) => self.partitions.get(range).into_iter().collect(),
        };
        let now = self.clock.refresh();
        let prefix = model_relations_prefix(model);

        let mut topics = BTreeSet::new();
        for partition in partitions {
            let cf = self.cf(partition.collection_cf())?;
            let mut opts = ReadOptions::default();
            opts.set_iterate_lower_bound(prefix.clone());
            opts.set_iterate_upper_bound(prefix_successor(&prefix));
            for item in self.db.iterator_cf_opt(&cf, opts, IteratorMode::Start) {
                let (key, value) = item.map_err(|e| DbError::ModelTopicListFailed(e.to_string()))?;
                if is_expired(&value, now) || relation_count(&value).unwrap_or(0) == 0 {
                    continue;
                }
                let topic = String::from_utf8(key[prefix.len()..].to_vec())
                    .map_err(|e| DbError::Codec(format!("topic of relation: {}", e)))?;
                topics.insert(Topic::from(topic));
            }
        }
        debug!("Model {} has {} topic(s)", model.name(), topics.len());
        Ok(topics.into_iter().collect())
    }
}
