//! Index scans for find and count
//!
//! A query is compiled against its index into key prefixes and bounds:
//! leading `Eq`/`In` conditions expand into one prefix per value combination,
//! and a range condition on the next field bounds the iterator. Every
//! condition is still checked on the decoded key, so the bounds only narrow
//! the work.
//!
//! Each (partition, topic, prefix) source yields at most `offset + limit`
//! distinct objects in index order. Sources are then merged on the key
//! suffix, an object reached through several elements of a repeated field
//! keeps only its first entry, and the offset and limit are applied once,
//! globally.

use std::collections::HashSet;
use std::ops::Bound;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rd_core::{Index, IndexQuery, Model, ObjectId, Operator, Order, Topic, Value};
use rocksdb::{IteratorMode, ReadOptions};
use tracing::trace;

use super::handler::RocksdbHandler;
use super::index_update::decode_index_value;
use super::key_encoding::{
    decode_index_key, encode_field, index_prefix, prefix_successor, validate_topic, SEPARATOR, SEPARATOR_PLUS,
};
use super::partition::Partition;
use super::ttl_mark::is_expired;
use crate::error::{DbError, DbResult};

/// One index entry matching a query.
#[derive(Debug, Clone)]
pub struct ScanHit {
    pub partition: Arc<Partition>,
    pub topic: Topic,
    pub object_id: ObjectId,
    sort_key: Vec<u8>,
}

#[derive(Debug, Clone)]
enum Matcher {
    Eq(Vec<u8>),
    Neq(Vec<u8>),
    In(Vec<Vec<u8>>),
    Range(Bound<Vec<u8>>, Bound<Vec<u8>>),
}

impl Matcher {
    /// Absent fields encode as zero length and only satisfy `Neq`.
    fn matches(&self, field: &[u8]) -> bool {
        match self {
            Matcher::Neq(v) => field != v.as_slice(),
            _ if field.is_empty() => false,
            Matcher::Eq(v) => field == v.as_slice(),
            Matcher::In(values) => values.iter().any(|v| v.as_slice() == field),
            Matcher::Range(from, to) => {
                let above = match from {
                    Bound::Included(v) => field >= v.as_slice(),
                    Bound::Excluded(v) => field > v.as_slice(),
                    Bound::Unbounded => true,
                };
                let below = match to {
                    Bound::Included(v) => field <= v.as_slice(),
                    Bound::Excluded(v) => field < v.as_slice(),
                    Bound::Unbounded => true,
                };
                above && below
            }
        }
    }
}

/// A query resolved against its index.
struct CompiledQuery {
    index: Arc<Index>,
    /// Matchers per index field position
    matchers: Vec<Vec<Matcher>>,
    /// Encoded leading fields, each followed by the separator
    segments: Vec<Vec<u8>>,
    /// Bounds on the field right after the segments
    range: (Bound<Vec<u8>>, Bound<Vec<u8>>),
}

fn encode_value(value: &Value, index: &Index, pos: usize) -> DbResult<Vec<u8>> {
    let mut buf = Vec::new();
    encode_field(&mut buf, Some(value), index.fields()[pos].kind)?;
    Ok(buf)
}

fn encode_bound(bound: &Bound<Value>, index: &Index, pos: usize) -> DbResult<Bound<Vec<u8>>> {
    Ok(match bound {
        Bound::Included(v) => Bound::Included(encode_value(v, index, pos)?),
        Bound::Excluded(v) => Bound::Excluded(encode_value(v, index, pos)?),
        Bound::Unbounded => Bound::Unbounded,
    })
}

fn compile(model: &Model, query: &IndexQuery) -> DbResult<CompiledQuery> {
    let index = model.index(&query.index).cloned().ok_or_else(|| DbError::IndexNotFound {
        model: model.name().to_string(),
        index: query.index.clone(),
    })?;

    let mut matchers: Vec<Vec<Matcher>> = vec![Vec::new(); index.fields().len()];
    for condition in &query.conditions {
        let pos = index.field_position(&condition.field).ok_or_else(|| {
            DbError::InvalidArgument(format!(
                "field {} is not part of index {}",
                condition.field,
                index.name()
            ))
        })?;
        let matcher = match &condition.op {
            Operator::Eq(v) => Matcher::Eq(encode_value(v, &index, pos)?),
            Operator::Neq(v) => Matcher::Neq(encode_value(v, &index, pos)?),
            Operator::In(values) => {
                let mut encoded = values
                    .iter()
                    .map(|v| encode_value(v, &index, pos))
                    .collect::<DbResult<Vec<_>>>()?;
                encoded.sort();
                encoded.dedup();
                Matcher::In(encoded)
            }
            Operator::Range { from, to } => Matcher::Range(encode_bound(from, &index, pos)?, encode_bound(to, &index, pos)?),
        };
        matchers[pos].push(matcher);
    }

    let mut segments: Vec<Vec<u8>> = vec![Vec::new()];
    let mut pos = 0;
    while pos < matchers.len() {
        let candidates = matchers[pos].iter().find_map(|m| match m {
            Matcher::Eq(v) => Some(vec![v.clone()]),
            Matcher::In(values) => Some(values.clone()),
            _ => None,
        });
        let candidates = match candidates {
            Some(c) => c,
            None => break,
        };
        segments = segments
            .iter()
            .flat_map(|segment| {
                candidates.iter().map(move |value| {
                    let mut next = segment.clone();
                    next.extend_from_slice(value);
                    next.push(SEPARATOR);
                    next
                })
            })
            .collect();
        pos += 1;
    }

    let range = matchers
        .get(pos)
        .and_then(|ms| {
            ms.iter().find_map(|m| match m {
                Matcher::Range(from, to) => Some((from.clone(), to.clone())),
                _ => None,
            })
        })
        .unwrap_or((Bound::Unbounded, Bound::Unbounded));

    Ok(CompiledQuery {
        index,
        matchers,
        segments,
        range,
    })
}

/// Iterator bounds `[lower, upper)` for keys under `base`.
fn key_bounds(base: &[u8], range: &(Bound<Vec<u8>>, Bound<Vec<u8>>)) -> (Vec<u8>, Vec<u8>) {
    let with = |v: &[u8], tail: Option<u8>| {
        let mut key = base.to_vec();
        key.extend_from_slice(v);
        key.extend(tail);
        key
    };
    let lower = match &range.0 {
        Bound::Included(v) => with(v, None),
        Bound::Excluded(v) => with(v, Some(SEPARATOR_PLUS)),
        Bound::Unbounded => base.to_vec(),
    };
    let upper = match &range.1 {
        Bound::Included(v) => with(v, Some(SEPARATOR_PLUS)),
        Bound::Excluded(v) => with(v, None),
        Bound::Unbounded => prefix_successor(base),
    };
    (lower, upper)
}

impl RocksdbHandler {
    /// Index entries matching `query`, ordered and paginated.
    pub fn scan(&self, model: &Model, query: &IndexQuery) -> DbResult<Vec<ScanHit>> {
        for topic in &query.topics {
            validate_topic(topic)?;
        }
        let compiled = compile(model, query)?;
        let window = query.window();
        let now = self.clock.now();
        let interval = if model.is_partitioned() {
            query.interval.map(|i| (i.from, i.to))
        } else {
            None
        };

        let mut hits = Vec::new();
        for partition in self.partitions.for_model(model, interval) {
            let cf = self.cf(partition.index_cf())?;
            for topic in &query.topics {
                let prefix = index_prefix(model, topic, &compiled.index);
                for segment in &compiled.segments {
                    let mut base = prefix.clone();
                    base.extend_from_slice(segment);
                    let (lower, upper) = key_bounds(&base, &compiled.range);
                    if lower >= upper {
                        continue;
                    }

                    let mut opts = ReadOptions::default();
                    opts.set_iterate_lower_bound(lower);
                    opts.set_iterate_upper_bound(upper);
                    let mode = match query.order {
                        Order::Asc => IteratorMode::Start,
                        Order::Desc => IteratorMode::End,
                    };

                    let mut seen: HashSet<ObjectId> = HashSet::new();
                    for item in self.db.iterator_cf_opt(&cf, opts, mode) {
                        if window.map(|w| seen.len() >= w).unwrap_or(false) {
                            break;
                        }
                        let (key, value) = item.map_err(|e| {
                            DbError::Storage(format!("scan of {} failed: {}", partition.index_cf(), e))
                        })?;
                        let parts = decode_index_key(&key, prefix.len(), &compiled.index)?;
                        let matched = parts
                            .fields
                            .iter()
                            .zip(&compiled.matchers)
                            .all(|(field, ms)| ms.iter().all(|m| m.matches(field)));
                        if !matched || is_expired(&value, now) {
                            continue;
                        }
                        let (object_id, partition_ts) = decode_index_value(&value)?;
                        if seen.contains(&object_id) {
                            continue;
                        }
                        if let Some((from, to)) = interval {
                            let date = DateTime::<Utc>::from_timestamp(partition_ts as i64, 0).map(|dt| dt.date_naive());
                            if !date.map(|d| from <= d && d <= to).unwrap_or(false) {
                                continue;
                            }
                        }
                        hits.push(ScanHit {
                            partition: partition.clone(),
                            topic: topic.clone(),
                            object_id,
                            sort_key: key[prefix.len()..].to_vec(),
                        });
                        seen.insert(object_id);
                    }
                }
            }
        }

        match query.order {
            Order::Asc => hits.sort_by(|a, b| a.sort_key.cmp(&b.sort_key)),
            Order::Desc => hits.sort_by(|a, b| b.sort_key.cmp(&a.sort_key)),
        }
        let mut distinct = HashSet::new();
        hits.retain(|hit| distinct.insert((hit.partition.range(), hit.topic.clone(), hit.object_id)));
        let limit = if query.limit == 0 { usize::MAX } else { query.limit };
        let hits: Vec<ScanHit> = hits.into_iter().skip(query.offset).take(limit).collect();
        trace!("Scan of {}.{} matched {} entries", model.name(), compiled.index.name(), hits.len());
        Ok(hits)
    }

    /// Number of matching entries after offset and limit, without reading objects.
    pub fn count(&self, model: &Model, query: &IndexQuery) -> DbResult<usize> {
        Ok(self.scan(model, query)?.len())
    }
}
