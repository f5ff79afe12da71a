//! Date-range partitions
//!
//! Every partition owns two column families named after its range:
//! - `{range:08}_c`: object rows
//! - `{range:08}_i`: index entries
//!
//! Range `00000000` is the default partition used by models that are not
//! date-partitioned. Partitions are created on first use and are shared by
//! all models whose partition mode maps to the same range.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use parking_lot::RwLock;
use rd_core::{DateRange, Model, ObjectId};

use crate::error::{DbError, DbResult};

const COLLECTION_SUFFIX: &str = "_c";
const INDEX_SUFFIX: &str = "_i";

pub fn collection_cf_name(range: DateRange) -> String {
    format!("{}{}", range, COLLECTION_SUFFIX)
}

pub fn index_cf_name(range: DateRange) -> String {
    format!("{}{}", range, INDEX_SUFFIX)
}

/// Which partition a column family belongs to, and whether it holds indexes.
pub fn parse_cf_name(name: &str) -> DbResult<(DateRange, bool)> {
    let (range, is_index) = if let Some(range) = name.strip_suffix(COLLECTION_SUFFIX) {
        (range, false)
    } else if let Some(range) = name.strip_suffix(INDEX_SUFFIX) {
        (range, true)
    } else {
        return Err(DbError::PartitionListFailed(format!("unexpected column family {}", name)));
    };
    let range = range
        .parse::<DateRange>()
        .map_err(|e| DbError::PartitionListFailed(format!("column family {}: {}", name, e)))?;
    Ok((range, is_index))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    range: DateRange,
    collection_cf: String,
    index_cf: String,
}

impl Partition {
    pub fn new(range: DateRange) -> Self {
        Self {
            range,
            collection_cf: collection_cf_name(range),
            index_cf: index_cf_name(range),
        }
    }

    pub fn range(&self) -> DateRange {
        self.range
    }

    pub fn collection_cf(&self) -> &str {
        &self.collection_cf
    }

    pub fn index_cf(&self) -> &str {
        &self.index_cf
    }

    pub fn is_default(&self) -> bool {
        self.range.is_null()
    }
}

/// Range of the partition holding an object of `model`.
///
/// Partitioned models take the range from `date` when given. Without a date
/// the range can only come from the object id, which requires the model to
/// be partitioned by `_id`.
pub fn object_range(model: &Model, id: Option<&ObjectId>, date: Option<NaiveDate>) -> DbResult<DateRange> {
    let partition = match model.partition() {
        Some(p) => p,
        None => return Ok(DateRange::null()),
    };
    if let Some(date) = date {
        return DateRange::from_date(date, partition.mode).map_err(DbError::from);
    }
    let range = match id {
        Some(id) => model.id_range(id)?,
        None => None,
    };
    range.ok_or_else(|| {
        DbError::InvalidArgument(format!(
            "model {} is partitioned by {}, a date is required",
            model.name(),
            partition.field
        ))
    })
}

/// In-memory view of the partitions present in the database.
#[derive(Debug, Default)]
pub struct PartitionMap {
    partitions: RwLock<BTreeMap<DateRange, Arc<Partition>>>,
}

impl PartitionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, range: DateRange) -> Option<Arc<Partition>> {
        self.partitions.read().get(&range).cloned()
    }

    /// Register a partition, keeping the existing one if already present.
    pub fn insert(&self, range: DateRange) -> Arc<Partition> {
        self.partitions
            .write()
            .entry(range)
            .or_insert_with(|| Arc::new(Partition::new(range)))
            .clone()
    }

    pub fn remove(&self, range: DateRange) -> Option<Arc<Partition>> {
        self.partitions.write().remove(&range)
    }

    /// All partitions, oldest range first, default partition included.
    pub fn list(&self) -> Vec<Arc<Partition>> {
        self.partitions.read().values().cloned().collect()
    }

    /// Date partitions of `model` that may hold objects dated in `[from, to]`.
    pub fn for_model(&self, model: &Model, interval: Option<(NaiveDate, NaiveDate)>) -> Vec<Arc<Partition>> {
        let mode = match model.partition() {
            Some(p) => p.mode,
            None => return self.get(DateRange::null()).into_iter().collect(),
        };
        self.partitions
            .read()
            .values()
            .filter(|p| !p.is_default() && p.range.mode() == mode)
            .filter(|p| match interval {
                Some((from, to)) => p.range.intersects(from, to),
                None => true,
            })
            .cloned()
            .collect()
    }
}
