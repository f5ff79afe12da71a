//! RocksDB hooks: unique-key merge operator and TTL compaction filter
//!
//! The compaction filter also drops model-topic relations whose object count
//! reached zero (see `model_topics.rs`).
//!
//! Unique index entries are written with `merge` instead of `put`. The merge
//! operator accepts an operand only when the slot is empty or holds an
//! expired entry; otherwise the merge fails. The native callback cannot
//! return an error, so the conflict is recorded in a thread-local slot that
//! the write path reads right after it forces the merge with a locked read.

use std::cell::Cell;
use std::ffi::CStr;

use rocksdb::compaction_filter::{CompactionFilter, Decision};
use rocksdb::compaction_filter_factory::{CompactionFilterContext, CompactionFilterFactory};
use rocksdb::MergeOperands;

use super::model_topics::{is_relation_key, relation_count};
use super::ttl_mark::{is_expired, now_epoch, ExpiryClock};

pub const UNIQUE_MERGE_OPERATOR: &str = "SaveUniqueKey";

thread_local! {
    static DUPLICATE_KEY: Cell<bool> = const { Cell::new(false) };
}

pub fn reset_duplicate_flag() {
    DUPLICATE_KEY.with(|flag| flag.set(false));
}

/// Read and clear the conflict flag of the current thread.
pub fn take_duplicate_flag() -> bool {
    DUPLICATE_KEY.with(|flag| flag.replace(false))
}

/// Resolve `existing` followed by `operands` into a single live value.
pub fn save_unique_key(existing: Option<&[u8]>, operands: &mut dyn Iterator<Item = &[u8]>, now: u32) -> Option<Vec<u8>> {
    let mut current: Option<&[u8]> = existing;
    for operand in operands {
        if let Some(value) = current {
            if !is_expired(value, now) {
                DUPLICATE_KEY.with(|flag| flag.set(true));
                return None;
            }
        }
        current = Some(operand);
    }
    current.map(|v| v.to_vec())
}

/// Full merge callback bound to `clock`.
pub fn unique_full_merge(
    clock: ExpiryClock,
) -> impl Fn(&[u8], Option<&[u8]>, &MergeOperands) -> Option<Vec<u8>> + Send + Sync + Clone + 'static {
    move |_key, existing, operands| save_unique_key(existing, &mut operands.iter(), clock.now())
}

/// Operands are never combined without their base value.
pub fn unique_partial_merge(_key: &[u8], _existing: Option<&[u8]>, _operands: &MergeOperands) -> Option<Vec<u8>> {
    None
}

/// Drops values whose TTL mark lies in the past and empty relations.
pub struct TtlCompactionFilter {
    now: u32,
}

impl CompactionFilter for TtlCompactionFilter {
    fn filter(&mut self, _level: u32, key: &[u8], value: &[u8]) -> Decision {
        if is_expired(value, self.now) || (is_relation_key(key) && relation_count(value) == Some(0)) {
            Decision::Remove
        } else {
            Decision::Keep
        }
    }

    fn name(&self) -> &CStr {
        c"TtlCompactionFilter"
    }
}

/// Creates one filter per compaction, each with the time it started.
pub struct TtlCompactionFilterFactory;

impl CompactionFilterFactory for TtlCompactionFilterFactory {
    type Filter = TtlCompactionFilter;

    fn create(&mut self, _context: CompactionFilterContext) -> Self::Filter {
        TtlCompactionFilter { now: now_epoch() }
    }

    fn name(&self) -> &CStr {
        c"TtlCompactionFilterFactory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rocksdb::ttl_mark::fill_expire_at;

    fn value(expire_at: u32) -> Vec<u8> {
        let mut v = b"owner".to_vec();
        fill_expire_at(&mut v, expire_at);
        v
    }

    #[test]
    fn test_empty_slot_accepts_operand() {
        reset_duplicate_flag();
        let new = value(0);
        let merged = save_unique_key(None, &mut [new.as_slice()].into_iter(), 100);
        assert_eq!(merged, Some(new));
        assert!(!take_duplicate_flag());
    }

    #[test]
    fn test_live_slot_rejects_operand() {
        reset_duplicate_flag();
        let old = value(0);
        let new = value(0);
        assert_eq!(save_unique_key(Some(&old), &mut [new.as_slice()].into_iter(), 100), None);
        assert!(take_duplicate_flag());
        assert!(!take_duplicate_flag());
    }

    #[test]
    fn test_expired_slot_is_reclaimed() {
        reset_duplicate_flag();
        let old = value(50);
        let new = value(0);
        let merged = save_unique_key(Some(&old), &mut [new.as_slice()].into_iter(), 100);
        assert_eq!(merged, Some(new));
        assert!(!take_duplicate_flag());
    }

    #[test]
    fn test_two_operands_in_one_batch_conflict() {
        reset_duplicate_flag();
        let a = value(0);
        let b = value(0);
        assert_eq!(save_unique_key(None, &mut [a.as_slice(), b.as_slice()].into_iter(), 100), None);
        assert!(take_duplicate_flag());
    }

    #[test]
    fn test_compaction_filter_decisions() {
        let mut filter = TtlCompactionFilter { now: 100 };
        assert!(matches!(filter.filter(0, b"k", &value(50)), Decision::Remove));
        assert!(matches!(filter.filter(0, b"k", &value(150)), Decision::Keep));
        assert!(matches!(filter.filter(0, b"k", &value(0)), Decision::Keep));
    }

    #[test]
    fn test_compaction_filter_drops_empty_relations() {
        use crate::rocksdb::model_topics::relation_operand;

        let mut filter = TtlCompactionFilter { now: 100 };
        let relation_key = [0, 0, 0, 0, 0, 0, 0, 1, b't'];
        let empty = relation_operand(0, 0);
        let one = relation_operand(1, 0);
        assert!(matches!(filter.filter(0, &relation_key, &empty), Decision::Remove));
        assert!(matches!(filter.filter(0, &relation_key, &one), Decision::Keep));
        // object rows are never read as relations
        assert!(matches!(filter.filter(0, b"\x00\x00\x00\x01t", &empty), Decision::Keep));
    }
}
