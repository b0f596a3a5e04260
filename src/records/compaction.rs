//! Stack compaction.
//!
//! Mergeable records (pristine, childless) sharing `(identifier, quality)`
//! collapse into one stack whose per-unit lists are the concatenation of the
//! originals, each original's slice kept in order. Non-mergeable records pass
//! through untouched. Groups land at the position of their first member, so
//! list order stays stable for first-in-first-out extraction.

use super::record::Record;
use crate::types::MAX_STACK;
use std::collections::HashMap;

/// Merge duplicate stacks without any size cap.
///
/// The ledger keeps arbitrarily large logical stacks internally; only the
/// serialization boundary re-chunks them.
pub fn merge_stacks(records: Vec<Record>) -> Vec<Record> {
    let mut merged: Vec<Record> = Vec::with_capacity(records.len());
    let mut groups: HashMap<(String, i32), usize> = HashMap::new();

    for record in records {
        if !record.is_mergeable() {
            merged.push(record);
            continue;
        }

        let key = (record.identifier.clone(), record.quality);
        match groups.get(&key) {
            Some(&slot) => merged[slot].absorb(record),
            None => {
                groups.insert(key, merged.len());
                merged.push(record);
            }
        }
    }

    merged
}

/// Split every childless stack larger than `max` into chunks of at most `max`.
pub fn chunk_stacks(records: Vec<Record>, max: u32) -> Vec<Record> {
    let max = max.max(1);
    let mut out = Vec::with_capacity(records.len());

    for mut record in records {
        while record.stack_size() > max {
            match record.split_front(max) {
                Some(front) => out.push(front),
                None => break,
            }
        }
        out.push(record);
    }

    out
}

/// Merge duplicate stacks and re-chunk to [`MAX_STACK`].
///
/// Pure: the input is cloned. Compacting an already compacted list yields the
/// same list.
pub fn compact_snapshot(records: &[Record]) -> Vec<Record> {
    chunk_stacks(merge_stacks(records.to_vec()), MAX_STACK)
}
