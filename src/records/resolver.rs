//! Take-policy resolution and unit extraction.
//!
//! The same routines serve the ledger and an open session's working set. An
//! `eligible` filter lets the session hide the positions its owner is editing
//! live.

use super::record::Record;
use crate::types::{TakePolicy, CONDITION_EPSILON};
use std::cmp::Ordering;

/// Predicate selecting records an extraction may draw from.
pub type RecordFilter<'a> = &'a dyn Fn(&Record) -> bool;

/// Result of an extraction.
#[derive(Clone, Debug, Default)]
pub struct Extraction {
    /// Extracted records, in the order they were taken.
    pub taken: Vec<Record>,

    /// Units satisfied (composite records count as one).
    pub units: u64,

    /// Positions of records removed entirely, ascending, relative to the
    /// list as it was before extraction.
    pub removed: Vec<usize>,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.taken.is_empty()
    }
}

/// Compare two candidates under a policy. `Greater` means `a` is preferred.
fn preference(policy: TakePolicy, a: &Record, b: &Record) -> Ordering {
    let by_condition = |a: &Record, b: &Record| {
        let diff = a.condition - b.condition;
        if diff > CONDITION_EPSILON {
            Ordering::Greater
        } else if diff < -CONDITION_EPSILON {
            Ordering::Less
        } else {
            a.quality.cmp(&b.quality)
        }
    };

    match policy {
        TakePolicy::Fifo => Ordering::Equal,
        TakePolicy::HighestConditionFirst => by_condition(a, b),
        TakePolicy::LowestConditionFirst => by_condition(b, a),
    }
}

/// Index of the best eligible candidate under `policy`. Ties keep the
/// earliest position.
pub fn best_candidate(
    records: &[Record],
    policy: TakePolicy,
    filter: RecordFilter<'_>,
    eligible: &dyn Fn(usize) -> bool,
) -> Option<usize> {
    let mut best: Option<usize> = None;

    for (idx, record) in records.iter().enumerate() {
        if !eligible(idx) || !filter(record) {
            continue;
        }
        match best {
            None => {
                best = Some(idx);
                if policy == TakePolicy::Fifo {
                    break;
                }
            }
            Some(current) => {
                if preference(policy, record, &records[current]) == Ordering::Greater {
                    best = Some(idx);
                }
            }
        }
    }

    best
}

/// Units available to an extraction.
pub fn available_units(
    records: &[Record],
    filter: RecordFilter<'_>,
    eligible: &dyn Fn(usize) -> bool,
) -> u64 {
    records
        .iter()
        .enumerate()
        .filter(|(idx, record)| eligible(*idx) && filter(record))
        .map(|(_, record)| record.extractable_units())
        .sum()
}

/// Extract up to `amount` units, best candidate first.
///
/// Stops early when candidates run out; callers that need all-or-nothing use
/// [`take_exact`].
pub fn extract_units(
    records: &mut Vec<Record>,
    amount: u64,
    policy: TakePolicy,
    filter: RecordFilter<'_>,
    eligible: &dyn Fn(usize) -> bool,
) -> Extraction {
    let mut extraction = Extraction::default();
    let mut gone = vec![false; records.len()];

    while extraction.units < amount {
        let skip_gone = |idx: usize| !gone[idx] && eligible(idx);
        let Some(idx) = best_candidate(records, policy, filter, &skip_gone) else {
            break;
        };

        let need = amount - extraction.units;
        let record = &mut records[idx];

        if record.has_children() || record.stack_size() as u64 <= need {
            extraction.units += record.extractable_units();
            extraction.taken.push(record.clone());
            gone[idx] = true;
        } else {
            // need < stack_size, so the split cannot fail
            if let Some(front) = record.split_front(need as u32) {
                extraction.units += need;
                extraction.taken.push(front);
            } else {
                break;
            }
        }
    }

    for idx in (0..records.len()).rev() {
        if gone[idx] {
            records.remove(idx);
        }
    }
    extraction.removed = gone
        .iter()
        .enumerate()
        .filter_map(|(idx, g)| g.then_some(idx))
        .collect();

    extraction
}

/// Extract exactly `amount` units or nothing.
///
/// Returns `None`, leaving `records` untouched, when fewer units are
/// available.
pub fn take_exact(
    records: &mut Vec<Record>,
    amount: u64,
    policy: TakePolicy,
    filter: RecordFilter<'_>,
    eligible: &dyn Fn(usize) -> bool,
) -> Option<Extraction> {
    if available_units(records, filter, eligible) < amount {
        return None;
    }
    Some(extract_units(records, amount, policy, filter, eligible))
}

/// Accept every position.
pub fn any_position(_: usize) -> bool {
    true
}
