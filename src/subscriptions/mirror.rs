//! Read-only ledger follower.
//!
//! A mirror applies the event stream of one namespace. Every delta must
//! continue from the last applied version; a mismatch marks the mirror
//! stale, and it ignores deltas until a snapshot resynchronizes it.

use super::types::LedgerEvent;
use crate::error::{DepotError, Result};
use crate::ledger::LedgerSnapshot;
use crate::records::{item_count, merge_stacks, Record};
use crate::types::{NamespaceId, Version, CONDITION_EPSILON};
use tracing::{debug, warn};

#[derive(Clone, Debug)]
pub struct LedgerMirror {
    namespace: NamespaceId,
    version: Version,
    records: Vec<Record>,
    stale: bool,
}

impl LedgerMirror {
    /// Follower of a namespace that has not been written yet.
    pub fn new(namespace: NamespaceId) -> Self {
        Self {
            namespace,
            version: Version(0),
            records: Vec::new(),
            stale: false,
        }
    }

    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Self {
        Self {
            namespace: snapshot.namespace,
            version: snapshot.version,
            records: snapshot.records,
            stale: false,
        }
    }

    pub fn namespace(&self) -> &NamespaceId {
        &self.namespace
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn item_count(&self) -> u64 {
        item_count(&self.records)
    }

    /// Whether a gap was seen since the last snapshot.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Apply one event. Returns whether the mirror changed.
    ///
    /// Events for other namespaces and session events are ignored.
    pub fn apply(&mut self, event: &LedgerEvent) -> Result<bool> {
        match event {
            LedgerEvent::Snapshot {
                namespace,
                version,
                records,
            } if *namespace == self.namespace => {
                self.resync(*version, records.clone());
                Ok(true)
            }
            LedgerEvent::Delta {
                namespace,
                previous_version,
                version,
                added,
                removed,
            } if *namespace == self.namespace => {
                if self.stale || *previous_version != self.version {
                    self.stale = true;
                    debug!(namespace = %self.namespace, expected = self.version.0, got = previous_version.0, "mirror gap");
                    return Err(DepotError::VersionGap {
                        namespace: self.namespace.clone(),
                        expected: self.version,
                        got: *previous_version,
                    });
                }

                for record in removed {
                    if !remove_matching(&mut self.records, record) {
                        warn!(namespace = %self.namespace, identifier = %record.identifier, "mirror diverged from ledger");
                        self.stale = true;
                        return Err(DepotError::RecordNotFound(record.identifier.clone()));
                    }
                }
                if !added.is_empty() {
                    let mut combined = std::mem::take(&mut self.records);
                    combined.extend(added.iter().cloned());
                    self.records = merge_stacks(combined);
                }
                self.version = *version;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Replace the contents from a full snapshot and clear staleness.
    pub fn resync(&mut self, version: Version, records: Vec<Record>) {
        self.version = version;
        self.records = records;
        self.stale = false;
    }
}

/// Remove `target`'s units from records with the same identity.
fn remove_matching(records: &mut Vec<Record>, target: &Record) -> bool {
    if target.has_children() {
        return match records.iter().position(|r| r == target) {
            Some(i) => {
                records.remove(i);
                true
            }
            None => false,
        };
    }

    let same_identity = |r: &Record| {
        !r.has_children()
            && r.identifier == target.identifier
            && r.quality == target.quality
            && (r.condition - target.condition).abs() < CONDITION_EPSILON
    };
    let available: u64 = records
        .iter()
        .filter(|r| same_identity(r))
        .map(|r| r.stack_size() as u64)
        .sum();
    if available < target.stack_size() as u64 {
        return false;
    }

    let mut needed = target.stack_size();
    let mut i = 0;
    while needed > 0 && i < records.len() {
        if !same_identity(&records[i]) {
            i += 1;
            continue;
        }
        let stack = records[i].stack_size();
        if stack <= needed {
            records.remove(i);
            needed -= stack;
        } else {
            records[i].split_front(needed);
            needed = 0;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::total_stack;

    fn ns() -> NamespaceId {
        NamespaceId::new("vault")
    }

    fn delta(previous: u64, added: Vec<Record>, removed: Vec<Record>) -> LedgerEvent {
        LedgerEvent::Delta {
            namespace: ns(),
            previous_version: Version(previous),
            version: Version(previous + 1),
            added,
            removed,
        }
    }

    #[test]
    fn test_applies_contiguous_deltas() {
        let mut mirror = LedgerMirror::new(ns());
        mirror.apply(&delta(0, vec![Record::new("bar", 5)], vec![])).unwrap();
        mirror.apply(&delta(1, vec![Record::new("bar", 3)], vec![])).unwrap();
        assert_eq!(mirror.records().len(), 1);
        assert_eq!(mirror.item_count(), 8);

        mirror.apply(&delta(2, vec![], vec![Record::new("bar", 6)])).unwrap();
        assert_eq!(mirror.item_count(), 2);
        assert_eq!(mirror.version(), Version(3));
    }

    #[test]
    fn test_gap_marks_stale_until_snapshot() {
        let mut mirror = LedgerMirror::new(ns());
        mirror.apply(&delta(0, vec![Record::new("bar", 1)], vec![])).unwrap();

        let gap = mirror.apply(&delta(4, vec![Record::new("bar", 1)], vec![]));
        assert!(matches!(
            gap,
            Err(DepotError::VersionGap { expected: Version(1), got: Version(4), .. })
        ));
        assert!(mirror.is_stale());

        // Even a contiguous delta is refused while stale
        assert!(mirror.apply(&delta(1, vec![], vec![])).is_err());

        mirror
            .apply(&LedgerEvent::Snapshot {
                namespace: ns(),
                version: Version(5),
                records: vec![Record::new("bar", 7)],
            })
            .unwrap();
        assert!(!mirror.is_stale());
        assert_eq!(mirror.item_count(), 7);
        mirror.apply(&delta(5, vec![], vec![Record::new("bar", 2)])).unwrap();
        assert_eq!(total_stack(mirror.records()), 5);
    }

    #[test]
    fn test_other_namespaces_ignored() {
        let mut mirror = LedgerMirror::new(ns());
        let foreign = LedgerEvent::Delta {
            namespace: NamespaceId::new("garage"),
            previous_version: Version(9),
            version: Version(10),
            added: vec![Record::new("bar", 1)],
            removed: Vec::new(),
        };
        assert!(!mirror.apply(&foreign).unwrap());
        assert!(!mirror.apply(&LedgerEvent::CaughtUp).unwrap());
        assert_eq!(mirror.item_count(), 0);
    }

    #[test]
    fn test_composite_removed_whole() {
        let bag = Record::new("bag", 1).with_children(vec![Record::new("nail", 3)]);
        let mut mirror = LedgerMirror::from_snapshot(LedgerSnapshot {
            namespace: ns(),
            version: Version(2),
            records: vec![bag.clone(), Record::new("bar", 1)],
        });
        mirror.apply(&delta(2, vec![], vec![bag])).unwrap();
        assert_eq!(mirror.records().len(), 1);
        assert_eq!(mirror.records()[0].identifier, "bar");
    }

    #[test]
    fn test_unmatched_removal_marks_stale() {
        let mut mirror = LedgerMirror::new(ns());
        let result = mirror.apply(&delta(0, vec![], vec![Record::new("ghost", 1)]));
        assert!(matches!(result, Err(DepotError::RecordNotFound(_))));
        assert!(mirror.is_stale());
    }
}
