//! Namespace-keyed ledger service.

use super::snapshot::{Ledger, LedgerSnapshot};
use crate::error::{DepotError, Result};
use crate::records::{
    any_position, available_units, extract_units, merge_stacks, Record, RecordFilter,
};
use crate::types::{NamespaceId, TakePolicy, Version};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Something an extraction can fall back to once the ledger runs dry.
///
/// An open session implements this over its working set, hiding the
/// positions its owner is editing.
pub trait UnitSource {
    /// Units this source could supply for `filter`.
    fn available_units(&self, filter: RecordFilter<'_>) -> u64;

    /// Take exactly `amount` units, or nothing.
    fn take_units(
        &mut self,
        amount: u64,
        policy: TakePolicy,
        filter: RecordFilter<'_>,
    ) -> Option<Vec<Record>>;
}

/// What a structural mutation did.
#[derive(Clone, Debug, PartialEq)]
pub enum ChangeKind {
    /// Records entered and/or left the ledger.
    Delta {
        added: Vec<Record>,
        removed: Vec<Record>,
    },
    /// The contents were rewritten wholesale.
    Replaced { records: Vec<Record> },
}

/// Journal entry for one structural mutation.
#[derive(Clone, Debug, PartialEq)]
pub struct LedgerChange {
    pub namespace: NamespaceId,
    pub previous_version: Version,
    pub version: Version,
    pub kind: ChangeKind,
}

/// Owns every namespace's ledger.
///
/// Mutations are journaled; the owner drains the journal after each call to
/// notify followers and persisted holders.
#[derive(Debug, Default)]
pub struct LedgerService {
    ledgers: HashMap<NamespaceId, Ledger>,
    journal: Vec<LedgerChange>,
}

impl LedgerService {
    pub fn new() -> Self {
        Self::default()
    }

    fn ledger_mut(&mut self, namespace: &NamespaceId) -> &mut Ledger {
        self.ledgers
            .entry(namespace.clone())
            .or_insert_with(|| Ledger::new(namespace.clone()))
    }

    /// Bump the version and journal the change.
    fn record_change(&mut self, namespace: &NamespaceId, kind: ChangeKind) -> Version {
        let ledger = self.ledger_mut(namespace);
        let previous_version = ledger.version;
        ledger.version = previous_version.next();
        let version = ledger.version;
        self.journal.push(LedgerChange {
            namespace: namespace.clone(),
            previous_version,
            version,
            kind,
        });
        version
    }

    /// Merge records into the ledger. Empty input is a no-op.
    pub fn append(&mut self, namespace: &NamespaceId, records: &[Record]) -> Option<Version> {
        if records.is_empty() {
            return None;
        }
        let ledger = self.ledger_mut(namespace);
        let mut combined = std::mem::take(&mut ledger.records);
        combined.extend(records.iter().cloned());
        ledger.records = merge_stacks(combined);

        let version = self.record_change(
            namespace,
            ChangeKind::Delta {
                added: records.to_vec(),
                removed: Vec::new(),
            },
        );
        debug!(namespace = %namespace, version = version.0, appended = records.len(), "ledger append");
        Some(version)
    }

    /// Recursive item count. Creates an empty ledger when absent.
    pub fn get_count(&mut self, namespace: &NamespaceId) -> u64 {
        self.ledger_mut(namespace).item_count()
    }

    pub fn version(&self, namespace: &NamespaceId) -> Version {
        self.ledgers
            .get(namespace)
            .map(|l| l.version)
            .unwrap_or_default()
    }

    pub fn get(&self, namespace: &NamespaceId) -> Option<&Ledger> {
        self.ledgers.get(namespace)
    }

    /// Take one unit of the best-condition record with this identifier.
    pub fn take_one_by_identifier(
        &mut self,
        namespace: &NamespaceId,
        identifier: &str,
    ) -> Option<Record> {
        let filter = |r: &Record| r.identifier == identifier;
        let ledger = self.ledger_mut(namespace);
        let extraction = extract_units(
            &mut ledger.records,
            1,
            TakePolicy::HighestConditionFirst,
            &filter,
            &any_position,
        );
        let taken = extraction.taken.into_iter().next()?;

        self.record_change(
            namespace,
            ChangeKind::Delta {
                added: Vec::new(),
                removed: vec![taken.clone()],
            },
        );
        Some(taken)
    }

    /// Take exactly `amount` matching units, or nothing.
    ///
    /// The ledger supplies what it can; any remainder comes from `overflow`
    /// (an open session). If the remainder cannot be supplied, the ledger's
    /// partial take is merged back and the call fails.
    pub fn take_items(
        &mut self,
        namespace: &NamespaceId,
        filter: RecordFilter<'_>,
        amount: u64,
        policy: TakePolicy,
        mut overflow: Option<&mut dyn UnitSource>,
    ) -> Result<Vec<Record>> {
        if amount == 0 {
            return Ok(Vec::new());
        }

        let ledger = self.ledger_mut(namespace);
        let local = available_units(&ledger.records, filter, &any_position);
        let remote = overflow
            .as_deref()
            .map(|source| source.available_units(filter))
            .unwrap_or(0);

        if local + remote < amount {
            return Err(DepotError::InsufficientQuantity {
                namespace: namespace.clone(),
                requested: amount,
                available: local + remote,
            });
        }

        let extraction = extract_units(
            &mut ledger.records,
            amount.min(local),
            policy,
            filter,
            &any_position,
        );
        let local_taken = extraction.taken;
        let remainder = amount - extraction.units;
        let mut taken = local_taken.clone();

        if remainder > 0 {
            let supplied = overflow
                .as_deref_mut()
                .and_then(|source| source.take_units(remainder, policy, filter));
            match supplied {
                Some(records) => taken.extend(records),
                None => {
                    warn!(namespace = %namespace, remainder, "overflow source fell short; re-merging partial take");
                    let mut combined = std::mem::take(&mut ledger.records);
                    combined.extend(local_taken);
                    ledger.records = merge_stacks(combined);
                    return Err(DepotError::InsufficientQuantity {
                        namespace: namespace.clone(),
                        requested: amount,
                        available: local,
                    });
                }
            }
        }

        if !local_taken.is_empty() {
            self.record_change(
                namespace,
                ChangeKind::Delta {
                    added: Vec::new(),
                    removed: local_taken,
                },
            );
        }
        Ok(taken)
    }

    /// Remove every record, leaving the ledger empty.
    pub fn drain(&mut self, namespace: &NamespaceId) -> Vec<Record> {
        let records = std::mem::take(&mut self.ledger_mut(namespace).records);
        if !records.is_empty() {
            self.record_change(
                namespace,
                ChangeKind::Delta {
                    added: Vec::new(),
                    removed: records.clone(),
                },
            );
        }
        records
    }

    /// Merge duplicate stacks in place.
    pub fn compact(&mut self, namespace: &NamespaceId) -> Version {
        let ledger = self.ledger_mut(namespace);
        ledger.records = merge_stacks(std::mem::take(&mut ledger.records));
        let records = ledger.records.clone();
        self.record_change(namespace, ChangeKind::Replaced { records })
    }

    /// Replace a ledger wholesale, adopting the snapshot's version.
    pub fn replace(&mut self, snapshot: LedgerSnapshot) {
        let namespace = snapshot.namespace.clone();
        let ledger = self.ledger_mut(&namespace);
        let previous_version = ledger.version;
        ledger.version = snapshot.version;
        ledger.records = snapshot.records.clone();

        self.journal.push(LedgerChange {
            namespace,
            previous_version,
            version: snapshot.version,
            kind: ChangeKind::Replaced {
                records: snapshot.records,
            },
        });
    }

    /// Deep copy for external readers. Never creates a ledger.
    pub fn snapshot(&self, namespace: &NamespaceId) -> LedgerSnapshot {
        self.ledgers
            .get(namespace)
            .map(Ledger::snapshot)
            .unwrap_or_else(|| LedgerSnapshot::empty(namespace.clone()))
    }

    pub fn namespaces(&self) -> Vec<NamespaceId> {
        let mut namespaces: Vec<_> = self.ledgers.keys().cloned().collect();
        namespaces.sort();
        namespaces
    }

    /// Drop every ledger. The journal is kept so pending changes still flush.
    pub fn clear(&mut self) {
        self.ledgers.clear();
    }

    /// Hand over journaled changes, oldest first.
    pub fn drain_changes(&mut self) -> Vec<LedgerChange> {
        std::mem::take(&mut self.journal)
    }
}
