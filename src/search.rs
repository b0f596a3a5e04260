//! Identifier count cache.
//!
//! Counting an identifier walks the whole record tree, so per-namespace
//! tallies are cached and rebuilt from a snapshot only when the ledger
//! version has moved.

use crate::ledger::LedgerSnapshot;
use crate::records::Record;
use crate::types::{NamespaceId, Version};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroUsize;

/// Default number of namespaces kept.
pub const DEFAULT_INDEX_CAPACITY: usize = 64;

#[derive(Clone, Debug)]
struct Tally {
    version: Version,
    counts: HashMap<String, u64>,
}

impl Tally {
    fn build(snapshot: &LedgerSnapshot, version: Version) -> Self {
        let mut counts = HashMap::new();
        tally_records(&snapshot.records, 1, &mut counts);
        Self { version, counts }
    }
}

/// Nested units count once per enclosing unit.
fn tally_records(records: &[Record], multiplier: u64, counts: &mut HashMap<String, u64>) {
    for record in records {
        let units = multiplier * record.stack_size() as u64;
        *counts.entry(record.identifier.clone()).or_insert(0) += units;
        tally_records(&record.contained, units, counts);
    }
}

/// LRU cache of identifier tallies keyed by namespace.
pub struct IdentifierIndex {
    cache: Mutex<LruCache<NamespaceId, Tally>>,
}

impl IdentifierIndex {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Units of `identifier` in `namespace` at `version`.
    ///
    /// `snapshot` is only called when the cached tally is missing or older
    /// than `version`.
    pub fn count(
        &self,
        namespace: &NamespaceId,
        version: Version,
        identifier: &str,
        snapshot: impl FnOnce() -> LedgerSnapshot,
    ) -> u64 {
        let mut cache = self.cache.lock();
        let fresh = cache
            .get(namespace)
            .map_or(false, |tally| tally.version == version);
        if !fresh {
            cache.put(namespace.clone(), Tally::build(&snapshot(), version));
        }
        cache
            .peek(namespace)
            .and_then(|tally| tally.counts.get(identifier).copied())
            .unwrap_or(0)
    }

    /// Whether a tally for `namespace` at `version` is cached.
    pub fn is_cached(&self, namespace: &NamespaceId, version: Version) -> bool {
        self.cache
            .lock()
            .peek(namespace)
            .map_or(false, |tally| tally.version == version)
    }

    pub fn invalidate(&self, namespace: &NamespaceId) {
        self.cache.lock().pop(namespace);
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }
}

impl Default for IdentifierIndex {
    fn default() -> Self {
        Self::new(DEFAULT_INDEX_CAPACITY)
    }
}
