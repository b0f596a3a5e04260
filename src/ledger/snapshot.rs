//! Ledger and snapshot types.

use crate::records::{item_count, Record};
use crate::types::{NamespaceId, Version};
use sha2::{Digest, Sha256};

/// The live contents of one namespace.
#[derive(Clone, Debug, Default)]
pub struct Ledger {
    pub namespace: NamespaceId,
    pub version: Version,
    pub records: Vec<Record>,
}

impl Ledger {
    pub fn new(namespace: NamespaceId) -> Self {
        Self {
            namespace,
            version: Version(0),
            records: Vec::new(),
        }
    }

    pub fn item_count(&self) -> u64 {
        item_count(&self.records)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Deep copy of the current contents.
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            namespace: self.namespace.clone(),
            version: self.version,
            records: self.records.clone(),
        }
    }
}

/// Detached, read-only copy of a ledger at a version.
#[derive(Clone, Debug, PartialEq)]
pub struct LedgerSnapshot {
    pub namespace: NamespaceId,
    pub version: Version,
    pub records: Vec<Record>,
}

impl LedgerSnapshot {
    pub fn empty(namespace: NamespaceId) -> Self {
        Self {
            namespace,
            version: Version(0),
            records: Vec::new(),
        }
    }

    pub fn item_count(&self) -> u64 {
        item_count(&self.records)
    }

    /// Content digest (SHA-256, hex) over namespace, version and records.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.namespace.as_str().as_bytes());
        hasher.update(self.version.0.to_le_bytes());
        for record in &self.records {
            hash_record(&mut hasher, record);
        }
        hex::encode(hasher.finalize())
    }
}

fn hash_record(hasher: &mut Sha256, record: &Record) {
    hasher.update((record.identifier.len() as u64).to_le_bytes());
    hasher.update(record.identifier.as_bytes());
    hasher.update(record.condition.to_le_bytes());
    hasher.update(record.quality.to_le_bytes());
    hasher.update(record.stack_size().to_le_bytes());
    for unit in record.units() {
        hasher.update([unit.stolen as u8]);
        hasher.update((unit.origin.len() as u64).to_le_bytes());
        hasher.update(unit.origin.as_bytes());
        hasher.update(unit.slot_hint.to_le_bytes());
    }
    hasher.update((record.contained.len() as u64).to_le_bytes());
    for child in &record.contained {
        hash_record(hasher, child);
    }
}
