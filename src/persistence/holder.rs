//! Durable-copy holders.
//!
//! A holder keeps one redundant copy of a namespace. It carries a cached
//! snapshot, refreshed after every structural mutation, and a persisted
//! snapshot, written only when asked to persist. Rebuilds read the persisted
//! side.

use super::codec::{decode_frame, decode_snapshot, encode_frame, encode_snapshot};
use crate::error::{DepotError, Result};
use crate::ledger::LedgerSnapshot;
use crate::types::NamespaceId;
use fs2::FileExt;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Stable registry key of a holder.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HolderKey(pub String);

impl HolderKey {
    pub fn new(key: impl Into<String>) -> Self {
        HolderKey(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for HolderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HolderKey({})", self.0)
    }
}

impl fmt::Display for HolderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A collaborator that keeps a durable copy of one namespace.
pub trait PersistedHolder: Send + Sync {
    fn key(&self) -> &HolderKey;

    fn namespace(&self) -> &NamespaceId;

    /// Whether the holder is constructed far enough to accept snapshots.
    fn is_ready(&self) -> bool {
        true
    }

    /// The last persisted copy, if there is one.
    fn read_persisted(&self) -> Option<LedgerSnapshot>;

    /// Refresh the cached copy, and persist it when `persist_now` is set.
    fn apply_snapshot(&self, snapshot: &LedgerSnapshot, persist_now: bool) -> Result<()>;
}

// --- In-memory holder ---

/// Holder that keeps its persisted copy as snapshot text, the way a
/// save-data field would.
pub struct MemoryHolder {
    key: HolderKey,
    namespace: NamespaceId,
    ready: AtomicBool,
    cached: Mutex<Option<LedgerSnapshot>>,
    persisted: Mutex<Option<String>>,
}

impl MemoryHolder {
    pub fn new(key: impl Into<String>, namespace: impl Into<NamespaceId>) -> Self {
        Self {
            key: HolderKey::new(key),
            namespace: namespace.into(),
            ready: AtomicBool::new(true),
            cached: Mutex::new(None),
            persisted: Mutex::new(None),
        }
    }

    /// Start from previously saved snapshot text.
    pub fn with_persisted_text(mut self, text: impl Into<String>) -> Self {
        self.persisted = Mutex::new(Some(text.into()));
        self
    }

    /// Start from a persisted snapshot.
    pub fn with_persisted(self, snapshot: &LedgerSnapshot) -> Result<Self> {
        let text = encode_snapshot(snapshot)?;
        Ok(self.with_persisted_text(text))
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn cached(&self) -> Option<LedgerSnapshot> {
        self.cached.lock().clone()
    }
}

impl fmt::Debug for MemoryHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryHolder")
            .field("key", &self.key)
            .field("namespace", &self.namespace)
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl PersistedHolder for MemoryHolder {
    fn key(&self) -> &HolderKey {
        &self.key
    }

    fn namespace(&self) -> &NamespaceId {
        &self.namespace
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn read_persisted(&self) -> Option<LedgerSnapshot> {
        self.persisted
            .lock()
            .as_deref()
            .map(|text| decode_snapshot(text, &self.namespace))
    }

    fn apply_snapshot(&self, snapshot: &LedgerSnapshot, persist_now: bool) -> Result<()> {
        if !self.is_ready() {
            return Err(DepotError::HolderNotReady(self.key.0.clone()));
        }
        if persist_now {
            *self.persisted.lock() = Some(encode_snapshot(snapshot)?);
        }
        *self.cached.lock() = Some(snapshot.clone());
        Ok(())
    }
}

// --- File-backed holder ---

/// Holder persisting binary frames into a directory it locks exclusively.
pub struct FileHolder {
    key: HolderKey,
    namespace: NamespaceId,
    path: PathBuf,
    cached: Mutex<Option<LedgerSnapshot>>,
    _lock_file: File,
}

impl FileHolder {
    const LOCK_FILE: &'static str = "LOCK";
    const SNAPSHOT_FILE: &'static str = "snapshot.dps";

    /// Open (creating if needed) a holder directory.
    ///
    /// Fails with [`DepotError::Locked`] if another holder has it open.
    pub fn open(
        path: impl AsRef<Path>,
        key: impl Into<String>,
        namespace: impl Into<NamespaceId>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;
        let lock_file = Self::acquire_lock(&path)?;

        let holder = Self {
            key: HolderKey::new(key),
            namespace: namespace.into(),
            path,
            cached: Mutex::new(None),
            _lock_file: lock_file,
        };
        debug!(holder = %holder.key, path = %holder.path.display(), "file holder opened");
        Ok(holder)
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.join(Self::LOCK_FILE))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| DepotError::Locked)?;
        Ok(lock_file)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.path.join(Self::SNAPSHOT_FILE)
    }

    pub fn cached(&self) -> Option<LedgerSnapshot> {
        self.cached.lock().clone()
    }

    fn write_frame(&self, snapshot: &LedgerSnapshot) -> Result<()> {
        let frame = encode_frame(snapshot)?;
        let tmp = self.path.join(format!("{}.tmp", Self::SNAPSHOT_FILE));

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(&frame)?;
        file.sync_all()?;
        fs::rename(&tmp, self.snapshot_path())?;
        Ok(())
    }
}

impl fmt::Debug for FileHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHolder")
            .field("key", &self.key)
            .field("namespace", &self.namespace)
            .field("path", &self.path)
            .finish()
    }
}

impl PersistedHolder for FileHolder {
    fn key(&self) -> &HolderKey {
        &self.key
    }

    fn namespace(&self) -> &NamespaceId {
        &self.namespace
    }

    fn read_persisted(&self) -> Option<LedgerSnapshot> {
        let bytes = match fs::read(self.snapshot_path()) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(holder = %self.key, error = %e, "unreadable snapshot file");
                return Some(LedgerSnapshot::empty(self.namespace.clone()));
            }
        };

        match decode_frame(&bytes, &self.namespace) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(holder = %self.key, error = %e, "undecodable snapshot file, starting empty");
                Some(LedgerSnapshot::empty(self.namespace.clone()))
            }
        }
    }

    fn apply_snapshot(&self, snapshot: &LedgerSnapshot, persist_now: bool) -> Result<()> {
        if persist_now {
            self.write_frame(snapshot)?;
        }
        *self.cached.lock() = Some(snapshot.clone());
        Ok(())
    }
}

// --- Registry ---

/// Explicit registry of live holders, keyed by stable key.
///
/// Holders are registered on construction and must be unregistered on
/// teardown.
#[derive(Default)]
pub struct HolderRegistry {
    holders: BTreeMap<HolderKey, Arc<dyn PersistedHolder>>,
}

impl HolderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a holder, returning the one it replaced under the same key.
    pub fn register(&mut self, holder: Arc<dyn PersistedHolder>) -> Option<Arc<dyn PersistedHolder>> {
        let key = holder.key().clone();
        debug!(holder = %key, namespace = %holder.namespace(), "holder registered");
        self.holders.insert(key, holder)
    }

    pub fn unregister(&mut self, key: &HolderKey) -> bool {
        let removed = self.holders.remove(key).is_some();
        if removed {
            debug!(holder = %key, "holder unregistered");
        }
        removed
    }

    pub fn get(&self, key: &HolderKey) -> Option<&Arc<dyn PersistedHolder>> {
        self.holders.get(key)
    }

    /// Holders of `namespace`, in key order.
    pub fn for_namespace<'a>(
        &'a self,
        namespace: &'a NamespaceId,
    ) -> impl Iterator<Item = &'a Arc<dyn PersistedHolder>> + 'a {
        self.holders
            .values()
            .filter(move |holder| holder.namespace() == namespace)
    }

    /// Every holder, in key order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn PersistedHolder>> {
        self.holders.values()
    }

    pub fn len(&self) -> usize {
        self.holders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }
}

impl fmt::Debug for HolderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.holders.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Record;
    use crate::types::Version;
    use tempfile::TempDir;

    fn snapshot(version: u64, stack: u32) -> LedgerSnapshot {
        LedgerSnapshot {
            namespace: NamespaceId::new("vault"),
            version: Version(version),
            records: vec![Record::new("bar", stack)],
        }
    }

    #[test]
    fn test_memory_holder_persists_only_when_asked() {
        let holder = MemoryHolder::new("crate-a", "vault");
        assert!(holder.read_persisted().is_none());

        holder.apply_snapshot(&snapshot(1, 3), false).unwrap();
        assert_eq!(holder.cached(), Some(snapshot(1, 3)));
        assert!(holder.read_persisted().is_none());

        holder.apply_snapshot(&snapshot(2, 5), true).unwrap();
        assert_eq!(holder.read_persisted(), Some(snapshot(2, 5)));
    }

    #[test]
    fn test_memory_holder_not_ready() {
        let holder = MemoryHolder::new("crate-a", "vault");
        holder.set_ready(false);
        assert!(matches!(
            holder.apply_snapshot(&snapshot(1, 1), true),
            Err(DepotError::HolderNotReady(_))
        ));
        assert!(holder.cached().is_none());
    }

    #[test]
    fn test_memory_holder_garbage_text_reads_empty() {
        let holder = MemoryHolder::new("crate-a", "vault").with_persisted_text("<<garbage>>");
        let read = holder.read_persisted().unwrap();
        assert_eq!(read, LedgerSnapshot::empty(NamespaceId::new("vault")));
    }

    #[test]
    fn test_file_holder_round_trip() {
        let dir = TempDir::new().unwrap();
        {
            let holder = FileHolder::open(dir.path(), "disk", "vault").unwrap();
            assert!(holder.read_persisted().is_none());
            holder.apply_snapshot(&snapshot(4, 9), true).unwrap();
            assert!(holder.snapshot_path().exists());
        }

        let reopened = FileHolder::open(dir.path(), "disk", "vault").unwrap();
        assert_eq!(reopened.read_persisted(), Some(snapshot(4, 9)));
    }

    #[test]
    fn test_file_holder_directory_lock() {
        let dir = TempDir::new().unwrap();
        let _first = FileHolder::open(dir.path(), "disk", "vault").unwrap();
        assert!(matches!(
            FileHolder::open(dir.path(), "disk-2", "vault"),
            Err(DepotError::Locked)
        ));
    }

    #[test]
    fn test_file_holder_corrupt_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        let holder = FileHolder::open(dir.path(), "disk", "vault").unwrap();
        fs::write(holder.snapshot_path(), b"DPS\0\x01garbage").unwrap();

        let read = holder.read_persisted().unwrap();
        assert!(read.records.is_empty());
        assert_eq!(read.version, Version(0));
    }

    #[test]
    fn test_registry_by_namespace() {
        let mut registry = HolderRegistry::new();
        registry.register(Arc::new(MemoryHolder::new("b", "vault")));
        registry.register(Arc::new(MemoryHolder::new("a", "vault")));
        registry.register(Arc::new(MemoryHolder::new("c", "garage")));

        let vault = NamespaceId::new("vault");
        let keys: Vec<&str> = registry
            .for_namespace(&vault)
            .map(|h| h.key().as_str())
            .collect();
        assert_eq!(keys, vec!["a", "b"]);

        assert!(registry.unregister(&HolderKey::new("a")));
        assert!(!registry.unregister(&HolderKey::new("a")));
        assert_eq!(registry.len(), 2);
    }
}
