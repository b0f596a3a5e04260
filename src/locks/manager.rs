//! Per-namespace exclusive lock table.

use crate::error::{DepotError, Result};
use crate::types::{HolderId, NamespaceId, Timestamp};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info};

/// How an acquisition succeeded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquired {
    /// The namespace was unlocked.
    Fresh,
    /// The caller already held it.
    AlreadyHeld,
    /// The previous holder no longer resolves to a live owner.
    Reclaimed { previous: HolderId },
}

/// Outcome of a forced-takeover request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TakeoverStep {
    /// First request; a second one inside the window confirms.
    Pending,
    /// Confirmed; the caller must close `previous`'s session, then acquire.
    Confirmed { previous: HolderId },
}

#[derive(Clone, Copy, Debug)]
struct PendingTakeover {
    requester: HolderId,
    requested_at: Timestamp,
}

/// Lock table plus the registry of live owners.
///
/// Owners are registered explicitly (acquiring registers implicitly) and
/// must be unregistered on teardown; a lock whose holder is no longer
/// registered is reclaimed by the next acquirer. The manager never evicts on
/// its own.
#[derive(Debug)]
pub struct LockManager {
    locks: HashMap<NamespaceId, HolderId>,
    live: HashSet<HolderId>,
    takeovers: HashMap<NamespaceId, PendingTakeover>,
    confirm_window: Duration,
}

impl LockManager {
    pub fn new(confirm_window: Duration) -> Self {
        Self {
            locks: HashMap::new(),
            live: HashSet::new(),
            takeovers: HashMap::new(),
            confirm_window,
        }
    }

    // --- Owner registry ---

    pub fn register_owner(&mut self, holder: HolderId) {
        self.live.insert(holder);
    }

    /// Returns whether the owner was registered.
    pub fn unregister_owner(&mut self, holder: HolderId) -> bool {
        self.live.remove(&holder)
    }

    pub fn is_live(&self, holder: HolderId) -> bool {
        self.live.contains(&holder)
    }

    // --- Lock table ---

    /// Take the lock on `namespace` for `holder`.
    pub fn acquire(&mut self, namespace: &NamespaceId, holder: HolderId) -> Result<Acquired> {
        let outcome = match self.locks.get(namespace).copied() {
            None => Acquired::Fresh,
            Some(current) if current == holder => Acquired::AlreadyHeld,
            Some(current) if !self.is_live(current) => Acquired::Reclaimed { previous: current },
            Some(current) => {
                return Err(DepotError::LockConflict {
                    namespace: namespace.clone(),
                    holder: current,
                })
            }
        };

        self.live.insert(holder);
        self.locks.insert(namespace.clone(), holder);
        self.takeovers.remove(namespace);

        match outcome {
            Acquired::Reclaimed { previous } => {
                info!(namespace = %namespace, holder = %holder, previous = %previous, "reclaimed stale lock")
            }
            _ => debug!(namespace = %namespace, holder = %holder, "lock acquired"),
        }
        Ok(outcome)
    }

    /// Release the lock if `holder` holds it.
    pub fn release(&mut self, namespace: &NamespaceId, holder: HolderId) -> bool {
        if self.locks.get(namespace) != Some(&holder) {
            return false;
        }
        self.locks.remove(namespace);
        self.takeovers.remove(namespace);
        debug!(namespace = %namespace, holder = %holder, "lock released");
        true
    }

    /// Swap the holder atomically. `to` becomes a live owner.
    pub fn transfer(&mut self, namespace: &NamespaceId, from: HolderId, to: HolderId) -> bool {
        if self.locks.get(namespace) != Some(&from) {
            return false;
        }
        self.live.insert(to);
        self.locks.insert(namespace.clone(), to);
        info!(namespace = %namespace, from = %from, to = %to, "lock transferred");
        true
    }

    pub fn is_locked(&self, namespace: &NamespaceId) -> bool {
        self.locks.contains_key(namespace)
    }

    pub fn holder_of(&self, namespace: &NamespaceId) -> Option<HolderId> {
        self.locks.get(namespace).copied()
    }

    /// Register a forced-takeover request.
    ///
    /// A lone request only arms the takeover; the same requester must repeat
    /// it within the confirmation window. Returns `None` when there is nothing
    /// to take over (unlocked, or already held by the requester).
    pub fn request_takeover(
        &mut self,
        namespace: &NamespaceId,
        requester: HolderId,
        now: Timestamp,
    ) -> Option<TakeoverStep> {
        let current = self.holder_of(namespace)?;
        if current == requester {
            return None;
        }

        if let Some(pending) = self.takeovers.get(namespace) {
            if pending.requester == requester
                && now.since(pending.requested_at) <= self.confirm_window
            {
                self.takeovers.remove(namespace);
                info!(namespace = %namespace, requester = %requester, previous = %current, "takeover confirmed");
                return Some(TakeoverStep::Confirmed { previous: current });
            }
        }

        self.takeovers.insert(
            namespace.clone(),
            PendingTakeover {
                requester,
                requested_at: now,
            },
        );
        debug!(namespace = %namespace, requester = %requester, "takeover armed");
        Some(TakeoverStep::Pending)
    }

    /// Drop every lock and pending takeover. Registered owners stay registered.
    pub fn clear(&mut self) {
        self.locks.clear();
        self.takeovers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ns() -> NamespaceId {
        NamespaceId::new("vault")
    }

    fn manager() -> LockManager {
        LockManager::new(Duration::from_secs(3))
    }

    #[test]
    fn test_exclusive_until_release() {
        let mut locks = manager();
        let (a, b) = (HolderId(1), HolderId(2));

        assert_eq!(locks.acquire(&ns(), a).unwrap(), Acquired::Fresh);
        assert!(matches!(
            locks.acquire(&ns(), b),
            Err(DepotError::LockConflict { holder, .. }) if holder == a
        ));

        assert!(locks.release(&ns(), a));
        assert_eq!(locks.acquire(&ns(), b).unwrap(), Acquired::Fresh);
    }

    #[test]
    fn test_reacquire_by_holder() {
        let mut locks = manager();
        locks.acquire(&ns(), HolderId(1)).unwrap();
        assert_eq!(locks.acquire(&ns(), HolderId(1)).unwrap(), Acquired::AlreadyHeld);
    }

    #[test]
    fn test_release_by_non_holder_fails() {
        let mut locks = manager();
        locks.acquire(&ns(), HolderId(1)).unwrap();
        assert!(!locks.release(&ns(), HolderId(2)));
        assert!(locks.is_locked(&ns()));
        assert!(!locks.release(&NamespaceId::new("other"), HolderId(1)));
    }

    #[test]
    fn test_stale_lock_is_reclaimed() {
        let mut locks = manager();
        locks.acquire(&ns(), HolderId(1)).unwrap();
        locks.unregister_owner(HolderId(1));

        assert_eq!(
            locks.acquire(&ns(), HolderId(2)).unwrap(),
            Acquired::Reclaimed {
                previous: HolderId(1)
            }
        );
        assert_eq!(locks.holder_of(&ns()), Some(HolderId(2)));
    }

    #[test]
    fn test_transfer_swaps_holder() {
        let mut locks = manager();
        locks.acquire(&ns(), HolderId(1)).unwrap();

        assert!(!locks.transfer(&ns(), HolderId(9), HolderId(2)));
        assert!(locks.transfer(&ns(), HolderId(1), HolderId(2)));
        assert_eq!(locks.holder_of(&ns()), Some(HolderId(2)));
        assert!(locks.is_live(HolderId(2)));
        assert!(!locks.release(&ns(), HolderId(1)));
    }

    #[test]
    fn test_takeover_requires_confirmation_in_window() {
        let mut locks = manager();
        locks.acquire(&ns(), HolderId(1)).unwrap();
        let t0 = Timestamp(0);

        assert_eq!(
            locks.request_takeover(&ns(), HolderId(2), t0),
            Some(TakeoverStep::Pending)
        );
        assert_eq!(
            locks.request_takeover(&ns(), HolderId(2), t0.plus(Duration::from_secs(1))),
            Some(TakeoverStep::Confirmed {
                previous: HolderId(1)
            })
        );
    }

    #[test]
    fn test_takeover_confirmation_expires() {
        let mut locks = manager();
        locks.acquire(&ns(), HolderId(1)).unwrap();
        let t0 = Timestamp(0);

        locks.request_takeover(&ns(), HolderId(2), t0);
        assert_eq!(
            locks.request_takeover(&ns(), HolderId(2), t0.plus(Duration::from_secs(5))),
            Some(TakeoverStep::Pending)
        );
    }

    #[test]
    fn test_takeover_by_different_requester_rearms() {
        let mut locks = manager();
        locks.acquire(&ns(), HolderId(1)).unwrap();
        let t0 = Timestamp(0);

        locks.request_takeover(&ns(), HolderId(2), t0);
        assert_eq!(
            locks.request_takeover(&ns(), HolderId(3), t0),
            Some(TakeoverStep::Pending)
        );
        assert_eq!(locks.request_takeover(&ns(), HolderId(1), t0), None);
        assert_eq!(
            locks.request_takeover(&NamespaceId::new("free"), HolderId(2), t0),
            None
        );
    }
}
