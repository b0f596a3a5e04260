//! Subscription types for live ledger updates.

use crate::ledger::{ChangeKind, LedgerChange};
use crate::records::Record;
use crate::types::{HolderId, NamespaceId, Version};

/// Configuration for a subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max buffered events before dropping subscriber.
    /// Default: 1000
    pub buffer_size: usize,

    /// Replay a snapshot of every matching namespace before going live.
    pub initial_snapshots: bool,

    /// Filter criteria.
    pub filter: SubscriptionFilter,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            initial_snapshots: true,
            filter: SubscriptionFilter::all(),
        }
    }
}

/// Filter criteria for subscriptions.
#[derive(Clone, Debug, Default)]
pub struct SubscriptionFilter {
    /// Namespaces of interest (None = all).
    pub namespaces: Option<Vec<NamespaceId>>,

    /// Include deltas and snapshots.
    pub include_ledger_changes: bool,

    /// Include session open/close events.
    pub include_session_events: bool,
}

impl SubscriptionFilter {
    /// Ledger changes for every namespace.
    pub fn ledgers() -> Self {
        Self {
            include_ledger_changes: true,
            ..Default::default()
        }
    }

    /// Ledger changes for specific namespaces.
    pub fn namespaces(namespaces: Vec<NamespaceId>) -> Self {
        Self {
            namespaces: Some(namespaces),
            include_ledger_changes: true,
            ..Default::default()
        }
    }

    /// Session lifecycle events.
    pub fn sessions() -> Self {
        Self {
            include_session_events: true,
            ..Default::default()
        }
    }

    /// Subscribe to everything.
    pub fn all() -> Self {
        Self {
            namespaces: None,
            include_ledger_changes: true,
            include_session_events: true,
        }
    }

    pub fn matches_namespace(&self, namespace: &NamespaceId) -> bool {
        self.namespaces
            .as_ref()
            .map_or(true, |wanted| wanted.contains(namespace))
    }
}

/// Events emitted by subscriptions.
#[derive(Clone, Debug, PartialEq)]
pub enum LedgerEvent {
    // --- Ledger Events ---
    /// Records entered and/or left a ledger.
    Delta {
        namespace: NamespaceId,
        previous_version: Version,
        version: Version,
        added: Vec<Record>,
        removed: Vec<Record>,
    },

    /// Full contents at a version. Followers resynchronize from it.
    Snapshot {
        namespace: NamespaceId,
        version: Version,
        records: Vec<Record>,
    },

    // --- Session Events ---
    SessionOpened {
        namespace: NamespaceId,
        holder: HolderId,
    },

    SessionClosed {
        namespace: NamespaceId,
        holder: HolderId,
        /// Closed by takeover, liveness or a round decision rather than its owner.
        forced: bool,
    },

    // --- Lifecycle Events ---
    /// Initial snapshots delivered, now streaming live.
    CaughtUp,

    /// Subscription was dropped.
    Dropped { reason: DropReason },
}

impl LedgerEvent {
    /// Namespace the event concerns, if any.
    pub fn namespace(&self) -> Option<&NamespaceId> {
        match self {
            LedgerEvent::Delta { namespace, .. }
            | LedgerEvent::Snapshot { namespace, .. }
            | LedgerEvent::SessionOpened { namespace, .. }
            | LedgerEvent::SessionClosed { namespace, .. } => Some(namespace),
            LedgerEvent::CaughtUp | LedgerEvent::Dropped { .. } => None,
        }
    }

    pub fn is_ledger_change(&self) -> bool {
        matches!(self, LedgerEvent::Delta { .. } | LedgerEvent::Snapshot { .. })
    }
}

impl From<LedgerChange> for LedgerEvent {
    fn from(change: LedgerChange) -> Self {
        match change.kind {
            ChangeKind::Delta { added, removed } => LedgerEvent::Delta {
                namespace: change.namespace,
                previous_version: change.previous_version,
                version: change.version,
                added,
                removed,
            },
            ChangeKind::Replaced { records } => LedgerEvent::Snapshot {
                namespace: change.namespace,
                version: change.version,
                records,
            },
        }
    }
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unsubscribed.
    Unsubscribed,
    /// The store was cleared.
    StoreCleared,
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle to manage a subscription.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<LedgerEvent>,
}

impl SubscriptionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<LedgerEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<LedgerEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<LedgerEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything currently buffered, without blocking.
    pub fn drain(&self) -> Vec<LedgerEvent> {
        self.receiver.try_iter().collect()
    }
}
