//! Subscription manager for broadcasting ledger events.

use crossbeam_channel::{bounded, Sender};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use super::types::{
    DropReason, LedgerEvent, SubscriptionConfig, SubscriptionHandle, SubscriptionId,
};

/// Internal subscription state.
struct Subscription {
    config: SubscriptionConfig,
    sender: Sender<LedgerEvent>,
    /// Whether catch-up is complete.
    caught_up: bool,
}

impl Subscription {
    /// Try to send an event. Returns false if buffer is full (subscriber will be dropped).
    fn try_send(&self, event: LedgerEvent) -> bool {
        self.sender.try_send(event).is_ok()
    }

    /// Check if this subscription wants a live event.
    fn wants(&self, event: &LedgerEvent) -> bool {
        let filter = &self.config.filter;
        let kind_wanted = if event.is_ledger_change() {
            filter.include_ledger_changes
        } else {
            filter.include_session_events
        };

        kind_wanted
            && event
                .namespace()
                .map_or(false, |namespace| filter.matches_namespace(namespace))
    }
}

/// Manages subscriptions and broadcasts events.
pub struct SubscriptionManager {
    /// Active subscriptions by ID.
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
}

impl SubscriptionManager {
    /// Create a new subscription manager.
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a new subscription.
    ///
    /// Returns a handle for receiving events. The subscription receives no
    /// live events until [`mark_caught_up`](Self::mark_caught_up).
    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(config.buffer_size.max(1));

        let subscription = Subscription {
            config,
            sender,
            caught_up: false,
        };

        self.subscriptions.write().insert(id, subscription);

        SubscriptionHandle { id, receiver }
    }

    /// Unsubscribe and clean up.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subs = self.subscriptions.write();
        if let Some(sub) = subs.remove(&id) {
            // Best effort
            let _ = sub.sender.try_send(LedgerEvent::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    /// Mark a subscription as caught up. Returns false if it was dropped
    /// because the notice did not fit its buffer.
    pub fn mark_caught_up(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscriptions.write();
        let Some(sub) = subs.get_mut(&id) else {
            return false;
        };
        sub.caught_up = true;
        if !sub.try_send(LedgerEvent::CaughtUp) {
            subs.remove(&id);
            return false;
        }
        true
    }

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    // --- Broadcasting ---

    /// Broadcast a live event to caught-up subscriptions that want it.
    pub fn publish(&self, event: LedgerEvent) {
        self.broadcast(|sub| sub.caught_up && sub.wants(&event), &event);
    }

    /// Internal broadcast helper. Drops subscribers that fail to receive.
    fn broadcast<F>(&self, filter: F, event: &LedgerEvent)
    where
        F: Fn(&Subscription) -> bool,
    {
        let mut to_remove = Vec::new();

        {
            let subs = self.subscriptions.read();
            for (id, sub) in subs.iter() {
                if filter(sub) && !sub.try_send(event.clone()) {
                    to_remove.push(*id);
                }
            }
        }

        if !to_remove.is_empty() {
            let mut subs = self.subscriptions.write();
            for id in to_remove {
                if let Some(sub) = subs.remove(&id) {
                    debug!(subscription = id.0, "dropping slow subscriber");
                    // Might not fit either
                    let _ = sub.sender.try_send(LedgerEvent::Dropped {
                        reason: DropReason::BufferOverflow,
                    });
                }
            }
        }
    }

    // --- Catch-up Helpers ---

    /// Send an event directly to a subscription (for catch-up).
    /// Returns false if the subscription is gone or its buffer is full.
    pub fn send_to(&self, id: SubscriptionId, event: LedgerEvent) -> bool {
        let subs = self.subscriptions.read();
        subs.get(&id).map_or(false, |sub| sub.try_send(event))
    }

    /// Drop every subscription with `reason`.
    pub fn drop_all(&self, reason: DropReason) {
        let mut subs = self.subscriptions.write();
        for (_, sub) in subs.drain() {
            let _ = sub.sender.try_send(LedgerEvent::Dropped {
                reason: reason.clone(),
            });
        }
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Record;
    use crate::subscriptions::SubscriptionFilter;
    use crate::types::{HolderId, NamespaceId, Version};
    use std::time::Duration;

    fn delta(ns: &str, previous: u64) -> LedgerEvent {
        LedgerEvent::Delta {
            namespace: NamespaceId::new(ns),
            previous_version: Version(previous),
            version: Version(previous + 1),
            added: vec![Record::new("bar", 1)],
            removed: Vec::new(),
        }
    }

    fn live(manager: &SubscriptionManager, filter: SubscriptionFilter) -> SubscriptionHandle {
        let handle = manager.subscribe(SubscriptionConfig {
            filter,
            ..Default::default()
        });
        assert!(manager.mark_caught_up(handle.id));
        // Drain the CaughtUp event
        assert_eq!(handle.try_recv().unwrap(), LedgerEvent::CaughtUp);
        handle
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let manager = SubscriptionManager::new();

        let handle = manager.subscribe(SubscriptionConfig::default());
        assert_eq!(manager.subscription_count(), 1);

        manager.unsubscribe(handle.id);
        assert_eq!(manager.subscription_count(), 0);
        assert_eq!(
            handle.try_recv().unwrap(),
            LedgerEvent::Dropped {
                reason: DropReason::Unsubscribed
            }
        );
    }

    #[test]
    fn test_broadcast_to_matching_namespace() {
        let manager = SubscriptionManager::new();
        let handle = live(&manager, SubscriptionFilter::namespaces(vec![NamespaceId::new("vault")]));

        manager.publish(delta("garage", 0));
        manager.publish(delta("vault", 0));

        let event = handle.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(event.namespace(), Some(&NamespaceId::new("vault")));
        assert!(handle.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_session_events_filtered_by_kind() {
        let manager = SubscriptionManager::new();
        let ledgers = live(&manager, SubscriptionFilter::ledgers());
        let sessions = live(&manager, SubscriptionFilter::sessions());

        manager.publish(LedgerEvent::SessionOpened {
            namespace: NamespaceId::new("vault"),
            holder: HolderId(1),
        });
        manager.publish(delta("vault", 0));

        assert!(matches!(ledgers.drain().as_slice(), [LedgerEvent::Delta { .. }]));
        assert!(matches!(
            sessions.drain().as_slice(),
            [LedgerEvent::SessionOpened { .. }]
        ));
    }

    #[test]
    fn test_drop_slow_subscriber() {
        let manager = SubscriptionManager::new();
        let handle = manager.subscribe(SubscriptionConfig {
            buffer_size: 2,
            ..Default::default()
        });
        manager.mark_caught_up(handle.id);

        for i in 0..10 {
            manager.publish(delta("vault", i));
        }

        assert_eq!(manager.subscription_count(), 0);
    }

    #[test]
    fn test_not_caught_up_doesnt_receive() {
        let manager = SubscriptionManager::new();
        let handle = manager.subscribe(SubscriptionConfig::default());

        manager.publish(delta("vault", 0));
        assert!(handle.recv_timeout(Duration::from_millis(50)).is_err());

        assert!(manager.send_to(handle.id, delta("vault", 0)));
        assert!(handle.try_recv().is_ok());
    }

    #[test]
    fn test_drop_all() {
        let manager = SubscriptionManager::new();
        let handle = live(&manager, SubscriptionFilter::all());
        manager.drop_all(DropReason::StoreCleared);

        assert_eq!(manager.subscription_count(), 0);
        assert_eq!(
            handle.try_recv().unwrap(),
            LedgerEvent::Dropped {
                reason: DropReason::StoreCleared
            }
        );
    }
}
