//! Subscription system for live ledger updates.
//!
//! This module provides in-process subscriptions to ledger events:
//! - Deltas for appends, takes, session drains and write-backs
//! - Snapshots for wholesale replacement (compaction, rebuild, rollback)
//! - Session open/close
//!
//! Subscriptions support:
//! - Filtering by namespace and event kind
//! - Initial snapshots before going live
//! - Bounded buffers with slow-subscriber dropping
//!
//! [`LedgerMirror`] turns a stream back into a read-only copy and reports
//! version gaps.
//!
//! # Example
//!
//! ```ignore
//! let handle = store.subscribe(SubscriptionFilter::namespaces(vec!["vault".into()]));
//! let mut mirror = LedgerMirror::new("vault".into());
//!
//! while let Ok(event) = handle.recv() {
//!     if let Err(DepotError::VersionGap { .. }) = mirror.apply(&event) {
//!         mirror = LedgerMirror::from_snapshot(store.snapshot("vault"));
//!     }
//! }
//! ```

mod manager;
mod mirror;
mod types;

pub use manager::SubscriptionManager;
pub use mirror::LedgerMirror;
pub use types::{
    DropReason, LedgerEvent, SubscriptionConfig, SubscriptionFilter, SubscriptionHandle,
    SubscriptionId,
};
