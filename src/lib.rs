//! # Depot
//!
//! A shared, lockable, versioned item ledger with exclusive paged sessions
//! and redundant snapshot persistence.
//!
//! ## Core Concepts
//!
//! - **Records**: Quantity-bearing stacks with per-unit metadata and nested children
//! - **Ledgers**: Versioned per-namespace record lists with policy-driven takes
//! - **Sessions**: One holder drains a namespace into a paged working set
//! - **Persistence**: Several holders keep copies; the best one wins on rebuild
//! - **Subscriptions**: Followers mirror ledgers from versioned deltas
//!
//! ## Example
//!
//! ```ignore
//! use depot::{HolderId, Record, Store, StoreConfig, TakePolicy};
//!
//! let store = Store::new(StoreConfig::default());
//! store.append("vault", &[Record::new("steel_bar", 40)]);
//!
//! // Take 12 bars, or nothing
//! let bars = store.take_items("vault", |r| r.identifier == "steel_bar", 12, TakePolicy::Fifo)?;
//!
//! // Browse the rest exclusively
//! let me = HolderId(7);
//! store.acquire("vault", me, false)?;
//! store.open_working_set("vault", me)?;
//! store.change_page("vault", me, 1)?;
//! store.close_session("vault", me)?;
//! ```

pub mod error;
pub mod ledger;
pub mod locks;
pub mod persistence;
pub mod records;
pub mod search;
pub mod session;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use error::{DepotError, Result};
pub use ledger::{ChangeKind, Ledger, LedgerChange, LedgerService, LedgerSnapshot, UnitSource};
pub use locks::{Acquired, LockManager, TakeoverStep};
pub use persistence::{
    decode_frame, decode_snapshot, encode_frame, encode_snapshot, select_canonical, Decision,
    DecisionOutcome, DecisionState, FileHolder, HolderKey, HolderRegistry, MemoryHolder,
    PersistedHolder, PersistenceCoordinator,
};
pub use records::{compact_snapshot, item_count, merge_stacks, total_stack, Record, UnitMeta};
pub use search::IdentifierIndex;
pub use session::{PageBudget, SessionCommand, SessionSettings};
pub use store::{ClosedSession, Store, StoreConfig, TickReport};
pub use subscriptions::{
    DropReason, LedgerEvent, LedgerMirror, SubscriptionConfig, SubscriptionFilter,
    SubscriptionHandle, SubscriptionId, SubscriptionManager,
};
pub use types::*;
