//! Namespace-scoped ledgers.
//!
//! Each namespace owns a versioned list of records. Every structural
//! mutation bumps the version and is journaled as a [`LedgerChange`], which
//! the store turns into follower events and persisted-holder refreshes.

mod service;
mod snapshot;

pub use service::{ChangeKind, LedgerChange, LedgerService, UnitSource};
pub use snapshot::{Ledger, LedgerSnapshot};
