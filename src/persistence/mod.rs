//! Redundant snapshot persistence.
//!
//! - `codec`: JSON snapshot tree and checksummed binary frames
//! - `holder`: durable-copy holders and their registry
//! - `coordinator`: round decisions, canonical-copy selection, delivery

mod codec;
mod coordinator;
mod holder;

pub use codec::{
    decode_frame, decode_snapshot, encode_frame, encode_snapshot, FRAME_MAGIC, FRAME_VERSION,
};
pub use coordinator::{
    select_canonical, Decision, DecisionOutcome, DecisionState, PersistenceCoordinator,
};
pub use holder::{FileHolder, HolderKey, HolderRegistry, MemoryHolder, PersistedHolder};
