//! Exclusive session locks.
//!
//! One holder per namespace. Locks held by owners that are no longer
//! registered are reclaimed on the next acquisition; forced takeover needs a
//! confirming second request.

mod manager;

pub use manager::{Acquired, LockManager, TakeoverStep};
