//! Exclusive paged sessions.
//!
//! A session drains a namespace into a private working set, shows it one
//! page at a time and writes everything back on close.

mod commands;
mod paginator;
mod working_set;

pub use commands::{CommandQueue, SessionCommand};
pub use paginator::{Page, PageBudget, Paginator};
pub use working_set::{Session, SessionSettings, StatusMessage};
