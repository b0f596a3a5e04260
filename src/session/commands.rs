//! Per-session command channel.
//!
//! Presentation collaborators submit commands instead of poking a shared
//! action field. The queue suppresses a repeat of the last accepted command
//! inside the debounce window; a different command is always accepted.

use crate::types::{Direction, SortMode, Timestamp};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::time::Duration;

/// An interactive request against an open session.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionCommand {
    CapturePage,
    ChangePage(isize),
    JumpToMatch { direction: Direction, keyword: String },
    Resort(SortMode),
    Filter(String),
    Compact,
    Close,
}

/// Debounced FIFO of session commands.
#[derive(Debug)]
pub struct CommandQueue {
    sender: Sender<SessionCommand>,
    receiver: Receiver<SessionCommand>,
    last_accepted: Option<(SessionCommand, Timestamp)>,
    debounce: Duration,
}

impl CommandQueue {
    pub fn new(debounce: Duration) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            last_accepted: None,
            debounce,
        }
    }

    /// Queue a command. Returns `false` when it was debounced.
    pub fn submit(&mut self, command: SessionCommand, now: Timestamp) -> bool {
        if let Some((last, at)) = &self.last_accepted {
            if *last == command && now.since(*at) < self.debounce {
                return false;
            }
        }
        // The receiver lives as long as the queue, so send cannot fail.
        if self.sender.send(command.clone()).is_err() {
            return false;
        }
        self.last_accepted = Some((command, now));
        true
    }

    /// Next queued command, if any.
    pub fn pop(&self) -> Option<SessionCommand> {
        self.receiver.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}
