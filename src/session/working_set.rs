//! Open-session working state.

use super::commands::{CommandQueue, SessionCommand};
use super::paginator::{PageBudget, Paginator};
use crate::error::{DepotError, Result};
use crate::ledger::UnitSource;
use crate::records::{item_count, Record, RecordFilter};
use crate::types::{Direction, HolderId, NamespaceId, SortMode, TakePolicy, Timestamp};
use std::time::Duration;
use tracing::debug;

/// Timing and capacity knobs for sessions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionSettings {
    pub budget: PageBudget,
    /// Minimum age of the last page load before another may start.
    pub page_load_interval: Duration,
    /// Idle time after which the session closes itself.
    pub idle_timeout: Duration,
    pub command_debounce: Duration,
    pub status_ttl: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            budget: PageBudget::default(),
            page_load_interval: Duration::from_millis(100),
            idle_timeout: Duration::from_secs(600),
            command_debounce: Duration::from_millis(250),
            status_ttl: Duration::from_secs(4),
        }
    }
}

/// Transient message for the presentation layer.
#[derive(Clone, Debug, PartialEq)]
pub struct StatusMessage {
    pub text: String,
    pub expires_at: Timestamp,
}

/// Exclusive working state over one namespace's full contents.
///
/// The working set is detached from the ledger for the session's lifetime.
/// `window` is the materialized current page that the owner edits; the
/// paginator only learns about those edits on capture.
#[derive(Debug)]
pub struct Session {
    namespace: NamespaceId,
    owner: HolderId,
    paginator: Paginator,
    window: Vec<Record>,
    last_page_load: Timestamp,
    last_activity: Timestamp,
    status: Option<StatusMessage>,
    commands: CommandQueue,
    settings: SessionSettings,
}

impl Session {
    /// Open over `records` and load the first page.
    pub fn open(
        namespace: NamespaceId,
        owner: HolderId,
        records: Vec<Record>,
        settings: SessionSettings,
        now: Timestamp,
    ) -> Self {
        let paginator = Paginator::new(records, settings.budget, SortMode::default());
        let mut session = Self {
            namespace,
            owner,
            paginator,
            window: Vec::new(),
            last_page_load: now,
            last_activity: now,
            status: None,
            commands: CommandQueue::new(settings.command_debounce),
            settings,
        };
        session.load_current_page(now);
        session
    }

    pub fn namespace(&self) -> &NamespaceId {
        &self.namespace
    }

    pub fn owner(&self) -> HolderId {
        self.owner
    }

    pub(crate) fn set_owner(&mut self, owner: HolderId, now: Timestamp) {
        self.owner = owner;
        self.last_activity = now;
    }

    pub fn paginator(&self) -> &Paginator {
        &self.paginator
    }

    pub fn current_page(&self) -> usize {
        self.paginator.current_index()
    }

    pub fn page_count(&self) -> usize {
        self.paginator.page_count()
    }

    /// Items in the working set, counting the window's uncaptured edits.
    pub fn item_count(&self) -> u64 {
        let shown: u64 = self
            .paginator
            .protected()
            .iter()
            .map(|&i| self.paginator.source()[i].item_count())
            .sum();
        item_count(self.paginator.source()) - shown + item_count(&self.window)
    }

    // --- Presentation window ---

    pub fn window(&self) -> &[Record] {
        &self.window
    }

    /// Mutable access for the owner's edits.
    pub fn window_mut(&mut self, now: Timestamp) -> &mut Vec<Record> {
        self.last_activity = now;
        &mut self.window
    }

    // --- Page operations ---

    fn ensure_settled(&self, now: Timestamp) -> Result<()> {
        if now.since(self.last_page_load) < self.settings.page_load_interval {
            return Err(DepotError::PageLoadInFlight);
        }
        Ok(())
    }

    fn capture(&mut self) {
        let captured = std::mem::take(&mut self.window);
        let current = self.paginator.current_index();
        self.paginator.replace_page(current, captured);
    }

    fn load_current_page(&mut self, now: Timestamp) {
        self.window = self.paginator.page_records(self.paginator.current_index());
        self.last_page_load = now;
        self.last_activity = now;
    }

    /// Write the window back into the working set and reload the page.
    pub fn capture_current_page(&mut self, now: Timestamp) -> Result<()> {
        self.ensure_settled(now)?;
        self.capture();
        self.load_current_page(now);
        Ok(())
    }

    pub fn change_page(&mut self, delta: isize, now: Timestamp) -> Result<usize> {
        self.ensure_settled(now)?;
        self.capture();
        let page = self.paginator.change_page(delta);
        self.load_current_page(now);
        Ok(page)
    }

    /// Jump to the next page holding a keyword hit.
    pub fn jump_to_match(
        &mut self,
        direction: Direction,
        keyword: &str,
        now: Timestamp,
    ) -> Result<usize> {
        self.ensure_settled(now)?;
        self.capture();
        let found = self.paginator.find_match(direction, keyword);
        if let Some(page) = found {
            self.paginator.set_current(page);
        }
        self.load_current_page(now);

        match found {
            Some(page) => Ok(page),
            None => {
                self.set_status(format!("No match for \"{}\"", keyword.trim()), now);
                Err(DepotError::RecordNotFound(keyword.to_string()))
            }
        }
    }

    pub fn resort(&mut self, sort: SortMode, now: Timestamp) -> Result<()> {
        self.ensure_settled(now)?;
        self.capture();
        self.paginator.resort(sort);
        self.load_current_page(now);
        Ok(())
    }

    pub fn set_filter(&mut self, filter: &str, now: Timestamp) -> Result<()> {
        self.ensure_settled(now)?;
        self.capture();
        self.paginator.set_filter(filter);
        self.load_current_page(now);
        Ok(())
    }

    /// Merge duplicate stacks across the working set.
    pub fn compact(&mut self, now: Timestamp) -> Result<()> {
        self.ensure_settled(now)?;
        self.capture();
        self.paginator.compact();
        self.load_current_page(now);
        Ok(())
    }

    // --- Commands ---

    /// Queue a command; `false` when debounced.
    pub fn submit(&mut self, command: SessionCommand, now: Timestamp) -> bool {
        self.last_activity = now;
        self.commands.submit(command, now)
    }

    pub fn pending_commands(&self) -> usize {
        self.commands.len()
    }

    /// Run at most one queued command once the last page load has settled.
    ///
    /// `Close` is handed back to the caller, which owns write-back.
    pub fn pump(&mut self, now: Timestamp) -> Option<SessionCommand> {
        if self.ensure_settled(now).is_err() {
            return None;
        }
        let command = self.commands.pop()?;
        debug!(namespace = %self.namespace, ?command, "running session command");

        let result = match &command {
            SessionCommand::CapturePage => self.capture_current_page(now),
            SessionCommand::ChangePage(delta) => self.change_page(*delta, now).map(|_| ()),
            SessionCommand::JumpToMatch { direction, keyword } => {
                self.jump_to_match(*direction, keyword, now).map(|_| ())
            }
            SessionCommand::Resort(sort) => self.resort(*sort, now),
            SessionCommand::Filter(text) => self.set_filter(text, now),
            SessionCommand::Compact => self.compact(now),
            SessionCommand::Close => return Some(command),
        };

        // A missed jump has already reported itself
        if let Err(e) = result {
            if !matches!(e, DepotError::RecordNotFound(_)) {
                self.set_status(e.to_string(), now);
            }
        }
        None
    }

    // --- Liveness and status ---

    pub fn is_idle(&self, now: Timestamp) -> bool {
        now.since(self.last_activity) > self.settings.idle_timeout
    }

    pub fn set_status(&mut self, text: impl Into<String>, now: Timestamp) {
        self.status = Some(StatusMessage {
            text: text.into(),
            expires_at: now.plus(self.settings.status_ttl),
        });
    }

    /// The status message, if it has not expired.
    pub fn status(&self, now: Timestamp) -> Option<&str> {
        self.status
            .as_ref()
            .filter(|s| now < s.expires_at)
            .map(|s| s.text.as_str())
    }

    /// Capture the window and give up the working set.
    pub(crate) fn finish(mut self) -> Vec<Record> {
        self.capture();
        self.paginator.into_source()
    }
}

impl UnitSource for Session {
    fn available_units(&self, filter: RecordFilter<'_>) -> u64 {
        self.paginator.available_unprotected(filter)
    }

    fn take_units(
        &mut self,
        amount: u64,
        policy: TakePolicy,
        filter: RecordFilter<'_>,
    ) -> Option<Vec<Record>> {
        self.paginator.take_unprotected(amount, policy, filter)
    }
}
