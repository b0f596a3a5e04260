//! Main Store struct tying all components together.

use crate::error::{DepotError, Result};
use crate::ledger::{LedgerService, LedgerSnapshot, UnitSource};
use crate::locks::{Acquired, LockManager, TakeoverStep};
use crate::persistence::{
    select_canonical, Decision, DecisionOutcome, DecisionState, HolderKey, HolderRegistry,
    PersistedHolder, PersistenceCoordinator,
};
use crate::records::{compact_snapshot, item_count, Record};
use crate::search::{IdentifierIndex, DEFAULT_INDEX_CAPACITY};
use crate::session::{PageBudget, Session, SessionCommand, SessionSettings};
use crate::subscriptions::{
    DropReason, LedgerEvent, SubscriptionConfig, SubscriptionFilter, SubscriptionHandle,
    SubscriptionId, SubscriptionManager,
};
use crate::types::{
    Clock, Direction, HolderId, NamespaceId, SortMode, SystemClock, TakePolicy, Timestamp,
    Version,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Store configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Slots per page.
    pub page_slot_budget: u32,

    /// Top-level records per page.
    pub page_entry_budget: usize,

    /// Units one page slot holds.
    pub stack_per_slot: u32,

    /// Idle time after which a session closes itself.
    pub session_idle_timeout: Duration,

    /// Window in which a second takeover request confirms the first.
    pub takeover_confirm_window: Duration,

    /// Minimum age of a page load before the next page operation.
    pub page_load_interval: Duration,

    /// Window in which an identical repeated command is suppressed.
    pub command_debounce: Duration,

    /// Delay before retrying delivery to a holder that was not ready.
    pub holder_retry_interval: Duration,

    /// Lifetime of a session status message.
    pub status_message_ttl: Duration,

    /// Buffered events per subscriber before it is dropped.
    pub subscription_buffer: usize,

    /// Namespaces kept in the identifier count cache.
    pub search_cache_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            page_slot_budget: 48,
            page_entry_budget: 48,
            stack_per_slot: 63,
            session_idle_timeout: Duration::from_secs(600),
            takeover_confirm_window: Duration::from_secs(3),
            page_load_interval: Duration::from_millis(100),
            command_debounce: Duration::from_millis(250),
            holder_retry_interval: Duration::from_millis(500),
            status_message_ttl: Duration::from_secs(4),
            subscription_buffer: 1000,
            search_cache_size: DEFAULT_INDEX_CAPACITY,
        }
    }
}

impl StoreConfig {
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            budget: PageBudget {
                max_slots: self.page_slot_budget,
                max_entries: self.page_entry_budget,
                stack_per_slot: self.stack_per_slot,
            },
            page_load_interval: self.page_load_interval,
            idle_timeout: self.session_idle_timeout,
            command_debounce: self.command_debounce,
            status_ttl: self.status_message_ttl,
        }
    }
}

/// Result of closing a session.
#[derive(Clone, Debug, PartialEq)]
pub struct ClosedSession {
    pub namespace: NamespaceId,
    pub holder: HolderId,
    /// Items merged back into the ledger.
    pub written_back: u64,
    /// The compacted contents repackaged for display. `None` for forced
    /// closes, which only merge data back.
    pub presentation: Option<Vec<Record>>,
}

/// What one [`Store::tick`] did.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TickReport {
    pub commands_run: usize,
    pub closed: Vec<ClosedSession>,
    pub pushes_delivered: usize,
}

/// Mutable state guarded by the store mutex.
struct StoreState {
    ledgers: LedgerService,
    locks: LockManager,
    sessions: HashMap<NamespaceId, Session>,
    holders: HolderRegistry,
    coordinator: PersistenceCoordinator,
}

/// The shared item depot.
///
/// One instance per process, constructed at start and passed to every
/// collaborator. Provides a unified interface for:
/// - Ledger appends, counts and policy-driven takes
/// - Exclusive paged sessions over a namespace
/// - Round commit/rollback against redundant persisted holders
/// - Live event subscriptions
pub struct Store {
    /// Store configuration.
    config: StoreConfig,

    /// Time source for liveness, debounce and retries.
    clock: Arc<dyn Clock>,

    /// Ledgers, locks, sessions and persistence state.
    state: Mutex<StoreState>,

    /// Live event subscriptions.
    subscriptions: SubscriptionManager,

    /// Identifier count cache.
    index: IdentifierIndex,
}

fn ns(raw: impl AsRef<str>) -> NamespaceId {
    NamespaceId::new(raw)
}

impl Store {
    /// Create an empty store on the wall clock.
    pub fn new(config: StoreConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create an empty store on a caller-supplied clock.
    pub fn with_clock(config: StoreConfig, clock: Arc<dyn Clock>) -> Self {
        let state = StoreState {
            ledgers: LedgerService::new(),
            locks: LockManager::new(config.takeover_confirm_window),
            sessions: HashMap::new(),
            holders: HolderRegistry::new(),
            coordinator: PersistenceCoordinator::new(config.holder_retry_interval),
        };
        Self {
            index: IdentifierIndex::new(config.search_cache_size),
            config,
            clock,
            state: Mutex::new(state),
            subscriptions: SubscriptionManager::new(),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    // --- Ledger Operations ---

    /// Merge records into a namespace. Empty input is a no-op.
    pub fn append(&self, namespace: impl AsRef<str>, records: &[Record]) -> Option<Version> {
        let namespace = ns(namespace);
        let mut state = self.state.lock();
        let version = state.ledgers.append(&namespace, records);
        self.flush(&mut state);
        version
    }

    /// Recursive item count of a namespace's ledger.
    pub fn get_count(&self, namespace: impl AsRef<str>) -> u64 {
        self.state.lock().ledgers.get_count(&ns(namespace))
    }

    pub fn version(&self, namespace: impl AsRef<str>) -> Version {
        self.state.lock().ledgers.version(&ns(namespace))
    }

    /// Take one unit of the best-condition record with `identifier`.
    pub fn take_one_by_identifier(
        &self,
        namespace: impl AsRef<str>,
        identifier: &str,
    ) -> Option<Record> {
        let namespace = ns(namespace);
        let mut state = self.state.lock();
        let taken = state.ledgers.take_one_by_identifier(&namespace, identifier);
        self.flush(&mut state);
        taken
    }

    /// Take exactly `amount` matching units, or nothing.
    ///
    /// When the namespace has an open session, units the ledger lacks are
    /// taken from the session's working set, never from its current page.
    pub fn take_items(
        &self,
        namespace: impl AsRef<str>,
        filter: impl Fn(&Record) -> bool,
        amount: u64,
        policy: TakePolicy,
    ) -> Result<Vec<Record>> {
        let namespace = ns(namespace);
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let overflow = state
            .sessions
            .get_mut(&namespace)
            .map(|session| session as &mut dyn UnitSource);
        let result = state
            .ledgers
            .take_items(&namespace, &filter, amount, policy, overflow);

        self.flush(state);
        result
    }

    /// Deep copy of a namespace's ledger.
    pub fn snapshot(&self, namespace: impl AsRef<str>) -> LedgerSnapshot {
        self.state.lock().ledgers.snapshot(&ns(namespace))
    }

    /// Merge duplicate stacks of a ledger in place.
    pub fn compact(&self, namespace: impl AsRef<str>) -> Version {
        let namespace = ns(namespace);
        let mut state = self.state.lock();
        let version = state.ledgers.compact(&namespace);
        self.flush(&mut state);
        version
    }

    /// See [`crate::records::compact_snapshot`].
    pub fn compact_snapshot(records: &[Record]) -> Vec<Record> {
        compact_snapshot(records)
    }

    /// Units of `identifier` in a namespace's ledger, nested units included.
    pub fn count_identifier(&self, namespace: impl AsRef<str>, identifier: &str) -> u64 {
        let namespace = ns(namespace);
        let state = self.state.lock();
        let version = state.ledgers.version(&namespace);
        self.index.count(&namespace, version, identifier, || {
            state.ledgers.snapshot(&namespace)
        })
    }

    /// Namespaces with a ledger, sorted.
    pub fn namespaces(&self) -> Vec<NamespaceId> {
        self.state.lock().ledgers.namespaces()
    }

    // --- Owner Liveness ---

    pub fn register_owner(&self, holder: HolderId) {
        self.state.lock().locks.register_owner(holder);
    }

    /// Unregister an owner on teardown. Its session closes on the next tick
    /// and its locks become reclaimable.
    pub fn unregister_owner(&self, holder: HolderId) -> bool {
        self.state.lock().locks.unregister_owner(holder)
    }

    // --- Locks ---

    /// Acquire the session lock on a namespace.
    ///
    /// With `force`, a lock held by another live holder is taken over once a
    /// second forced request arrives inside the confirmation window; the
    /// previous holder's session is closed without presentation first.
    pub fn acquire(&self, namespace: impl AsRef<str>, holder: HolderId, force: bool) -> Result<Acquired> {
        let namespace = ns(namespace);
        let now = self.clock.now();
        let mut state = self.state.lock();

        let result = match state.locks.acquire(&namespace, holder) {
            Ok(Acquired::Reclaimed { previous }) => {
                self.close_inner(&mut state, &namespace, true);
                Ok(Acquired::Reclaimed { previous })
            }
            Err(DepotError::LockConflict { holder: current, .. }) if force => {
                match state.locks.request_takeover(&namespace, holder, now) {
                    Some(TakeoverStep::Confirmed { previous }) => {
                        self.close_inner(&mut state, &namespace, true);
                        state.locks.release(&namespace, previous);
                        state.locks.acquire(&namespace, holder)
                    }
                    Some(TakeoverStep::Pending) => Err(DepotError::TakeoverPending {
                        namespace: namespace.clone(),
                    }),
                    None => Err(DepotError::LockConflict {
                        namespace: namespace.clone(),
                        holder: current,
                    }),
                }
            }
            other => other,
        };

        self.flush(&mut state);
        result
    }

    /// Shorthand for a forced [`acquire`](Self::acquire).
    pub fn force_takeover(&self, namespace: impl AsRef<str>, holder: HolderId) -> Result<Acquired> {
        self.acquire(namespace, holder, true)
    }

    /// Release a lock held by `holder`, writing back its open session.
    pub fn release(&self, namespace: impl AsRef<str>, holder: HolderId) -> bool {
        let namespace = ns(namespace);
        let mut state = self.state.lock();

        if state.locks.holder_of(&namespace) != Some(holder) {
            return false;
        }
        self.close_inner(&mut state, &namespace, false);
        let released = state.locks.release(&namespace, holder);
        self.flush(&mut state);
        released
    }

    /// Hand a held lock, and its open session, to a new holder.
    pub fn transfer_lock(&self, namespace: impl AsRef<str>, from: HolderId, to: HolderId) -> bool {
        let namespace = ns(namespace);
        let now = self.clock.now();
        let mut state = self.state.lock();

        if !state.locks.transfer(&namespace, from, to) {
            return false;
        }
        if let Some(session) = state.sessions.get_mut(&namespace) {
            session.set_owner(to, now);
        }
        true
    }

    pub fn is_locked(&self, namespace: impl AsRef<str>) -> bool {
        self.state.lock().locks.is_locked(&ns(namespace))
    }

    pub fn holder_of(&self, namespace: impl AsRef<str>) -> Option<HolderId> {
        self.state.lock().locks.holder_of(&ns(namespace))
    }

    // --- Sessions ---

    /// Drain the namespace's ledger into a session owned by `holder`.
    ///
    /// The caller must hold the lock. Opening an already open session of the
    /// same holder is a no-op. Returns the working set's item count.
    pub fn open_working_set(&self, namespace: impl AsRef<str>, holder: HolderId) -> Result<u64> {
        let namespace = ns(namespace);
        let now = self.clock.now();
        let mut state = self.state.lock();

        Self::check_holder(&state, &namespace, holder)?;
        if let Some(session) = state.sessions.get(&namespace) {
            return Ok(session.item_count());
        }

        let records = state.ledgers.drain(&namespace);
        let session = Session::open(
            namespace.clone(),
            holder,
            records,
            self.config.session_settings(),
            now,
        );
        let items = session.item_count();
        state.sessions.insert(namespace.clone(), session);
        info!(namespace = %namespace, holder = %holder, items, "session opened");

        self.flush(&mut state);
        self.subscriptions.publish(LedgerEvent::SessionOpened { namespace, holder });
        Ok(items)
    }

    pub fn has_session(&self, namespace: impl AsRef<str>) -> bool {
        self.state.lock().sessions.contains_key(&ns(namespace))
    }

    pub fn capture_current_page(&self, namespace: impl AsRef<str>, holder: HolderId) -> Result<()> {
        self.session_op(namespace, holder, |session, now| session.capture_current_page(now))
    }

    pub fn change_page(&self, namespace: impl AsRef<str>, holder: HolderId, delta: isize) -> Result<usize> {
        self.session_op(namespace, holder, |session, now| session.change_page(delta, now))
    }

    pub fn jump_to_match(
        &self,
        namespace: impl AsRef<str>,
        holder: HolderId,
        direction: Direction,
        keyword: &str,
    ) -> Result<usize> {
        self.session_op(namespace, holder, |session, now| {
            session.jump_to_match(direction, keyword, now)
        })
    }

    pub fn resort(&self, namespace: impl AsRef<str>, holder: HolderId, sort: SortMode) -> Result<()> {
        self.session_op(namespace, holder, |session, now| session.resort(sort, now))
    }

    pub fn set_filter(&self, namespace: impl AsRef<str>, holder: HolderId, filter: &str) -> Result<()> {
        self.session_op(namespace, holder, |session, now| session.set_filter(filter, now))
    }

    /// Merge duplicate stacks across the session's working set.
    pub fn compact_session(&self, namespace: impl AsRef<str>, holder: HolderId) -> Result<()> {
        self.session_op(namespace, holder, |session, now| session.compact(now))
    }

    /// Edit the presentation window of the current page.
    pub fn edit_window<R>(
        &self,
        namespace: impl AsRef<str>,
        holder: HolderId,
        edit: impl FnOnce(&mut Vec<Record>) -> R,
    ) -> Result<R> {
        self.session_op(namespace, holder, |session, now| Ok(edit(session.window_mut(now))))
    }

    /// Copy of the presentation window, if a session is open.
    pub fn window(&self, namespace: impl AsRef<str>) -> Option<Vec<Record>> {
        let state = self.state.lock();
        state.sessions.get(&ns(namespace)).map(|s| s.window().to_vec())
    }

    /// Current page index and page count.
    pub fn page_position(&self, namespace: impl AsRef<str>) -> Option<(usize, usize)> {
        let state = self.state.lock();
        state
            .sessions
            .get(&ns(namespace))
            .map(|s| (s.current_page(), s.page_count()))
    }

    /// Items held by an open session, uncaptured window edits included.
    pub fn session_item_count(&self, namespace: impl AsRef<str>) -> Option<u64> {
        let state = self.state.lock();
        state.sessions.get(&ns(namespace)).map(Session::item_count)
    }

    /// The session's unexpired status message.
    pub fn session_status(&self, namespace: impl AsRef<str>) -> Option<String> {
        let now = self.clock.now();
        let state = self.state.lock();
        state
            .sessions
            .get(&ns(namespace))
            .and_then(|s| s.status(now).map(str::to_string))
    }

    /// Queue a command for the next tick. `Ok(false)` when debounced.
    pub fn submit_command(
        &self,
        namespace: impl AsRef<str>,
        holder: HolderId,
        command: SessionCommand,
    ) -> Result<bool> {
        let namespace = ns(namespace);
        let now = self.clock.now();
        let mut state = self.state.lock();
        Self::check_holder(&state, &namespace, holder)?;
        let session = state
            .sessions
            .get_mut(&namespace)
            .ok_or_else(|| DepotError::NoSession(namespace.clone()))?;
        Ok(session.submit(command, now))
    }

    /// Close the session, merge its compacted contents back and release the
    /// lock.
    pub fn close_session(&self, namespace: impl AsRef<str>, holder: HolderId) -> Result<ClosedSession> {
        let namespace = ns(namespace);
        let mut state = self.state.lock();

        Self::check_holder(&state, &namespace, holder)?;
        let closed = self
            .close_inner(&mut state, &namespace, false)
            .ok_or_else(|| DepotError::NoSession(namespace.clone()))?;
        self.flush(&mut state);
        Ok(closed)
    }

    fn check_holder(state: &StoreState, namespace: &NamespaceId, holder: HolderId) -> Result<()> {
        if state.locks.holder_of(namespace) != Some(holder) {
            return Err(DepotError::NotLockHolder {
                namespace: namespace.clone(),
                holder,
            });
        }
        Ok(())
    }

    /// Run an interactive operation; failures also become a status message.
    fn session_op<T>(
        &self,
        namespace: impl AsRef<str>,
        holder: HolderId,
        op: impl FnOnce(&mut Session, Timestamp) -> Result<T>,
    ) -> Result<T> {
        let namespace = ns(namespace);
        let now = self.clock.now();
        let mut state = self.state.lock();

        Self::check_holder(&state, &namespace, holder)?;
        let session = state
            .sessions
            .get_mut(&namespace)
            .ok_or_else(|| DepotError::NoSession(namespace.clone()))?;

        let result = op(session, now);
        if let Err(e) = &result {
            if !matches!(e, DepotError::RecordNotFound(_)) {
                session.set_status(e.to_string(), now);
            }
        }
        result
    }

    /// Remove and write back a session. The lock is released if its owner
    /// still holds it.
    fn close_inner(
        &self,
        state: &mut StoreState,
        namespace: &NamespaceId,
        forced: bool,
    ) -> Option<ClosedSession> {
        let session = state.sessions.remove(namespace)?;
        let holder = session.owner();
        let records = compact_snapshot(&session.finish());
        let written_back = item_count(&records);

        state.ledgers.append(namespace, &records);
        state.locks.release(namespace, holder);

        if forced {
            info!(namespace = %namespace, holder = %holder, written_back, "session force-closed");
        } else {
            info!(namespace = %namespace, holder = %holder, written_back, "session closed");
        }

        self.flush(state);
        self.subscriptions.publish(LedgerEvent::SessionClosed {
            namespace: namespace.clone(),
            holder,
            forced,
        });

        Some(ClosedSession {
            namespace: namespace.clone(),
            holder,
            written_back,
            presentation: if forced { None } else { Some(records) },
        })
    }

    fn close_all(&self, state: &mut StoreState) -> Vec<ClosedSession> {
        let mut open: Vec<NamespaceId> = state.sessions.keys().cloned().collect();
        open.sort();
        open.iter()
            .filter_map(|namespace| self.close_inner(state, namespace, true))
            .collect()
    }

    // --- Periodic Callback ---

    /// Run queued commands, close dead or idle sessions and retry holder
    /// deliveries.
    pub fn tick(&self) -> TickReport {
        let now = self.clock.now();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let mut report = TickReport::default();

        let mut open: Vec<NamespaceId> = state.sessions.keys().cloned().collect();
        open.sort();

        for namespace in open {
            let Some(session) = state.sessions.get_mut(&namespace) else {
                continue;
            };

            let owner = session.owner();
            if !state.locks.is_live(owner) || session.is_idle(now) {
                debug!(namespace = %namespace, holder = %owner, "session owner gone or idle");
                report
                    .closed
                    .extend(self.close_inner(state, &namespace, true));
                continue;
            }

            let pending = session.pending_commands();
            let command = session.pump(now);
            if session.pending_commands() < pending {
                report.commands_run += 1;
            }
            if command == Some(SessionCommand::Close) {
                report
                    .closed
                    .extend(self.close_inner(state, &namespace, false));
            }
        }

        report.pushes_delivered = state.coordinator.retry_pending(&state.holders, now);

        self.flush(state);
        report
    }

    // --- Persistence ---

    /// Register a durable-copy holder and hand it the current contents.
    pub fn register_holder(&self, holder: Arc<dyn PersistedHolder>) {
        let now = self.clock.now();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let namespace = holder.namespace().clone();
        state.holders.register(holder);
        if state.ledgers.get(&namespace).is_some() {
            let snapshot = state.ledgers.snapshot(&namespace);
            state
                .coordinator
                .push(&state.holders, &snapshot, false, now);
        }
    }

    pub fn unregister_holder(&self, key: &HolderKey) -> bool {
        self.state.lock().holders.unregister(key)
    }

    pub fn holder_count(&self) -> usize {
        self.state.lock().holders.len()
    }

    /// Deliveries waiting for a holder to become ready.
    pub fn pending_pushes(&self) -> usize {
        self.state.lock().coordinator.pending_pushes()
    }

    /// Rebuild from persisted copies and begin a round.
    pub fn init(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let rebuilt = self.rebuild(&mut state, now);
        state.coordinator.begin_round();
        self.flush(&mut state);
        info!(namespaces = rebuilt, "store initialized");
        rebuilt
    }

    /// Replace every ledger with its best persisted copy. Returns the number
    /// of namespaces rebuilt.
    pub fn rebuild_from_persisted(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let rebuilt = self.rebuild(&mut state, now);
        self.flush(&mut state);
        rebuilt
    }

    fn rebuild(&self, state: &mut StoreState, now: Timestamp) -> usize {
        let copies: Vec<LedgerSnapshot> = state
            .holders
            .iter()
            .filter_map(|holder| holder.read_persisted())
            .collect();
        let canonical = select_canonical(copies);

        for snapshot in canonical.values() {
            debug!(namespace = %snapshot.namespace, version = snapshot.version.0, items = snapshot.item_count(), "canonical copy selected");
            state.ledgers.replace(snapshot.clone());
            state
                .coordinator
                .push(&state.holders, snapshot, false, now);
        }
        canonical.len()
    }

    /// Reset the decision state for a new round.
    pub fn begin_round(&self) {
        self.state.lock().coordinator.begin_round();
    }

    pub fn decision(&self) -> Option<DecisionState> {
        self.state.lock().coordinator.decision().cloned()
    }

    /// Persist the round: close every session, persist every ledger and keep
    /// the result as the rollback baseline.
    pub fn commit_round(&self, source: &str) -> DecisionOutcome {
        let now = self.clock.now();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let outcome = state.coordinator.decide(Decision::Commit, source);
        if outcome.runs_side_effects() {
            self.close_all(state);
            self.flush(state);

            let snapshots: Vec<LedgerSnapshot> = state
                .ledgers
                .namespaces()
                .iter()
                .map(|namespace| state.ledgers.snapshot(namespace))
                .collect();
            for snapshot in &snapshots {
                state.coordinator.push(&state.holders, snapshot, true, now);
            }
            state.coordinator.set_baseline(snapshots);
            info!(source, namespaces = state.ledgers.namespaces().len(), "round committed");
        }
        outcome
    }

    /// Discard the round: close every session, rebuild from persisted
    /// copies, then restore the commit baseline over them.
    pub fn rollback_round(&self, reason: &str) -> DecisionOutcome {
        let now = self.clock.now();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let outcome = state.coordinator.decide(Decision::Rollback, reason);
        if outcome.runs_side_effects() {
            self.close_all(state);
            self.flush(state);

            let previous: BTreeSet<NamespaceId> = state.ledgers.namespaces().into_iter().collect();
            state.ledgers.clear();
            self.rebuild(state, now);

            let baseline: Vec<LedgerSnapshot> = state.coordinator.baseline().cloned().collect();
            for snapshot in baseline {
                state.coordinator.push(&state.holders, &snapshot, false, now);
                state.ledgers.replace(snapshot);
            }

            // Namespaces absent from every copy restart empty
            for namespace in previous {
                if state.ledgers.get(&namespace).is_none() {
                    state.ledgers.replace(LedgerSnapshot::empty(namespace));
                }
            }
            self.flush(state);
            info!(reason, "round rolled back");
        }
        outcome
    }

    /// Apply a decision by tag. Unknown tags count as a round-end
    /// observation until a decision has been applied.
    pub fn apply_decision(&self, tag: &str, source: &str) -> DecisionOutcome {
        match Decision::parse(tag) {
            Some(Decision::Commit) => self.commit_round(source),
            Some(Decision::Rollback) => self.rollback_round(source),
            None => self.state.lock().coordinator.decide_tag(tag, source),
        }
    }

    /// Diagnostic hook for a round that ended without a decision.
    pub fn on_round_end_observed(&self, source: &str) -> DecisionOutcome {
        self.state.lock().coordinator.observe_round_end(source)
    }

    /// Drop every ledger, session, lock, queued delivery and the commit
    /// baseline. Subscribers are dropped too.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.sessions.clear();
        state.locks.clear();
        state.ledgers.clear();
        state.ledgers.drain_changes();
        state.coordinator.clear();
        self.index.clear();
        self.subscriptions.drop_all(DropReason::StoreCleared);
        info!("store cleared");
    }

    // --- Subscriptions ---

    /// Subscribe with the configured buffer size. Matching namespaces are
    /// replayed as snapshots before live events start.
    pub fn subscribe(&self, filter: SubscriptionFilter) -> SubscriptionHandle {
        self.subscribe_with(SubscriptionConfig {
            buffer_size: self.config.subscription_buffer,
            initial_snapshots: true,
            filter,
        })
    }

    pub fn subscribe_with(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        let state = self.state.lock();
        let replay = config.initial_snapshots && config.filter.include_ledger_changes;
        let filter = config.filter.clone();
        let handle = self.subscriptions.subscribe(config);

        if replay {
            for namespace in state.ledgers.namespaces() {
                if !filter.matches_namespace(&namespace) {
                    continue;
                }
                let snapshot = state.ledgers.snapshot(&namespace);
                let event = LedgerEvent::Snapshot {
                    namespace,
                    version: snapshot.version,
                    records: snapshot.records,
                };
                if !self.subscriptions.send_to(handle.id, event) {
                    self.subscriptions.unsubscribe(handle.id);
                    return handle;
                }
            }
        }
        self.subscriptions.mark_caught_up(handle.id);
        handle
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscriptions.unsubscribe(id);
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.subscription_count()
    }

    // --- Private Helpers ---

    /// Publish journaled ledger changes and refresh holders of every
    /// touched namespace.
    fn flush(&self, state: &mut StoreState) {
        let changes = state.ledgers.drain_changes();
        if changes.is_empty() {
            return;
        }
        let now = self.clock.now();

        let mut touched = BTreeSet::new();
        for change in changes {
            touched.insert(change.namespace.clone());
            self.subscriptions.publish(LedgerEvent::from(change));
        }

        for namespace in touched {
            let snapshot = state.ledgers.snapshot(&namespace);
            state
                .coordinator
                .push(&state.holders, &snapshot, false, now);
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryHolder;
    use crate::records::total_stack;
    use crate::subscriptions::LedgerMirror;
    use crate::types::ManualClock;

    fn store() -> (Store, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Timestamp(0)));
        let store = Store::with_clock(StoreConfig::default(), clock.clone());
        (store, clock)
    }

    fn bar(stack: u32) -> Record {
        Record::new("bar", stack)
    }

    fn is_bar(r: &Record) -> bool {
        r.identifier == "bar"
    }

    #[test]
    fn test_append_merges_and_counts() {
        let (store, _) = store();
        store.append("Vault", &[bar(5), bar(3)]);
        assert_eq!(store.get_count("vault"), 8);
        assert_eq!(store.snapshot("VAULT").records.len(), 1);
        assert_eq!(store.append("vault", &[]), None);
        assert_eq!(store.version("vault"), Version(1));
    }

    #[test]
    fn test_take_delegates_to_session_outside_current_page() {
        let (store, clock) = store();
        let a = HolderId(1);
        store.append("vault", &[bar(5).with_quality(0), bar(5).with_quality(1)]);
        store.acquire("vault", a, false).unwrap();
        store.open_working_set("vault", a).unwrap();
        store.append("vault", &[bar(2).with_quality(5)]);

        // Page 0 shows both drained stacks, so only the ledger's 2 are reachable
        let err = store.take_items("vault", is_bar, 3, TakePolicy::Fifo).unwrap_err();
        assert!(matches!(err, DepotError::InsufficientQuantity { available: 2, .. }));
        assert_eq!(store.get_count("vault"), 2);

        clock.advance(Duration::from_secs(1));
        store.close_session("vault", a).unwrap();
        assert_eq!(store.get_count("vault"), 12);
    }

    #[test]
    fn test_acquire_conflict_and_forced_takeover() {
        let (store, clock) = store();
        let (a, b) = (HolderId(1), HolderId(2));
        store.append("vault", &[bar(4)]);
        store.acquire("vault", a, false).unwrap();
        store.open_working_set("vault", a).unwrap();
        assert_eq!(store.get_count("vault"), 0);

        assert!(matches!(
            store.acquire("vault", b, false),
            Err(DepotError::LockConflict { .. })
        ));
        assert!(matches!(
            store.acquire("vault", b, true),
            Err(DepotError::TakeoverPending { .. })
        ));
        clock.advance(Duration::from_secs(1));
        assert_eq!(store.acquire("vault", b, true).unwrap(), Acquired::Fresh);

        assert_eq!(store.holder_of("vault"), Some(b));
        assert!(!store.has_session("vault"));
        assert_eq!(store.get_count("vault"), 4);
    }

    #[test]
    fn test_stale_lock_reclaimed_with_write_back() {
        let (store, _) = store();
        let (a, b) = (HolderId(1), HolderId(2));
        store.append("vault", &[bar(4)]);
        store.acquire("vault", a, false).unwrap();
        store.open_working_set("vault", a).unwrap();
        store.unregister_owner(a);

        assert_eq!(
            store.acquire("vault", b, false).unwrap(),
            Acquired::Reclaimed { previous: a }
        );
        assert_eq!(store.holder_of("vault"), Some(b));
        assert_eq!(store.get_count("vault"), 4);
    }

    #[test]
    fn test_session_ops_require_holder() {
        let (store, _) = store();
        let (a, b) = (HolderId(1), HolderId(2));
        store.acquire("vault", a, false).unwrap();

        assert!(matches!(
            store.change_page("vault", a, 1),
            Err(DepotError::NoSession(_))
        ));
        assert!(matches!(
            store.open_working_set("vault", b),
            Err(DepotError::NotLockHolder { .. })
        ));
        store.open_working_set("vault", a).unwrap();
        assert!(matches!(
            store.close_session("vault", b),
            Err(DepotError::NotLockHolder { .. })
        ));
    }

    #[test]
    fn test_failed_page_op_reports_status() {
        let (store, _) = store();
        let a = HolderId(1);
        store.acquire("vault", a, false).unwrap();
        store.open_working_set("vault", a).unwrap();

        assert!(matches!(
            store.change_page("vault", a, 1),
            Err(DepotError::PageLoadInFlight)
        ));
        assert!(store.session_status("vault").unwrap().contains("settling"));
    }

    #[test]
    fn test_window_edit_written_back_on_close() {
        let (store, _) = store();
        let a = HolderId(1);
        store.append("vault", &[bar(3)]);
        store.acquire("vault", a, false).unwrap();
        store.open_working_set("vault", a).unwrap();

        let removed = store
            .edit_window("vault", a, |window| {
                window.push(Record::new("rod", 2));
                window.remove(0)
            })
            .unwrap();
        assert_eq!(removed.stack_size(), 3);
        assert_eq!(store.session_item_count("vault"), Some(2));

        let closed = store.close_session("vault", a).unwrap();
        assert_eq!(closed.written_back, 2);
        assert_eq!(total_stack(&closed.presentation.unwrap()), 2);
        assert!(!store.is_locked("vault"));
        assert_eq!(store.count_identifier("vault", "rod"), 2);
        assert_eq!(store.count_identifier("vault", "bar"), 0);
    }

    #[test]
    fn test_tick_runs_commands_and_closes_idle() {
        let (store, clock) = store();
        let a = HolderId(1);
        store.append("vault", &(0..60).map(|i| Record::new(format!("r{:02}", i), 1)).collect::<Vec<_>>());
        store.acquire("vault", a, false).unwrap();
        store.open_working_set("vault", a).unwrap();

        assert!(store.submit_command("vault", a, SessionCommand::ChangePage(1)).unwrap());
        assert!(!store.submit_command("vault", a, SessionCommand::ChangePage(1)).unwrap());

        clock.advance(Duration::from_millis(100));
        let report = store.tick();
        assert_eq!(report.commands_run, 1);
        assert_eq!(store.page_position("vault"), Some((1, 2)));

        clock.advance(Duration::from_secs(601));
        let report = store.tick();
        assert_eq!(report.closed.len(), 1);
        assert!(report.closed[0].presentation.is_none());
        assert_eq!(store.get_count("vault"), 60);
    }

    #[test]
    fn test_tick_closes_on_close_command() {
        let (store, clock) = store();
        let a = HolderId(1);
        store.append("vault", &[bar(1)]);
        store.acquire("vault", a, false).unwrap();
        store.open_working_set("vault", a).unwrap();
        store.submit_command("vault", a, SessionCommand::Close).unwrap();

        clock.advance(Duration::from_millis(100));
        let report = store.tick();
        assert_eq!(report.closed.len(), 1);
        assert!(report.closed[0].presentation.is_some());
        assert!(!store.is_locked("vault"));
    }

    #[test]
    fn test_transfer_moves_session() {
        let (store, _) = store();
        let (a, b) = (HolderId(1), HolderId(2));
        store.acquire("vault", a, false).unwrap();
        store.open_working_set("vault", a).unwrap();

        assert!(store.transfer_lock("vault", a, b));
        assert!(store.close_session("vault", a).is_err());
        assert!(store.close_session("vault", b).is_ok());
    }

    #[test]
    fn test_commit_then_rollback_restores_baseline() {
        let (store, _) = store();
        let holder = Arc::new(MemoryHolder::new("save", "vault"));
        store.register_holder(holder.clone());

        store.append("vault", &[bar(6)]);
        assert_eq!(store.commit_round("host"), DecisionOutcome::Applied);
        assert_eq!(holder.read_persisted().unwrap().item_count(), 6);

        store.begin_round();
        store.take_items("vault", is_bar, 6, TakePolicy::Fifo).unwrap();
        assert_eq!(store.get_count("vault"), 0);

        assert_eq!(store.rollback_round("quit"), DecisionOutcome::Applied);
        assert_eq!(store.get_count("vault"), 6);
        assert_eq!(store.decision().unwrap().to_string(), "rollback:quit");
        assert_eq!(store.commit_round("late"), DecisionOutcome::Ignored);
    }

    #[test]
    fn test_init_picks_best_copy() {
        let (store, _) = store();
        let stale = LedgerSnapshot {
            namespace: NamespaceId::new("vault"),
            version: Version(3),
            records: vec![bar(9)],
        };
        let fresh = LedgerSnapshot {
            namespace: NamespaceId::new("vault"),
            version: Version(5),
            records: vec![bar(2)],
        };
        let a = Arc::new(MemoryHolder::new("a", "vault").with_persisted(&stale).unwrap());
        let b = Arc::new(MemoryHolder::new("b", "vault").with_persisted(&fresh).unwrap());
        store.register_holder(a.clone());
        store.register_holder(b);

        assert_eq!(store.init(), 1);
        assert_eq!(store.get_count("vault"), 2);
        assert_eq!(store.version("vault"), Version(5));
        assert_eq!(a.cached(), Some(fresh));
    }

    #[test]
    fn test_subscriber_mirror_follows_store() {
        let (store, _) = store();
        store.append("vault", &[bar(3)]);
        let handle = store.subscribe(SubscriptionFilter::namespaces(vec![NamespaceId::new("vault")]));

        store.append("vault", &[bar(2)]);
        store.take_items("vault", is_bar, 4, TakePolicy::Fifo).unwrap();
        store.compact("vault");

        let mut mirror = LedgerMirror::new(NamespaceId::new("vault"));
        for event in handle.drain() {
            mirror.apply(&event).unwrap();
        }
        assert_eq!(mirror.version(), store.version("vault"));
        assert_eq!(mirror.item_count(), 1);
    }

    #[test]
    fn test_clear_drops_everything() {
        let (store, _) = store();
        let handle = store.subscribe(SubscriptionFilter::all());
        store.append("vault", &[bar(1)]);
        store.acquire("vault", HolderId(1), false).unwrap();
        store.commit_round("host");

        store.clear();
        assert!(store.namespaces().is_empty());
        assert!(!store.is_locked("vault"));
        assert!(store.decision().is_none());
        assert_eq!(store.subscription_count(), 0);
        assert!(handle
            .drain()
            .iter()
            .any(|e| matches!(e, LedgerEvent::Dropped { reason: DropReason::StoreCleared })));
    }
}
