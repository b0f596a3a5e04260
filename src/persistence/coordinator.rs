//! Round decisions, rebuild selection and holder pushes.
//!
//! The coordinator owns no ledgers. It decides whether a round decision
//! should run its side effects, picks the canonical copy per namespace during
//! a rebuild, and delivers snapshots to holders, queueing deliveries to
//! holders that are not ready yet.

use super::holder::{HolderKey, HolderRegistry, PersistedHolder};
use crate::error::DepotError;
use crate::ledger::LedgerSnapshot;
use crate::types::{NamespaceId, Timestamp};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Terminal outcome of a round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Decision {
    Commit,
    Rollback,
}

impl Decision {
    /// Parse a decision tag, case-insensitively.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "commit" => Some(Decision::Commit),
            "rollback" => Some(Decision::Rollback),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Commit => "commit",
            Decision::Rollback => "rollback",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The decision applied this round and who sent it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecisionState {
    pub decision: Decision,
    pub source: String,
}

impl fmt::Display for DecisionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.decision, self.source)
    }
}

/// What the caller should do with an incoming decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecisionOutcome {
    /// First decision of the round; run its side effects.
    Applied,
    /// Same decision again; source refreshed, nothing to run.
    Refreshed,
    /// Rollback after commit; run the rollback.
    Overridden,
    /// Commit after rollback, or an unknown tag after a decision.
    Ignored,
    /// Unknown tag before any decision; diagnostic only.
    Observed,
}

impl DecisionOutcome {
    pub fn runs_side_effects(self) -> bool {
        matches!(self, DecisionOutcome::Applied | DecisionOutcome::Overridden)
    }
}

#[derive(Clone, Debug)]
struct PendingPush {
    snapshot: LedgerSnapshot,
    persist_now: bool,
    retry_at: Timestamp,
}

/// Round state plus delivery bookkeeping.
#[derive(Debug)]
pub struct PersistenceCoordinator {
    decision: Option<DecisionState>,
    baseline: BTreeMap<NamespaceId, LedgerSnapshot>,
    pending: BTreeMap<HolderKey, PendingPush>,
    delivered: HashMap<HolderKey, String>,
    retry_interval: Duration,
}

impl PersistenceCoordinator {
    pub fn new(retry_interval: Duration) -> Self {
        Self {
            decision: None,
            baseline: BTreeMap::new(),
            pending: BTreeMap::new(),
            delivered: HashMap::new(),
            retry_interval,
        }
    }

    // --- Decision state machine ---

    /// Reset the decision for a new round. The commit baseline survives.
    pub fn begin_round(&mut self) {
        self.decision = None;
    }

    pub fn decision(&self) -> Option<&DecisionState> {
        self.decision.as_ref()
    }

    pub fn decision_applied(&self) -> bool {
        self.decision.is_some()
    }

    /// Apply the precedence rule to an incoming decision.
    pub fn decide(&mut self, decision: Decision, source: &str) -> DecisionOutcome {
        let outcome = match self.decision.as_ref().map(|d| d.decision) {
            None => DecisionOutcome::Applied,
            Some(current) if current == decision => DecisionOutcome::Refreshed,
            Some(Decision::Commit) => DecisionOutcome::Overridden,
            Some(Decision::Rollback) => DecisionOutcome::Ignored,
        };

        if outcome == DecisionOutcome::Ignored {
            info!(decision = %decision, source, "decision ignored after rollback");
        } else {
            self.decision = Some(DecisionState {
                decision,
                source: source.to_string(),
            });
            info!(decision = %decision, source, ?outcome, "round decision");
        }
        outcome
    }

    /// Like [`decide`](Self::decide), but from a raw tag.
    pub fn decide_tag(&mut self, tag: &str, source: &str) -> DecisionOutcome {
        match Decision::parse(tag) {
            Some(decision) => self.decide(decision, source),
            None if self.decision_applied() => {
                debug!(tag, source, "unknown decision tag ignored");
                DecisionOutcome::Ignored
            }
            None => self.observe_round_end(source),
        }
    }

    /// Diagnostic hook for a round that ended without a decision.
    pub fn observe_round_end(&mut self, source: &str) -> DecisionOutcome {
        if self.decision_applied() {
            return DecisionOutcome::Ignored;
        }
        info!(source, "round ended without a persistence decision");
        DecisionOutcome::Observed
    }

    // --- Commit baseline ---

    pub fn set_baseline(&mut self, snapshots: impl IntoIterator<Item = LedgerSnapshot>) {
        self.baseline = snapshots
            .into_iter()
            .map(|s| (s.namespace.clone(), s))
            .collect();
    }

    pub fn baseline(&self) -> impl Iterator<Item = &LedgerSnapshot> {
        self.baseline.values()
    }

    // --- Holder delivery ---

    /// Deliver `snapshot` to every holder of its namespace.
    ///
    /// Holders that are not ready get the delivery queued. An unchanged
    /// snapshot is not re-sent unless it must be persisted.
    pub fn push(
        &mut self,
        registry: &HolderRegistry,
        snapshot: &LedgerSnapshot,
        persist_now: bool,
        now: Timestamp,
    ) {
        let digest = snapshot.digest();
        for holder in registry.for_namespace(&snapshot.namespace) {
            let key = holder.key().clone();
            let persist_now = persist_now
                || self.pending.get(&key).map_or(false, |p| p.persist_now);
            let queued = self.pending.contains_key(&key);
            if !persist_now && !queued && self.delivered.get(&key) == Some(&digest) {
                continue;
            }
            self.deliver(holder, snapshot, persist_now, &digest, now);
        }
    }

    fn deliver(
        &mut self,
        holder: &Arc<dyn PersistedHolder>,
        snapshot: &LedgerSnapshot,
        persist_now: bool,
        digest: &str,
        now: Timestamp,
    ) {
        let key = holder.key().clone();
        let result = if holder.is_ready() {
            holder.apply_snapshot(snapshot, persist_now)
        } else {
            Err(DepotError::HolderNotReady(key.0.clone()))
        };

        match result {
            Ok(()) => {
                self.pending.remove(&key);
                self.delivered.insert(key, digest.to_string());
            }
            Err(DepotError::HolderNotReady(_)) => {
                debug!(holder = %key, "holder not ready, queueing snapshot");
                self.pending.insert(
                    key,
                    PendingPush {
                        snapshot: snapshot.clone(),
                        persist_now,
                        retry_at: now.plus(self.retry_interval),
                    },
                );
            }
            Err(e) => {
                warn!(holder = %key, error = %e, "snapshot delivery failed");
                self.delivered.remove(&key);
            }
        }
    }

    /// Retry queued deliveries that are due. Holders that were unregistered
    /// in the meantime are forgotten.
    pub fn retry_pending(&mut self, registry: &HolderRegistry, now: Timestamp) -> usize {
        let due: Vec<HolderKey> = self
            .pending
            .iter()
            .filter(|(_, p)| p.retry_at <= now)
            .map(|(key, _)| key.clone())
            .collect();

        let mut delivered = 0;
        for key in due {
            let Some(push) = self.pending.remove(&key) else {
                continue;
            };
            let Some(holder) = registry.get(&key) else {
                debug!(holder = %key, "dropping queued snapshot for unregistered holder");
                continue;
            };
            let digest = push.snapshot.digest();
            self.deliver(holder, &push.snapshot, push.persist_now, &digest, now);
            if !self.pending.contains_key(&key) {
                delivered += 1;
            }
        }
        delivered
    }

    pub fn pending_pushes(&self) -> usize {
        self.pending.len()
    }

    /// Forget queued deliveries, digests and the commit baseline.
    pub fn clear(&mut self) {
        self.decision = None;
        self.baseline.clear();
        self.pending.clear();
        self.delivered.clear();
    }
}

/// Pick the canonical copy per namespace: highest version, then most items.
/// Earlier candidates win exact ties.
pub fn select_canonical(
    candidates: impl IntoIterator<Item = LedgerSnapshot>,
) -> BTreeMap<NamespaceId, LedgerSnapshot> {
    let mut best: BTreeMap<NamespaceId, LedgerSnapshot> = BTreeMap::new();
    for candidate in candidates {
        match best.get(&candidate.namespace) {
            Some(current)
                if (candidate.version, candidate.item_count())
                    <= (current.version, current.item_count()) => {}
            _ => {
                best.insert(candidate.namespace.clone(), candidate);
            }
        }
    }
    best
}
