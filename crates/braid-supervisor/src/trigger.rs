//! The trigger table: pending per-shard intent to rebuild.
//!
//! A trigger exists for a shard from the moment its bad state is observed
//! until the rebuild decision is confirmed in the event log or the
//! condition disappears. A shard is either here or in the authoritative
//! rebuilding set with FULL mode, never both.
//!
//! Capacity is counted in distinct nodes, not shards: a dead node
//! contributes one unit no matter how many shards it has. Inserts for a
//! new node past capacity are rejected (not evicted) and latch throttled
//! mode; the latch clears as soon as the node count drops below capacity.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use braid_types::{Lsn, NodeIndex, ShardId, TriggerReason};
use tokio::time::Instant;

/// Publishing progress of a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishState {
    /// Not submitted; eligible for admission.
    Idle,
    /// An event-log append has been dispatched, completion pending.
    InFlight,
    /// Appended at the given LSN; waiting to observe it in the replay tail.
    Submitted(Lsn),
}

/// One pending rebuilding intent.
#[derive(Debug, Clone)]
pub struct Trigger {
    /// The shard to rebuild.
    pub shard: ShardId,
    /// Why the trigger was created.
    pub reason: TriggerReason,
    /// When the bad state was first observed.
    pub first_observed_at: Instant,
    /// Earliest admission time: `first_observed_at + grace_period`.
    pub scheduled_at: Instant,
    /// Last time the admission filter looked at this trigger.
    pub last_evaluation: Option<Instant>,
    /// Publishing progress.
    pub publish: PublishState,
}

impl Trigger {
    /// Create a trigger observed now, admissible after the grace period.
    pub fn new(shard: ShardId, reason: TriggerReason, grace_period: Duration) -> Self {
        let now = Instant::now();
        Self {
            shard,
            reason,
            first_observed_at: now,
            scheduled_at: now + grace_period,
            last_evaluation: None,
            publish: PublishState::Idle,
        }
    }
}

/// Result of a trigger insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The trigger was added.
    Inserted,
    /// A trigger for this shard already exists; the table is unchanged.
    AlreadyPresent,
    /// The table is at node capacity; the trigger was rejected and
    /// throttled mode latched.
    Rejected,
}

/// Ordered table of pending triggers, keyed by shard.
#[derive(Debug)]
pub struct TriggerTable {
    entries: BTreeMap<ShardId, Trigger>,
    capacity: usize,
    throttled: bool,
}

impl TriggerTable {
    /// Create a table with the given node capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            capacity,
            throttled: false,
        }
    }

    /// Update the capacity (settings change); may end throttled mode.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.maybe_clear_throttle();
    }

    /// Insert-if-absent with the node-capacity rule.
    pub fn insert(&mut self, trigger: Trigger) -> InsertOutcome {
        if self.entries.contains_key(&trigger.shard) {
            return InsertOutcome::AlreadyPresent;
        }
        let node = trigger.shard.node;
        let node_known = self.entries.keys().any(|s| s.node == node);
        if !node_known && self.node_count() >= self.capacity {
            self.throttled = true;
            return InsertOutcome::Rejected;
        }
        self.entries.insert(trigger.shard, trigger);
        InsertOutcome::Inserted
    }

    /// Whether a trigger exists for the shard.
    pub fn contains(&self, shard: ShardId) -> bool {
        self.entries.contains_key(&shard)
    }

    /// Look up a trigger.
    pub fn get(&self, shard: ShardId) -> Option<&Trigger> {
        self.entries.get(&shard)
    }

    /// Look up a trigger mutably.
    pub fn get_mut(&mut self, shard: ShardId) -> Option<&mut Trigger> {
        self.entries.get_mut(&shard)
    }

    /// Remove a single trigger.
    pub fn remove(&mut self, shard: ShardId) -> Option<Trigger> {
        let removed = self.entries.remove(&shard);
        self.maybe_clear_throttle();
        removed
    }

    /// Remove every trigger of a node.
    pub fn remove_node(&mut self, node: NodeIndex) -> Vec<Trigger> {
        self.remove_node_if(node, |_| true)
    }

    /// Remove the node's triggers that carry the given reason.
    pub fn remove_node_with_reason(
        &mut self,
        node: NodeIndex,
        reason: TriggerReason,
    ) -> Vec<Trigger> {
        self.remove_node_if(node, |t| t.reason == reason)
    }

    fn remove_node_if(
        &mut self,
        node: NodeIndex,
        matches: impl Fn(&Trigger) -> bool,
    ) -> Vec<Trigger> {
        let shards: Vec<ShardId> = self
            .entries
            .values()
            .filter(|t| t.shard.node == node && matches(t))
            .map(|t| t.shard)
            .collect();
        let removed = shards
            .iter()
            .filter_map(|s| self.entries.remove(s))
            .collect();
        self.maybe_clear_throttle();
        removed
    }

    /// Shards whose grace period has elapsed, ordered by `scheduled_at`
    /// (ties broken by shard id).
    pub fn due(&self, now: Instant) -> Vec<ShardId> {
        let mut due: Vec<&Trigger> = self
            .entries
            .values()
            .filter(|t| t.scheduled_at <= now)
            .collect();
        due.sort_by_key(|t| (t.scheduled_at, t.shard));
        due.iter().map(|t| t.shard).collect()
    }

    /// Distinct nodes present in the table.
    pub fn nodes(&self) -> BTreeSet<NodeIndex> {
        self.entries.keys().map(|s| s.node).collect()
    }

    /// Distinct-node count (the capacity unit).
    pub fn node_count(&self) -> usize {
        self.nodes().len()
    }

    /// Number of triggers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether throttled mode is latched.
    pub fn is_throttled(&self) -> bool {
        self.throttled
    }

    fn maybe_clear_throttle(&mut self) {
        if self.node_count() < self.capacity {
            self.throttled = false;
        }
    }
}
