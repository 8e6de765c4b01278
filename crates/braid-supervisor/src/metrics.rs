//! Exported supervisor counters.
//!
//! The counter names are contractual — operators alert on them and the
//! integration tests read them by name through [`SupervisorStats::snapshot`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared counters and gauges exported by one node's supervisor.
#[derive(Debug, Default)]
pub struct SupervisorStats {
    /// Rebuildings this node published and saw confirmed in the replay tail.
    shard_rebuilding_triggered: AtomicU64,
    /// Triggers that reached admission but were deferred (not leader, or
    /// concurrency threshold reached).
    shard_rebuilding_scheduled: AtomicU64,
    /// Triggers cancelled because the shard was already rebuilding.
    shard_rebuilding_not_triggered_started: AtomicU64,
    /// Triggers cancelled because the node came back alive.
    shard_rebuilding_not_triggered_nodealive: AtomicU64,
    /// Node trigger groups cancelled because the node is not a storage node.
    node_rebuilding_not_triggered_notstorage: AtomicU64,
    /// Node trigger groups cancelled because the node left the config.
    node_rebuilding_not_triggered_notinconfig: AtomicU64,
    /// Gauge: 1 while the trigger queue is in throttled mode.
    rebuilding_supervisor_throttled: AtomicU64,
    /// Gauge: local shards currently in fail-safe mode after an IO error.
    failed_safe_log_stores: AtomicU64,
}

impl SupervisorStats {
    /// Create a fresh, zeroed stats block.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn bump_triggered(&self) {
        self.shard_rebuilding_triggered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn bump_scheduled(&self) {
        self.shard_rebuilding_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn bump_started(&self) {
        self.shard_rebuilding_not_triggered_started
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn bump_node_alive(&self) {
        self.shard_rebuilding_not_triggered_nodealive
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn bump_not_storage(&self) {
        self.node_rebuilding_not_triggered_notstorage
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn bump_not_in_config(&self) {
        self.node_rebuilding_not_triggered_notinconfig
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_throttled(&self, throttled: bool) {
        self.rebuilding_supervisor_throttled
            .store(throttled as u64, Ordering::Relaxed);
    }

    pub(crate) fn inc_failed_safe(&self) {
        self.failed_safe_log_stores.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dec_failed_safe(&self) {
        self.failed_safe_log_stores.fetch_sub(1, Ordering::Relaxed);
    }

    /// Read one counter by its exported name.
    pub fn get(&self, name: &str) -> Option<u64> {
        self.snapshot().get(name).copied()
    }

    /// Snapshot all counters under their exported names.
    pub fn snapshot(&self) -> BTreeMap<&'static str, u64> {
        let mut map = BTreeMap::new();
        map.insert(
            "shard_rebuilding_triggered",
            self.shard_rebuilding_triggered.load(Ordering::Relaxed),
        );
        map.insert(
            "shard_rebuilding_scheduled",
            self.shard_rebuilding_scheduled.load(Ordering::Relaxed),
        );
        map.insert(
            "shard_rebuilding_not_triggered_started",
            self.shard_rebuilding_not_triggered_started
                .load(Ordering::Relaxed),
        );
        map.insert(
            "shard_rebuilding_not_triggered_nodealive",
            self.shard_rebuilding_not_triggered_nodealive
                .load(Ordering::Relaxed),
        );
        map.insert(
            "node_rebuilding_not_triggered_notstorage",
            self.node_rebuilding_not_triggered_notstorage
                .load(Ordering::Relaxed),
        );
        map.insert(
            "node_rebuilding_not_triggered_notinconfig",
            self.node_rebuilding_not_triggered_notinconfig
                .load(Ordering::Relaxed),
        );
        map.insert(
            "rebuilding_supervisor_throttled",
            self.rebuilding_supervisor_throttled.load(Ordering::Relaxed),
        );
        map.insert(
            "failed_safe_log_stores",
            self.failed_safe_log_stores.load(Ordering::Relaxed),
        );
        map
    }
}
