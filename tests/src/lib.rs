//! Shared test harness for Braid integration tests.
//!
//! Provides [`SimCluster`] — an N-node in-process cluster where every node
//! runs a real supervisor task over one shared event log, and the test
//! drives each node's failure-detector view by hand: kill, revive,
//! partition, heal, shrink, expand, shard-health injection.
//!
//! Grace and recheck intervals are scaled to tens of milliseconds so the
//! scenarios complete quickly while keeping their ordering semantics.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use braid_cluster::{ClusterView, FailureDetectorView, ViewPublisher};
use braid_eventlog::{EventLog, EventRecord, SharedEventLog};
use braid_supervisor::{SettingsHandle, SupervisorHandle, supervisor};
use braid_types::{
    ClusterConfig, NodeDescriptor, NodeIndex, NodeState, ShardHealth, ShardId, ShardIndex,
    SupervisorSettings,
};
use tokio::sync::watch;

/// Default harness settings: production semantics at test speed.
pub fn sim_settings() -> SupervisorSettings {
    let mut settings = SupervisorSettings::default();
    settings.self_initiated_rebuilding_grace_period = Duration::from_millis(50);
    settings.recheck_interval = Duration::from_millis(25);
    settings.min_gossips_for_stable_state = 1;
    settings
}

struct SimNode {
    publisher: ViewPublisher,
    view_rx: watch::Receiver<ClusterView>,
    settings: SettingsHandle,
    handle: Option<SupervisorHandle>,
    process_alive: bool,
}

/// An in-process cluster of supervisor nodes over one shared event log.
pub struct SimCluster {
    log: Arc<SharedEventLog>,
    config: ClusterConfig,
    nodes: BTreeMap<u16, SimNode>,
}

impl SimCluster {
    /// Start a uniform cluster with every node running.
    pub fn start(n: u16, shards_per_node: u16, settings: SupervisorSettings) -> Self {
        let config = ClusterConfig::uniform(n, shards_per_node);
        let started: Vec<u16> = (0..n).collect();
        Self::start_nodes(config, settings, &started)
    }

    /// Start a cluster from an explicit config, running only `started`
    /// nodes. Config members that are not started look dead to everyone.
    pub fn start_nodes(config: ClusterConfig, settings: SupervisorSettings, started: &[u16]) -> Self {
        let log = SharedEventLog::new();
        let mut nodes = BTreeMap::new();

        for &index in started {
            assert!(
                config.contains(NodeIndex(index)),
                "started node N{index} must be in the config"
            );
            // Every started node sees the other started nodes alive;
            // config members that never started have no detector entry
            // and therefore read as dead.
            let detector =
                FailureDetectorView::all_alive(started.iter().map(|&i| NodeIndex(i)));
            let (publisher, view_rx) = ViewPublisher::new(
                NodeIndex(index),
                config.clone(),
                detector,
                settings.min_gossips_for_stable_state,
            );
            let settings_handle = SettingsHandle::new(settings.clone());
            let handle = supervisor::start(
                NodeIndex(index),
                settings_handle.clone(),
                view_rx.clone(),
                log.clone() as Arc<dyn EventLog>,
            );
            nodes.insert(
                index,
                SimNode {
                    publisher,
                    view_rx,
                    settings: settings_handle,
                    handle: Some(handle),
                    process_alive: true,
                },
            );
        }

        Self { log, config, nodes }
    }

    /// The shared event log.
    pub fn event_log(&self) -> &Arc<SharedEventLog> {
        &self.log
    }

    /// Counter snapshot of a running node.
    pub fn stats(&self, index: u16) -> BTreeMap<&'static str, u64> {
        self.handle(index).stats().snapshot()
    }

    /// The supervisor handle of a running node.
    pub fn handle(&self, index: u16) -> &SupervisorHandle {
        self.nodes[&index]
            .handle
            .as_ref()
            .unwrap_or_else(|| panic!("node N{index} is not running"))
    }

    /// Enable self-initiated rebuilding on one node.
    pub fn enable_rebuilding(&self, index: u16) {
        self.nodes[&index]
            .settings
            .apply("enable-self-initiated-rebuilding", "true")
            .expect("enable knob");
    }

    /// Enable self-initiated rebuilding on every running node.
    pub fn enable_rebuilding_all(&self) {
        for (index, node) in &self.nodes {
            if node.process_alive {
                self.enable_rebuilding(*index);
            }
        }
    }

    /// Kill a node: its supervisor stops and every surviving node's
    /// failure detector reports it dead.
    pub fn kill(&mut self, index: u16) {
        if let Some(node) = self.nodes.get_mut(&index) {
            if let Some(handle) = node.handle.take() {
                handle.abort();
            }
            node.process_alive = false;
        }
        for (other, node) in self.nodes.iter_mut() {
            if *other != index && node.process_alive {
                node.publisher.set_node_state(NodeIndex(index), NodeState::Dead);
            }
        }
    }

    /// Restart a killed node and mark it alive everywhere.
    pub fn revive(&mut self, index: u16) {
        for node in self.nodes.values_mut() {
            if node.process_alive {
                node.publisher.set_node_state(NodeIndex(index), NodeState::Alive);
            }
        }
        if let Some(node) = self.nodes.get_mut(&index) {
            node.process_alive = true;
            node.publisher.set_node_state(NodeIndex(index), NodeState::Alive);
            if node.handle.is_none() {
                let handle = supervisor::start(
                    NodeIndex(index),
                    node.settings.clone(),
                    node.view_rx.clone(),
                    self.log.clone() as Arc<dyn EventLog>,
                );
                node.handle = Some(handle);
            }
        }
    }

    /// Remove a node from the cluster configuration everywhere.
    pub fn shrink(&mut self, index: u16) {
        self.config.nodes.remove(&NodeIndex(index));
        self.config.version += 1;
        self.push_config();
    }

    /// Add `count` nodes to the configuration without starting them.
    /// Returns the new node indexes.
    pub fn expand(&mut self, count: u16, shards_per_node: u16) -> Vec<u16> {
        let next = self
            .config
            .nodes
            .keys()
            .map(|n| n.0 + 1)
            .max()
            .unwrap_or(0);
        let added: Vec<u16> = (next..next + count).collect();
        for &index in &added {
            self.config.nodes.insert(
                NodeIndex(index),
                NodeDescriptor::storage(index, shards_per_node),
            );
        }
        self.config.version += 1;
        self.push_config();
        added
    }

    fn push_config(&mut self) {
        for node in self.nodes.values_mut() {
            if node.process_alive {
                node.publisher.update_config(self.config.clone());
            }
        }
    }

    /// Partition the cluster: each running node sees members of its own
    /// group alive and everyone else dead. Killed processes stay dead for
    /// everybody.
    pub fn partition(&mut self, groups: &[&[u16]]) {
        let group_of = |index: u16| groups.iter().position(|g| g.contains(&index));
        let members: Vec<u16> = self.nodes.keys().copied().collect();
        let alive: Vec<u16> = members
            .iter()
            .copied()
            .filter(|i| self.nodes[i].process_alive)
            .collect();

        for observer in &members {
            let observer_group = group_of(*observer);
            let Some(node) = self.nodes.get_mut(observer) else {
                continue;
            };
            if !node.process_alive {
                continue;
            }
            for target in &members {
                if target == observer {
                    continue;
                }
                let state = if alive.contains(target) && observer_group == group_of(*target) {
                    NodeState::Alive
                } else {
                    NodeState::Dead
                };
                node.publisher.set_node_state(NodeIndex(*target), state);
            }
        }
    }

    /// Heal all partitions: every running process sees every other
    /// running process alive again.
    pub fn heal(&mut self) {
        let members: Vec<u16> = self.nodes.keys().copied().collect();
        let group: &[u16] = &members;
        self.partition(&[group]);
    }

    /// Inject a local shard-health observation on a node.
    pub fn set_shard_health(&self, index: u16, shard: u16, health: ShardHealth) {
        self.handle(index)
            .report_shard_health(ShardIndex(shard), health)
            .expect("supervisor running");
    }

    /// Shards with a `SHARD_NEEDS_REBUILD` record in the event log, in
    /// append order (duplicates preserved).
    pub fn needs_rebuild_shards(&self) -> Vec<ShardId> {
        self.log
            .records()
            .into_iter()
            .filter_map(|(_, record)| match record {
                EventRecord::ShardNeedsRebuild { shard, .. } => Some(shard),
                _ => None,
            })
            .collect()
    }

    /// Sum of `shard_rebuilding_triggered` over all running nodes.
    pub fn total_triggered(&self) -> u64 {
        self.nodes
            .values()
            .filter(|n| n.process_alive)
            .filter_map(|n| n.handle.as_ref())
            .filter_map(|h| h.stats().get("shard_rebuilding_triggered"))
            .sum()
    }
}

/// Poll until `check` passes or a 5-second deadline expires.
pub async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for: {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Assert that rebuilding was requested for exactly `shards`, each at
/// most once per publisher, and that the cluster-wide triggered count
/// matches. Mirrors the "no other trigger, no duplicate" checks the
/// scenarios share.
pub async fn expect_rebuildings(cluster: &SimCluster, mut shards: Vec<ShardId>) {
    shards.sort();
    let expected = shards.len() as u64;
    wait_until("expected rebuildings to be triggered", || {
        cluster.total_triggered() >= expected
    })
    .await;

    // Give racing publishers a beat to prove they stay silent.
    tokio::time::sleep(Duration::from_millis(150)).await;

    let mut seen = cluster.needs_rebuild_shards();
    seen.sort();
    seen.dedup();
    assert_eq!(seen, shards, "unexpected set of rebuild records");
    assert_eq!(
        cluster.total_triggered(),
        expected,
        "each episode must be counted exactly once"
    );
}
