//! Coherent cluster snapshots.
//!
//! The supervisor loop must never mix state from different moments: a
//! configuration from one epoch combined with a detector view from another
//! can invent or hide failures. [`ViewPublisher`] therefore rebuilds a
//! complete [`ClusterView`] on every update and publishes it atomically
//! through a `tokio::sync::watch` channel; consumers clone the borrowed
//! value once per loop iteration.

use std::collections::BTreeMap;
use std::sync::Arc;

use braid_types::{ClusterConfig, NodeIndex, NodeState};
use tokio::sync::watch;
use tracing::{debug, info};

/// What the failure detector reports about one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerStatus {
    /// Detector state of the peer.
    pub state: NodeState,
    /// Monotonically increasing gossip round counter; stalls when the
    /// peer stops responding.
    pub gossip_count: u64,
}

/// Snapshot of the failure detector's view of the cluster.
///
/// Nodes absent from the view have never gossiped and are reported as
/// [`NodeState::Dead`] — a config entry without a running process (e.g. a
/// node added by expansion that never started) must look dead.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureDetectorView {
    peers: BTreeMap<NodeIndex, PeerStatus>,
}

impl FailureDetectorView {
    /// Build a view where every listed node is alive with a fresh counter.
    pub fn all_alive(nodes: impl IntoIterator<Item = NodeIndex>) -> Self {
        let peers = nodes
            .into_iter()
            .map(|n| {
                (
                    n,
                    PeerStatus {
                        state: NodeState::Alive,
                        gossip_count: 1,
                    },
                )
            })
            .collect();
        Self { peers }
    }

    /// Record the detector state of a node, bumping its gossip counter.
    pub fn set_state(&mut self, node: NodeIndex, state: NodeState) {
        let entry = self.peers.entry(node).or_insert(PeerStatus {
            state,
            gossip_count: 0,
        });
        entry.state = state;
        entry.gossip_count += 1;
    }

    /// Detector state of a node; never-seen nodes are dead.
    pub fn state_of(&self, node: NodeIndex) -> NodeState {
        self.peers
            .get(&node)
            .map(|p| p.state)
            .unwrap_or(NodeState::Dead)
    }

    /// Gossip counter of a node, if it has ever gossiped.
    pub fn gossip_count(&self, node: NodeIndex) -> Option<u64> {
        self.peers.get(&node).map(|p| p.gossip_count)
    }

    /// Number of peers (excluding `local`) currently reported alive.
    pub fn alive_peer_count(&self, local: NodeIndex) -> usize {
        self.peers
            .iter()
            .filter(|(n, p)| **n != local && p.state == NodeState::Alive)
            .count()
    }
}

/// A coherent snapshot of the cluster as seen by one node.
///
/// All fields belong to the same `epoch`; the supervisor reads one view per
/// iteration and combines it with its event-log replica of the rebuilding
/// set, which completes the four-field snapshot the loop operates on.
#[derive(Debug, Clone)]
pub struct ClusterView {
    /// Snapshot epoch, bumped on every published update.
    pub epoch: u64,
    /// Current cluster configuration.
    pub config: Arc<ClusterConfig>,
    /// Current failure-detector view.
    pub detector: Arc<FailureDetectorView>,
    /// Whether the local node considers itself isolated (too few reachable
    /// peers for a stable detector view). An isolated node must not publish.
    pub isolated: bool,
}

impl ClusterView {
    /// Whether the detector reports the node alive.
    pub fn is_alive(&self, node: NodeIndex) -> bool {
        self.detector.state_of(node) == NodeState::Alive
    }

    /// Whether the detector reports the node dead (SUSPECT is not dead).
    pub fn is_dead(&self, node: NodeIndex) -> bool {
        self.detector.state_of(node) == NodeState::Dead
    }
}

/// Applies asynchronous config and detector updates and publishes coherent
/// [`ClusterView`] snapshots.
pub struct ViewPublisher {
    local: NodeIndex,
    min_gossips_for_stable_state: usize,
    config: Arc<ClusterConfig>,
    detector: Arc<FailureDetectorView>,
    epoch: u64,
    tx: watch::Sender<ClusterView>,
}

impl ViewPublisher {
    /// Create a publisher with an initial configuration and detector view.
    ///
    /// Returns the publisher and the receiver the supervisor loop hangs on.
    pub fn new(
        local: NodeIndex,
        config: ClusterConfig,
        detector: FailureDetectorView,
        min_gossips_for_stable_state: usize,
    ) -> (Self, watch::Receiver<ClusterView>) {
        let config = Arc::new(config);
        let detector = Arc::new(detector);
        let isolated = is_isolated(&detector, local, min_gossips_for_stable_state);
        let (tx, rx) = watch::channel(ClusterView {
            epoch: 1,
            config: config.clone(),
            detector: detector.clone(),
            isolated,
        });
        (
            Self {
                local,
                min_gossips_for_stable_state,
                config,
                detector,
                epoch: 1,
                tx,
            },
            rx,
        )
    }

    /// This node's index.
    pub fn local(&self) -> NodeIndex {
        self.local
    }

    /// Replace the cluster configuration.
    pub fn update_config(&mut self, config: ClusterConfig) {
        info!(version = config.version, nodes = config.node_count(), "cluster config updated");
        self.config = Arc::new(config);
        self.publish();
    }

    /// Replace the failure-detector view wholesale.
    pub fn update_detector(&mut self, detector: FailureDetectorView) {
        self.detector = Arc::new(detector);
        self.publish();
    }

    /// Record a single node-state transition from the failure detector.
    pub fn set_node_state(&mut self, node: NodeIndex, state: NodeState) {
        let mut detector = (*self.detector).clone();
        detector.set_state(node, state);
        debug!(%node, ?state, "failure detector transition");
        self.detector = Arc::new(detector);
        self.publish();
    }

    /// Current snapshot (same value the receiver sees).
    pub fn current(&self) -> ClusterView {
        self.tx.borrow().clone()
    }

    fn publish(&mut self) {
        self.epoch += 1;
        let isolated = is_isolated(&self.detector, self.local, self.min_gossips_for_stable_state);
        if isolated != self.tx.borrow().isolated {
            info!(
                isolated,
                alive_peers = self.detector.alive_peer_count(self.local),
                "self-isolation state changed"
            );
        }
        let view = ClusterView {
            epoch: self.epoch,
            config: self.config.clone(),
            detector: self.detector.clone(),
            isolated,
        };
        // Receivers may all be gone during shutdown; nothing to do then.
        let _ = self.tx.send(view);
    }
}

/// Self-isolation rule: with fewer alive peers than the stability floor,
/// the local detector view cannot be trusted and publishing must stop.
fn is_isolated(detector: &FailureDetectorView, local: NodeIndex, min_gossips: usize) -> bool {
    min_gossips > 0 && detector.alive_peer_count(local) < min_gossips
}
