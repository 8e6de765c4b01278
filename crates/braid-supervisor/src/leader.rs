//! Rebuilding leadership.
//!
//! There is no elected leader: responsibility for publishing rebuild
//! decisions falls on the alive storage node with the lowest index in the
//! current configuration. Leadership can change on any cluster-view
//! update; transient overlap between two would-be leaders is tolerated
//! because the event log's conditional-version check dedupes their writes.

use braid_cluster::ClusterView;
use braid_types::NodeIndex;

use crate::trigger::Trigger;

/// The node responsible for publishing rebuild decisions: the lowest
/// node index among alive storage nodes in the configuration. `None` when
/// no storage node is alive.
pub fn rebuilding_leader(view: &ClusterView) -> Option<NodeIndex> {
    view.config
        .nodes
        .values()
        .filter(|d| d.storage_role.is_storage())
        .map(|d| d.index)
        .filter(|n| view.is_alive(*n))
        .min()
}

/// Whether the local node is the one that should publish this trigger.
///
/// Self-diagnosed shards are published by their owning node; dead-node
/// triggers by the cluster-wide leader. An isolated node publishes
/// nothing, even for its own shards and even if it is numerically lowest.
pub fn is_publisher(view: &ClusterView, local: NodeIndex, trigger: &Trigger) -> bool {
    if view.isolated {
        return false;
    }
    if trigger.reason.is_self_initiated() {
        trigger.shard.node == local
    } else {
        rebuilding_leader(view) == Some(local)
    }
}
