//! The admission filter.
//!
//! Once a trigger's grace period elapses it is evaluated against the
//! current snapshot. Rules run in a fixed order and the first failing rule
//! decides: cancellations remove the trigger (the condition is gone or the
//! decision already exists), deferrals keep it for re-evaluation on the
//! next cluster-view change or recheck tick.

use braid_cluster::ClusterView;
use braid_eventlog::RebuildingSet;
use braid_types::{CancelReason, ClusterConfig, NodeIndex, SupervisorSettings};

use crate::leader;
use crate::trigger::Trigger;

/// Why a trigger was deferred rather than cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferReason {
    /// This node is not responsible for publishing the trigger.
    NotLeader,
    /// Admitting would push the concurrent-rebuilding fraction past the
    /// configured maximum.
    ThresholdReached,
}

/// Outcome of evaluating one trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// Publish the rebuild decision.
    Admit,
    /// Drop the trigger.
    Cancel(CancelReason),
    /// Keep the trigger and try again later.
    Defer(DeferReason),
}

/// Evaluate one due trigger against a coherent snapshot.
///
/// Self-initiated triggers are exempt from the storage-role, node-alive
/// and threshold rules: the owning node's own diagnosis supersedes remote
/// judgement, subject only to the in-config and publisher checks. The
/// already-rebuilding rule still applies to them — a shard is either in
/// the trigger table or in the authoritative set with FULL mode, and once
/// the decision is durable the trigger has nothing left to publish.
pub fn evaluate(
    view: &ClusterView,
    rebuilding: &RebuildingSet,
    settings: &SupervisorSettings,
    local: NodeIndex,
    trigger: &Trigger,
) -> AdmissionDecision {
    let node = trigger.shard.node;
    let self_initiated = trigger.reason.is_self_initiated();

    let Some(descriptor) = view.config.node(node) else {
        return AdmissionDecision::Cancel(CancelReason::NotInConfig);
    };

    if !self_initiated && !descriptor.storage_role.is_storage() {
        return AdmissionDecision::Cancel(CancelReason::NotStorage);
    }

    if rebuilding.is_full_rebuilding(trigger.shard) {
        return AdmissionDecision::Cancel(CancelReason::AlreadyRebuilding);
    }

    if !self_initiated && view.is_alive(node) {
        return AdmissionDecision::Cancel(CancelReason::NodeAliveAgain);
    }

    if !leader::is_publisher(view, local, trigger) {
        return AdmissionDecision::Defer(DeferReason::NotLeader);
    }

    if !self_initiated
        && threshold_blocks(
            rebuilding,
            &view.config,
            settings.max_node_rebuilding_percentage,
        )
    {
        return AdmissionDecision::Defer(DeferReason::ThresholdReached);
    }

    AdmissionDecision::Admit
}

/// Whether the concurrent-rebuilding threshold blocks new admissions.
///
/// `count` is the number of distinct in-config nodes with a FULL entry in
/// the authoritative set; time-ranged entries and out-of-config nodes are
/// excluded. Blocking while `count/N` already exceeds the percentage means
/// a single admission can overshoot the knob by at most `1/N`.
pub fn threshold_blocks(
    rebuilding: &RebuildingSet,
    config: &ClusterConfig,
    max_percentage: u32,
) -> bool {
    let n = config.node_count();
    if n == 0 {
        return false;
    }
    let count = rebuilding.full_rebuild_node_count(config);
    count * 100 > max_percentage as usize * n
}
