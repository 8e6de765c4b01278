//! Integration tests: dead-node detection and config churn.

use braid_integration_tests::{SimCluster, expect_rebuildings, sim_settings, wait_until};
use braid_types::{ClusterConfig, NodeIndex, ShardId, StorageRole};

/// Five nodes with two shards each; N4 never starts. The leader publishes
/// exactly one rebuild per shard of N4 and nothing else.
#[tokio::test]
async fn test_dead_node_rebuilt() {
    let mut settings = sim_settings();
    settings.enable_self_initiated_rebuilding = true;

    let config = ClusterConfig::uniform(5, 2);
    let cluster = SimCluster::start_nodes(config, settings, &[0, 1, 2, 3]);

    expect_rebuildings(&cluster, vec![ShardId::new(4, 0), ShardId::new(4, 1)]).await;
}

/// Shrinking a dead node out of the config frees its trigger-queue slot
/// before admission: with a queue capacity of one, the next failure still
/// rebuilds and throttled mode never latches.
#[tokio::test]
async fn test_shrink_then_fail_does_not_throttle() {
    let mut settings = sim_settings();
    settings.max_rebuilding_trigger_queue_size = 1;

    let mut cluster = SimCluster::start(5, 2, settings);

    // N0 goes away and is removed from the config.
    cluster.kill(0);
    cluster.shrink(0);
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    // Now the real failure.
    cluster.kill(4);
    cluster.enable_rebuilding_all();

    expect_rebuildings(&cluster, vec![ShardId::new(4, 0), ShardId::new(4, 1)]).await;
    assert_eq!(
        cluster.stats(1).get("rebuilding_supervisor_throttled"),
        Some(&0),
        "the shrunk node must not occupy the only queue slot"
    );
}

/// Expanding the cluster with a node that never starts triggers its
/// rebuilding.
#[tokio::test]
async fn test_expand_with_dead_node() {
    let mut settings = sim_settings();
    settings.enable_self_initiated_rebuilding = true;

    let mut cluster = SimCluster::start(5, 2, settings);
    let added = cluster.expand(1, 2);
    assert_eq!(added, vec![5]);

    expect_rebuildings(&cluster, vec![ShardId::new(5, 0), ShardId::new(5, 1)]).await;
}

/// A dead non-storage node is never rebuilt; every surviving node cancels
/// the group once with the notstorage counter and nothing reaches the log.
#[tokio::test]
async fn test_non_storage_node_not_rebuilt() {
    let mut settings = sim_settings();
    settings.enable_self_initiated_rebuilding = true;

    let mut config = ClusterConfig::uniform(4, 2);
    if let Some(d) = config.nodes.get_mut(&NodeIndex(3)) {
        d.storage_role = StorageRole::None;
    }
    let cluster = SimCluster::start_nodes(config, settings, &[0, 1, 2]);

    wait_until("every node cancels the non-storage group", || {
        (0..3).all(|i| {
            cluster.stats(i).get("node_rebuilding_not_triggered_notstorage") == Some(&1)
        })
    })
    .await;

    for i in 0..3 {
        let stats = cluster.stats(i);
        assert_eq!(stats["shard_rebuilding_triggered"], 0);
        assert_eq!(stats["shard_rebuilding_not_triggered_started"], 0);
        assert_eq!(stats["node_rebuilding_not_triggered_notinconfig"], 0);
    }
    assert!(cluster.needs_rebuild_shards().is_empty());
}

/// A node that flaps back within the grace period keeps its replicas:
/// the triggers cancel with the nodealive counter on the leader.
#[tokio::test]
async fn test_flapping_node_not_rebuilt() {
    let mut settings = sim_settings();
    settings.enable_self_initiated_rebuilding = true;
    settings.self_initiated_rebuilding_grace_period = std::time::Duration::from_secs(30);

    let mut cluster = SimCluster::start(5, 2, settings);
    cluster.kill(4);
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    cluster.revive(4);

    wait_until("leader cancels both triggers", || {
        cluster.stats(0).get("shard_rebuilding_not_triggered_nodealive") == Some(&2)
    })
    .await;
    assert_eq!(cluster.total_triggered(), 0);
    assert!(cluster.needs_rebuild_shards().is_empty());
}
