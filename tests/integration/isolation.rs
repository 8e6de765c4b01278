//! Integration tests: network partitions and self-isolation.

use std::time::Duration;

use braid_integration_tests::{SimCluster, sim_settings, wait_until};
use braid_types::ShardId;

/// N0 lands alone in a partition. The majority side rebuilds N0's shards
/// through its own leader (N1); the isolated node publishes nothing, and
/// after healing it cancels every would-be trigger because the nodes are
/// alive.
#[tokio::test]
async fn test_isolated_node_publishes_nothing() {
    let num_nodes = 6u16;
    let num_shards = 2u16;
    let mut cluster = SimCluster::start(num_nodes, num_shards, sim_settings());

    cluster.partition(&[&[0], &[1, 2, 3, 4, 5]]);
    cluster.enable_rebuilding_all();

    // N1 is the leader among reachable nodes and rebuilds N0.
    wait_until("N1 rebuilds N0's shards", || {
        cluster.stats(1).get("shard_rebuilding_triggered") == Some(&(num_shards as u64))
    })
    .await;

    let records = cluster.needs_rebuild_shards();
    assert_eq!(records.len(), num_shards as usize);
    assert!(records.iter().all(|s| s.node.0 == 0));

    // The isolated node saw everyone dead but must stay silent.
    assert_eq!(cluster.stats(0)["shard_rebuilding_triggered"], 0);

    // Healing: N0's would-be triggers cancel, one bump per shard.
    cluster.heal();
    let expected = u64::from((num_nodes - 1) * num_shards);
    wait_until("N0 cancels all its triggers", || {
        cluster.stats(0).get("shard_rebuilding_not_triggered_nodealive") == Some(&expected)
    })
    .await;
    assert_eq!(cluster.stats(0)["shard_rebuilding_triggered"], 0);
}

/// Both sides of a partition believe the other is dead, but only the
/// majority side has a non-isolated leader: exactly one side's decision
/// reaches the event log, and the healed minority cancels against the
/// already-started rebuilding.
#[tokio::test]
async fn test_minority_side_cancels_against_started_rebuilding() {
    let mut settings = sim_settings();
    // Two nodes in the minority: each still sees one alive peer, so
    // require two for a stable view.
    settings.min_gossips_for_stable_state = 2;
    let mut cluster = SimCluster::start(6, 1, settings);

    cluster.partition(&[&[0, 3], &[1, 2, 4, 5]]);
    cluster.enable_rebuilding_all();

    // N1 leads the majority and rebuilds the unreachable pair.
    wait_until("majority rebuilds the minority", || {
        cluster.stats(1).get("shard_rebuilding_triggered") == Some(&2)
    })
    .await;
    assert_eq!(cluster.stats(0)["shard_rebuilding_triggered"], 0);
    assert_eq!(cluster.stats(3)["shard_rebuilding_triggered"], 0);

    // Heal the minority's leader-most node: its pending triggers for the
    // majority nodes hit the already-published decisions... none exist
    // (the majority is alive), so they cancel with nodealive; its own
    // shard is already rebuilding, which it simply observes.
    cluster.heal();
    wait_until("minority cancels its would-be triggers", || {
        let stats = cluster.stats(0);
        stats["shard_rebuilding_not_triggered_nodealive"] >= 4
    })
    .await;
    assert_eq!(cluster.stats(0)["shard_rebuilding_triggered"], 0);

    // Still exactly two decisions in the log.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let mut records = cluster.needs_rebuild_shards();
    records.sort();
    records.dedup();
    assert_eq!(records, vec![ShardId::new(0, 0), ShardId::new(3, 0)]);
}
