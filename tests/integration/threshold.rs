//! Integration tests: concurrent-rebuilding threshold and trigger-queue
//! capacity.

use std::time::Duration;

use braid_integration_tests::{SimCluster, sim_settings, wait_until};
use braid_eventlog::{EventLog, EventRecord};
use braid_types::{Lsn, ShardId};

/// With the threshold set to allow a single concurrent node rebuilding,
/// a pre-existing FULL rebuild blocks the next failure: it stays
/// scheduled, never triggered. Once the rebuilding node leaves the
/// config its entry stops counting and exactly one rebuild is emitted.
#[tokio::test]
async fn test_threshold_blocks_second_rebuilding() {
    let num_nodes = 6u16;
    let mut settings = sim_settings();
    settings.max_node_rebuilding_percentage = 100 / num_nodes as u32 - 1;
    settings.max_rebuilding_trigger_queue_size = 10;

    let mut cluster = SimCluster::start(num_nodes, 1, settings);

    // A rebuild of N1:S0 is already in progress cluster-wide.
    cluster
        .event_log()
        .append(EventRecord::needs_rebuild(ShardId::new(1, 0), Lsn::INVALID))
        .await
        .unwrap();

    cluster.kill(3);
    cluster.enable_rebuilding(0);

    wait_until("leader defers at the threshold", || {
        cluster.stats(0).get("shard_rebuilding_scheduled") >= Some(&1)
    })
    .await;

    // Several grace periods later the trigger still must not fire.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(cluster.stats(0)["shard_rebuilding_triggered"], 0);

    // The node carrying the pre-existing rebuild leaves the config.
    cluster.shrink(1);
    wait_until("exactly one rebuild emitted", || {
        cluster.stats(0).get("shard_rebuilding_triggered") == Some(&1)
    })
    .await;
}

/// A TIME_RANGED (mini) rebuilding is invisible to the threshold: the
/// dead node is rebuilt immediately even when only one concurrent
/// rebuilding is allowed.
#[tokio::test]
async fn test_mini_rebuilding_ignored_by_threshold() {
    let num_nodes = 6u16;
    let mut settings = sim_settings();
    settings.max_node_rebuilding_percentage = 100 / num_nodes as u32 - 1;
    settings.max_rebuilding_trigger_queue_size = 10;

    let mut cluster = SimCluster::start(num_nodes, 1, settings);

    cluster
        .event_log()
        .append(EventRecord::needs_mini_rebuild(
            ShardId::new(1, 0),
            Lsn::INVALID,
            vec![],
        ))
        .await
        .unwrap();

    cluster.kill(3);
    cluster.enable_rebuilding(0);

    wait_until("dead node rebuilt despite mini entry", || {
        cluster.stats(0).get("shard_rebuilding_triggered") == Some(&1)
    })
    .await;
}

/// Two failures with a queue capacity of one: only one node's trigger is
/// tabled, throttled mode latches, and nothing is published while the
/// queue cannot hold the work. Reviving the tabled node releases the
/// slot, clears the latch, and the remaining failure rebuilds.
#[tokio::test]
async fn test_trigger_queue_capacity_throttles() {
    let mut settings = sim_settings();
    settings.max_rebuilding_trigger_queue_size = 1;
    settings.self_initiated_rebuilding_grace_period = Duration::from_millis(150);

    let mut cluster = SimCluster::start(6, 1, settings);
    assert_eq!(cluster.stats(0)["rebuilding_supervisor_throttled"], 0);

    // Triggers accumulate (and the queue overflows) while admission is
    // still disabled.
    cluster.kill(1);
    cluster.kill(3);
    wait_until("throttled mode latches on the leader", || {
        cluster.stats(0).get("rebuilding_supervisor_throttled") == Some(&1)
    })
    .await;

    cluster.enable_rebuilding(0);

    // The tabled trigger (N1, first dead node in config order) publishes;
    // the rejected one (N3) must wait for the slot.
    wait_until("the tabled failure rebuilds", || {
        cluster.stats(0).get("shard_rebuilding_triggered") == Some(&1)
    })
    .await;

    // N1 is rebuilt and leaves the table; the slot frees, the latch
    // clears, and N3's trigger lands and rebuilds too.
    wait_until("throttle clears and the second failure rebuilds", || {
        let stats = cluster.stats(0);
        stats["rebuilding_supervisor_throttled"] == 0
            && stats["shard_rebuilding_triggered"] == 2
    })
    .await;

    let mut records = cluster.needs_rebuild_shards();
    records.sort();
    assert_eq!(records, vec![ShardId::new(1, 0), ShardId::new(3, 0)]);
}

/// The trigger table and its capacity latch are maintained per node,
/// independently of leadership: a node that latched throttled mode while
/// leading must still reset the metric after losing leadership.
#[tokio::test]
async fn test_throttle_resets_on_non_leader() {
    let mut settings = sim_settings();
    settings.max_rebuilding_trigger_queue_size = 1;
    settings.self_initiated_rebuilding_grace_period = Duration::from_secs(30);

    let mut cluster = SimCluster::start(6, 1, settings);
    assert_eq!(cluster.stats(1)["rebuilding_supervisor_throttled"], 0);

    // N0 and N3 die: N1 becomes the leader and its queue overflows (N0
    // takes the only slot, N3's trigger is rejected).
    cluster.kill(0);
    cluster.kill(3);
    cluster.enable_rebuilding(1);

    wait_until("throttled mode latches on N1", || {
        cluster.stats(1).get("rebuilding_supervisor_throttled") == Some(&1)
    })
    .await;
    assert_eq!(cluster.stats(1)["shard_rebuilding_triggered"], 0);

    // N0 returns: its trigger cancels and leadership moves back to N0,
    // but the latch must clear on N1 regardless.
    cluster.revive(0);
    wait_until("throttle resets on the now-non-leader", || {
        cluster.stats(1).get("rebuilding_supervisor_throttled") == Some(&0)
    })
    .await;
    wait_until("N1 cancels the revived node's trigger", || {
        cluster.stats(1).get("shard_rebuilding_not_triggered_nodealive") == Some(&1)
    })
    .await;

    // N3 is still dead, but N1 is no longer responsible for it.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(cluster.stats(1)["shard_rebuilding_triggered"], 0);
    assert!(cluster.needs_rebuild_shards().is_empty());
}

/// Same capacity squeeze, but the tabled node comes back instead of being
/// rebuilt: its trigger cancels, the latch clears, and the other failure
/// takes the slot.
#[tokio::test]
async fn test_throttle_clears_when_tabled_node_returns() {
    let mut settings = sim_settings();
    settings.max_rebuilding_trigger_queue_size = 1;
    settings.self_initiated_rebuilding_grace_period = Duration::from_secs(30);

    let mut cluster = SimCluster::start(6, 1, settings);

    cluster.kill(1);
    cluster.kill(3);
    cluster.enable_rebuilding(0);

    wait_until("throttled mode latches", || {
        cluster.stats(0).get("rebuilding_supervisor_throttled") == Some(&1)
    })
    .await;
    assert_eq!(cluster.stats(0)["shard_rebuilding_triggered"], 0);

    cluster.revive(1);
    wait_until("latch clears after revival", || {
        cluster.stats(0).get("rebuilding_supervisor_throttled") == Some(&0)
    })
    .await;
    wait_until("revived node's trigger cancelled", || {
        cluster.stats(0).get("shard_rebuilding_not_triggered_nodealive") == Some(&1)
    })
    .await;

    // The long grace keeps N3 pending; nothing may have been published.
    assert_eq!(cluster.stats(0)["shard_rebuilding_triggered"], 0);
    assert!(cluster.needs_rebuild_shards().is_empty());
}
