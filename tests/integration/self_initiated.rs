//! Integration tests: self-diagnosed shard faults.

use std::time::Duration;

use braid_eventlog::{EventLog, EventRecord};
use braid_integration_tests::{SimCluster, expect_rebuildings, sim_settings, wait_until};
use braid_types::{Lsn, ShardHealth, ShardId};

/// A read IO error on N1:S0 puts the store into fail-safe mode and the
/// owning node itself publishes the rebuild, leader or not.
#[tokio::test]
async fn test_read_io_fault_triggers_self_rebuilding() {
    let mut settings = sim_settings();
    settings.enable_self_initiated_rebuilding = true;

    let cluster = SimCluster::start(5, 1, settings);
    cluster.set_shard_health(1, 0, ShardHealth::IoFailed);

    wait_until("N1 rebuilds its broken shard", || {
        cluster.stats(1).get("shard_rebuilding_triggered") == Some(&1)
    })
    .await;
    assert_eq!(cluster.stats(1)["failed_safe_log_stores"], 1);
    assert_eq!(cluster.needs_rebuild_shards(), vec![ShardId::new(1, 0)]);

    // The leader observed the same decision without publishing.
    assert_eq!(cluster.stats(0)["shard_rebuilding_triggered"], 0);
}

/// Corruption and missing bootstrap metadata are self-diagnosed the same
/// way: each owner publishes its own shard, nothing else is rebuilt.
#[tokio::test]
async fn test_corrupt_and_missing_meta_shards_rebuilt() {
    let mut settings = sim_settings();
    settings.enable_self_initiated_rebuilding = true;

    let cluster = SimCluster::start(5, 3, settings);
    cluster.set_shard_health(1, 2, ShardHealth::Corrupted);
    cluster.set_shard_health(2, 1, ShardHealth::MissingBootstrapMetadata);

    expect_rebuildings(&cluster, vec![ShardId::new(1, 2), ShardId::new(2, 1)]).await;
    assert_eq!(cluster.stats(1)["shard_rebuilding_triggered"], 1);
    assert_eq!(cluster.stats(2)["shard_rebuilding_triggered"], 1);
    // Fail-safe accounting only applies to IO faults.
    assert_eq!(cluster.stats(1)["failed_safe_log_stores"], 0);
}

/// A rebuild decision for the broken shard that lands while the owner's
/// self trigger is still in its grace period satisfies the trigger: the
/// owner cancels against the already-started rebuilding instead of
/// publishing a duplicate.
#[tokio::test]
async fn test_self_trigger_yields_to_existing_rebuilding() {
    let mut settings = sim_settings();
    settings.enable_self_initiated_rebuilding = true;
    settings.self_initiated_rebuilding_grace_period = Duration::from_millis(200);

    let cluster = SimCluster::start(5, 1, settings);
    cluster.set_shard_health(1, 0, ShardHealth::IoFailed);
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Another writer (say, an operator tool) publishes the same decision
    // before the grace period elapses.
    cluster
        .event_log()
        .append(EventRecord::needs_rebuild(ShardId::new(1, 0), Lsn::INVALID))
        .await
        .unwrap();

    wait_until("owner cancels against the started rebuilding", || {
        cluster.stats(1).get("shard_rebuilding_not_triggered_started") == Some(&1)
    })
    .await;
    assert_eq!(cluster.stats(1)["shard_rebuilding_triggered"], 0);
    // Only the external record exists; the shard still counts as
    // fail-safe locally.
    assert_eq!(cluster.needs_rebuild_shards(), vec![ShardId::new(1, 0)]);
    assert_eq!(cluster.stats(1)["failed_safe_log_stores"], 1);
}

/// A shard that recovers within the grace period is left alone.
#[tokio::test]
async fn test_recovered_shard_not_rebuilt() {
    let mut settings = sim_settings();
    settings.enable_self_initiated_rebuilding = true;
    settings.self_initiated_rebuilding_grace_period = Duration::from_secs(30);

    let cluster = SimCluster::start(3, 1, settings);
    cluster.set_shard_health(1, 0, ShardHealth::IoFailed);
    tokio::time::sleep(Duration::from_millis(100)).await;
    cluster.set_shard_health(1, 0, ShardHealth::Ok);

    wait_until("fail-safe gauge clears on recovery", || {
        cluster.stats(1).get("failed_safe_log_stores") == Some(&0)
    })
    .await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(cluster.needs_rebuild_shards().is_empty());
}
