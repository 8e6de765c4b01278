//! The authoritative rebuilding set.
//!
//! Every node replays the event log and folds each record into a
//! [`RebuildingSet`]; because the log is totally ordered, all nodes
//! converge on the same set once they have replayed up to the same LSN.

use std::collections::{BTreeMap, BTreeSet};

use braid_types::{ClusterConfig, Lsn, NodeIndex, RebuildingMode, ShardId};

use crate::record::EventRecord;

/// State of one rebuilding shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildingInfo {
    /// Full or time-ranged rebuilding.
    pub mode: RebuildingMode,
    /// LSN of the `ShardNeedsRebuild` record that started this rebuilding.
    pub version: Lsn,
    /// Set once a `ShardIsRebuilt` has been observed; the entry stays until
    /// the owner acknowledges, so readers keep counting the shard as
    /// rebuilding for F-majority purposes.
    pub rebuilt: bool,
}

/// Mapping of shard → rebuilding state, replayed from the event log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildingSet {
    entries: BTreeMap<ShardId, RebuildingInfo>,
    /// LSN of the last record applied to the set.
    version: Lsn,
}

impl RebuildingSet {
    /// The version of the set: the LSN of the record that produced it.
    pub fn version(&self) -> Lsn {
        self.version
    }

    /// Rebuilding state of a shard, if any.
    pub fn get(&self, shard: ShardId) -> Option<&RebuildingInfo> {
        self.entries.get(&shard)
    }

    /// Whether the shard has an active FULL rebuilding. Time-ranged
    /// entries are mini rebuildings and do not count.
    pub fn is_full_rebuilding(&self, shard: ShardId) -> bool {
        self.entries
            .get(&shard)
            .is_some_and(|info| info.mode == RebuildingMode::Full)
    }

    /// Number of entries (all modes).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct in-config nodes with at least one FULL rebuilding entry.
    ///
    /// This is the `count` of the concurrency threshold: time-ranged
    /// entries and entries for nodes outside the configuration are
    /// excluded.
    pub fn full_rebuild_node_count(&self, config: &ClusterConfig) -> usize {
        let nodes: BTreeSet<NodeIndex> = self
            .entries
            .iter()
            .filter(|(shard, info)| {
                info.mode == RebuildingMode::Full && config.contains(shard.node)
            })
            .map(|(shard, _)| shard.node)
            .collect();
        nodes.len()
    }

    /// Fold one replayed record into the set. The LSN must be the record's
    /// position in the log; it becomes the new set version.
    pub fn apply(&mut self, lsn: Lsn, record: &EventRecord) {
        match record {
            EventRecord::ShardNeedsRebuild { shard, flags, .. } => {
                let mode = if flags.time_ranged {
                    RebuildingMode::TimeRanged
                } else {
                    RebuildingMode::Full
                };
                self.entries.insert(
                    *shard,
                    RebuildingInfo {
                        mode,
                        version: lsn,
                        rebuilt: false,
                    },
                );
            }
            EventRecord::ShardAbortRebuild { shard } => {
                self.entries.remove(shard);
            }
            EventRecord::ShardIsRebuilt { shard, .. } => {
                if let Some(info) = self.entries.get_mut(shard) {
                    info.rebuilt = true;
                }
            }
            EventRecord::ShardAckRebuilt { shard, .. } => {
                self.entries.remove(shard);
            }
        }
        self.version = lsn;
    }
}
