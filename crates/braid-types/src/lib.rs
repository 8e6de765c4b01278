//! Shared types and identifiers for Braid.
//!
//! This crate defines the core types used across the Braid workspace:
//! identifiers ([`NodeIndex`], [`ShardIndex`], [`ShardId`], [`LogId`],
//! [`Lsn`]), cluster description ([`NodeDescriptor`], [`ClusterConfig`]),
//! state enums ([`NodeState`], [`StorageRole`], [`ShardHealth`]),
//! timestamps ([`RecordTimestamp`]), and the runtime-updateable
//! [`SupervisorSettings`].

pub mod settings;

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub use settings::{SettingsError, SupervisorSettings, parse_duration};

// ---------------------------------------------------------------------------
// ID types
// ---------------------------------------------------------------------------

/// Index of a node within the cluster configuration.
///
/// Node indexes are assigned by the configuration and never reused for a
/// different machine within a config generation.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize,
)]
pub struct NodeIndex(pub u16);

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N{}", self.0)
    }
}

impl fmt::Debug for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeIndex({self})")
    }
}

/// Index of a local storage shard on a node.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize,
)]
pub struct ShardIndex(pub u16);

impl fmt::Display for ShardIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

impl fmt::Debug for ShardIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShardIndex({self})")
    }
}

/// Fully-qualified shard identifier: a shard index on a specific node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ShardId {
    /// The owning node.
    pub node: NodeIndex,
    /// The shard index on that node.
    pub shard: ShardIndex,
}

impl ShardId {
    /// Build a shard id from raw indexes.
    pub fn new(node: u16, shard: u16) -> Self {
        Self {
            node: NodeIndex(node),
            shard: ShardIndex(shard),
        }
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node, self.shard)
    }
}

impl fmt::Debug for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShardId({self})")
    }
}

/// Identifier of a log within the log store.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct LogId(pub u64);

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

impl fmt::Debug for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogId({self})")
    }
}

/// Log sequence number: position of a record within a log, monotonically
/// increasing per log. Also used as the version of the authoritative
/// rebuilding set (the LSN of the event-log record that produced it).
#[derive(
    Clone, Copy, Default, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize,
)]
pub struct Lsn(pub u64);

impl Lsn {
    /// Sentinel for "no LSN" — below every valid sequence number.
    pub const INVALID: Lsn = Lsn(0);

    /// The LSN immediately following this one.
    pub fn next(self) -> Lsn {
        Lsn(self.0 + 1)
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

impl fmt::Debug for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lsn({self})")
    }
}

// ---------------------------------------------------------------------------
// State enums
// ---------------------------------------------------------------------------

/// Per-node state as reported by the failure detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    /// Node is responsive and healthy.
    Alive,
    /// Bounded transient state after a restart; neither alive for
    /// leadership purposes nor dead for triggering purposes.
    Suspect,
    /// Node has been declared unreachable.
    Dead,
    /// Self-observation only: this node cannot reach a quorum of peers.
    IsolatedSelf,
}

/// Storage participation of a node per the cluster configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageRole {
    /// Accepts reads and writes.
    ReadWrite,
    /// Accepts reads only.
    ReadOnly,
    /// Not a storage node (e.g. pure sequencer).
    None,
    /// Storage administratively disabled.
    Disabled,
}

impl StorageRole {
    /// Whether shards on this node are rebuild candidates (and the node is
    /// eligible for rebuilding leadership).
    pub fn is_storage(self) -> bool {
        matches!(self, StorageRole::ReadWrite | StorageRole::ReadOnly)
    }
}

/// Locally-observed health of a shard's log store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShardHealth {
    /// Shard is serving normally.
    Ok,
    /// The shard came up without its bootstrap metadata.
    MissingBootstrapMetadata,
    /// On-disk corruption detected.
    Corrupted,
    /// A persistent IO error occurred; the store has entered fail-safe mode.
    IoFailed,
    /// Health not yet determined.
    Unknown,
}

impl ShardHealth {
    /// The trigger reason a bad health state maps to, if any.
    pub fn trigger_reason(self) -> Option<TriggerReason> {
        match self {
            ShardHealth::MissingBootstrapMetadata => Some(TriggerReason::SelfMissingMeta),
            ShardHealth::Corrupted => Some(TriggerReason::SelfCorrupt),
            ShardHealth::IoFailed => Some(TriggerReason::SelfIo),
            ShardHealth::Ok | ShardHealth::Unknown => None,
        }
    }
}

/// Why a rebuilding trigger was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerReason {
    /// The failure detector declared the owning node dead.
    NodeDead,
    /// The owning node observed a persistent IO error on the shard.
    SelfIo,
    /// The owning node found the shard's bootstrap metadata missing.
    SelfMissingMeta,
    /// The owning node detected corruption on the shard.
    SelfCorrupt,
}

impl TriggerReason {
    /// Self-initiated reasons are diagnosed by the shard's own node and
    /// bypass the remote-judgement admission rules.
    pub fn is_self_initiated(self) -> bool {
        !matches!(self, TriggerReason::NodeDead)
    }
}

/// Why a rebuilding trigger was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    /// The node came back before the trigger was admitted.
    NodeAliveAgain,
    /// The node is no longer in the cluster configuration.
    NotInConfig,
    /// The node is not a storage node.
    NotStorage,
    /// The shard is already rebuilding per the authoritative set.
    AlreadyRebuilding,
    /// This node is not the rebuilding leader.
    NotLeader,
}

/// Scope of a rebuilding: everything the shard held, or a time interval of
/// dirty data (a "mini rebuilding", typically after an unclean restart).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RebuildingMode {
    /// Re-replicate all records of the shard.
    Full,
    /// Re-replicate only records within given time ranges.
    TimeRanged,
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Record timestamp: milliseconds since the UNIX epoch, signed so that
/// [`RecordTimestamp::MIN`] can stand in for negative infinity when
/// enumerating logs with unbounded backlog.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize,
)]
pub struct RecordTimestamp(pub i64);

impl RecordTimestamp {
    /// Negative infinity for enumeration purposes.
    pub const MIN: RecordTimestamp = RecordTimestamp(i64::MIN);

    /// Current wall-clock time.
    pub fn now() -> Self {
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64;
        RecordTimestamp(ms)
    }

    /// Subtract a duration, saturating at [`RecordTimestamp::MIN`].
    pub fn saturating_sub(self, d: Duration) -> Self {
        RecordTimestamp(self.0.saturating_sub(d.as_millis() as i64))
    }

    /// Raise this timestamp to `other` if `other` is larger.
    pub fn store_max(&mut self, other: RecordTimestamp) {
        if other > *self {
            *self = other;
        }
    }
}

impl fmt::Display for RecordTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == RecordTimestamp::MIN {
            write!(f, "-inf")
        } else {
            write!(f, "{}ms", self.0)
        }
    }
}

impl fmt::Debug for RecordTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordTimestamp({self})")
    }
}

/// A half-open time interval of dirty data for a time-ranged rebuilding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Inclusive lower bound.
    pub start: RecordTimestamp,
    /// Exclusive upper bound.
    pub end: RecordTimestamp,
}

// ---------------------------------------------------------------------------
// Cluster configuration
// ---------------------------------------------------------------------------

/// Physical location of a node, used for failure-domain reasoning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeLocation {
    /// Region name (e.g. "eu-west").
    pub region: String,
    /// Rack within the region (e.g. "rack-04").
    pub rack: String,
}

/// Configuration entry for a single node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// The node's index.
    pub index: NodeIndex,
    /// Storage participation.
    pub storage_role: StorageRole,
    /// Number of local shards.
    pub num_shards: u16,
    /// Incarnation number, incremented when the node is replaced.
    pub generation: u64,
    /// Physical location.
    pub location: NodeLocation,
}

impl NodeDescriptor {
    /// A read-write storage node with the given shard count.
    pub fn storage(index: u16, num_shards: u16) -> Self {
        Self {
            index: NodeIndex(index),
            storage_role: StorageRole::ReadWrite,
            num_shards,
            generation: 1,
            location: NodeLocation::default(),
        }
    }

    /// Iterate over the shard ids of this node.
    pub fn shards(&self) -> impl Iterator<Item = ShardId> + '_ {
        (0..self.num_shards).map(|s| ShardId {
            node: self.index,
            shard: ShardIndex(s),
        })
    }
}

/// The cluster configuration: the set of known nodes and their roles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Monotonic configuration version.
    pub version: u64,
    /// All nodes, keyed by index.
    pub nodes: BTreeMap<NodeIndex, NodeDescriptor>,
}

impl ClusterConfig {
    /// Build a config of `n` uniform read-write storage nodes.
    pub fn uniform(n: u16, num_shards: u16) -> Self {
        let nodes = (0..n)
            .map(|i| (NodeIndex(i), NodeDescriptor::storage(i, num_shards)))
            .collect();
        Self { version: 1, nodes }
    }

    /// Whether the node is present in this configuration.
    pub fn contains(&self, node: NodeIndex) -> bool {
        self.nodes.contains_key(&node)
    }

    /// The node's descriptor, if present.
    pub fn node(&self, node: NodeIndex) -> Option<&NodeDescriptor> {
        self.nodes.get(&node)
    }

    /// The node's storage role, if present.
    pub fn storage_role(&self, node: NodeIndex) -> Option<StorageRole> {
        self.nodes.get(&node).map(|d| d.storage_role)
    }

    /// Number of nodes in the configuration.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

// ---------------------------------------------------------------------------
// Logs configuration (enumeration input)
// ---------------------------------------------------------------------------

/// Attributes of a log relevant to rebuilding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogAttributes {
    /// Retention: records older than this are expired. `None` means the
    /// log is kept forever.
    pub backlog: Option<Duration>,
    /// Internal logs carry administrative state, not user data.
    pub internal: bool,
}

/// The locally-loaded logs configuration consumed by the log enumerator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogsConfig {
    /// All data and internal logs, keyed by id.
    pub logs: BTreeMap<LogId, LogAttributes>,
}

impl LogsConfig {
    /// Add a log with the given attributes.
    pub fn with_log(mut self, id: u64, attrs: LogAttributes) -> Self {
        self.logs.insert(LogId(id), attrs);
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
