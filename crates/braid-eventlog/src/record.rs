//! Event-log record variants.
//!
//! Records form a closed tagged union with explicit encode/decode; readers
//! dispatch by `match`. The encoding carries a format version byte so that
//! replaying nodes reject payloads from a future format instead of
//! misinterpreting them.

use braid_types::{Lsn, NodeIndex, ShardId, TimeRange};
use serde::{Deserialize, Serialize};

use crate::log::EventLogError;

/// Current record format version.
pub const RECORD_VERSION: u8 = 1;

/// Flags carried by a `ShardNeedsRebuild` record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildFlags {
    /// Restart the rebuilding even if one is already running for the shard.
    pub force_restart: bool,
    /// The rebuilding covers only the attached time ranges (mini
    /// rebuilding); invisible to the concurrency threshold.
    pub time_ranged: bool,
}

/// An administrative record in the event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventRecord {
    /// A shard lost replication and must be re-replicated.
    ShardNeedsRebuild {
        /// The shard to rebuild.
        shard: ShardId,
        /// The rebuilding-set version the writer observed; the log rejects
        /// the append when the actual current version differs, so racing
        /// publishers cannot clobber each other.
        conditional_version: Lsn,
        /// Rebuild flags.
        flags: RebuildFlags,
        /// Dirty time ranges for a time-ranged rebuilding.
        time_ranges: Option<Vec<TimeRange>>,
    },
    /// An in-progress rebuilding is no longer needed.
    ShardAbortRebuild {
        /// The shard whose rebuilding is aborted.
        shard: ShardId,
    },
    /// A donor finished contributing its copies for a rebuilding shard.
    ShardIsRebuilt {
        /// The donor that finished.
        donor: NodeIndex,
        /// The shard being rebuilt.
        shard: ShardId,
        /// The rebuilding version the donor worked against.
        version: Lsn,
    },
    /// The shard's owner acknowledged the completed rebuilding (terminal).
    ShardAckRebuilt {
        /// The acknowledging node (the shard owner).
        node: NodeIndex,
        /// The rebuilt shard.
        shard: ShardId,
        /// The acknowledged rebuilding version.
        version: Lsn,
    },
}

impl EventRecord {
    /// Build a full-rebuild request.
    pub fn needs_rebuild(shard: ShardId, conditional_version: Lsn) -> Self {
        EventRecord::ShardNeedsRebuild {
            shard,
            conditional_version,
            flags: RebuildFlags::default(),
            time_ranges: None,
        }
    }

    /// Build a time-ranged (mini) rebuild request.
    pub fn needs_mini_rebuild(
        shard: ShardId,
        conditional_version: Lsn,
        time_ranges: Vec<TimeRange>,
    ) -> Self {
        EventRecord::ShardNeedsRebuild {
            shard,
            conditional_version,
            flags: RebuildFlags {
                force_restart: false,
                time_ranged: true,
            },
            time_ranges: Some(time_ranges),
        }
    }

    /// The shard this record is about.
    pub fn shard(&self) -> ShardId {
        match self {
            EventRecord::ShardNeedsRebuild { shard, .. }
            | EventRecord::ShardAbortRebuild { shard }
            | EventRecord::ShardIsRebuilt { shard, .. }
            | EventRecord::ShardAckRebuilt { shard, .. } => *shard,
        }
    }

    /// Encode the record, prefixed by the format version byte.
    pub fn encode(&self) -> Result<Vec<u8>, EventLogError> {
        let mut buf = vec![RECORD_VERSION];
        let body = postcard::to_allocvec(self)
            .map_err(|e| EventLogError::Codec(e.to_string()))?;
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Decode a record, checking the format version byte.
    pub fn decode(bytes: &[u8]) -> Result<Self, EventLogError> {
        match bytes.split_first() {
            Some((&RECORD_VERSION, body)) => {
                postcard::from_bytes(body).map_err(|e| EventLogError::Codec(e.to_string()))
            }
            Some((&other, _)) => Err(EventLogError::Codec(format!(
                "unsupported record version {other}"
            ))),
            None => Err(EventLogError::Codec("empty payload".to_string())),
        }
    }
}
