//! Append/read contract for the event log, and the in-process
//! implementation.
//!
//! The supervisor only appends records and replays the tail; the log's
//! replication is someone else's problem. [`SharedEventLog`] gives every
//! node of an in-process cluster the same totally-ordered sequence: a
//! mutex-guarded vector of encoded records plus a broadcast channel for
//! live tailing. Entries are stored encoded — the same bytes a real
//! replicated log would carry — and decoded on replay.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use braid_types::Lsn;
use tokio::sync::broadcast;
use tracing::warn;

use crate::record::EventRecord;
use crate::set::RebuildingSet;

/// Broadcast capacity for live tails.
const TAIL_CHANNEL_CAPACITY: usize = 256;

/// Errors from event-log operations.
#[derive(Debug, thiserror::Error)]
pub enum EventLogError {
    /// A conditional append lost the race: the rebuilding-set version the
    /// writer observed is no longer current.
    #[error("append rejected: current version is {current}")]
    Rejected {
        /// The version the log's state machine holds now.
        current: Lsn,
    },
    /// Record encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(String),
    /// The log has shut down.
    #[error("event log closed")]
    Closed,
}

/// Append/subscribe contract for the cluster's event log.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append a record. For `ShardNeedsRebuild` the log's state machine
    /// compares the record's `conditional_version` against the current
    /// rebuilding-set version and rejects the append on mismatch, so a
    /// concurrent update is never clobbered.
    async fn append(&self, record: EventRecord) -> Result<Lsn, EventLogError>;

    /// Subscribe to the log: yields every entry from LSN 1, then the live
    /// tail as records are appended.
    fn subscribe(&self) -> EventLogTail;

    /// LSN of the last appended record.
    fn tail_lsn(&self) -> Lsn;
}

struct Inner {
    /// Encoded records; index `i` holds LSN `i + 1`.
    entries: Vec<Vec<u8>>,
    /// Replica of the rebuilding set, used to validate conditional appends.
    set: RebuildingSet,
}

/// In-process event log shared by every node of a simulated cluster.
pub struct SharedEventLog {
    inner: Mutex<Inner>,
    tail_tx: broadcast::Sender<(Lsn, EventRecord)>,
}

impl SharedEventLog {
    /// Create an empty log.
    pub fn new() -> Arc<Self> {
        let (tail_tx, _) = broadcast::channel(TAIL_CHANNEL_CAPACITY);
        Arc::new(Self {
            inner: Mutex::new(Inner {
                entries: Vec::new(),
                set: RebuildingSet::default(),
            }),
            tail_tx,
        })
    }

    /// Decode and return all records appended so far, with their LSNs.
    ///
    /// Test and tooling helper; replaying consumers should use
    /// [`EventLog::subscribe`].
    pub fn records(&self) -> Vec<(Lsn, EventRecord)> {
        let inner = self.inner.lock().expect("event log lock poisoned");
        inner
            .entries
            .iter()
            .enumerate()
            .filter_map(|(i, bytes)| {
                EventRecord::decode(bytes)
                    .ok()
                    .map(|r| (Lsn(i as u64 + 1), r))
            })
            .collect()
    }
}

#[async_trait]
impl EventLog for SharedEventLog {
    async fn append(&self, record: EventRecord) -> Result<Lsn, EventLogError> {
        let bytes = record.encode()?;
        let mut inner = self.inner.lock().expect("event log lock poisoned");

        if let EventRecord::ShardNeedsRebuild {
            conditional_version,
            ..
        } = &record
            && *conditional_version != inner.set.version()
        {
            return Err(EventLogError::Rejected {
                current: inner.set.version(),
            });
        }

        let lsn = Lsn(inner.entries.len() as u64 + 1);
        inner.entries.push(bytes);
        inner.set.apply(lsn, &record);
        drop(inner);

        // No receivers is fine — nobody is tailing yet.
        let _ = self.tail_tx.send((lsn, record));
        Ok(lsn)
    }

    fn subscribe(&self) -> EventLogTail {
        // Snapshot the backlog and subscribe under the same lock so no
        // entry can fall between the snapshot and the live stream.
        let inner = self.inner.lock().expect("event log lock poisoned");
        let rx = self.tail_tx.subscribe();
        let backlog = inner
            .entries
            .iter()
            .enumerate()
            .filter_map(|(i, bytes)| {
                EventRecord::decode(bytes)
                    .ok()
                    .map(|r| (Lsn(i as u64 + 1), r))
            })
            .collect();
        EventLogTail {
            backlog,
            rx,
            last_seen: Lsn::INVALID,
        }
    }

    fn tail_lsn(&self) -> Lsn {
        let inner = self.inner.lock().expect("event log lock poisoned");
        Lsn(inner.entries.len() as u64)
    }
}

/// A replay cursor over the event log: backlog first, then the live tail.
pub struct EventLogTail {
    backlog: VecDeque<(Lsn, EventRecord)>,
    rx: broadcast::Receiver<(Lsn, EventRecord)>,
    last_seen: Lsn,
}

impl EventLogTail {
    /// Next entry in LSN order, or `None` once the log has shut down.
    /// Entries already yielded from the backlog are skipped when they show
    /// up again on the live stream.
    pub async fn next(&mut self) -> Option<(Lsn, EventRecord)> {
        if let Some((lsn, record)) = self.backlog.pop_front() {
            self.last_seen = lsn;
            return Some((lsn, record));
        }

        loop {
            match self.rx.recv().await {
                Ok((lsn, record)) => {
                    if lsn <= self.last_seen {
                        continue;
                    }
                    self.last_seen = lsn;
                    return Some((lsn, record));
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "event log tail lagged behind appends");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
