//! Event-log writer: dispatches appends and reports completions.
//!
//! Appends never block the supervisor loop. The writer spawns one task per
//! append and posts the outcome back through a channel the loop selects
//! on. At most one append is in flight at a time: each `ShardNeedsRebuild`
//! carries the rebuilding-set version the loop observed, and a second
//! append dispatched before the first lands would always lose the
//! conditional-version race against it.

use std::sync::Arc;

use braid_eventlog::{EventLog, EventLogError, EventRecord};
use braid_types::{Lsn, ShardId};
use tokio::sync::mpsc;

/// Completion of a dispatched append.
#[derive(Debug)]
pub(crate) enum AppendOutcome {
    /// The record was appended at the given LSN.
    Appended { shard: ShardId, lsn: Lsn },
    /// The conditional-version check failed; the set moved underneath us.
    VersionMismatch { shard: ShardId, current: Lsn },
    /// The append failed for another reason.
    Failed { shard: ShardId, error: EventLogError },
}

/// Dispatches appends to the event log, one at a time.
pub(crate) struct EventLogWriter {
    log: Arc<dyn EventLog>,
    outcome_tx: mpsc::UnboundedSender<AppendOutcome>,
    inflight: Option<ShardId>,
}

impl EventLogWriter {
    /// Create a writer and the completion channel the loop consumes.
    pub(crate) fn new(
        log: Arc<dyn EventLog>,
    ) -> (Self, mpsc::UnboundedReceiver<AppendOutcome>) {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        (
            Self {
                log,
                outcome_tx,
                inflight: None,
            },
            outcome_rx,
        )
    }

    /// Whether an append is currently in flight.
    pub(crate) fn busy(&self) -> bool {
        self.inflight.is_some()
    }

    /// Dispatch an append. The caller must check [`busy`](Self::busy) first.
    pub(crate) fn submit(&mut self, record: EventRecord) {
        let shard = record.shard();
        self.inflight = Some(shard);
        let log = self.log.clone();
        let tx = self.outcome_tx.clone();
        tokio::spawn(async move {
            let outcome = match log.append(record).await {
                Ok(lsn) => AppendOutcome::Appended { shard, lsn },
                Err(EventLogError::Rejected { current }) => {
                    AppendOutcome::VersionMismatch { shard, current }
                }
                Err(error) => AppendOutcome::Failed { shard, error },
            };
            // The loop may have shut down; the outcome is then moot.
            let _ = tx.send(outcome);
        });
    }

    /// Mark the in-flight append as completed.
    pub(crate) fn complete(&mut self) {
        self.inflight = None;
    }
}
