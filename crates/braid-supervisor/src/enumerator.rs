//! Log enumeration for the re-replication engine.
//!
//! When a shard starts rebuilding, the engine asks the enumerator for the
//! set of logs it must read and a starting timestamp per log. The helper
//! is single-shot: it posts exactly one [`EnumerationResult`] into the
//! caller's queue and is consumed.
//!
//! Data logs come from the local logs config. The starting timestamp
//! approximates where live records begin: `now − backlog` for logs with
//! finite retention, negative infinity otherwise. Precision does not
//! matter — the goal is that the first read batch finds records instead of
//! stopping at the first expired one. Metadata logs are listed through a
//! storage task, retried with rate-limited warnings until it succeeds or
//! the caller goes away.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use braid_types::{
    LogId, LogsConfig, Lsn, RecordTimestamp, ShardIndex, SupervisorSettings,
};
use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::StorageTaskError;

/// Base delay between storage-task retries.
const RETRY_DELAY: Duration = Duration::from_millis(500);
/// Minimum spacing between retry warnings.
const WARN_INTERVAL: Duration = Duration::from_secs(10);

/// Storage task that lists the metadata logs present on a shard.
#[async_trait]
pub trait MetadataLogStore: Send + Sync {
    /// List the metadata log ids stored on this shard.
    async fn list_metadata_logs(&self, num_shards: u16) -> Result<Vec<LogId>, StorageTaskError>;
}

/// The single completion message posted by the enumerator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumerationResult {
    /// The shard being rebuilt.
    pub shard: ShardIndex,
    /// The rebuilding version the enumeration belongs to.
    pub version: Lsn,
    /// Per-log starting timestamp for the rebuilding read.
    pub logs: BTreeMap<LogId, RecordTimestamp>,
    /// When data-log rebuilding is disabled, the longest backlog among the
    /// skipped logs: the caller must delay its "shard is rebuilt" signal by
    /// this much so readers keep counting the shard as rebuilding until
    /// the skipped data has expired.
    pub max_backlog: Option<Duration>,
}

/// Single-shot enumerator of the logs a shard rebuild must read.
pub struct LogEnumerator {
    shard: ShardIndex,
    num_shards: u16,
    version: Lsn,
    /// Lower bound for all starting timestamps (the lower edge of a
    /// time-ranged rebuild); [`RecordTimestamp::MIN`] for a full rebuild.
    min_timestamp: RecordTimestamp,
    logs_config: Arc<LogsConfig>,
    metadata_store: Arc<dyn MetadataLogStore>,
    settings: SupervisorSettings,
    retry_delay: Duration,
}

impl LogEnumerator {
    /// Create an enumerator for one shard rebuild.
    pub fn new(
        shard: ShardIndex,
        num_shards: u16,
        version: Lsn,
        min_timestamp: RecordTimestamp,
        logs_config: Arc<LogsConfig>,
        metadata_store: Arc<dyn MetadataLogStore>,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            shard,
            num_shards,
            version,
            min_timestamp,
            logs_config,
            metadata_store,
            settings,
            retry_delay: RETRY_DELAY,
        }
    }

    /// Shorten the retry delay so tests don't wait out real backoffs.
    #[cfg(test)]
    pub(crate) fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Run the enumeration and post the single completion message.
    pub fn start(self, completion_tx: mpsc::UnboundedSender<EnumerationResult>) {
        tokio::spawn(self.run(completion_tx));
    }

    async fn run(self, completion_tx: mpsc::UnboundedSender<EnumerationResult>) {
        let (mut logs, max_backlog) = self.enumerate_data_logs();

        if self.settings.rebuild_metadata_logs {
            let mut last_warn: Option<Instant> = None;
            loop {
                if completion_tx.is_closed() {
                    debug!(shard = %self.shard, "enumeration caller gone, giving up");
                    return;
                }
                match self
                    .metadata_store
                    .list_metadata_logs(self.num_shards)
                    .await
                {
                    Ok(ids) => {
                        for id in ids {
                            logs.insert(id, self.min_timestamp);
                        }
                        break;
                    }
                    Err(e) => {
                        if last_warn.is_none_or(|t| t.elapsed() >= WARN_INTERVAL) {
                            warn!(
                                shard = %self.shard,
                                version = %self.version,
                                error = %e,
                                "unable to enumerate metadata logs, retrying"
                            );
                            last_warn = Some(Instant::now());
                        }
                        let jitter = rand::rng().random_range(0..=self.retry_delay.as_millis() as u64 / 2);
                        tokio::time::sleep(self.retry_delay + Duration::from_millis(jitter)).await;
                    }
                }
            }
        }

        let result = EnumerationResult {
            shard: self.shard,
            version: self.version,
            logs,
            max_backlog,
        };
        // The caller may have shut down while we enumerated.
        let _ = completion_tx.send(result);
    }

    fn enumerate_data_logs(&self) -> (BTreeMap<LogId, RecordTimestamp>, Option<Duration>) {
        let now = RecordTimestamp::now();
        let mut result = BTreeMap::new();
        let mut max_backlog: Option<Duration> = None;
        let mut internal_skipped = 0u32;
        let mut data_skipped = 0u32;

        for (log_id, attrs) in &self.logs_config.logs {
            if attrs.internal && !self.settings.rebuild_internal_logs {
                internal_skipped += 1;
                continue;
            }

            if self.settings.disable_data_log_rebuilding
                && !attrs.internal
                && let Some(backlog) = attrs.backlog
            {
                // The caller will delay its completion signal until the
                // longest-lived skipped log has expired.
                if max_backlog.is_none_or(|m| backlog > m) {
                    max_backlog = Some(backlog);
                }
                data_skipped += 1;
                continue;
            }

            let mut start = match attrs.backlog {
                Some(backlog) => now.saturating_sub(backlog),
                None => RecordTimestamp::MIN,
            };
            // Never start below the lower bound of a time-ranged rebuild.
            start.store_max(self.min_timestamp);

            if !self.settings.use_legacy_log_to_shard_mapping_in_rebuilding
                || legacy_shard_for_log(*log_id, self.num_shards) == self.shard
            {
                result.insert(*log_id, start);
            }
        }

        info!(
            shard = %self.shard,
            internal_skipped,
            data_skipped,
            queued = result.len(),
            "log enumeration complete"
        );
        (result, max_backlog)
    }
}

/// Transitional log-to-shard mapping used before shard-aware placement.
fn legacy_shard_for_log(log: LogId, num_shards: u16) -> ShardIndex {
    ShardIndex((log.0 % num_shards.max(1) as u64) as u16)
}
