//! Runtime-updateable rebuilding settings.
//!
//! Settings can be changed while the supervisor runs, either from the
//! daemon config file or through the admin `set` command. Knob names use
//! the dashed form (`enable-self-initiated-rebuilding`) on the admin
//! surface; [`SupervisorSettings::apply_kv`] parses one assignment and
//! returns the previous value so a TTL'd change can be reverted.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// All rebuilding-supervisor knobs with their semantic defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorSettings {
    /// Master switch: when off, triggers accumulate but nothing is
    /// admitted or published.
    pub enable_self_initiated_rebuilding: bool,
    /// Grace period between observing a bad state and admitting the
    /// trigger; absorbs failure-detector flaps.
    pub self_initiated_rebuilding_grace_period: Duration,
    /// Maximum percentage of in-config nodes that may be FULL-rebuilding
    /// at once.
    pub max_node_rebuilding_percentage: u32,
    /// Capacity of the trigger queue, counted in distinct nodes.
    pub max_rebuilding_trigger_queue_size: usize,
    /// Skip data logs with finite backlog during enumeration.
    pub disable_data_log_rebuilding: bool,
    /// How long to wait for the event-log replay tail to settle before
    /// trusting the authoritative rebuilding set.
    pub event_log_grace_period: Duration,
    /// Minimum number of alive peers required to consider the local
    /// failure-detector view stable; below this the node declares itself
    /// isolated and stops publishing.
    pub min_gossips_for_stable_state: usize,
    /// Transitional: restrict enumeration to logs whose legacy
    /// log-to-shard mapping lands on the rebuilt shard.
    pub use_legacy_log_to_shard_mapping_in_rebuilding: bool,
    /// Enumerate internal logs as well as data logs.
    pub rebuild_internal_logs: bool,
    /// Enumerate metadata logs through the storage task.
    pub rebuild_metadata_logs: bool,
    /// Fixed re-evaluation tick of the supervisor loop, alongside
    /// event-driven wake-ups.
    pub recheck_interval: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            enable_self_initiated_rebuilding: false,
            self_initiated_rebuilding_grace_period: Duration::from_secs(1),
            max_node_rebuilding_percentage: 35,
            max_rebuilding_trigger_queue_size: 100,
            disable_data_log_rebuilding: false,
            event_log_grace_period: Duration::from_millis(10),
            min_gossips_for_stable_state: 3,
            use_legacy_log_to_shard_mapping_in_rebuilding: false,
            rebuild_internal_logs: false,
            rebuild_metadata_logs: true,
            recheck_interval: Duration::from_millis(500),
        }
    }
}

/// Error applying a settings assignment.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// The knob name is not recognised.
    #[error("unknown setting: {0}")]
    UnknownSetting(String),
    /// The value does not parse for the knob's type.
    #[error("invalid value {value:?} for {name}: {reason}")]
    InvalidValue {
        /// The knob being assigned.
        name: String,
        /// The rejected value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl SupervisorSettings {
    /// Apply a single `name = value` assignment using the dashed admin
    /// knob names. Returns the previous value rendered as a string, so
    /// the caller can revert a TTL'd change.
    pub fn apply_kv(&mut self, name: &str, value: &str) -> Result<String, SettingsError> {
        let invalid = |reason: &str| SettingsError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        };

        match name {
            "enable-self-initiated-rebuilding" => {
                let old = self.enable_self_initiated_rebuilding.to_string();
                self.enable_self_initiated_rebuilding =
                    value.parse().map_err(|_| invalid("expected true/false"))?;
                Ok(old)
            }
            "self-initiated-rebuilding-grace-period" => {
                let old = format_duration(self.self_initiated_rebuilding_grace_period);
                self.self_initiated_rebuilding_grace_period =
                    parse_duration(value).ok_or_else(|| invalid("expected a duration"))?;
                Ok(old)
            }
            "max-node-rebuilding-percentage" => {
                let old = self.max_node_rebuilding_percentage.to_string();
                self.max_node_rebuilding_percentage =
                    value.parse().map_err(|_| invalid("expected a percentage"))?;
                Ok(old)
            }
            "max-rebuilding-trigger-queue-size" => {
                let old = self.max_rebuilding_trigger_queue_size.to_string();
                self.max_rebuilding_trigger_queue_size =
                    value.parse().map_err(|_| invalid("expected a count"))?;
                Ok(old)
            }
            "disable-data-log-rebuilding" => {
                let old = self.disable_data_log_rebuilding.to_string();
                self.disable_data_log_rebuilding =
                    value.parse().map_err(|_| invalid("expected true/false"))?;
                Ok(old)
            }
            "event-log-grace-period" => {
                let old = format_duration(self.event_log_grace_period);
                self.event_log_grace_period =
                    parse_duration(value).ok_or_else(|| invalid("expected a duration"))?;
                Ok(old)
            }
            "min-gossips-for-stable-state" => {
                let old = self.min_gossips_for_stable_state.to_string();
                self.min_gossips_for_stable_state =
                    value.parse().map_err(|_| invalid("expected a count"))?;
                Ok(old)
            }
            "use-legacy-log-to-shard-mapping-in-rebuilding" => {
                let old = self.use_legacy_log_to_shard_mapping_in_rebuilding.to_string();
                self.use_legacy_log_to_shard_mapping_in_rebuilding =
                    value.parse().map_err(|_| invalid("expected true/false"))?;
                Ok(old)
            }
            "rebuild-internal-logs" => {
                let old = self.rebuild_internal_logs.to_string();
                self.rebuild_internal_logs =
                    value.parse().map_err(|_| invalid("expected true/false"))?;
                Ok(old)
            }
            "rebuild-metadata-logs" => {
                let old = self.rebuild_metadata_logs.to_string();
                self.rebuild_metadata_logs =
                    value.parse().map_err(|_| invalid("expected true/false"))?;
                Ok(old)
            }
            "recheck-interval" => {
                let old = format_duration(self.recheck_interval);
                self.recheck_interval =
                    parse_duration(value).ok_or_else(|| invalid("expected a duration"))?;
                Ok(old)
            }
            other => Err(SettingsError::UnknownSetting(other.to_string())),
        }
    }
}

/// Parse a human-readable duration: `"30s"`, `"500ms"`, `"2m"`, `"1h"`,
/// or a raw number of milliseconds (`"1500"`).
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(num) = s.strip_suffix("ms") {
        num.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(num) = s.strip_suffix('s') {
        num.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(num) = s.strip_suffix('m') {
        num.trim().parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else if let Some(num) = s.strip_suffix('h') {
        num.trim()
            .parse::<u64>()
            .ok()
            .map(|h| Duration::from_secs(h * 3600))
    } else {
        s.parse::<u64>().ok().map(Duration::from_millis)
    }
}

/// Render a duration in the most compact unit that loses no precision.
fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms % 1000 == 0 {
        format!("{}s", ms / 1000)
    } else {
        format!("{ms}ms")
    }
}
