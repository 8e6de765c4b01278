//! TOML configuration for the Braid daemon.
//!
//! Durations are written as human strings (`"1s"`, `"500ms"`); unset
//! rebuilding knobs fall back to the semantic defaults of
//! [`SupervisorSettings`].

use std::path::Path;

use braid_types::{ClusterConfig, SupervisorSettings, parse_duration};
use serde::Deserialize;

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Local node identity and endpoints.
    pub node: NodeSection,
    /// Cluster shape.
    pub cluster: ClusterSection,
    /// Rebuilding supervisor knobs.
    pub rebuilding: RebuildingSection,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[node]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// This node's index in the cluster configuration.
    pub index: u16,
    /// Address for the textual admin endpoint.
    pub admin_addr: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            index: 0,
            admin_addr: "127.0.0.1:5440".to_string(),
        }
    }
}

/// `[cluster]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ClusterSection {
    /// Number of nodes in the cluster.
    pub nodes: u16,
    /// Shards per storage node.
    pub shards_per_node: u16,
}

impl Default for ClusterSection {
    fn default() -> Self {
        Self {
            nodes: 1,
            shards_per_node: 1,
        }
    }
}

/// `[rebuilding]` section. Every field is optional; unset knobs keep
/// their defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RebuildingSection {
    /// Master switch for self-initiated rebuilding.
    pub enable_self_initiated_rebuilding: Option<bool>,
    /// Grace period before a trigger is admitted (e.g. `"1s"`).
    pub self_initiated_rebuilding_grace_period: Option<String>,
    /// Maximum percentage of nodes rebuilding concurrently.
    pub max_node_rebuilding_percentage: Option<u32>,
    /// Trigger queue capacity (distinct nodes).
    pub max_rebuilding_trigger_queue_size: Option<usize>,
    /// Skip data logs with finite backlog during enumeration.
    pub disable_data_log_rebuilding: Option<bool>,
    /// Replay-tail settle window (e.g. `"10ms"`).
    pub event_log_grace_period: Option<String>,
    /// Alive-peer floor below which the node declares itself isolated.
    pub min_gossips_for_stable_state: Option<usize>,
    /// Transitional legacy log-to-shard mapping switch.
    pub use_legacy_log_to_shard_mapping_in_rebuilding: Option<bool>,
    /// Fixed re-evaluation tick (e.g. `"500ms"`).
    pub recheck_interval: Option<String>,
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CliConfig {
    /// Load config from a TOML file, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)?;
                let config: CliConfig = toml::from_str(&content)?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// The cluster configuration this node believes in: uniform storage
    /// nodes per the `[cluster]` section.
    pub fn cluster_config(&self) -> ClusterConfig {
        ClusterConfig::uniform(self.cluster.nodes, self.cluster.shards_per_node)
    }

    /// Effective supervisor settings: defaults overridden by whatever the
    /// `[rebuilding]` section sets.
    pub fn supervisor_settings(&self) -> SupervisorSettings {
        let mut settings = SupervisorSettings::default();
        let section = &self.rebuilding;

        if let Some(v) = section.enable_self_initiated_rebuilding {
            settings.enable_self_initiated_rebuilding = v;
        }
        if let Some(d) = section
            .self_initiated_rebuilding_grace_period
            .as_deref()
            .and_then(parse_duration)
        {
            settings.self_initiated_rebuilding_grace_period = d;
        }
        if let Some(v) = section.max_node_rebuilding_percentage {
            settings.max_node_rebuilding_percentage = v;
        }
        if let Some(v) = section.max_rebuilding_trigger_queue_size {
            settings.max_rebuilding_trigger_queue_size = v;
        }
        if let Some(v) = section.disable_data_log_rebuilding {
            settings.disable_data_log_rebuilding = v;
        }
        if let Some(d) = section
            .event_log_grace_period
            .as_deref()
            .and_then(parse_duration)
        {
            settings.event_log_grace_period = d;
        }
        if let Some(v) = section.min_gossips_for_stable_state {
            settings.min_gossips_for_stable_state = v;
        }
        if let Some(v) = section.use_legacy_log_to_shard_mapping_in_rebuilding {
            settings.use_legacy_log_to_shard_mapping_in_rebuilding = v;
        }
        if let Some(d) = section.recheck_interval.as_deref().and_then(parse_duration) {
            settings.recheck_interval = d;
        }

        settings
    }
}
