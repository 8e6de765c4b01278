//! Textual admin endpoint.
//!
//! A line-based TCP surface for operators and tests:
//!
//! ```text
//! set <knob> <value> [--ttl <duration>|max]   update a rebuilding setting
//! mark <node> alive|dead|suspect              drive the failure detector
//! stats                                       dump the exported counters
//! info                                        node, leader, isolation state
//! ```
//!
//! Every response ends with a line containing only `END`. A TTL'd `set`
//! reverts to the previous value when the TTL expires; `--ttl max` makes
//! the change permanent.

use std::sync::Arc;

use braid_cluster::ViewPublisher;
use braid_supervisor::{SettingsHandle, SupervisorStats, leader};
use braid_types::{NodeIndex, NodeState, parse_duration};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Admin command server for one node.
pub struct AdminServer {
    node: NodeIndex,
    settings: SettingsHandle,
    stats: Arc<SupervisorStats>,
    publisher: Arc<Mutex<ViewPublisher>>,
}

impl AdminServer {
    /// Create an admin server over the node's shared state.
    pub fn new(
        node: NodeIndex,
        settings: SettingsHandle,
        stats: Arc<SupervisorStats>,
        publisher: Arc<Mutex<ViewPublisher>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            node,
            settings,
            stats,
            publisher,
        })
    }

    /// Accept connections forever. Spawn as a background task.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        info!(addr = ?listener.local_addr().ok(), "admin endpoint listening");
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, "admin connection accepted");
                    let server = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(stream).await {
                            debug!(%peer, error = %e, "admin connection closed");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "admin accept failed");
                }
            }
        }
    }

    async fn handle_connection(&self, stream: TcpStream) -> std::io::Result<()> {
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line == "quit" {
                break;
            }
            let mut reply = self.dispatch(line).await;
            reply.push_str("\nEND\n");
            write_half.write_all(reply.as_bytes()).await?;
        }
        Ok(())
    }

    /// Execute one command line and render the response body.
    pub async fn dispatch(&self, line: &str) -> String {
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            ["set", knob, value, rest @ ..] => self.cmd_set(knob, value, rest),
            ["mark", node, state] => self.cmd_mark(node, state).await,
            ["stats"] => self
                .stats
                .snapshot()
                .into_iter()
                .map(|(name, value)| format!("{name} {value}"))
                .collect::<Vec<_>>()
                .join("\n"),
            ["info"] => self.cmd_info().await,
            _ => format!("ERROR unknown command: {line}"),
        }
    }

    fn cmd_set(&self, knob: &str, value: &str, rest: &[&str]) -> String {
        let ttl = match rest {
            [] | ["--ttl", "max"] => None,
            ["--ttl", d] => match parse_duration(d) {
                Some(d) => Some(d),
                None => return format!("ERROR invalid ttl: {d}"),
            },
            _ => return format!("ERROR unexpected arguments: {}", rest.join(" ")),
        };

        match self.settings.apply(knob, value) {
            Ok(previous) => {
                info!(knob, value, ?ttl, "setting updated via admin");
                if let Some(ttl) = ttl {
                    let settings = self.settings.clone();
                    let knob = knob.to_string();
                    let previous_value = previous.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(ttl).await;
                        match settings.apply(&knob, &previous_value) {
                            Ok(_) => info!(knob, value = %previous_value, "ttl expired, setting reverted"),
                            Err(e) => warn!(knob, error = %e, "failed to revert ttl'd setting"),
                        }
                    });
                }
                format!("OK {knob} = {value} (was {previous})")
            }
            Err(e) => format!("ERROR {e}"),
        }
    }

    async fn cmd_mark(&self, node: &str, state: &str) -> String {
        let Ok(index) = node.trim_start_matches(['N', 'n']).parse::<u16>() else {
            return format!("ERROR invalid node index: {node}");
        };
        let state = match state {
            "alive" => NodeState::Alive,
            "dead" => NodeState::Dead,
            "suspect" => NodeState::Suspect,
            other => return format!("ERROR invalid state: {other}"),
        };
        self.publisher
            .lock()
            .await
            .set_node_state(NodeIndex(index), state);
        format!("OK N{index} marked {state:?}")
    }

    async fn cmd_info(&self) -> String {
        let view = self.publisher.lock().await.current();
        let leader = leader::rebuilding_leader(&view)
            .map(|n| n.to_string())
            .unwrap_or_else(|| "none".to_string());
        format!(
            "node {}\nconfig_version {}\nnodes {}\nleader {}\nisolated {}",
            self.node,
            view.config.version,
            view.config.node_count(),
            leader,
            view.isolated,
        )
    }
}
