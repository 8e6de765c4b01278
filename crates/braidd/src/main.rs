//! `braidd` — the Braid storage node daemon.
//!
//! Runs the rebuilding supervisor for one node: cluster view, event-log
//! replay, trigger admission, and the admin command endpoint.
//!
//! # Usage
//!
//! ```text
//! braidd start                       # run a node with default config
//! braidd start -c braid.toml         # run with a config file
//! braidd simulate -n 5 -s 2 -k 4     # in-process 5-node cluster, kill N4
//! ```

mod admin;
mod config;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use braid_cluster::{FailureDetectorView, ViewPublisher};
use braid_eventlog::{EventLog, EventRecord, SharedEventLog};
use braid_supervisor::{SettingsHandle, SupervisorHandle, supervisor};
use braid_types::{ClusterConfig, NodeIndex, NodeState, SupervisorSettings};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{info, warn};

use admin::AdminServer;
use config::CliConfig;

#[derive(Parser)]
#[command(name = "braidd", version, about = "Braid storage node daemon")]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the node's rebuilding supervisor and admin endpoint.
    Start {
        /// Override the node index from the config file.
        #[arg(short = 'n', long)]
        node_index: Option<u16>,
    },

    /// Run an in-process multi-node cluster, kill one node, and print
    /// the resulting event-log records and counters.
    Simulate {
        /// Number of nodes.
        #[arg(short = 'n', long, default_value = "5")]
        nodes: u16,

        /// Shards per node.
        #[arg(short = 's', long, default_value = "2")]
        shards: u16,

        /// Node to kill.
        #[arg(short = 'k', long, default_value = "4")]
        kill: u16,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;
    telemetry::init(&config.log.level);

    match cli.command {
        Commands::Start { node_index } => {
            if let Some(index) = node_index {
                config.node.index = index;
            }
            cmd_start(config).await
        }
        Commands::Simulate {
            nodes,
            shards,
            kill,
        } => cmd_simulate(nodes, shards, kill).await,
    }
}

// -----------------------------------------------------------------------
// braidd start
// -----------------------------------------------------------------------

async fn cmd_start(config: CliConfig) -> Result<()> {
    let local = NodeIndex(config.node.index);
    let cluster_config = config.cluster_config();
    anyhow::ensure!(
        cluster_config.contains(local),
        "node index {} not in the {}-node cluster config",
        config.node.index,
        cluster_config.node_count(),
    );

    let settings = config.supervisor_settings();
    info!(
        node = %local,
        nodes = cluster_config.node_count(),
        admin = %config.node.admin_addr,
        enabled = settings.enable_self_initiated_rebuilding,
        "starting braidd"
    );

    // The local failure detector starts out seeing every node alive; the
    // gossip transport (or the admin `mark` command) drives it from here.
    let detector = FailureDetectorView::all_alive(cluster_config.nodes.keys().copied());
    let min_gossips = settings.min_gossips_for_stable_state;
    let (publisher, view_rx) = ViewPublisher::new(local, cluster_config, detector, min_gossips);
    let publisher = Arc::new(Mutex::new(publisher));

    let event_log = SharedEventLog::new();
    let settings_handle = SettingsHandle::new(settings);
    let handle = supervisor::start(
        local,
        settings_handle.clone(),
        view_rx,
        event_log.clone() as Arc<dyn EventLog>,
    );

    let listener = TcpListener::bind(&config.node.admin_addr)
        .await
        .with_context(|| format!("failed to bind admin endpoint {}", config.node.admin_addr))?;
    let admin = AdminServer::new(
        local,
        settings_handle,
        handle.stats().clone(),
        publisher.clone(),
    );
    tokio::spawn(admin.serve(listener));

    shutdown_signal().await;

    info!("shutting down");
    handle.abort();
    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl-C).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received SIGINT, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}

// -----------------------------------------------------------------------
// braidd simulate
// -----------------------------------------------------------------------

async fn cmd_simulate(nodes: u16, shards: u16, kill: u16) -> Result<()> {
    anyhow::ensure!(nodes >= 2, "need at least two nodes");
    anyhow::ensure!(kill < nodes, "kill target must be a valid node index");

    println!("Braid rebuilding simulation");
    println!("  nodes:  {nodes} × {shards} shards");
    println!("  victim: N{kill}");
    println!();

    let cluster_config = ClusterConfig::uniform(nodes, shards);
    let event_log = SharedEventLog::new();

    let mut settings = SupervisorSettings::default();
    settings.enable_self_initiated_rebuilding = true;
    settings.self_initiated_rebuilding_grace_period = Duration::from_millis(200);
    settings.recheck_interval = Duration::from_millis(50);
    settings.min_gossips_for_stable_state = 1;

    // One publisher + supervisor per node, all over the same event log.
    let mut cluster: Vec<(ViewPublisher, SupervisorHandle)> = (0..nodes)
        .map(|i| {
            let detector = FailureDetectorView::all_alive(cluster_config.nodes.keys().copied());
            let (publisher, view_rx) = ViewPublisher::new(
                NodeIndex(i),
                cluster_config.clone(),
                detector,
                settings.min_gossips_for_stable_state,
            );
            let handle = supervisor::start(
                NodeIndex(i),
                SettingsHandle::new(settings.clone()),
                view_rx,
                event_log.clone() as Arc<dyn EventLog>,
            );
            (publisher, handle)
        })
        .collect();

    // Kill the victim: every surviving node's detector sees it dead.
    println!("killing N{kill}...");
    cluster[kill as usize].1.abort();
    for (i, (publisher, _)) in cluster.iter_mut().enumerate() {
        if i != kill as usize {
            publisher.set_node_state(NodeIndex(kill), NodeState::Dead);
        }
    }

    // Wait for the leader to publish one rebuild per shard of the victim.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let triggered: u64 = cluster
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != kill as usize)
            .filter_map(|(_, (_, h))| h.stats().get("shard_rebuilding_triggered"))
            .sum();
        if triggered >= shards as u64 {
            break;
        }
        if tokio::time::Instant::now() > deadline {
            warn!("timed out waiting for rebuildings");
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    println!();
    println!("event log:");
    for (lsn, record) in event_log.records() {
        match record {
            EventRecord::ShardNeedsRebuild { shard, .. } => {
                println!("  {lsn}: SHARD_NEEDS_REBUILD {shard}");
            }
            other => println!("  {lsn}: {other:?}"),
        }
    }

    println!();
    println!("per-node counters:");
    for (i, (_, handle)) in cluster.iter().enumerate() {
        if i == kill as usize {
            println!("  N{i}: (killed)");
            continue;
        }
        let stats = handle.stats().snapshot();
        println!(
            "  N{i}: triggered={} scheduled={}",
            stats["shard_rebuilding_triggered"], stats["shard_rebuilding_scheduled"],
        );
    }

    for (_, handle) in &cluster {
        handle.abort();
    }
    Ok(())
}
