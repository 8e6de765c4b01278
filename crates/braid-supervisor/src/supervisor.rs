//! The supervisor loop.
//!
//! A single tokio task owns all supervisor state (trigger table,
//! event-log replica of the rebuilding set, local shard health) and
//! processes every input through one `tokio::select!` loop:
//!
//! - cluster-view updates from the [`ViewPublisher`](braid_cluster::ViewPublisher),
//! - the event-log replay tail,
//! - local shard-health reports posted through the handle,
//! - append completions from the [`EventLogWriter`](crate::writer::EventLogWriter),
//! - a fixed recheck tick.
//!
//! Each wake-up runs the same pass: diff the view against the trigger
//! table, fold in local health, then admit and publish. No step blocks;
//! event-log I/O is dispatched as tasks whose completions are posted back
//! here.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use braid_cluster::ClusterView;
use braid_eventlog::{EventLog, EventLogTail, EventRecord, RebuildingSet};
use braid_types::{
    CancelReason, Lsn, NodeIndex, NodeState, SettingsError, ShardHealth, ShardId, ShardIndex,
    SupervisorSettings, TriggerReason,
};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::admission::{self, AdmissionDecision};
use crate::error::SupervisorError;
use crate::metrics::SupervisorStats;
use crate::trigger::{InsertOutcome, PublishState, Trigger, TriggerTable};
use crate::writer::{AppendOutcome, EventLogWriter};

/// Shared, runtime-updateable settings.
///
/// The supervisor reads a snapshot at the top of every pass; the admin
/// endpoint and the daemon config loader write through the same handle.
#[derive(Clone)]
pub struct SettingsHandle {
    inner: Arc<RwLock<SupervisorSettings>>,
}

impl SettingsHandle {
    /// Wrap initial settings.
    pub fn new(settings: SupervisorSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    /// A coherent copy of the current settings.
    pub fn snapshot(&self) -> SupervisorSettings {
        self.inner.read().expect("settings lock poisoned").clone()
    }

    /// Apply one `name value` assignment (admin `set` command). Returns
    /// the previous value so a TTL'd change can be reverted.
    pub fn apply(&self, name: &str, value: &str) -> Result<String, SettingsError> {
        self.inner
            .write()
            .expect("settings lock poisoned")
            .apply_kv(name, value)
    }
}

/// A local shard-health observation from the storage layer.
#[derive(Debug, Clone, Copy)]
pub struct HealthReport {
    /// The local shard.
    pub shard: ShardIndex,
    /// Its observed health.
    pub health: ShardHealth,
}

/// Handle to a running supervisor.
pub struct SupervisorHandle {
    health_tx: mpsc::UnboundedSender<HealthReport>,
    settings: SettingsHandle,
    stats: Arc<SupervisorStats>,
    task: tokio::task::JoinHandle<()>,
}

impl SupervisorHandle {
    /// Post a local shard-health observation into the loop.
    pub fn report_shard_health(
        &self,
        shard: ShardIndex,
        health: ShardHealth,
    ) -> Result<(), SupervisorError> {
        self.health_tx
            .send(HealthReport { shard, health })
            .map_err(|_| SupervisorError::Stopped)
    }

    /// The runtime-updateable settings handle.
    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    /// The exported counters.
    pub fn stats(&self) -> &Arc<SupervisorStats> {
        &self.stats
    }

    /// Abort the supervisor task.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Whether the supervisor task is still running.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Start the supervisor for the local node.
///
/// The caller provides the view receiver from a
/// [`ViewPublisher`](braid_cluster::ViewPublisher) and the shared event
/// log. The supervisor subscribes to the log's replay tail itself so that
/// it observes every record from LSN 1.
pub fn start(
    local: NodeIndex,
    settings: SettingsHandle,
    view_rx: watch::Receiver<ClusterView>,
    event_log: Arc<dyn EventLog>,
) -> SupervisorHandle {
    let (health_tx, health_rx) = mpsc::unbounded_channel();
    let stats = SupervisorStats::new();
    let tail = event_log.subscribe();
    let (writer, outcome_rx) = EventLogWriter::new(event_log);
    let capacity = settings.snapshot().max_rebuilding_trigger_queue_size;

    let supervisor = Supervisor {
        local,
        settings: settings.clone(),
        view_rx,
        tail,
        health_rx,
        writer,
        outcome_rx,
        table: TriggerTable::new(capacity),
        rebuilding: RebuildingSet::default(),
        local_health: BTreeMap::new(),
        stats: stats.clone(),
        started_at: Instant::now(),
    };
    let task = tokio::spawn(supervisor.run());

    SupervisorHandle {
        health_tx,
        settings,
        stats,
        task,
    }
}

struct Supervisor {
    local: NodeIndex,
    settings: SettingsHandle,
    view_rx: watch::Receiver<ClusterView>,
    tail: EventLogTail,
    health_rx: mpsc::UnboundedReceiver<HealthReport>,
    writer: EventLogWriter,
    outcome_rx: mpsc::UnboundedReceiver<AppendOutcome>,
    table: TriggerTable,
    /// Replica of the authoritative rebuilding set, folded from the tail.
    rebuilding: RebuildingSet,
    local_health: BTreeMap<ShardIndex, ShardHealth>,
    stats: Arc<SupervisorStats>,
    started_at: Instant,
}

impl Supervisor {
    async fn run(mut self) {
        info!(node = %self.local, "rebuilding supervisor started");

        let mut tick = interval(self.settings.snapshot().recheck_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = self.view_rx.changed() => {
                    if changed.is_err() {
                        debug!("cluster view publisher gone, supervisor exiting");
                        break;
                    }
                }
                entry = self.tail.next() => {
                    match entry {
                        Some((lsn, record)) => self.on_replay(lsn, record),
                        None => {
                            debug!("event log closed, supervisor exiting");
                            break;
                        }
                    }
                }
                report = self.health_rx.recv() => {
                    match report {
                        Some(report) => self.on_health_report(report),
                        None => {
                            debug!("supervisor handle dropped, exiting");
                            break;
                        }
                    }
                }
                Some(outcome) = self.outcome_rx.recv() => {
                    self.on_append_outcome(outcome);
                }
                _ = tick.tick() => {}
            }

            self.pass();
        }

        info!(node = %self.local, "rebuilding supervisor stopped");
    }

    /// One full evaluation pass over a coherent snapshot.
    fn pass(&mut self) {
        let view = self.view_rx.borrow().clone();
        let settings = self.settings.snapshot();

        self.table
            .set_capacity(settings.max_rebuilding_trigger_queue_size);
        self.diff_phase(&view, &settings);
        self.local_health_phase(&view, &settings);
        // Admission waits out the event-log grace period after startup so
        // decisions are made against a replayed, not partial, set.
        if settings.enable_self_initiated_rebuilding
            && self.started_at.elapsed() >= settings.event_log_grace_period
        {
            self.admission_phase(&view, &settings);
        }
        self.stats.set_throttled(self.table.is_throttled());
    }

    /// Reconcile the trigger table with the latest view: triggers for dead
    /// in-config nodes, prompt cancellation for revived ones, silent drop
    /// for nodes that left the config.
    fn diff_phase(&mut self, view: &ClusterView, settings: &SupervisorSettings) {
        for node in self.table.nodes() {
            if !view.config.contains(node) {
                let dropped = self.table.remove_node(node);
                debug!(%node, count = dropped.len(), "node left config, dropped its triggers");
            }
        }

        for descriptor in view.config.nodes.values() {
            let node = descriptor.index;
            if node == self.local {
                continue;
            }
            match view.detector.state_of(node) {
                NodeState::Dead => {
                    for shard in descriptor.shards() {
                        if self.rebuilding.is_full_rebuilding(shard) || self.table.contains(shard)
                        {
                            continue;
                        }
                        let was_throttled = self.table.is_throttled();
                        let trigger = Trigger::new(
                            shard,
                            TriggerReason::NodeDead,
                            settings.self_initiated_rebuilding_grace_period,
                        );
                        match self.table.insert(trigger) {
                            InsertOutcome::Inserted => {
                                info!(%shard, "node dead, created rebuilding trigger");
                            }
                            InsertOutcome::Rejected => {
                                if !was_throttled {
                                    warn!(
                                        %shard,
                                        capacity = settings.max_rebuilding_trigger_queue_size,
                                        "trigger queue at capacity, entering throttled mode"
                                    );
                                }
                                break;
                            }
                            InsertOutcome::AlreadyPresent => {}
                        }
                    }
                }
                NodeState::Alive => {
                    let removed = self
                        .table
                        .remove_node_with_reason(node, TriggerReason::NodeDead);
                    if !removed.is_empty() {
                        info!(%node, count = removed.len(), "node alive again, cancelled its triggers");
                        for _ in &removed {
                            self.stats.bump_node_alive();
                        }
                    }
                }
                NodeState::Suspect | NodeState::IsolatedSelf => {}
            }
        }
    }

    /// Ensure self triggers for locally-diagnosed bad shards and retire
    /// triggers for shards that recovered.
    fn local_health_phase(&mut self, view: &ClusterView, settings: &SupervisorSettings) {
        let Some(descriptor) = view.config.node(self.local) else {
            return;
        };

        for (index, health) in &self.local_health {
            if index.0 >= descriptor.num_shards {
                continue;
            }
            let shard = ShardId {
                node: self.local,
                shard: *index,
            };
            match health.trigger_reason() {
                Some(reason) => {
                    if self.rebuilding.is_full_rebuilding(shard) || self.table.contains(shard) {
                        continue;
                    }
                    let trigger = Trigger::new(
                        shard,
                        reason,
                        settings.self_initiated_rebuilding_grace_period,
                    );
                    if self.table.insert(trigger) == InsertOutcome::Inserted {
                        warn!(%shard, ?health, "local shard unhealthy, created self trigger");
                    }
                }
                None => {
                    if self
                        .table
                        .get(shard)
                        .is_some_and(|t| t.reason.is_self_initiated() && t.publish == PublishState::Idle)
                    {
                        self.table.remove(shard);
                        debug!(%shard, "local shard healthy again, dropped self trigger");
                    }
                }
            }
        }
    }

    /// Evaluate due triggers and publish the admitted ones.
    fn admission_phase(&mut self, view: &ClusterView, settings: &SupervisorSettings) {
        let now = Instant::now();
        for shard in self.table.due(now) {
            // An earlier group cancellation in this pass may have removed it.
            let Some(trigger) = self.table.get(shard) else {
                continue;
            };
            if trigger.publish != PublishState::Idle {
                continue;
            }

            let decision =
                admission::evaluate(view, &self.rebuilding, settings, self.local, trigger);
            match decision {
                AdmissionDecision::Admit => {
                    if self.writer.busy() {
                        // One append at a time; the next wake-up retries.
                        continue;
                    }
                    let version = self.rebuilding.version();
                    info!(%shard, %version, "publishing SHARD_NEEDS_REBUILD");
                    if let Some(t) = self.table.get_mut(shard) {
                        t.publish = PublishState::InFlight;
                    }
                    self.writer
                        .submit(EventRecord::needs_rebuild(shard, version));
                }
                AdmissionDecision::Cancel(CancelReason::NotInConfig) => {
                    self.table.remove_node(shard.node);
                    info!(node = %shard.node, "rebuilding not triggered: node not in config");
                    self.stats.bump_not_in_config();
                }
                AdmissionDecision::Cancel(CancelReason::NotStorage) => {
                    self.table.remove_node(shard.node);
                    info!(node = %shard.node, "rebuilding not triggered: not a storage node");
                    self.stats.bump_not_storage();
                }
                AdmissionDecision::Cancel(CancelReason::NodeAliveAgain) => {
                    let removed = self
                        .table
                        .remove_node_with_reason(shard.node, TriggerReason::NodeDead);
                    info!(node = %shard.node, "rebuilding not triggered: node alive");
                    for _ in &removed {
                        self.stats.bump_node_alive();
                    }
                }
                AdmissionDecision::Cancel(CancelReason::AlreadyRebuilding) => {
                    self.table.remove(shard);
                    info!(%shard, "rebuilding not triggered: shard already rebuilding");
                    self.stats.bump_started();
                }
                AdmissionDecision::Cancel(CancelReason::NotLeader)
                | AdmissionDecision::Defer(_) => {
                    if let Some(t) = self.table.get_mut(shard) {
                        if t.last_evaluation.is_none() {
                            self.stats.bump_scheduled();
                        }
                        t.last_evaluation = Some(now);
                    }
                    debug!(%shard, ?decision, "rebuilding deferred");
                }
            }
        }
    }

    /// Fold one replayed record into the set and clear satisfied triggers.
    fn on_replay(&mut self, lsn: Lsn, record: EventRecord) {
        self.rebuilding.apply(lsn, &record);

        if let EventRecord::ShardNeedsRebuild { shard, flags, .. } = record
            && !flags.time_ranged
            && self
                .table
                .get(shard)
                .is_some_and(|t| t.publish != PublishState::Idle)
        {
            // Our submission reached the log, or a racing publisher's
            // duplicate did — either way the decision is durable.
            self.table.remove(shard);
            self.stats.bump_triggered();
            info!(%shard, %lsn, "rebuilding triggered");
        }
    }

    fn on_health_report(&mut self, report: HealthReport) {
        let old = self
            .local_health
            .insert(report.shard, report.health)
            .unwrap_or(ShardHealth::Unknown);
        if old == report.health {
            return;
        }
        info!(shard = %report.shard, from = ?old, to = ?report.health, "local shard health changed");
        if report.health == ShardHealth::IoFailed {
            // The storage layer has put the shard into fail-safe mode;
            // we only account for it.
            self.stats.inc_failed_safe();
        } else if old == ShardHealth::IoFailed {
            self.stats.dec_failed_safe();
        }
    }

    fn on_append_outcome(&mut self, outcome: AppendOutcome) {
        self.writer.complete();
        match outcome {
            AppendOutcome::Appended { shard, lsn } => {
                debug!(%shard, %lsn, "append confirmed, waiting for replay");
                if let Some(t) = self.table.get_mut(shard)
                    && t.publish == PublishState::InFlight
                {
                    t.publish = PublishState::Submitted(lsn);
                }
            }
            AppendOutcome::VersionMismatch { shard, current } => {
                debug!(%shard, %current, "conditional append lost the race, will retry");
                if let Some(t) = self.table.get_mut(shard) {
                    t.publish = PublishState::Idle;
                }
            }
            AppendOutcome::Failed { shard, error } => {
                warn!(%shard, error = %error, "event log append failed, will retry");
                if let Some(t) = self.table.get_mut(shard) {
                    t.publish = PublishState::Idle;
                }
            }
        }
    }
}
