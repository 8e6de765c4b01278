//! Rebuilding supervisor for Braid.
//!
//! The distributed control loop that detects which shards need rebuilding
//! and durably publishes that decision into the cluster's event log. This
//! crate provides:
//!
//! - [`TriggerTable`] — pending per-shard intent to rebuild.
//! - [`admission`] — the ordered rules deciding whether a due trigger is
//!   published, cancelled, or deferred.
//! - [`leader`] — implicit leadership: the lowest alive storage node.
//! - [`supervisor`] — the single-threaded loop orchestrating it all.
//! - [`LogEnumerator`] — the downstream contract handing the
//!   re-replication engine its per-log starting timestamps.
//! - [`SupervisorStats`] — the exported counters tests and operators read.

pub mod admission;
pub mod enumerator;
mod error;
pub mod leader;
mod metrics;
pub mod supervisor;
mod trigger;
mod writer;

pub use admission::{AdmissionDecision, DeferReason};
pub use enumerator::{EnumerationResult, LogEnumerator, MetadataLogStore};
pub use error::{StorageTaskError, SupervisorError};
pub use metrics::SupervisorStats;
pub use supervisor::{HealthReport, SettingsHandle, SupervisorHandle, start};
pub use trigger::{InsertOutcome, PublishState, Trigger, TriggerTable};
