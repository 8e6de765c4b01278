//! Event-log contract for the Braid rebuilding supervisor.
//!
//! The event log is an internal replicated log carrying administrative
//! records; its totally-ordered sequence is the cluster's source of truth
//! for rebuilding state. This crate provides:
//!
//! - [`EventRecord`] — the closed set of record variants with explicit
//!   encode/decode.
//! - [`RebuildingSet`] — the authoritative set of rebuilding shards,
//!   produced by replaying the log.
//! - [`EventLog`] — the append/subscribe contract the supervisor writes
//!   through, with conditional-version append rejection.
//! - [`SharedEventLog`] — an in-process implementation shared by all nodes
//!   of a simulated cluster (and by the single-process daemon).

mod log;
mod record;
mod set;

pub use log::{EventLog, EventLogError, EventLogTail, SharedEventLog};
pub use record::{EventRecord, RebuildFlags};
pub use set::{RebuildingInfo, RebuildingSet};
