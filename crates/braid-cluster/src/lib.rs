//! Cluster view for the Braid rebuilding supervisor.
//!
//! This crate provides:
//!
//! - [`FailureDetectorView`] — the per-node states and gossip counters the
//!   failure detector currently reports.
//! - [`ClusterView`] — a coherent, epoch-stamped snapshot of configuration,
//!   detector view, and self-isolation.
//! - [`ViewPublisher`] — applies updates from the config loader and the
//!   failure detector and publishes snapshots through a `watch` channel.

mod view;

pub use view::{ClusterView, FailureDetectorView, PeerStatus, ViewPublisher};
