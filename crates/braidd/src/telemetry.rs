//! Tracing initialization for the Braid daemon.
//!
//! Console `tracing-subscriber` with an `EnvFilter`: `RUST_LOG` wins when
//! set, otherwise the level from the config file's `[log]` section.

use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber. Call once at startup, before any
/// `tracing` events are emitted.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
