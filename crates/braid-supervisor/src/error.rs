//! Error types for the supervisor crate.

/// Errors surfaced through the supervisor handle.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The supervisor task has stopped and no longer accepts input.
    #[error("supervisor stopped")]
    Stopped,
}

/// Errors from the metadata-log enumeration storage task.
#[derive(Debug, thiserror::Error)]
pub enum StorageTaskError {
    /// The storage layer dropped the task before running it.
    #[error("storage task dropped")]
    Dropped,
    /// The task ran but failed.
    #[error("storage task failed: {0}")]
    Io(String),
}
