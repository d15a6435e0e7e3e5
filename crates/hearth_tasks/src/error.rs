//! # Task Error Types

use thiserror::Error;

/// Errors that can occur in the task scheduler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The scheduler no longer accepts work.
    #[error("task scheduler is shut down")]
    ShutDown,

    /// A worker thread could not be started.
    #[error("failed to spawn task worker {worker}: {reason}")]
    ThreadSpawn {
        /// Index of the worker that failed to start.
        worker: usize,
        /// OS error text.
        reason: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for task scheduler operations.
pub type TaskResult<T> = Result<T, TaskError>;
