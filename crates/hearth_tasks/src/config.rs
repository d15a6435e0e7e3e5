//! Worker pool configuration.

use std::num::NonZeroUsize;
use std::thread;

use serde::{Deserialize, Serialize};

use crate::error::{TaskError, TaskResult};

/// Configuration for a [`TaskScheduler`](crate::TaskScheduler).
///
/// ```toml
/// workers = 4
/// thread_name = "io-pool"
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSchedulerConfig {
    /// Number of worker threads. `None` uses the available hardware
    /// parallelism.
    pub workers: Option<usize>,
    /// Prefix for worker thread names; workers are named `{prefix}-{index}`.
    pub thread_name: String,
}

impl Default for TaskSchedulerConfig {
    fn default() -> Self {
        Self {
            workers: None,
            thread_name: "hearth-task".to_string(),
        }
    }
}

impl TaskSchedulerConfig {
    /// A pool with exactly `workers` threads.
    #[must_use]
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers: Some(workers),
            ..Self::default()
        }
    }

    /// Checks the configuration for values the pool cannot run with.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for zero workers or an empty thread name.
    pub fn validate(&self) -> TaskResult<()> {
        if self.workers == Some(0) {
            return Err(TaskError::InvalidConfig("workers must be at least 1".into()));
        }
        if self.thread_name.is_empty() {
            return Err(TaskError::InvalidConfig("thread_name must not be empty".into()));
        }
        Ok(())
    }

    /// Number of workers the pool will start.
    #[must_use]
    pub fn resolved_workers(&self) -> usize {
        self.workers.unwrap_or_else(default_workers)
    }
}

/// Available hardware parallelism, or 1 if it cannot be queried.
#[must_use]
pub fn default_workers() -> usize {
    thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_uses_hardware_parallelism() {
        let config = TaskSchedulerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.resolved_workers(), default_workers());
        assert!(config.resolved_workers() >= 1);
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(matches!(
            TaskSchedulerConfig::with_workers(0).validate(),
            Err(TaskError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_empty_name_rejected() {
        let config = TaskSchedulerConfig {
            thread_name: String::new(),
            ..TaskSchedulerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_from_toml() {
        let config: TaskSchedulerConfig = toml::from_str("workers = 3").unwrap();
        assert_eq!(config.workers, Some(3));
        assert_eq!(config.thread_name, "hearth-task");
        assert_eq!(config.resolved_workers(), 3);
    }
}
