//! Completion tracking for individual tasks.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// How a tracked task ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The task ran to completion.
    Completed,
    /// The task panicked. The worker survived.
    Panicked,
    /// The task was dropped without running (`shutdown_now`).
    Discarded,
}

/// Signal for task completion.
struct CompletionSignal {
    outcome: Mutex<Option<TaskOutcome>>,
    condvar: Condvar,
}

impl CompletionSignal {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            condvar: Condvar::new(),
        }
    }

    /// Records the outcome. Only the first call has any effect.
    fn finish(&self, outcome: TaskOutcome) {
        let mut slot = self.outcome.lock();
        if slot.is_none() {
            *slot = Some(outcome);
            self.condvar.notify_all();
        }
    }

    fn wait(&self) -> TaskOutcome {
        let mut slot = self.outcome.lock();
        loop {
            if let Some(outcome) = *slot {
                return outcome;
            }
            self.condvar.wait(&mut slot);
        }
    }

    fn wait_timeout(&self, timeout: Duration) -> Option<TaskOutcome> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.outcome.lock();
        while slot.is_none() {
            if self.condvar.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        *slot
    }

    fn peek(&self) -> Option<TaskOutcome> {
        *self.outcome.lock()
    }
}

/// Handle returned to the caller for tracking a scheduled task.
#[derive(Clone)]
pub struct TaskHandle {
    signal: Arc<CompletionSignal>,
}

impl TaskHandle {
    /// Blocks until the task has finished, panicked or been discarded.
    #[must_use = "the outcome tells whether the task actually ran"]
    pub fn wait(&self) -> TaskOutcome {
        self.signal.wait()
    }

    /// Waits with timeout. Returns `None` if the task is still pending.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<TaskOutcome> {
        self.signal.wait_timeout(timeout)
    }

    /// Returns true if the task has an outcome.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.signal.peek().is_some()
    }

    /// Outcome so far, without blocking.
    #[must_use]
    pub fn outcome(&self) -> Option<TaskOutcome> {
        self.signal.peek()
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle").field("outcome", &self.outcome()).finish()
    }
}

/// Travels with the task and reports its outcome when dropped.
pub(crate) struct CompletionGuard {
    signal: Arc<CompletionSignal>,
    completed: bool,
}

impl CompletionGuard {
    pub(crate) fn new() -> (Self, TaskHandle) {
        let signal = Arc::new(CompletionSignal::new());
        let handle = TaskHandle {
            signal: Arc::clone(&signal),
        };
        (
            Self {
                signal,
                completed: false,
            },
            handle,
        )
    }

    pub(crate) fn complete(mut self) {
        self.completed = true;
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        let outcome = if self.completed {
            TaskOutcome::Completed
        } else if thread::panicking() {
            TaskOutcome::Panicked
        } else {
            TaskOutcome::Discarded
        };
        self.signal.finish(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{self, AssertUnwindSafe};

    #[test]
    fn test_completed() {
        let (guard, handle) = CompletionGuard::new();
        assert!(!handle.is_done());
        assert_eq!(handle.wait_timeout(Duration::from_millis(5)), None);

        guard.complete();
        assert!(handle.is_done());
        assert_eq!(handle.wait(), TaskOutcome::Completed);
    }

    #[test]
    fn test_dropped_unrun_is_discarded() {
        let (guard, handle) = CompletionGuard::new();
        drop(guard);
        assert_eq!(handle.outcome(), Some(TaskOutcome::Discarded));
    }

    #[test]
    fn test_unwinding_is_panicked() {
        let (guard, handle) = CompletionGuard::new();
        let result = panic::catch_unwind(AssertUnwindSafe(move || {
            let _guard = guard;
            panic!("task failed");
        }));
        assert!(result.is_err());
        assert_eq!(handle.wait(), TaskOutcome::Panicked);
    }

    #[test]
    fn test_wait_from_other_thread() {
        let (guard, handle) = CompletionGuard::new();
        let waiter = std::thread::spawn(move || handle.wait());
        std::thread::sleep(Duration::from_millis(10));
        guard.complete();
        assert_eq!(waiter.join().unwrap(), TaskOutcome::Completed);
    }
}
