//! # Task Queue
//!
//! FIFO queue shared by the scheduler and every worker.
//!
//! ```text
//!   schedule() ──push──> [VecDeque] ──retrieve──> worker 0
//!                          │  one notify          worker 1
//!                          │  per push            worker N
//! ```
//!
//! `push` wakes exactly one waiting worker. `retrieve` pops before it
//! returns, so the caller never holds the queue lock while running a task.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

/// A unit of one-off work.
///
/// Ownership moves to the worker that dequeues it; the task is consumed by
/// `execute`.
pub trait Task: Send + 'static {
    /// Runs the task.
    fn execute(self: Box<Self>);
}

impl<F> Task for F
where
    F: FnOnce() + Send + 'static,
{
    fn execute(self: Box<Self>) {
        (*self)();
    }
}

/// Shared flag telling workers to stop.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the token cancelled. Waiters are only woken by
    /// [`TaskQueue::cancel`].
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct QueueState {
    tasks: VecDeque<Box<dyn Task>>,
    closed: bool,
}

/// FIFO task queue with blocking retrieval.
pub struct TaskQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    /// Creates an empty, open queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                tasks: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Appends a task and wakes one waiting worker.
    ///
    /// # Errors
    ///
    /// Hands the task back if the queue has been closed.
    pub fn push(&self, task: Box<dyn Task>) -> Result<(), Box<dyn Task>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(task);
        }
        state.tasks.push_back(task);
        trace!(pending = state.tasks.len(), "task queued");
        self.available.notify_one();
        Ok(())
    }

    /// Blocks until a task is available and returns it.
    ///
    /// Returns `None` once `cancel` is cancelled, or once the queue is
    /// closed and empty.
    pub fn retrieve(&self, cancel: &CancellationToken) -> Option<Box<dyn Task>> {
        let mut state = self.state.lock();
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            if let Some(task) = state.tasks.pop_front() {
                return Some(task);
            }
            if state.closed {
                return None;
            }
            self.available.wait(&mut state);
        }
    }

    /// Pops a task without blocking.
    pub fn try_retrieve(&self) -> Option<Box<dyn Task>> {
        self.state.lock().tasks.pop_front()
    }

    /// Stops accepting tasks. Queued tasks can still be retrieved.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
    }

    /// Cancels `token` and wakes every waiter so it can observe it.
    pub fn cancel(&self, token: &CancellationToken) {
        token.cancel();
        let _state = self.state.lock();
        self.available.notify_all();
    }

    /// Removes and returns every queued task.
    pub fn drain(&self) -> Vec<Box<dyn Task>> {
        self.state.lock().tasks.drain(..).collect()
    }

    /// Number of queued tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().tasks.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}
