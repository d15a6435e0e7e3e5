//! # Task Scheduler
//!
//! A fixed pool of persistent workers draining one [`TaskQueue`].
//!
//! Every worker loops: retrieve, execute, repeat. A task that panics is
//! caught at the worker boundary, logged and counted; the worker keeps
//! going. Workers exit when the queue is closed and empty
//! ([`shutdown`](TaskScheduler::shutdown)) or immediately on cancellation
//! ([`shutdown_now`](TaskScheduler::shutdown_now)).

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::TaskSchedulerConfig;
use crate::error::{TaskError, TaskResult};
use crate::handle::{CompletionGuard, TaskHandle};
use crate::queue::{CancellationToken, Task, TaskQueue};

/// Counters for the pool, taken with [`TaskScheduler::stats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TaskStats {
    /// Tasks accepted by `schedule`.
    pub scheduled: u64,
    /// Tasks that ran to completion.
    pub executed: u64,
    /// Tasks that panicked.
    pub panicked: u64,
    /// Tasks dropped unrun by `shutdown_now`.
    pub discarded: u64,
}

#[derive(Default)]
struct Counters {
    scheduled: AtomicU64,
    executed: AtomicU64,
    panicked: AtomicU64,
    discarded: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> TaskStats {
        TaskStats {
            scheduled: self.scheduled.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

/// FIFO worker pool.
pub struct TaskScheduler {
    queue: Arc<TaskQueue>,
    cancel: CancellationToken,
    counters: Arc<Counters>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl TaskScheduler {
    /// Starts a pool with the configured number of workers.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the configuration does not validate,
    /// `ThreadSpawn` if a worker thread cannot be started. Workers that
    /// did start are stopped again before returning.
    pub fn new(config: &TaskSchedulerConfig) -> TaskResult<Self> {
        config.validate()?;
        let worker_count = config.resolved_workers();

        let scheduler = Self {
            queue: Arc::new(TaskQueue::new()),
            cancel: CancellationToken::new(),
            counters: Arc::new(Counters::default()),
            workers: Mutex::new(Vec::with_capacity(worker_count)),
            worker_count,
        };

        for index in 0..worker_count {
            let queue = Arc::clone(&scheduler.queue);
            let cancel = scheduler.cancel.clone();
            let counters = Arc::clone(&scheduler.counters);

            let spawned = thread::Builder::new()
                .name(format!("{}-{index}", config.thread_name))
                .spawn(move || worker_loop(index, &queue, &cancel, &counters));

            match spawned {
                Ok(handle) => scheduler.workers.lock().push(handle),
                Err(e) => {
                    error!(worker = index, error = %e, "failed to spawn task worker");
                    scheduler.shutdown_now();
                    return Err(TaskError::ThreadSpawn {
                        worker: index,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(workers = worker_count, name = %config.thread_name, "task scheduler started");
        Ok(scheduler)
    }

    /// Starts a pool sized to the available hardware parallelism.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn with_default_workers() -> TaskResult<Self> {
        Self::new(&TaskSchedulerConfig::default())
    }

    /// Queues a task. Ownership moves to whichever worker dequeues it.
    ///
    /// # Errors
    ///
    /// `ShutDown` once shutdown has begun; the task is dropped unrun.
    pub fn schedule<T: Task>(&self, task: T) -> TaskResult<()> {
        self.push(Box::new(task))
    }

    /// Queues a task and returns a handle to wait on it.
    ///
    /// # Errors
    ///
    /// `ShutDown` once shutdown has begun.
    pub fn schedule_with_handle<T: Task>(&self, task: T) -> TaskResult<TaskHandle> {
        let (guard, handle) = CompletionGuard::new();
        let tracked = move || {
            Box::new(task).execute();
            guard.complete();
        };
        self.push(Box::new(tracked))?;
        Ok(handle)
    }

    fn push(&self, task: Box<dyn Task>) -> TaskResult<()> {
        if self.queue.push(task).is_err() {
            warn!("task rejected: scheduler is shut down");
            return Err(TaskError::ShutDown);
        }
        self.counters.scheduled.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Number of queued tasks not yet picked up by a worker.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Number of worker threads the pool was started with.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Snapshot of the pool counters.
    #[must_use]
    pub fn stats(&self) -> TaskStats {
        self.counters.snapshot()
    }

    /// Returns true once shutdown has begun.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.queue.is_closed()
    }

    /// Stops accepting work, lets the workers drain the queue, then joins
    /// them. Calling it again is a no-op.
    pub fn shutdown(&self) {
        self.queue.close();
        self.join_workers();
    }

    /// Stops accepting work and cancels the workers. Tasks already running
    /// finish; queued tasks are dropped unrun. Returns how many were
    /// discarded.
    pub fn shutdown_now(&self) -> usize {
        self.queue.close();
        self.queue.cancel(&self.cancel);

        let discarded = self.queue.drain().len();
        if discarded > 0 {
            warn!(discarded, "queued tasks discarded on shutdown");
        }
        self.counters.discarded.fetch_add(discarded as u64, Ordering::Relaxed);

        self.join_workers();
        discarded
    }

    fn join_workers(&self) {
        let workers = std::mem::take(&mut *self.workers.lock());
        if workers.is_empty() {
            return;
        }
        for worker in workers {
            if worker.join().is_err() {
                error!("task worker exited abnormally");
            }
        }
        info!(stats = ?self.stats(), "task scheduler stopped");
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("workers", &self.worker_count)
            .field("pending", &self.pending())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

fn worker_loop(index: usize, queue: &TaskQueue, cancel: &CancellationToken, counters: &Counters) {
    debug!(worker = index, "task worker started");

    while let Some(task) = queue.retrieve(cancel) {
        match panic::catch_unwind(AssertUnwindSafe(|| task.execute())) {
            Ok(()) => {
                counters.executed.fetch_add(1, Ordering::Relaxed);
            }
            Err(payload) => {
                counters.panicked.fetch_add(1, Ordering::Relaxed);
                error!(worker = index, reason = %panic_message(&*payload), "task panicked");
            }
        }
    }

    debug!(worker = index, cancelled = cancel.is_cancelled(), "task worker stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_executes_scheduled_tasks() {
        let scheduler = TaskScheduler::new(&TaskSchedulerConfig::with_workers(2)).unwrap();
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..100 {
            let count = Arc::clone(&count);
            scheduler
                .schedule(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        scheduler.shutdown();

        assert_eq!(count.load(Ordering::SeqCst), 100);
        let stats = scheduler.stats();
        assert_eq!((stats.scheduled, stats.executed, stats.panicked), (100, 100, 0));
        assert!(scheduler.is_shut_down());
    }

    #[test]
    fn test_schedule_after_shutdown_rejected() {
        let scheduler = TaskScheduler::new(&TaskSchedulerConfig::with_workers(1)).unwrap();
        scheduler.shutdown();
        assert_eq!(scheduler.schedule(|| {}), Err(TaskError::ShutDown));
        assert!(scheduler.schedule_with_handle(|| {}).is_err());
        scheduler.shutdown();
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            TaskScheduler::new(&TaskSchedulerConfig::with_workers(0)),
            Err(TaskError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*payload), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*payload), "bang");
        let payload: Box<dyn Any + Send> = Box::new(3_u8);
        assert_eq!(panic_message(&*payload), "non-string panic payload");
    }
}
