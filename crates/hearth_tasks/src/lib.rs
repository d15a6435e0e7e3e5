//! # HEARTH Tasks
//!
//! Generic FIFO task queue and worker pool.
//!
//! Any subsystem that needs one-off background work hands a [`Task`] to a
//! [`TaskScheduler`]; a worker thread takes ownership and runs it. Closures
//! are tasks:
//!
//! ```no_run
//! use hearth_tasks::{TaskScheduler, TaskSchedulerConfig};
//!
//! let pool = TaskScheduler::new(&TaskSchedulerConfig::default())?;
//! let handle = pool.schedule_with_handle(|| println!("hello from a worker"))?;
//! let _ = handle.wait();
//! pool.shutdown();
//! # Ok::<(), hearth_tasks::TaskError>(())
//! ```
//!
//! ## Design Rules
//!
//! 1. Tasks run in submission order per worker pickup (FIFO queue)
//! 2. Each push wakes exactly one idle worker
//! 3. Every worker has a shutdown path and is joined
//! 4. A panicking task never takes its worker down

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod error;
pub mod handle;
pub mod queue;
pub mod scheduler;

pub use config::{default_workers, TaskSchedulerConfig};
pub use error::{TaskError, TaskResult};
pub use handle::{TaskHandle, TaskOutcome};
pub use queue::{CancellationToken, Task, TaskQueue};
pub use scheduler::{TaskScheduler, TaskStats};
