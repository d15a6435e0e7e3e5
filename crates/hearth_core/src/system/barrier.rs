//! # Frame Barrier
//!
//! Counts concurrent Systems still running in the current frame.
//!
//! The scheduler calls [`FrameBarrier::expect`] before signalling the
//! Systems, each System thread arrives once when it is done, and the
//! scheduler blocks in [`FrameBarrier::wait`] until the count is zero.
//! The count lives under a mutex so an arrival can never slip between the
//! scheduler's check and its wait.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Pending-count barrier for concurrent Systems.
#[derive(Debug, Default)]
pub struct FrameBarrier {
    pending: Mutex<usize>,
    drained: Condvar,
}

impl FrameBarrier {
    /// Creates a barrier with nothing pending.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `count` more Systems that will arrive.
    pub fn expect(&self, count: usize) {
        *self.pending.lock() += count;
    }

    /// Marks one System as finished. Wakes waiters when the count hits zero.
    pub fn arrive(&self) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.drained.notify_all();
        }
    }

    /// Number of Systems that have not arrived yet.
    #[must_use]
    pub fn pending(&self) -> usize {
        *self.pending.lock()
    }

    /// Blocks until every expected System has arrived.
    ///
    /// With a timeout, gives up once it expires.
    ///
    /// # Errors
    ///
    /// Returns the number of Systems still pending on timeout.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<(), usize> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut pending = self.pending.lock();

        while *pending > 0 {
            match deadline {
                Some(deadline) => {
                    if self.drained.wait_until(&mut pending, deadline).timed_out() && *pending > 0 {
                        return Err(*pending);
                    }
                }
                None => self.drained.wait(&mut pending),
            }
        }
        Ok(())
    }

    /// Returns a guard that arrives when dropped.
    #[must_use]
    pub fn guard(&self) -> CompletionGuard<'_> {
        CompletionGuard { barrier: self }
    }
}

/// Arrives at a [`FrameBarrier`] on drop.
///
/// Held by a System thread for the duration of one update, so the arrival
/// happens on success, on error, and while unwinding from a panic.
#[derive(Debug)]
pub struct CompletionGuard<'a> {
    barrier: &'a FrameBarrier,
}

impl Drop for CompletionGuard<'_> {
    fn drop(&mut self) {
        self.barrier.arrive();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_wait_returns_immediately_when_idle() {
        let barrier = FrameBarrier::new();
        assert_eq!(barrier.wait(None), Ok(()));
        assert_eq!(barrier.wait(Some(Duration::ZERO)), Ok(()));
    }

    #[test]
    fn test_waits_for_every_arrival() {
        let barrier = Arc::new(FrameBarrier::new());
        barrier.expect(3);

        let workers: Vec<_> = (0..3u64)
            .map(|i| {
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(5 * (i + 1)));
                    let _guard = barrier.guard();
                })
            })
            .collect();

        assert_eq!(barrier.wait(None), Ok(()));
        assert_eq!(barrier.pending(), 0);
        for w in workers {
            w.join().unwrap();
        }
    }

    #[test]
    fn test_timeout_reports_pending() {
        let barrier = FrameBarrier::new();
        barrier.expect(2);
        barrier.arrive();

        assert_eq!(barrier.wait(Some(Duration::from_millis(10))), Err(1));

        barrier.arrive();
        assert_eq!(barrier.wait(Some(Duration::from_millis(10))), Ok(()));
    }

    #[test]
    fn test_guard_arrives_on_panic() {
        let barrier = Arc::new(FrameBarrier::new());
        barrier.expect(1);

        let b = Arc::clone(&barrier);
        let result = thread::spawn(move || {
            let _guard = b.guard();
            panic!("system blew up");
        })
        .join();

        assert!(result.is_err());
        assert_eq!(barrier.pending(), 0);
    }
}
