//! # Concurrent System Runner
//!
//! Drives one System on its own thread.
//!
//! ## Protocol
//!
//! ```text
//! scheduler                         runner thread
//! ─────────                         ─────────────
//! barrier.expect(1)
//! notify_update(dt, frame, batch) ─▶ ready = true (under lock)
//!                                    swap batch in, ready = false
//!                                    update() under catch_unwind
//!                                    clear batch, report fault
//! barrier.wait() ◀────────────────── guard drop: barrier.arrive()
//! ```
//!
//! The runner checks `ready` under the lock before every wait, so a signal
//! sent before the thread reaches its wait is never lost.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use super::barrier::FrameBarrier;
use super::{run_guarded, ComponentBuffer, System};
use crate::ecs::SceneCommands;
use crate::error::{EngineError, EngineResult, SystemFault};

struct RunnerState {
    /// Work is pending.
    ready: bool,
    /// Cleared by `stop_looping`.
    alive: bool,
    dt: f32,
    frame: u64,
    /// Components handed over by the scheduler for the pending update.
    batch: ComponentBuffer,
}

struct Shared {
    state: Mutex<RunnerState>,
    signal: Condvar,
}

/// Owner side of a concurrent System's thread.
pub(crate) struct ConcurrentRunner {
    name: String,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl ConcurrentRunner {
    /// Spawns the System's thread. It idles until the first `notify_update`.
    pub(crate) fn spawn(
        system: Box<dyn System>,
        template: &ComponentBuffer,
        barrier: Arc<FrameBarrier>,
        faults: Sender<SystemFault>,
        commands: SceneCommands,
    ) -> EngineResult<Self> {
        let name = system.name().to_owned();
        let shared = Arc::new(Shared {
            state: Mutex::new(RunnerState {
                ready: false,
                alive: true,
                dt: 0.0,
                frame: 0,
                batch: template.clone(),
            }),
            signal: Condvar::new(),
        });

        let worker = Worker {
            system,
            shared: Arc::clone(&shared),
            barrier,
            faults,
            commands,
            local: template.clone(),
        };

        let handle = thread::Builder::new()
            .name(format!("hearth-system-{name}"))
            .spawn(move || worker.run())
            .map_err(|e| EngineError::ThreadSpawn {
                system: name.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            name,
            shared,
            handle: Some(handle),
        })
    }

    /// System name.
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Hands this frame's components to the thread and wakes it.
    ///
    /// `staging` receives the runner's emptied buffer in exchange. The caller
    /// must have called `FrameBarrier::expect` for this runner first.
    pub(crate) fn notify_update(&self, dt: f32, frame: u64, staging: &mut ComponentBuffer) {
        {
            let mut state = self.shared.state.lock();
            state.dt = dt;
            state.frame = frame;
            std::mem::swap(&mut state.batch, staging);
            state.ready = true;
        }
        self.shared.signal.notify_one();
    }

    /// Asks the thread to exit once it is idle.
    pub(crate) fn stop_looping(&self) {
        self.shared.state.lock().alive = false;
        self.shared.signal.notify_one();
    }
}

impl Drop for ConcurrentRunner {
    fn drop(&mut self) {
        self.stop_looping();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(system = %self.name, "system thread terminated abnormally");
            }
        }
    }
}

/// Thread side of a concurrent System.
struct Worker {
    system: Box<dyn System>,
    shared: Arc<Shared>,
    barrier: Arc<FrameBarrier>,
    faults: Sender<SystemFault>,
    commands: SceneCommands,
    local: ComponentBuffer,
}

impl Worker {
    fn run(mut self) {
        debug!(system = %self.system.name(), "system thread started");

        while let Some((dt, frame)) = self.wait_for_work() {
            let _guard = self.barrier.guard();

            let fault = run_guarded(self.system.as_mut(), &self.local, &self.commands, dt, frame);
            self.local.clear_components();

            if let Some(fault) = fault {
                error!(system = %fault.system, frame, panicked = fault.panicked, reason = %fault.reason, "system update failed");
                // Receiver only goes away with the scheduler, which stops us first.
                let _ = self.faults.send(fault);
            }
        }

        debug!(system = %self.system.name(), "system thread stopped");
    }

    /// Blocks until signalled. Returns `None` once stopped.
    fn wait_for_work(&mut self) -> Option<(f32, u64)> {
        let mut state = self.shared.state.lock();
        while !state.ready {
            if !state.alive {
                return None;
            }
            self.shared.signal.wait(&mut state);
        }

        state.ready = false;
        std::mem::swap(&mut state.batch, &mut self.local);
        Some((state.dt, state.frame))
    }
}
