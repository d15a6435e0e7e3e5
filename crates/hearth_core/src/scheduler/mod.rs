//! # Frame Scheduler
//!
//! The engine context. Owns the scene, the deferred mutation queue, the
//! registered Systems and the frame barrier, and drives one frame as six
//! strictly ordered phases:
//!
//! 1. **Mutation resolution** - apply queued additions, deletions, toggles
//! 2. **Transform precompute** - recompute live world transforms
//! 3. **Transform freeze** - publish a renderer-safe snapshot
//! 4. **System notification** - route enabled components to Systems
//! 5. **Entity update** - component `update`, children first
//! 6. **System update** - signal concurrent Systems, run synchronous ones,
//!    wait on the barrier, clear every System's buffers
//!
//! No phase starts before the previous one has drained. In particular phase
//! 1 of frame N+1 never starts while a concurrent System is still running
//! frame N.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let mut engine = FrameScheduler::new(EngineConfig::default())?;
//! engine.add_system(Physics::default(), SystemMode::Concurrent)?;
//! engine.add_system(Scoring::default(), SystemMode::Synchronous)?;
//!
//! let commands = engine.commands().clone();
//! commands.add_entity(engine.ids().spawn().with_component(Position::default()))?;
//!
//! engine.run_frames(600)?;
//! ```

mod clock;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::ecs::{ComponentType, EntityId, EntityIds, ResolutionReport, SceneCommands, SceneTree};
use crate::error::{EngineError, EngineResult, SystemFault};
use crate::sync::FrozenTransforms;
use crate::system::{run_guarded, ComponentBuffer, ConcurrentRunner, FrameBarrier, System, SystemId, SystemMode};

pub use clock::{FrameClock, FrameSteps};

/// Cloneable flag that ends [`FrameScheduler::run`] after the current frame.
#[derive(Clone, Debug, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Requests the frame loop to stop.
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns true once a stop was requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// What happened in one frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameStats {
    /// Frame number, starting at 1.
    pub frame: u64,
    /// Delta passed to components and Systems, in seconds.
    pub dt: f32,
    /// Outcome of the mutation resolution phase.
    pub report: ResolutionReport,
    /// World transforms recomputed.
    pub transforms_computed: usize,
    /// Component deliveries to System buffers.
    pub notified: usize,
    /// Component `update` calls.
    pub entity_updates: usize,
    /// Synchronous Systems run.
    pub sync_systems: usize,
    /// Concurrent Systems signalled.
    pub concurrent_systems: usize,
    /// Time spent blocked on the barrier, in microseconds.
    pub barrier_wait_us: u64,
    /// Wall time of the whole frame, in microseconds.
    pub total_us: u64,
}

/// Counters from phase 6.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SystemPhaseStats {
    /// Synchronous Systems run.
    pub sync_systems: usize,
    /// Concurrent Systems signalled.
    pub concurrent_systems: usize,
    /// Time spent blocked on the barrier.
    pub barrier_wait: Duration,
}

enum SystemKind {
    Synchronous {
        system: Box<dyn System>,
        buffer: ComponentBuffer,
    },
    Concurrent {
        runner: ConcurrentRunner,
        /// Filled during notification, handed to the runner in phase 6.
        staging: ComponentBuffer,
    },
}

struct SystemEntry {
    name: String,
    mode: SystemMode,
    enabled: bool,
    kind: SystemKind,
}

impl SystemEntry {
    fn buffer(&self) -> &ComponentBuffer {
        match &self.kind {
            SystemKind::Synchronous { buffer, .. } => buffer,
            SystemKind::Concurrent { staging, .. } => staging,
        }
    }

    fn buffer_mut(&mut self) -> &mut ComponentBuffer {
        match &mut self.kind {
            SystemKind::Synchronous { buffer, .. } => buffer,
            SystemKind::Concurrent { staging, .. } => staging,
        }
    }

    fn is_concurrent(&self) -> bool {
        matches!(self.kind, SystemKind::Concurrent { .. })
    }
}

/// The engine context: one scene, its Systems and the frame loop.
pub struct FrameScheduler {
    tree: SceneTree,
    commands: SceneCommands,
    ids: EntityIds,
    systems: Vec<SystemEntry>,
    /// Component type → interested Systems, built at registration.
    routes: HashMap<ComponentType, Vec<SystemId>>,
    barrier: Arc<FrameBarrier>,
    fault_tx: Sender<SystemFault>,
    fault_rx: Receiver<SystemFault>,
    /// Faults that arrived after their frame had already returned.
    late_faults: Vec<SystemFault>,
    frozen: Arc<FrozenTransforms>,
    config: EngineConfig,
    clock: FrameClock,
    frame: u64,
    /// Set when a frame returned before every concurrent System arrived.
    stalled: bool,
    stop: StopHandle,
}

impl FrameScheduler {
    /// Creates an engine with an empty scene.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the configuration does not validate.
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: EngineConfig) -> Self {
        let (fault_tx, fault_rx) = unbounded();
        Self {
            tree: SceneTree::new(),
            commands: SceneCommands::new(),
            ids: EntityIds::new(),
            systems: Vec::new(),
            routes: HashMap::new(),
            barrier: Arc::new(FrameBarrier::new()),
            fault_tx,
            fault_rx,
            late_faults: Vec::new(),
            frozen: FrozenTransforms::new(),
            clock: FrameClock::new(&config.timestep),
            config,
            frame: 0,
            stalled: false,
            stop: StopHandle::default(),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// The active scene.
    #[inline]
    #[must_use]
    pub fn scene(&self) -> &SceneTree {
        &self.tree
    }

    /// Mutable access to the active scene between frames.
    #[inline]
    pub fn scene_mut(&mut self) -> &mut SceneTree {
        &mut self.tree
    }

    /// Queue for deferred structural changes.
    #[inline]
    #[must_use]
    pub fn commands(&self) -> &SceneCommands {
        &self.commands
    }

    /// Entity id allocator.
    #[inline]
    #[must_use]
    pub fn ids(&self) -> &EntityIds {
        &self.ids
    }

    /// Frozen transform snapshots, for render consumers on other threads.
    #[must_use]
    pub fn frozen_transforms(&self) -> Arc<FrozenTransforms> {
        Arc::clone(&self.frozen)
    }

    /// Active configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of the last frame started (0 before the first tick).
    #[inline]
    #[must_use]
    pub const fn frame(&self) -> u64 {
        self.frame
    }

    /// Handle that stops [`run`](Self::run) from any thread.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    // =========================================================================
    // Systems
    // =========================================================================

    /// Registers a System. The mode is fixed for its lifetime.
    ///
    /// # Errors
    ///
    /// `ThreadSpawn` if a concurrent System's thread cannot be started.
    pub fn add_system<S: System>(&mut self, system: S, mode: SystemMode) -> EngineResult<SystemId> {
        let system: Box<dyn System> = Box::new(system);
        let interests = system.interests();
        let name = system.name().to_owned();
        let template = ComponentBuffer::new(&interests);

        let kind = match mode {
            SystemMode::Synchronous => SystemKind::Synchronous {
                system,
                buffer: template,
            },
            SystemMode::Concurrent => {
                let runner = ConcurrentRunner::spawn(
                    system,
                    &template,
                    Arc::clone(&self.barrier),
                    self.fault_tx.clone(),
                    self.commands.clone(),
                )?;
                SystemKind::Concurrent {
                    runner,
                    staging: template,
                }
            }
        };

        let id = SystemId(self.systems.len());
        for ty in &interests {
            let routed = self.routes.entry(*ty).or_default();
            if !routed.contains(&id) {
                routed.push(id);
            }
        }

        info!(system = %name, ?mode, interests = interests.len(), "system registered");
        self.systems.push(SystemEntry {
            name,
            mode,
            enabled: true,
            kind,
        });
        Ok(id)
    }

    /// Enables or disables a System. A disabled System receives no components
    /// and is not updated. Returns false for unknown ids.
    pub fn set_system_enabled(&mut self, id: SystemId, enabled: bool) -> bool {
        self.systems.get_mut(id.0).map(|e| e.enabled = enabled).is_some()
    }

    /// Number of registered Systems.
    #[must_use]
    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    /// Names of registered Systems, in registration order.
    #[must_use]
    pub fn system_names(&self) -> Vec<&str> {
        self.systems.iter().map(|e| e.name.as_str()).collect()
    }

    /// Mode a System was registered with.
    #[must_use]
    pub fn system_mode(&self, id: SystemId) -> Option<SystemMode> {
        self.systems.get(id.0).map(|e| e.mode)
    }

    /// Components of type `ty` currently buffered for a System.
    #[must_use]
    pub fn buffered_len(&self, id: SystemId, ty: ComponentType) -> Option<usize> {
        self.systems.get(id.0).map(|e| e.buffer().get(ty).len())
    }

    // =========================================================================
    // Phases
    // =========================================================================

    /// Phase 1: applies queued mutations.
    pub fn resolve_mutations(&mut self) -> ResolutionReport {
        if !self.commands.has_pending() {
            return ResolutionReport::default();
        }
        self.tree.resolve(self.commands.take_batch())
    }

    /// Phase 2: recomputes live world transforms.
    pub fn precompute_transforms(&mut self) -> usize {
        self.tree.precompute()
    }

    /// Phase 3: freezes world transforms and publishes the snapshot.
    pub fn freeze_transforms(&mut self) -> usize {
        let frozen = {
            let mut back = self.frozen.back_mut();
            back.begin(self.frame);
            self.tree.freeze(&mut back)
        };
        self.frozen.publish();
        frozen
    }

    /// Phase 4: pushes every enabled component into the buffers of the
    /// enabled Systems interested in its type.
    pub fn notify_systems(&mut self) -> usize {
        let Self {
            tree, routes, systems, ..
        } = self;

        let mut notified = 0;
        tree.for_each_enabled_component(|component| {
            let ty = component.ty();
            let Some(targets) = routes.get(&ty) else {
                return;
            };
            for id in targets {
                if let Some(entry) = systems.get_mut(id.0).filter(|e| e.enabled) {
                    entry.buffer_mut().add_component(ty, Arc::clone(component));
                    notified += 1;
                }
            }
        });
        notified
    }

    /// Phase 5: runs component `update`, children before parents.
    pub fn update_entities(&mut self, dt: f32) -> usize {
        self.tree.update_components(dt, self.frame, &self.commands)
    }

    /// Phase 6: runs every enabled System and waits for the concurrent ones.
    ///
    /// Buffers of every System are cleared before returning, on success and
    /// on failure.
    ///
    /// # Errors
    ///
    /// `SystemFaults` if any System returned an error or panicked,
    /// `BarrierTimeout` if concurrent Systems missed the configured timeout.
    /// Faults from Systems that finished after a timed-out frame are
    /// carried into the next `SystemFaults`, whose `frame` is the reporting
    /// frame; use [`SystemFault::frame`] to tell them apart.
    pub fn update_systems(&mut self, dt: f32) -> EngineResult<SystemPhaseStats> {
        let frame = self.frame;
        let concurrent = self.systems.iter().filter(|e| e.enabled && e.is_concurrent()).count();

        self.barrier.expect(concurrent);
        for entry in self.systems.iter_mut().filter(|e| e.enabled) {
            if let SystemKind::Concurrent { runner, staging } = &mut entry.kind {
                runner.notify_update(dt, frame, staging);
            }
        }

        let mut faults = std::mem::take(&mut self.late_faults);
        let mut sync_systems = 0;
        for entry in self.systems.iter_mut().filter(|e| e.enabled) {
            if let SystemKind::Synchronous { system, buffer } = &mut entry.kind {
                sync_systems += 1;
                if let Some(fault) = run_guarded(system.as_mut(), buffer, &self.commands, dt, frame) {
                    error!(system = %fault.system, frame, panicked = fault.panicked, reason = %fault.reason, "system update failed");
                    faults.push(fault);
                }
            }
        }

        let wait_start = Instant::now();
        let waited = self.barrier.wait(self.config.barrier_timeout());
        let barrier_wait = wait_start.elapsed();

        for entry in &mut self.systems {
            entry.buffer_mut().clear_components();
        }
        faults.extend(self.fault_rx.try_iter());

        if let Err(pending) = waited {
            self.stalled = true;
            self.late_faults = faults;
            error!(frame, pending, waited_ms = barrier_wait.as_millis() as u64, "concurrent systems missed the frame barrier");
            return Err(EngineError::BarrierTimeout {
                pending,
                waited_ms: barrier_wait.as_millis() as u64,
            });
        }

        if !faults.is_empty() {
            return Err(EngineError::SystemFaults { frame, faults });
        }

        Ok(SystemPhaseStats {
            sync_systems,
            concurrent_systems: concurrent,
            barrier_wait,
        })
    }

    /// Blocks until Systems left running by a timed-out frame have arrived.
    fn drain_stalled(&mut self) -> EngineResult<()> {
        if !self.stalled {
            return Ok(());
        }

        let start = Instant::now();
        match self.barrier.wait(self.config.barrier_timeout()) {
            Ok(()) => {
                self.stalled = false;
                self.late_faults.extend(self.fault_rx.try_iter());
                debug!(waited_us = start.elapsed().as_micros() as u64, "stalled systems caught up");
                Ok(())
            }
            Err(pending) => Err(EngineError::BarrierTimeout {
                pending,
                waited_ms: start.elapsed().as_millis() as u64,
            }),
        }
    }

    // =========================================================================
    // Frame loop
    // =========================================================================

    /// Runs one frame, phases 1 through 6.
    ///
    /// # Errors
    ///
    /// `BarrierTimeout` if Systems from an earlier frame are still running
    /// (no phase runs) or missed this frame's barrier. `SystemFaults` if any
    /// System failed; the frame still completed.
    pub fn tick(&mut self, dt: f32) -> EngineResult<FrameStats> {
        let start = Instant::now();
        self.drain_stalled()?;

        self.frame += 1;
        let frame = self.frame;

        let report = self.resolve_mutations();
        let transforms_computed = self.precompute_transforms();
        self.freeze_transforms();
        let notified = self.notify_systems();
        let entity_updates = self.update_entities(dt);
        let systems = self.update_systems(dt)?;

        let total = start.elapsed();
        if let Some(budget) = self.config.frame_budget() {
            if total > budget {
                warn!(frame, total_us = total.as_micros() as u64, budget_us = budget.as_micros() as u64, "frame over budget");
            }
        }

        debug!(
            frame,
            attached = report.attached,
            released = report.released,
            notified,
            entity_updates,
            total_us = total.as_micros() as u64,
            "frame complete"
        );

        Ok(FrameStats {
            frame,
            dt,
            report,
            transforms_computed,
            notified,
            entity_updates,
            sync_systems: systems.sync_systems,
            concurrent_systems: systems.concurrent_systems,
            barrier_wait_us: systems.barrier_wait.as_micros() as u64,
            total_us: total.as_micros() as u64,
        })
    }

    /// Runs frames paced by the configured timestep until stopped.
    /// Returns the number of frames run.
    ///
    /// # Errors
    ///
    /// The first error from [`tick`](Self::tick), except `SystemFaults`
    /// when `halt_on_system_error` is off.
    pub fn run(&mut self) -> EngineResult<u64> {
        self.drive(None)
    }

    /// Like [`run`](Self::run), but stops after `frames` frames.
    ///
    /// # Errors
    ///
    /// Same as [`run`](Self::run).
    pub fn run_frames(&mut self, frames: u64) -> EngineResult<u64> {
        self.drive(Some(frames))
    }

    fn drive(&mut self, limit: Option<u64>) -> EngineResult<u64> {
        let done = |ran: u64| limit.is_some_and(|limit| ran >= limit);

        self.clock.reset();
        info!(?limit, timestep = ?self.config.timestep, "frame loop started");

        let mut ran = 0;
        while !done(ran) && !self.stop.is_stopped() {
            let steps = self.clock.advance();
            if steps.count == 0 {
                self.clock.wait_for_next_step();
                continue;
            }

            for _ in 0..steps.count {
                if done(ran) || self.stop.is_stopped() {
                    break;
                }
                match self.tick(steps.dt) {
                    Ok(_) => {}
                    Err(EngineError::SystemFaults { .. }) if !self.config.halt_on_system_error => {}
                    Err(err) => {
                        error!(frame = self.frame, error = %err, "frame loop halted");
                        return Err(err);
                    }
                }
                ran += 1;
            }
        }

        info!(frames = ran, dropped_steps = self.clock.dropped_steps(), "frame loop stopped");
        Ok(ran)
    }

    // =========================================================================
    // Scene management
    // =========================================================================

    /// Makes `scene` the active scene and returns the previous one, with its
    /// root disabled.
    pub fn swap_scene(&mut self, scene: SceneTree) -> SceneTree {
        let mut previous = std::mem::replace(&mut self.tree, scene);
        previous.set_enabled(EntityId::ROOT, false);
        info!(entities = self.tree.len(), "active scene replaced");
        previous
    }

    /// Former eager resolution entry point. Does nothing.
    ///
    /// # Errors
    ///
    /// Always returns `DeprecatedCall`.
    #[deprecated(note = "mutations are applied by `tick`; call `resolve_mutations` to run phase 1 alone")]
    pub fn resolve_entities(&self) -> EngineResult<()> {
        error!("resolve_entities is deprecated and does nothing; mutations are applied at the frame boundary");
        Err(EngineError::DeprecatedCall("resolve_entities"))
    }
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::build(EngineConfig::default())
    }
}

impl Drop for FrameScheduler {
    fn drop(&mut self) {
        for entry in &self.systems {
            if let SystemKind::Concurrent { runner, .. } = &entry.kind {
                debug!(system = %runner.name(), "stopping system thread");
                runner.stop_looping();
            }
        }
        // Runner drops join their threads.
        self.systems.clear();
    }
}
