//! # HEARTH Core
//!
//! Frame scheduler for a real-time simulation engine:
//! - Hierarchical scene of entities and components
//! - Structural changes deferred to frame boundaries
//! - Systems run inline or on their own thread, joined by a frame barrier
//!
//! ## Architecture Rules
//!
//! 1. **Frame-boundary mutations** - the tree is only restructured in phase 1,
//!    on the scheduler thread, while nothing else reads it
//! 2. **Strict phase order** - no phase starts before the previous one drained
//! 3. **Double-buffered transforms** - renderers read a frozen snapshot
//! 4. **No global engine** - everything hangs off a [`FrameScheduler`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use hearth_core::{EngineConfig, FrameScheduler, SystemMode};
//!
//! let mut engine = FrameScheduler::new(EngineConfig::default())?;
//! engine.add_system(Movement, SystemMode::Concurrent)?;
//! engine.commands().add_entity(engine.ids().spawn().with_component(Velocity::default()))?;
//! engine.run_frames(60)?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod ecs;
pub mod error;
pub mod math;
pub mod memory;
pub mod scheduler;
pub mod sync;
pub mod system;

pub use config::{EngineConfig, TimestepConfig, MAX_TICK_RATE};
pub use ecs::{
    Component, ComponentRef, ComponentSlot, ComponentType, Entity, EntityId, EntityIds, ResolutionReport,
    SceneCommands, SceneTree, TransformState, UpdateContext,
};
pub use error::{EngineError, EngineResult, SystemError, SystemFault};
pub use math::{Mat4, Quat, Transform, Vec3};
pub use memory::{SlotHandle, SlotPool};
pub use scheduler::{FrameClock, FrameScheduler, FrameStats, FrameSteps, StopHandle, SystemPhaseStats};
pub use sync::{FrozenFrame, FrozenTransforms};
pub use system::{ComponentBuffer, CompletionGuard, FrameBarrier, System, SystemContext, SystemId, SystemMode};
