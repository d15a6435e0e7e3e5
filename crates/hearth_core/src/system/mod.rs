//! # Systems
//!
//! Per-component-type processors run once per frame.
//!
//! A System declares the component types it is interested in when it is
//! registered. During the notification phase the scheduler pushes every
//! enabled component of those types into the System's [`ComponentBuffer`];
//! the System reads the buffer in [`System::update`], and the buffer is
//! cleared before the next frame.
//!
//! ## Modes
//!
//! - [`SystemMode::Synchronous`]: `update` runs inline on the scheduler
//!   thread.
//! - [`SystemMode::Concurrent`]: `update` runs on the System's own thread.
//!   The scheduler waits on a [`FrameBarrier`] until every concurrent System
//!   has finished before the frame ends.

mod barrier;
mod concurrent;

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};

use crate::ecs::{Component, ComponentRef, ComponentType, SceneCommands};
use crate::error::{SystemError, SystemFault};

pub use barrier::{CompletionGuard, FrameBarrier};
pub(crate) use concurrent::ConcurrentRunner;

/// Where a System's `update` runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemMode {
    /// Inline on the scheduler thread.
    #[default]
    Synchronous,
    /// On a dedicated background thread, joined through the frame barrier.
    Concurrent,
}

/// Registration index of a System.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SystemId(pub(crate) usize);

impl SystemId {
    /// Registration index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "system#{}", self.0)
    }
}

/// A frame-level processor of components.
///
/// ## Example
///
/// ```rust,ignore
/// struct Gravity;
///
/// impl System for Gravity {
///     fn interests(&self) -> Vec<ComponentType> {
///         vec![ComponentType::of::<Velocity>()]
///     }
///
///     fn update(&mut self, ctx: &mut SystemContext<'_>) -> Result<(), SystemError> {
///         for c in ctx.components.of::<Velocity>() {
///             if let Some(mut v) = c.write::<Velocity>() {
///                 v.y -= 9.81 * ctx.dt;
///             }
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait System: Send + 'static {
    /// Name used in logs, thread names and faults.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Component types routed to this System. Read once at registration.
    fn interests(&self) -> Vec<ComponentType>;

    /// Processes this frame's components.
    ///
    /// # Errors
    ///
    /// A returned error is reported for this frame. The System is not
    /// retried and keeps running in later frames.
    fn update(&mut self, ctx: &mut SystemContext<'_>) -> Result<(), SystemError>;
}

/// Context passed to [`System::update`].
pub struct SystemContext<'a> {
    /// Frame delta in seconds.
    pub dt: f32,
    /// Current frame number.
    pub frame: u64,
    /// Components routed to this System this frame.
    pub components: &'a ComponentBuffer,
    /// Deferred structural changes, applied at the next frame boundary.
    pub commands: &'a SceneCommands,
}

/// Per-System component lists, keyed by component type.
///
/// The set of keys is fixed when the buffer is created from the System's
/// interests; components of any other type are ignored.
#[derive(Clone, Debug, Default)]
pub struct ComponentBuffer {
    lists: HashMap<ComponentType, Vec<ComponentRef>>,
}

impl ComponentBuffer {
    /// Creates an empty buffer accepting the given types.
    #[must_use]
    pub fn new(interests: &[ComponentType]) -> Self {
        Self {
            lists: interests.iter().map(|ty| (*ty, Vec::new())).collect(),
        }
    }

    /// Returns true if components of `ty` are accepted.
    #[inline]
    #[must_use]
    pub fn accepts(&self, ty: ComponentType) -> bool {
        self.lists.contains_key(&ty)
    }

    /// Appends a component to the list for `ty`. No-op for undeclared types.
    pub fn add_component(&mut self, ty: ComponentType, component: ComponentRef) {
        if let Some(list) = self.lists.get_mut(&ty) {
            list.push(component);
        }
    }

    /// Empties every list. Keeps the declared types and allocations.
    pub fn clear_components(&mut self) {
        for list in self.lists.values_mut() {
            list.clear();
        }
    }

    /// Components buffered for `ty`.
    #[must_use]
    pub fn get(&self, ty: ComponentType) -> &[ComponentRef] {
        self.lists.get(&ty).map_or(&[], Vec::as_slice)
    }

    /// Components buffered for `T`.
    #[must_use]
    pub fn of<T: Component>(&self) -> &[ComponentRef] {
        self.get(ComponentType::of::<T>())
    }

    /// Number of components buffered for `T`.
    #[must_use]
    pub fn len_of<T: Component>(&self) -> usize {
        self.of::<T>().len()
    }

    /// Number of components buffered across all types.
    #[must_use]
    pub fn total(&self) -> usize {
        self.lists.values().map(Vec::len).sum()
    }

    /// Declared component types.
    pub fn declared(&self) -> impl Iterator<Item = ComponentType> + '_ {
        self.lists.keys().copied()
    }
}

/// Runs one `update`, turning an error or a panic into a fault.
pub(crate) fn run_guarded(
    system: &mut dyn System,
    components: &ComponentBuffer,
    commands: &SceneCommands,
    dt: f32,
    frame: u64,
) -> Option<SystemFault> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut ctx = SystemContext {
            dt,
            frame,
            components,
            commands,
        };
        system.update(&mut ctx)
    }));

    let (reason, panicked) = match outcome {
        Ok(Ok(())) => return None,
        Ok(Err(err)) => (err.reason().to_owned(), false),
        Err(payload) => (panic_message(&*payload), true),
    };
    Some(SystemFault {
        system: system.name().to_owned(),
        frame,
        reason,
        panicked,
    })
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
