//! # Components
//!
//! Typed data and behaviour attached to an entity.
//!
//! A component is stored once, in a [`ComponentSlot`] shared through
//! [`ComponentRef`]. The owning entity node keeps one reference; every System
//! interested in the component's type receives another for the duration of a
//! frame.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::entity::EntityId;
use super::mutation::SceneCommands;

/// Upcast helper so stored components can be downcast to their concrete type.
pub trait AsAny {
    /// Returns `self` as `&dyn Any`.
    fn as_any(&self) -> &dyn Any;
    /// Returns `self` as `&mut dyn Any`.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Per-entity data with an optional per-frame behaviour.
///
/// Both hooks default to no-ops, so plain data types only need an empty impl.
pub trait Component: AsAny + Send + Sync + 'static {
    /// Called once per frame in the entity update phase (children before
    /// parents). Structural changes go through `ctx.commands`.
    fn update(&mut self, _ctx: &mut UpdateContext<'_>) {}

    /// Called when the owning entity is released.
    fn on_release(&mut self) {}
}

/// Stable type tag of a component, fixed at construction.
///
/// Equality and hashing use the `TypeId` only; the name is for diagnostics.
#[derive(Clone, Copy, Debug)]
pub struct ComponentType {
    id: TypeId,
    name: &'static str,
}

impl ComponentType {
    /// Type tag of `T`.
    #[inline]
    #[must_use]
    pub fn of<T: Component>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Rust type name of the component.
    #[inline]
    #[must_use]
    pub const fn name(self) -> &'static str {
        self.name
    }
}

impl PartialEq for ComponentType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ComponentType {}

impl Hash for ComponentType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Shared handle to a stored component.
pub type ComponentRef = Arc<ComponentSlot>;

/// A component together with its routing metadata.
pub struct ComponentSlot {
    ty: ComponentType,
    /// Back-reference to the owning entity. Non-owning.
    owner: EntityId,
    enabled: AtomicBool,
    inner: RwLock<Box<dyn Component>>,
}

impl ComponentSlot {
    /// Wraps a component owned by `owner`.
    #[must_use]
    pub fn new<C: Component>(owner: EntityId, component: C) -> ComponentRef {
        Arc::new(Self {
            ty: ComponentType::of::<C>(),
            owner,
            enabled: AtomicBool::new(true),
            inner: RwLock::new(Box::new(component)),
        })
    }

    /// Type tag used for System routing.
    #[inline]
    #[must_use]
    pub const fn ty(&self) -> ComponentType {
        self.ty
    }

    /// Id of the owning entity.
    #[inline]
    #[must_use]
    pub const fn owner(&self) -> EntityId {
        self.owner
    }

    /// Whether the component takes part in notification and update.
    #[inline]
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Enables or disables the component.
    #[inline]
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Checks the concrete type.
    #[inline]
    #[must_use]
    pub fn is<T: Component>(&self) -> bool {
        self.ty == ComponentType::of::<T>()
    }

    /// Shared access to the component as `T`.
    ///
    /// Returns `None` if the component is not a `T`.
    #[must_use]
    pub fn read<T: Component>(&self) -> Option<MappedRwLockReadGuard<'_, T>> {
        RwLockReadGuard::try_map(self.inner.read(), |c| (**c).as_any().downcast_ref::<T>()).ok()
    }

    /// Exclusive access to the component as `T`.
    ///
    /// Returns `None` if the component is not a `T`.
    #[must_use]
    pub fn write<T: Component>(&self) -> Option<MappedRwLockWriteGuard<'_, T>> {
        RwLockWriteGuard::try_map(self.inner.write(), |c| (**c).as_any_mut().downcast_mut::<T>()).ok()
    }

    pub(crate) fn update(&self, ctx: &mut UpdateContext<'_>) {
        self.inner.write().update(ctx);
    }

    /// Runs the release hook and disables the component.
    pub(crate) fn release(&self) {
        self.set_enabled(false);
        self.inner.write().on_release();
    }
}

impl fmt::Debug for ComponentSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentSlot")
            .field("ty", &self.ty.name)
            .field("owner", &self.owner)
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

/// Context passed to [`Component::update`].
pub struct UpdateContext<'a> {
    /// Frame delta in seconds.
    pub dt: f32,
    /// Current frame number.
    pub frame: u64,
    /// Entity owning the component being updated.
    pub entity: EntityId,
    /// Deferred structural changes, applied at the next frame boundary.
    pub commands: &'a SceneCommands,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq)]
    struct Position {
        x: f32,
    }

    impl Component for Position {}

    struct Velocity;

    impl Component for Velocity {}

    #[test]
    fn test_type_tag_identity() {
        assert_eq!(ComponentType::of::<Position>(), ComponentType::of::<Position>());
        assert_ne!(ComponentType::of::<Position>(), ComponentType::of::<Velocity>());
        assert!(ComponentType::of::<Position>().name().ends_with("Position"));
    }

    #[test]
    fn test_typed_access() {
        let slot = ComponentSlot::new(EntityId::new(3), Position { x: 1.0 });

        assert!(slot.is::<Position>());
        assert!(slot.read::<Velocity>().is_none());

        if let Some(mut p) = slot.write::<Position>() {
            p.x = 5.0;
        }
        assert_eq!(slot.read::<Position>().map(|p| p.x), Some(5.0));
    }

    #[test]
    fn test_release_disables() {
        let slot = ComponentSlot::new(EntityId::new(1), Velocity);
        assert!(slot.is_enabled());
        slot.release();
        assert!(!slot.is_enabled());
    }
}
