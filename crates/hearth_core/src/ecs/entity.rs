//! # Entity Management
//!
//! Entities are identified by a plain integer id. Id `0` is reserved for the
//! scene root, which the tree creates itself.
//!
//! Game logic builds a detached [`Entity`] (optionally with a whole subtree of
//! children), hands it to [`SceneCommands`](super::SceneCommands), and the
//! scheduler moves it into the live tree at the next frame boundary.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use super::component::{Component, ComponentRef, ComponentSlot};
use crate::math::Transform;

/// Unique identifier for an entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct EntityId(u32);

impl EntityId {
    /// The scene root. Created by the tree, never deletable.
    pub const ROOT: Self = Self(0);

    /// Creates an entity ID from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Checks if this is the scene root.
    #[inline]
    #[must_use]
    pub const fn is_root(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Thread-safe entity id allocator.
///
/// Owned by the scheduler context; clones share the same counter. Ids start
/// at 1 so the root id is never handed out.
#[derive(Clone, Debug)]
pub struct EntityIds {
    next: Arc<AtomicU32>,
}

impl EntityIds {
    /// Creates an allocator starting at id 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: Arc::new(AtomicU32::new(1)),
        }
    }

    /// Allocates the next unused id.
    #[inline]
    pub fn allocate(&self) -> EntityId {
        EntityId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Allocates an id and returns a fresh detached entity for it.
    #[must_use]
    pub fn spawn(&self) -> Entity {
        Entity::new(self.allocate())
    }
}

impl Default for EntityIds {
    fn default() -> Self {
        Self::new()
    }
}

/// A detached entity: not yet part of any scene.
///
/// Built by game logic, then moved into the core through
/// [`SceneCommands::add_entity`](super::SceneCommands::add_entity). Children
/// added here are attached together with their parent.
///
/// ## Usage
///
/// ```rust,ignore
/// let player = Entity::new(EntityId::new(1))
///     .with_transform(Transform::from_xyz(0.0, 1.0, 0.0))
///     .with_component(Position::default())
///     .with_child(Entity::new(EntityId::new(2)).with_component(Weapon::default()));
///
/// commands.add_entity(player)?;
/// ```
pub struct Entity {
    id: EntityId,
    enabled: bool,
    is_static: bool,
    transform: Transform,
    components: Vec<ComponentRef>,
    children: Vec<Entity>,
}

impl Entity {
    /// Creates an enabled, non-static entity with an identity transform.
    #[must_use]
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            enabled: true,
            is_static: false,
            transform: Transform::IDENTITY,
            components: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Returns the entity id.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> EntityId {
        self.id
    }

    /// Returns whether the entity starts enabled.
    #[inline]
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns whether the entity is static.
    #[inline]
    #[must_use]
    pub const fn is_static(&self) -> bool {
        self.is_static
    }

    /// Local transform relative to the parent.
    #[inline]
    #[must_use]
    pub const fn transform(&self) -> &Transform {
        &self.transform
    }

    /// Components owned by this entity.
    #[inline]
    #[must_use]
    pub fn components(&self) -> &[ComponentRef] {
        &self.components
    }

    /// Detached children.
    #[inline]
    #[must_use]
    pub fn children(&self) -> &[Entity] {
        &self.children
    }

    /// Sets the enabled flag.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Marks the entity static: its world transform is computed once.
    #[must_use]
    pub const fn with_static(mut self, is_static: bool) -> Self {
        self.is_static = is_static;
        self
    }

    /// Sets the local transform.
    #[must_use]
    pub const fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    /// Adds a component.
    #[must_use]
    pub fn with_component<C: Component>(mut self, component: C) -> Self {
        self.add_component(component);
        self
    }

    /// Adds a child.
    #[must_use]
    pub fn with_child(mut self, child: Entity) -> Self {
        self.children.push(child);
        self
    }

    /// Adds a component and returns a shared reference to it.
    pub fn add_component<C: Component>(&mut self, component: C) -> ComponentRef {
        let slot = ComponentSlot::new(self.id, component);
        self.components.push(Arc::clone(&slot));
        slot
    }

    /// Adds a child.
    pub fn add_child(&mut self, child: Entity) {
        self.children.push(child);
    }

    /// Ids of this entity and every descendant, pre-order.
    #[must_use]
    pub fn subtree_ids(&self) -> Vec<EntityId> {
        let mut ids = Vec::new();
        self.collect_ids(&mut ids);
        ids
    }

    fn collect_ids(&self, out: &mut Vec<EntityId>) {
        out.push(self.id);
        for child in &self.children {
            child.collect_ids(out);
        }
    }

    /// Destroys the entity and its whole subtree, children first.
    ///
    /// Runs every component's release hook. Returns the number of entities
    /// released.
    pub fn release(self) -> usize {
        let mut released = 0;
        for child in self.children {
            released += child.release();
        }
        for component in &self.components {
            component.release();
        }
        released + 1
    }

    pub(crate) fn into_parts(self) -> EntityParts {
        EntityParts {
            id: self.id,
            enabled: self.enabled,
            is_static: self.is_static,
            transform: self.transform,
            components: self.components,
            children: self.children,
        }
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("enabled", &self.enabled)
            .field("is_static", &self.is_static)
            .field("components", &self.components.len())
            .field("children", &self.children)
            .finish()
    }
}

/// Owned pieces of a detached entity, consumed when it is attached.
pub(crate) struct EntityParts {
    pub id: EntityId,
    pub enabled: bool,
    pub is_static: bool,
    pub transform: Transform,
    pub components: Vec<ComponentRef>,
    pub children: Vec<Entity>,
}
