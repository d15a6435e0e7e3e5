//! # Scene Tree
//!
//! Arena-backed entity hierarchy.
//!
//! ## Layout
//!
//! Every live entity is an [`EntityNode`] in a [`SlotPool`]. Parent/child
//! links are [`SlotHandle`]s; an id → handle index serves lookups by
//! [`EntityId`]. Releasing an entity frees its whole subtree from the pool.
//!
//! ## Traversal Order
//!
//! | Walk                  | Order                         | Disabled subtree |
//! |-----------------------|-------------------------------|------------------|
//! | mutation resolution   | pre-order                     | visited          |
//! | precompute transforms | pre-order                     | skipped          |
//! | freeze transforms     | pre-order                     | skipped          |
//! | system notification   | pre-order                     | skipped          |
//! | component update      | post-order (children first)   | skipped          |
//!
//! Children are visited in attachment order, so every walk is
//! deterministic.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::{trace, warn};

use super::component::{ComponentRef, UpdateContext};
use super::entity::{Entity, EntityId, EntityParts};
use super::mutation::{MutationBatch, PendingAddition, ResolutionReport, SceneCommands};
use crate::error::{EngineError, EngineResult};
use crate::math::{Mat4, Transform};
use crate::memory::{SlotHandle, SlotPool};
use crate::sync::FrozenFrame;

/// Transform state of one entity.
///
/// `world` is the live value recomputed by the precompute phase; `frozen` is
/// the copy published by the freeze phase.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransformState {
    /// Transform relative to the parent.
    pub local: Transform,
    /// Live world transform.
    pub world: Mat4,
    /// World transform as of the last freeze.
    pub frozen: Mat4,
    /// Set when `world` was recomputed this frame.
    pub prepared: bool,
    /// Set once `world` has been computed at least once.
    pub initialized: bool,
}

impl TransformState {
    const fn new(local: Transform) -> Self {
        Self {
            local,
            world: Mat4::IDENTITY,
            frozen: Mat4::IDENTITY,
            prepared: false,
            initialized: false,
        }
    }
}

struct EntityNode {
    id: EntityId,
    parent: Option<SlotHandle>,
    children: Vec<SlotHandle>,
    components: Vec<ComponentRef>,
    enabled: bool,
    is_static: bool,
    transform: TransformState,
}

/// The live entity hierarchy of one scene.
///
/// Structural changes only happen through [`SceneTree::insert`] or a
/// resolution pass, both of which need `&mut self`.
pub struct SceneTree {
    nodes: SlotPool<EntityNode>,
    index: HashMap<EntityId, SlotHandle>,
    root: SlotHandle,
}

impl SceneTree {
    /// Creates a tree holding only the enabled root.
    #[must_use]
    pub fn new() -> Self {
        let mut nodes = SlotPool::with_capacity(64);
        let root = nodes.insert(EntityNode {
            id: EntityId::ROOT,
            parent: None,
            children: Vec::new(),
            components: Vec::new(),
            enabled: true,
            is_static: false,
            transform: TransformState::new(Transform::IDENTITY),
        });

        let mut index = HashMap::with_capacity(64);
        index.insert(EntityId::ROOT, root);

        Self { nodes, index, root }
    }

    // =========================================================================
    // Read API
    // =========================================================================

    /// Number of entities below the root.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    /// Returns true if only the root is present.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if the entity is live in this tree.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.index.contains_key(&id)
    }

    /// Enabled flag of a live entity.
    #[must_use]
    pub fn is_enabled(&self, id: EntityId) -> Option<bool> {
        self.node(id).map(|n| n.enabled)
    }

    /// Static flag of a live entity.
    #[must_use]
    pub fn is_static(&self, id: EntityId) -> Option<bool> {
        self.node(id).map(|n| n.is_static)
    }

    /// Parent of a live entity. `None` for the root and unknown ids.
    #[must_use]
    pub fn parent(&self, id: EntityId) -> Option<EntityId> {
        let parent = self.node(id)?.parent?;
        self.nodes.get(parent).map(|n| n.id)
    }

    /// Children of a live entity, in attachment order.
    #[must_use]
    pub fn children(&self, id: EntityId) -> Vec<EntityId> {
        self.node(id)
            .map(|n| n.children.iter().filter_map(|h| self.nodes.get(*h)).map(|c| c.id).collect())
            .unwrap_or_default()
    }

    /// Components of a live entity.
    #[must_use]
    pub fn components(&self, id: EntityId) -> Option<&[ComponentRef]> {
        self.node(id).map(|n| n.components.as_slice())
    }

    /// Full transform state of a live entity.
    #[must_use]
    pub fn transform_state(&self, id: EntityId) -> Option<&TransformState> {
        self.node(id).map(|n| &n.transform)
    }

    /// Local transform of a live entity.
    #[must_use]
    pub fn local_transform(&self, id: EntityId) -> Option<Transform> {
        self.node(id).map(|n| n.transform.local)
    }

    /// Live world transform of an entity.
    #[must_use]
    pub fn world_transform(&self, id: EntityId) -> Option<Mat4> {
        self.node(id).map(|n| n.transform.world)
    }

    /// World transform as of the last freeze.
    #[must_use]
    pub fn frozen_transform(&self, id: EntityId) -> Option<Mat4> {
        self.node(id).map(|n| n.transform.frozen)
    }

    /// Whether the world transform was recomputed in the current frame.
    #[must_use]
    pub fn is_prepared(&self, id: EntityId) -> Option<bool> {
        self.node(id).map(|n| n.transform.prepared)
    }

    /// Every live id, root first, in pre-order.
    #[must_use]
    pub fn preorder(&self) -> Vec<EntityId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(handle) = stack.pop() {
            if let Some(node) = self.nodes.get(handle) {
                out.push(node.id);
                stack.extend(node.children.iter().rev());
            }
        }
        out
    }

    // =========================================================================
    // Direct mutation (between frames only)
    // =========================================================================

    /// Enables or disables an entity. Returns false for unknown ids.
    pub fn set_enabled(&mut self, id: EntityId, enabled: bool) -> bool {
        self.node_mut(id).map(|n| n.enabled = enabled).is_some()
    }

    /// Marks an entity static or dynamic. Returns false for unknown ids.
    pub fn set_static(&mut self, id: EntityId, is_static: bool) -> bool {
        self.node_mut(id).map(|n| n.is_static = is_static).is_some()
    }

    /// Replaces the local transform. Returns false for unknown ids.
    ///
    /// A static entity keeps its computed world transform until it is made
    /// dynamic again.
    pub fn set_local_transform(&mut self, id: EntityId, local: Transform) -> bool {
        self.node_mut(id).map(|n| n.transform.local = local).is_some()
    }

    /// Attaches a detached entity immediately. Used to build a scene that is
    /// not yet active, or by the owner of the scheduler between frames.
    ///
    /// # Errors
    ///
    /// `OrphanedAddition` if `parent` is not in the tree, `DuplicateRequest`
    /// if an id in the entity's subtree is already live. The entity is
    /// released in both cases.
    pub fn insert(&mut self, parent: EntityId, entity: Entity) -> EngineResult<usize> {
        let Some(&parent_handle) = self.index.get(&parent) else {
            let id = entity.id();
            entity.release();
            return Err(EngineError::OrphanedAddition { entity: id, parent });
        };
        if let Some(conflict) = self.first_conflict(&entity) {
            entity.release();
            return Err(EngineError::DuplicateRequest(conflict));
        }
        Ok(self.attach(parent_handle, entity))
    }

    /// Releases every entity below the root. Returns how many were released.
    pub fn release_all(&mut self) -> usize {
        let children = self.nodes.get(self.root).map(|n| n.children.clone()).unwrap_or_default();
        children.into_iter().map(|child| self.release_subtree(child)).sum()
    }

    fn node(&self, id: EntityId) -> Option<&EntityNode> {
        self.nodes.get(*self.index.get(&id)?)
    }

    fn node_mut(&mut self, id: EntityId) -> Option<&mut EntityNode> {
        self.nodes.get_mut(*self.index.get(&id)?)
    }

    fn child_at(&self, handle: SlotHandle, i: usize) -> Option<SlotHandle> {
        self.nodes.get(handle)?.children.get(i).copied()
    }

    // =========================================================================
    // Attach / release
    // =========================================================================

    /// First id of the entity's subtree that is already live, or repeated
    /// inside the subtree itself.
    fn first_conflict(&self, entity: &Entity) -> Option<EntityId> {
        let mut seen = HashSet::new();
        entity
            .subtree_ids()
            .into_iter()
            .find(|id| self.index.contains_key(id) || !seen.insert(*id))
    }

    fn attach(&mut self, parent: SlotHandle, entity: Entity) -> usize {
        let EntityParts {
            id,
            enabled,
            is_static,
            transform,
            components,
            children,
        } = entity.into_parts();

        let handle = self.nodes.insert(EntityNode {
            id,
            parent: Some(parent),
            children: Vec::with_capacity(children.len()),
            components,
            enabled,
            is_static,
            transform: TransformState::new(transform),
        });
        if let Some(parent) = self.nodes.get_mut(parent) {
            parent.children.push(handle);
        }
        self.index.insert(id, handle);
        trace!(entity = %id, "attached");

        let mut attached = 1;
        for child in children {
            attached += self.attach(handle, child);
        }
        attached
    }

    fn release_subtree(&mut self, handle: SlotHandle) -> usize {
        let parent = self.nodes.get(handle).and_then(|n| n.parent);
        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(p)) {
            parent.children.retain(|c| *c != handle);
        }
        self.free_subtree(handle)
    }

    fn free_subtree(&mut self, handle: SlotHandle) -> usize {
        let Some(node) = self.nodes.remove(handle) else {
            return 0;
        };
        self.index.remove(&node.id);

        let mut released = 1;
        for child in node.children {
            released += self.free_subtree(child);
        }
        for component in &node.components {
            component.release();
        }
        trace!(entity = %node.id, "released");
        released
    }

    // =========================================================================
    // Phase 1: mutation resolution
    // =========================================================================

    /// Applies a batch of deferred mutations.
    ///
    /// One pre-order walk handles deletions and additions. At each node a
    /// pending deletion is checked first, so a deletion always wins over an
    /// addition targeting the same node or anything below it. Toggles are
    /// applied after the walk, then leftovers are reported as orphans.
    pub(crate) fn resolve(&mut self, batch: MutationBatch) -> ResolutionReport {
        let MutationBatch {
            mut additions,
            mut deletions,
            toggles,
            moves,
        } = batch;
        let mut report = ResolutionReport::default();

        if !additions.is_empty() || !deletions.is_empty() {
            self.resolve_node(self.root, &mut additions, &mut deletions, &mut report);
        }

        for (id, enabled) in toggles {
            if self.set_enabled(id, enabled) {
                report.toggled += 1;
            } else {
                warn!(entity = %id, enabled, "enable request for unknown entity ignored");
            }
        }

        for (id, local) in moves {
            if self.set_local_transform(id, local) {
                report.moved += 1;
            } else {
                warn!(entity = %id, "transform change for unknown entity ignored");
            }
        }

        for PendingAddition { parent, entity } in additions {
            let id = entity.id();
            warn!(entity = %id, parent = %parent, "orphaned addition: parent not found, releasing");
            entity.release();
            report.orphaned_additions += 1;
            report.issues.push(EngineError::OrphanedAddition { entity: id, parent });
        }

        for id in deletions {
            warn!(entity = %id, "orphaned deletion: entity not found");
            report.orphaned_deletions += 1;
            report.issues.push(EngineError::OrphanedDeletion(id));
        }

        report
    }

    fn resolve_node(
        &mut self,
        handle: SlotHandle,
        additions: &mut Vec<PendingAddition>,
        deletions: &mut BTreeSet<EntityId>,
        report: &mut ResolutionReport,
    ) {
        let Some(id) = self.nodes.get(handle).map(|n| n.id) else {
            return;
        };

        if !id.is_root() && deletions.remove(&id) {
            report.released += self.release_subtree(handle);
            return;
        }

        let mut i = 0;
        while i < additions.len() {
            if additions[i].parent != id {
                i += 1;
                continue;
            }
            let PendingAddition { entity, .. } = additions.remove(i);
            if let Some(conflict) = self.first_conflict(&entity) {
                warn!(entity = %entity.id(), conflict = %conflict, "addition rejected: id already live");
                entity.release();
                report.rejected += 1;
                report.issues.push(EngineError::DuplicateRequest(conflict));
            } else {
                report.attached += self.attach(handle, entity);
            }
        }

        if additions.is_empty() && deletions.is_empty() {
            return;
        }

        // Deleted children drop out of the list, so only advance past
        // children that survived.
        let mut i = 0;
        while let Some(child) = self.child_at(handle, i) {
            self.resolve_node(child, additions, deletions, report);
            if self.nodes.contains(child) {
                i += 1;
            }
        }
    }

    // =========================================================================
    // Phase 2: precompute transforms
    // =========================================================================

    /// Recomputes live world transforms. Returns how many were computed.
    pub(crate) fn precompute(&mut self) -> usize {
        for node in self.nodes.values_mut() {
            node.transform.prepared = false;
        }
        let mut computed = 0;
        self.precompute_node(self.root, Mat4::IDENTITY, &mut computed);
        computed
    }

    fn precompute_node(&mut self, handle: SlotHandle, parent_world: Mat4, computed: &mut usize) {
        let Some(node) = self.nodes.get_mut(handle) else {
            return;
        };
        if !node.enabled {
            return;
        }

        let state = &mut node.transform;
        if !node.is_static || !state.initialized {
            state.world = parent_world * state.local.to_matrix();
            state.prepared = true;
            state.initialized = true;
            *computed += 1;
        }
        let world = state.world;

        let mut i = 0;
        while let Some(child) = self.child_at(handle, i) {
            self.precompute_node(child, world, computed);
            i += 1;
        }
    }

    // =========================================================================
    // Phase 3: freeze transforms
    // =========================================================================

    /// Copies live world transforms into the frozen state and into `out`.
    /// Returns how many were frozen.
    pub(crate) fn freeze(&mut self, out: &mut FrozenFrame) -> usize {
        let mut frozen = 0;
        self.freeze_node(self.root, out, &mut frozen);
        frozen
    }

    fn freeze_node(&mut self, handle: SlotHandle, out: &mut FrozenFrame, frozen: &mut usize) {
        let Some(node) = self.nodes.get_mut(handle) else {
            return;
        };
        if !node.enabled {
            return;
        }

        node.transform.frozen = node.transform.world;
        out.insert(node.id, node.transform.frozen);
        *frozen += 1;

        let mut i = 0;
        while let Some(child) = self.child_at(handle, i) {
            self.freeze_node(child, out, frozen);
            i += 1;
        }
    }

    // =========================================================================
    // Phase 4 / 5: component walks
    // =========================================================================

    /// Visits every enabled component of every enabled entity, parents
    /// before children. Disabled subtrees are skipped.
    pub fn for_each_enabled_component(&self, mut f: impl FnMut(&ComponentRef)) {
        self.visit_preorder(self.root, &mut f);
    }

    fn visit_preorder<F: FnMut(&ComponentRef)>(&self, handle: SlotHandle, f: &mut F) {
        let Some(node) = self.nodes.get(handle) else {
            return;
        };
        if !node.enabled {
            return;
        }
        for component in node.components.iter().filter(|c| c.is_enabled()) {
            f(component);
        }
        for &child in &node.children {
            self.visit_preorder(child, f);
        }
    }

    /// Updates every enabled component of every enabled entity, children
    /// before parents. Returns how many components were updated.
    pub(crate) fn update_components(&self, dt: f32, frame: u64, commands: &SceneCommands) -> usize {
        let mut updated = 0;
        self.update_node(self.root, dt, frame, commands, &mut updated);
        updated
    }

    fn update_node(&self, handle: SlotHandle, dt: f32, frame: u64, commands: &SceneCommands, updated: &mut usize) {
        let Some(node) = self.nodes.get(handle) else {
            return;
        };
        if !node.enabled {
            return;
        }

        for &child in &node.children {
            self.update_node(child, dt, frame, commands, updated);
        }

        let mut ctx = UpdateContext {
            dt,
            frame,
            entity: node.id,
            commands,
        };
        for component in node.components.iter().filter(|c| c.is_enabled()) {
            component.update(&mut ctx);
            *updated += 1;
        }
    }
}

impl Default for SceneTree {
    fn default() -> Self {
        Self::new()
    }
}
