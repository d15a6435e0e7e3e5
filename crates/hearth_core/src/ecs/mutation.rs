//! # Deferred Mutations
//!
//! Structural changes requested during a frame are queued here and applied
//! by the scheduler at the next frame boundary, while no other thread reads
//! the tree.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use super::entity::{Entity, EntityId};
use crate::error::{EngineError, EngineResult};
use crate::math::Transform;

/// An entity waiting to be attached under `parent`.
pub(crate) struct PendingAddition {
    pub parent: EntityId,
    pub entity: Entity,
}

#[derive(Default)]
struct MutationQueue {
    /// Additions in submission order.
    additions: Vec<PendingAddition>,
    /// Ids with an outstanding addition request.
    verification: HashSet<EntityId>,
    deletions: BTreeSet<EntityId>,
    toggles: Vec<(EntityId, bool)>,
    moves: Vec<(EntityId, Transform)>,
}

/// Everything queued since the previous resolution pass.
#[derive(Default)]
pub(crate) struct MutationBatch {
    pub additions: Vec<PendingAddition>,
    pub deletions: BTreeSet<EntityId>,
    pub toggles: Vec<(EntityId, bool)>,
    pub moves: Vec<(EntityId, Transform)>,
}

/// Handle for queuing structural scene changes.
///
/// Cheap to clone and safe to use from any thread: components receive it
/// through their update context and Systems through theirs.
#[derive(Clone, Default)]
pub struct SceneCommands {
    queue: Arc<Mutex<MutationQueue>>,
}

impl SceneCommands {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches `entity` under the scene root at the next frame boundary.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateRequest` if the id already has a pending addition.
    /// The duplicate entity is released.
    pub fn add_entity(&self, entity: Entity) -> EngineResult<()> {
        self.add_entity_to(entity, EntityId::ROOT)
    }

    /// Attaches `entity` under `parent` at the next frame boundary.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateRequest` if the id already has a pending addition.
    /// The duplicate entity is released.
    pub fn add_entity_to(&self, entity: Entity, parent: EntityId) -> EngineResult<()> {
        let id = entity.id();
        let rejected = {
            let mut queue = self.queue.lock();
            if queue.verification.insert(id) {
                queue.additions.push(PendingAddition { parent, entity });
                None
            } else {
                Some(entity)
            }
        };

        match rejected {
            None => Ok(()),
            Some(entity) => {
                warn!(entity = %id, parent = %parent, "duplicate addition request dropped");
                entity.release();
                Err(EngineError::DuplicateRequest(id))
            }
        }
    }

    /// Releases the entity and its subtree at the next frame boundary.
    ///
    /// Repeated requests for the same id are merged.
    ///
    /// # Errors
    ///
    /// Returns `ProtectedRoot` for the scene root.
    pub fn delete_entity(&self, id: EntityId) -> EngineResult<()> {
        if id.is_root() {
            warn!("delete request for the scene root ignored");
            return Err(EngineError::ProtectedRoot(id));
        }
        self.queue.lock().deletions.insert(id);
        Ok(())
    }

    /// Enables or disables a live entity at the next frame boundary.
    pub fn set_enabled(&self, id: EntityId, enabled: bool) {
        self.queue.lock().toggles.push((id, enabled));
    }

    /// Replaces the local transform of a live entity at the next frame
    /// boundary. The last request for an id wins.
    pub fn set_local_transform(&self, id: EntityId, local: Transform) {
        self.queue.lock().moves.push((id, local));
    }

    /// Returns true if any change is waiting for the next frame.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        let queue = self.queue.lock();
        !queue.additions.is_empty()
            || !queue.deletions.is_empty()
            || !queue.toggles.is_empty()
            || !queue.moves.is_empty()
    }

    /// Number of queued additions.
    #[must_use]
    pub fn pending_additions(&self) -> usize {
        self.queue.lock().additions.len()
    }

    /// Number of queued deletions.
    #[must_use]
    pub fn pending_deletions(&self) -> usize {
        self.queue.lock().deletions.len()
    }

    /// Takes everything queued so far and clears the verification set.
    pub(crate) fn take_batch(&self) -> MutationBatch {
        let mut queue = self.queue.lock();
        queue.verification.clear();
        MutationBatch {
            additions: std::mem::take(&mut queue.additions),
            deletions: std::mem::take(&mut queue.deletions),
            toggles: std::mem::take(&mut queue.toggles),
            moves: std::mem::take(&mut queue.moves),
        }
    }
}

/// Outcome of one resolution pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolutionReport {
    /// Entities attached to the tree, descendants included.
    pub attached: usize,
    /// Live entities released by deletions, descendants included.
    pub released: usize,
    /// Additions whose parent was never found.
    pub orphaned_additions: usize,
    /// Deletions whose entity was never found.
    pub orphaned_deletions: usize,
    /// Additions rejected because an id in their subtree was already live.
    pub rejected: usize,
    /// Enable/disable requests applied.
    pub toggled: usize,
    /// Local transform changes applied.
    pub moved: usize,
    /// Every problem found during the pass, in the order it was found.
    pub issues: Vec<EngineError>,
}

impl ResolutionReport {
    /// Returns true if the pass changed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attached == 0
            && self.released == 0
            && self.toggled == 0
            && self.moved == 0
            && self.issues.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_addition_rejected() {
        let commands = SceneCommands::new();
        let id = EntityId::new(5);

        assert!(commands.add_entity(Entity::new(id)).is_ok());
        assert_eq!(
            commands.add_entity_to(Entity::new(id), EntityId::new(1)),
            Err(EngineError::DuplicateRequest(id))
        );
        assert_eq!(commands.pending_additions(), 1);
    }

    #[test]
    fn test_verification_cleared_by_take() {
        let commands = SceneCommands::new();
        let id = EntityId::new(5);

        assert!(commands.add_entity(Entity::new(id)).is_ok());
        let batch = commands.take_batch();
        assert_eq!(batch.additions.len(), 1);
        assert!(!commands.has_pending());

        // Same id may be requested again once the pass has run.
        assert!(commands.add_entity(Entity::new(id)).is_ok());
    }

    #[test]
    fn test_deletions_are_idempotent() {
        let commands = SceneCommands::new();
        assert!(commands.delete_entity(EntityId::new(3)).is_ok());
        assert!(commands.delete_entity(EntityId::new(3)).is_ok());
        assert_eq!(commands.pending_deletions(), 1);
    }

    #[test]
    fn test_transform_changes_are_queued() {
        let commands = SceneCommands::new();
        commands.set_local_transform(EntityId::new(2), Transform::from_xyz(1.0, 0.0, 0.0));
        assert!(commands.has_pending());

        let batch = commands.take_batch();
        assert_eq!(batch.moves.len(), 1);
        assert!(!commands.has_pending());
    }

    #[test]
    fn test_root_cannot_be_deleted() {
        let commands = SceneCommands::new();
        assert_eq!(
            commands.delete_entity(EntityId::ROOT),
            Err(EngineError::ProtectedRoot(EntityId::ROOT))
        );
        assert!(!commands.has_pending());
    }
}
