//! # Double-Buffered Frozen Transforms
//!
//! Renderer-safe snapshot of world transforms.
//!
//! ## Architecture
//!
//! ```text
//!        ┌──────────────────────────────────┐
//!        │         FrozenTransforms         │
//!        │  ┌───────────┐    ┌───────────┐  │
//!        │  │ Frame A   │    │ Frame B   │  │
//!        │  └─────┬─────┘    └─────┬─────┘  │
//!        │  ┌─────┴────────────────┴─────┐  │
//!        │  │  Atomic front index (0/1)  │  │
//!        │  └────────────────────────────┘  │
//!        └──────────────────────────────────┘
//!              │                   │
//!              ▼                   ▼
//!      ┌───────────────┐   ┌───────────────┐
//!      │  back_mut()   │   │ read_handle() │
//!      │  (scheduler)  │   │  (renderer)   │
//!      └───────────────┘   └───────────────┘
//! ```
//!
//! The freeze phase writes the back frame and then publishes it. A renderer
//! holding a read handle keeps seeing the frame it locked, never a half
//! written one.
//!
//! ## Thread Safety
//!
//! - One writer (the scheduler thread).
//! - Any number of readers. A reader that holds a handle across two
//!   publishes blocks the second freeze until it lets go.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::ecs::EntityId;
use crate::math::Mat4;

/// One published set of frozen world transforms.
#[derive(Clone, Debug, Default)]
pub struct FrozenFrame {
    frame: u64,
    /// Entries in freeze order: parents before children, siblings in
    /// attachment order.
    transforms: Vec<(EntityId, Mat4)>,
    index: HashMap<EntityId, usize>,
}

impl FrozenFrame {
    /// Frame number this snapshot was frozen in.
    #[inline]
    #[must_use]
    pub const fn frame(&self) -> u64 {
        self.frame
    }

    /// Frozen world transform of an entity, if it was enabled.
    #[inline]
    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<&Mat4> {
        self.index.get(&id).map(|&i| &self.transforms[i].1)
    }

    /// Number of entities in the snapshot.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    /// Returns true if the snapshot is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Iterates over every frozen transform in freeze order.
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &Mat4)> {
        self.transforms.iter().map(|(id, m)| (*id, m))
    }

    /// Clears the frame for reuse. Keeps the allocation.
    pub(crate) fn begin(&mut self, frame: u64) {
        self.frame = frame;
        self.transforms.clear();
        self.index.clear();
    }

    pub(crate) fn insert(&mut self, id: EntityId, world: Mat4) {
        match self.index.get(&id) {
            Some(&i) => self.transforms[i].1 = world,
            None => {
                self.index.insert(id, self.transforms.len());
                self.transforms.push((id, world));
            }
        }
    }
}

/// Double buffer of [`FrozenFrame`]s shared with render consumers.
pub struct FrozenTransforms {
    buffers: [RwLock<FrozenFrame>; 2],
    /// Index of the published frame. The back frame is `front ^ 1`.
    front: AtomicUsize,
    /// Number of publishes so far.
    frame_count: AtomicU64,
}

impl FrozenTransforms {
    /// Creates an empty double buffer.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            buffers: [RwLock::new(FrozenFrame::default()), RwLock::new(FrozenFrame::default())],
            front: AtomicUsize::new(0),
            frame_count: AtomicU64::new(0),
        })
    }

    /// Number of frames published so far.
    #[inline]
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Acquire)
    }

    /// Locks the most recently published frame for reading.
    #[must_use]
    pub fn read_handle(&self) -> RwLockReadGuard<'_, FrozenFrame> {
        let front = self.front.load(Ordering::Acquire);
        self.buffers[front].read()
    }

    /// Locks the back frame for writing.
    pub(crate) fn back_mut(&self) -> RwLockWriteGuard<'_, FrozenFrame> {
        let back = self.front.load(Ordering::Acquire) ^ 1;
        self.buffers[back].write()
    }

    /// Makes the back frame the published one.
    pub(crate) fn publish(&self) {
        self.front.fetch_xor(1, Ordering::AcqRel);
        self.frame_count.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Transform;

    #[test]
    fn test_publish_swaps_front() {
        let frozen = FrozenTransforms::new();
        assert_eq!(frozen.frame_count(), 0);
        assert!(frozen.read_handle().is_empty());

        {
            let mut back = frozen.back_mut();
            back.begin(1);
            back.insert(EntityId::new(1), Mat4::IDENTITY);
        }
        // Not visible until published.
        assert!(frozen.read_handle().is_empty());

        frozen.publish();
        let read = frozen.read_handle();
        assert_eq!(read.frame(), 1);
        assert_eq!(read.get(EntityId::new(1)), Some(&Mat4::IDENTITY));
        assert_eq!(frozen.frame_count(), 1);
    }

    #[test]
    fn test_reader_keeps_its_frame_while_back_is_written() {
        let frozen = FrozenTransforms::new();
        let moved = Transform::from_xyz(5.0, 0.0, 0.0).to_matrix();

        {
            let mut back = frozen.back_mut();
            back.begin(1);
            back.insert(EntityId::new(1), Mat4::IDENTITY);
        }
        frozen.publish();

        let reader = Arc::clone(&frozen);
        let held = reader.read_handle();

        {
            let mut back = frozen.back_mut();
            back.begin(2);
            back.insert(EntityId::new(1), moved);
        }

        assert_eq!(held.frame(), 1);
        assert_eq!(held.get(EntityId::new(1)), Some(&Mat4::IDENTITY));
        drop(held);

        frozen.publish();
        assert_eq!(reader.read_handle().get(EntityId::new(1)), Some(&moved));
    }
}
