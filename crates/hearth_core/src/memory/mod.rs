//! # Memory Management
//!
//! Arena storage for the scene tree.
//!
//! Entities live in a [`SlotPool`] and refer to each other through
//! generation-checked [`SlotHandle`]s rather than owning pointers.

mod pool;

pub use pool::{SlotHandle, SlotPool};
