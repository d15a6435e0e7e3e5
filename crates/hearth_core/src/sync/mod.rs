//! # Synchronization
//!
//! Hand-off of frame data from the scheduler thread to render consumers.

mod double_buffer;

pub use double_buffer::{FrozenFrame, FrozenTransforms};
