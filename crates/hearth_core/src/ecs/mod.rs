//! # Entity System
//!
//! Entities, components and the scene hierarchy they live in.
//!
//! ## Lifecycle
//!
//! 1. Game logic builds a detached [`Entity`] with its components.
//! 2. It is queued through [`SceneCommands::add_entity`].
//! 3. The next frame's resolution pass attaches it to the [`SceneTree`].
//! 4. It is destroyed only through [`SceneCommands::delete_entity`].

mod component;
mod entity;
mod mutation;
mod tree;

pub use component::{AsAny, Component, ComponentRef, ComponentSlot, ComponentType, UpdateContext};
pub use entity::{Entity, EntityId, EntityIds};
pub use mutation::{ResolutionReport, SceneCommands};
pub use tree::{SceneTree, TransformState};
