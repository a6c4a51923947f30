//! # PRISM Core
//!
//! The world-side half of the render sync core:
//! - A reference Entity Component System the renderer observes through queries
//! - The free-list slot allocator that hands out stable GPU instance indices
//!
//! ## Architecture Rules
//!
//! 1. **Entities are observed, never owned by rendering** - the renderer only
//!    attaches and detaches its `RenderSlot` receipt
//! 2. **Slots are stable** - a slot stays with one entity for its whole
//!    renderable lifetime
//! 3. **Misuse is reported** - double frees and stale ids surface as errors
//!
//! ## Example
//!
//! ```rust
//! use prism_core::{QueryFilter, Renderable, RenderSlot, Transform, World};
//!
//! let mut world = World::new(1024);
//! let entity = world.spawn();
//! world.insert(entity, Transform::from_position([0.0, 0.0, 0.0])).unwrap();
//! world.insert(entity, Renderable::default()).unwrap();
//!
//! let pending = QueryFilter::new().with::<Renderable>().without::<RenderSlot>();
//! assert_eq!(world.query(&pending).count(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(clippy::pedantic)]

pub mod ecs;
pub mod error;
pub mod memory;

pub use ecs::{
    Component, ComponentMask, ComponentStorage, Destroyed, Entity, EntityId, MeshId, QueryFilter,
    RenderSlot, Renderable, ShaderId, Transform, World, WorldComponent,
};
pub use error::{SlotError, SlotResult, WorldError, WorldResult};
pub use memory::SlotAllocator;
