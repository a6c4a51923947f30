//! # Entity Component System
//!
//! The reference world the renderer reconciles against.
//!
//! ## Design Philosophy
//!
//! - Entity ids are indices with generation counters, stable as map keys
//! - Components live in dense pre-allocated arrays indexed by entity index
//! - Presence is tracked in a per-entity bitmask, so "has A, lacks B"
//!   queries are two mask tests

mod component;
mod entity;
mod query;
mod storage;
mod world;

pub use component::{Component, Destroyed, MeshId, RenderSlot, Renderable, ShaderId, Transform};
pub use entity::{ComponentMask, Entity, EntityId};
pub use query::QueryFilter;
pub use storage::ComponentStorage;
pub use world::{World, WorldComponent};
