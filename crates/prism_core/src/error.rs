//! # Core Error Types
//!
//! Errors raised by the slot allocator and the reference world.

use thiserror::Error;

use crate::ecs::EntityId;

/// Errors that can occur while handing out or reclaiming slots.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotError {
    /// The free list is empty; `ensure_capacity` must run before allocating.
    #[error("slot allocator exhausted at capacity {capacity}")]
    Exhausted {
        /// Capacity at the time of the request.
        capacity: u32,
    },

    /// The slot was already on the free list.
    #[error("double free of slot {slot}")]
    DoubleFree {
        /// The slot freed twice.
        slot: u32,
    },

    /// The slot lies outside the allocated range.
    #[error("slot {slot} out of range (capacity {capacity})")]
    OutOfRange {
        /// The offending slot.
        slot: u32,
        /// Capacity at the time of the request.
        capacity: u32,
    },

    /// Growth would exceed the addressable or configured maximum.
    #[error("capacity request {requested} exceeds maximum {max}")]
    CapacityOverflow {
        /// Requested element count.
        requested: u64,
        /// Largest capacity the allocator may reach.
        max: u32,
    },
}

/// Result type for slot operations.
pub type SlotResult<T> = Result<T, SlotError>;

/// Errors raised by the reference world.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorldError {
    /// The entity id is null, dead, or from an older generation.
    #[error("stale or dead entity {0}")]
    StaleEntity(EntityId),

    /// The entity does not carry the requested component.
    #[error("entity {entity} has no component #{component}")]
    MissingComponent {
        /// Entity that was queried.
        entity: EntityId,
        /// Component bit id.
        component: u8,
    },

    /// No free entity index is left.
    #[error("world capacity {0} reached")]
    CapacityReached(usize),
}

/// Result type for world operations.
pub type WorldResult<T> = Result<T, WorldError>;
