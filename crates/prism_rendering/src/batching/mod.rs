//! # Render Batching
//!
//! Reconciles the world with per-batcher instance arrays once per tick.
//!
//! ```text
//! 1. ReclaimDestroyed         with(Destroyed, RenderSlot)         free slot, drop tag
//!                             owner no longer alive               free slot
//! 2. ReclaimComponentRemoved  with(RenderSlot) without(Renderable) free slot, drop tag
//!    grow                     capacity + new - free, once
//! 3. AllocateNew              with(Renderable) without(RenderSlot, Destroyed)
//! 4. WriteAndSort             write records at slots, bucket by (shader, mesh, slot)
//! ```

mod batcher;
mod bucket;

pub use batcher::RenderBatcher;
pub use bucket::{RenderBucket, RenderBuckets};

use std::fmt;

/// Handle of a batcher registered with the graphics module.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BatcherId(pub(crate) u32);

impl BatcherId {
    /// Raw handle value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for BatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batcher#{}", self.0)
    }
}

/// What one batcher tick did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Tick number, starting at 1.
    pub tick: u64,
    /// Slots reclaimed from destroyed entities, including entities
    /// despawned without going through `Destroyed`.
    pub reclaimed_destroyed: u32,
    /// Slots reclaimed from entities that lost their `Renderable`.
    pub reclaimed_removed: u32,
    /// Slots handed to new renderables.
    pub allocated: u32,
    /// Instance records written.
    pub written: u32,
    /// Buckets published.
    pub buckets: usize,
    /// New slot capacity, if the arrays grew this tick.
    pub grew_to: Option<u32>,
    /// `RenderSlot` tags this batcher did not hand out, dropped from their
    /// entities under [`SlotAccessPolicy::Clamp`](crate::SlotAccessPolicy).
    pub dropped_receipts: u32,
}
