//! # Memory Management
//!
//! Stable-index allocation for GPU-visible instance arrays.
//!
//! ## Design Philosophy
//!
//! Slots are plain `u32` indices into flat arrays. Reclaimed indices go on
//! an explicit free stack, so:
//! - No per-slot heap allocation
//! - Recently freed (cache-warm) indices are reused first
//! - Capacity only grows, in power-of-two steps

mod slot_allocator;

pub use slot_allocator::SlotAllocator;
