//! # Device Buffers
//!
//! Device memory that outgrows its first allocation.
//!
//! ```text
//! resize(new_size)
//!   create new ──► submit copy(old → new, min bytes) + fence F ──► swap
//!                                                          │
//!   old buffer ─────────────── retired until F signals ◄───┘
//! ```
//!
//! [`GrowableDeviceBuffer`] never frees a buffer a submitted copy may still
//! read. [`TypedDeviceArray`] layers an element-typed host mirror on top and
//! only hands out bounded writers.

mod growable;
mod typed_array;

pub use growable::{GrowableDeviceBuffer, ParkedResources};
pub use typed_array::{ArrayWriter, TypedDeviceArray};
