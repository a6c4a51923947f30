//! Per-instance GPU payloads.
//!
//! One [`InstanceRecord`] lives at each allocated slot of a batcher's
//! record array. Free slots hold stale data that is never drawn.

mod instance_data;

pub use instance_data::InstanceRecord;
