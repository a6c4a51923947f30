//! # Render Error Types
//!
//! All errors that can occur between the batcher, the device and the frame
//! ring. Each variant is classified as skip-and-continue or abort-and-report
//! by [`RenderError::is_recoverable`].

use std::time::Duration;

use prism_core::{SlotError, WorldError};
use thiserror::Error;

/// Errors that can occur in the render sync core.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    /// Capacity growth would overflow the addressable or configured range.
    #[error("instance allocation exhausted: requested {requested} slots, maximum is {max}")]
    AllocationExhausted {
        /// Slot count that was needed.
        requested: u64,
        /// Largest capacity the allocator may reach.
        max: u32,
    },

    /// A fence wait exceeded its bound.
    #[error("renderer stall: frame {frame} (ring slot {ring_slot}) not released after {waited:?}")]
    SyncTimeout {
        /// Frame that was being acquired.
        frame: u64,
        /// Ring slot whose fence did not signal.
        ring_slot: usize,
        /// How long we waited.
        waited: Duration,
    },

    /// Double free, or a read/write of a slot that is not allocated.
    #[error("invalid slot access: slot {slot} ({reason}, capacity {capacity})")]
    InvalidSlotAccess {
        /// The offending slot.
        slot: u32,
        /// Capacity at the time of the access.
        capacity: u32,
        /// What was wrong with it.
        reason: &'static str,
    },

    /// A resize arrived while frames were in flight and they did not drain.
    #[error("resize refused: {pending} frame(s) still in flight")]
    ResizeRace {
        /// Frames whose fence had not signaled.
        pending: usize,
    },

    /// The world failed a query or a tag mutation.
    #[error("world query failed: {0}")]
    WorldQuery(#[from] WorldError),

    /// The device rejected an operation.
    #[error("device error: {0}")]
    Device(String),

    /// A resource handle that the device does not know.
    #[error("unknown {kind} {id}")]
    UnknownResource {
        /// Resource kind ("buffer", "fence", ...).
        kind: &'static str,
        /// Raw handle value.
        id: u64,
    },

    /// The device does not implement the requested feature.
    #[error("unsupported by this device: {0}")]
    Unsupported(&'static str),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl RenderError {
    /// True for errors after which the caller should drop this frame and
    /// try again next tick.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::SyncTimeout { .. } | Self::WorldQuery(_))
    }
}

impl From<SlotError> for RenderError {
    fn from(err: SlotError) -> Self {
        match err {
            SlotError::CapacityOverflow { requested, max } => {
                Self::AllocationExhausted { requested, max }
            }
            SlotError::Exhausted { capacity } => Self::AllocationExhausted {
                requested: u64::from(capacity) + 1,
                max: capacity,
            },
            SlotError::DoubleFree { slot } => Self::InvalidSlotAccess {
                slot,
                capacity: 0,
                reason: "double free",
            },
            SlotError::OutOfRange { slot, capacity } => Self::InvalidSlotAccess {
                slot,
                capacity,
                reason: "out of range",
            },
        }
    }
}

/// Result type for render operations.
pub type RenderResult<T> = Result<T, RenderError>;

/// What happens on an [`RenderError::InvalidSlotAccess`].
///
/// The default follows the build: `Strict` with debug assertions, `Clamp`
/// without.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotAccessPolicy {
    /// Report the access as an error.
    Strict,
    /// Log it and skip the access.
    Clamp,
}

impl SlotAccessPolicy {
    /// Policy of the current build profile.
    #[must_use]
    pub const fn for_build() -> Self {
        if cfg!(debug_assertions) {
            Self::Strict
        } else {
            Self::Clamp
        }
    }

    /// Applies the policy to a detected violation.
    ///
    /// Returns `Ok(())` when the caller should skip the access and carry on.
    ///
    /// # Errors
    ///
    /// `err` itself under [`SlotAccessPolicy::Strict`].
    pub fn check(self, err: RenderError) -> RenderResult<()> {
        match self {
            Self::Strict => Err(err),
            Self::Clamp => {
                tracing::warn!("{err}; skipped");
                Ok(())
            }
        }
    }
}

impl Default for SlotAccessPolicy {
    fn default() -> Self {
        Self::for_build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::EntityId;

    #[test]
    fn test_recoverable_classes() {
        let stall = RenderError::SyncTimeout {
            frame: 3,
            ring_slot: 0,
            waited: Duration::from_millis(5),
        };
        assert!(stall.is_recoverable());
        assert!(RenderError::from(WorldError::StaleEntity(EntityId::NULL)).is_recoverable());

        assert!(!RenderError::ResizeRace { pending: 1 }.is_recoverable());
        assert!(!RenderError::Device("lost".into()).is_recoverable());
    }

    #[test]
    fn test_slot_error_mapping() {
        let overflow = RenderError::from(SlotError::CapacityOverflow {
            requested: 9,
            max: 8,
        });
        assert_eq!(
            overflow,
            RenderError::AllocationExhausted {
                requested: 9,
                max: 8
            }
        );

        let double = RenderError::from(SlotError::DoubleFree { slot: 4 });
        assert!(matches!(
            double,
            RenderError::InvalidSlotAccess { slot: 4, .. }
        ));
    }

    #[test]
    fn test_slot_policy_follows_build() {
        let expected = if cfg!(debug_assertions) {
            SlotAccessPolicy::Strict
        } else {
            SlotAccessPolicy::Clamp
        };
        assert_eq!(SlotAccessPolicy::default(), expected);

        let err = RenderError::InvalidSlotAccess {
            slot: 7,
            capacity: 4,
            reason: "test",
        };
        assert_eq!(SlotAccessPolicy::Strict.check(err.clone()), Err(err.clone()));
        assert_eq!(SlotAccessPolicy::Clamp.check(err), Ok(()));
    }
}
