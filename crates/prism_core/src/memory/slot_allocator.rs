//! # Slot Allocator
//!
//! Free-stack allocator for stable instance slots.

use crate::error::{SlotError, SlotResult};

/// Hands out and reclaims `u32` slots addressing per-instance GPU data.
///
/// Freed slots are pushed on a stack and popped first (LIFO). Growth
/// slides new indices in beneath every free entry already on the stack,
/// so freed and untouched low slots go out before the grown range, which
/// is itself handed out lowest first.
///
/// # Invariant
///
/// `capacity == live_count + free_count` after every operation.
///
/// # Example
///
/// ```rust
/// use prism_core::SlotAllocator;
///
/// let mut slots = SlotAllocator::new(1, 1 << 16).unwrap();
/// assert_eq!(slots.ensure_capacity(5).unwrap(), Some(8));
///
/// let a = slots.allocate().unwrap();
/// slots.free(a).unwrap();
/// assert_eq!(slots.allocate().unwrap(), a);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotAllocator {
    /// Free stack. The top is the next slot handed out.
    free_list: Vec<u32>,
    /// Per-slot free flag, used to report double frees.
    is_free: Vec<bool>,
    /// Current capacity (number of addressable slots).
    capacity: u32,
    /// Upper bound for growth.
    max_capacity: u32,
}

impl SlotAllocator {
    /// Creates an allocator with `initial_capacity` free slots.
    ///
    /// # Errors
    ///
    /// [`SlotError::CapacityOverflow`] if `initial_capacity > max_capacity`.
    pub fn new(initial_capacity: u32, max_capacity: u32) -> SlotResult<Self> {
        if initial_capacity > max_capacity {
            return Err(SlotError::CapacityOverflow {
                requested: u64::from(initial_capacity),
                max: max_capacity,
            });
        }

        Ok(Self {
            free_list: (0..initial_capacity).rev().collect(),
            is_free: vec![true; initial_capacity as usize],
            capacity: initial_capacity,
            max_capacity,
        })
    }

    /// Returns the number of addressable slots.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Returns the growth limit.
    #[inline]
    #[must_use]
    pub const fn max_capacity(&self) -> u32 {
        self.max_capacity
    }

    /// Returns the number of slots currently handed out.
    #[inline]
    #[must_use]
    pub fn live_count(&self) -> u32 {
        self.capacity - self.free_count()
    }

    /// Returns the number of slots on the free stack.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn free_count(&self) -> u32 {
        // Bounded by capacity, which is a u32
        self.free_list.len() as u32
    }

    /// True if `slot` is below capacity and currently handed out.
    #[inline]
    #[must_use]
    pub fn is_live(&self, slot: u32) -> bool {
        self.is_free.get(slot as usize).is_some_and(|free| !free)
    }

    /// Snapshot of the free stack, bottom first.
    #[must_use]
    pub fn free_slots(&self) -> &[u32] {
        &self.free_list
    }

    /// Pops the next free slot.
    ///
    /// This is a **O(1)** operation and never grows the allocator.
    ///
    /// # Errors
    ///
    /// [`SlotError::Exhausted`] if the free stack is empty. Call
    /// [`SlotAllocator::ensure_capacity`] before allocating.
    pub fn allocate(&mut self) -> SlotResult<u32> {
        let slot = self.free_list.pop().ok_or(SlotError::Exhausted {
            capacity: self.capacity,
        })?;
        self.is_free[slot as usize] = false;
        Ok(slot)
    }

    /// Returns `slot` to the free stack.
    ///
    /// # Errors
    ///
    /// - [`SlotError::OutOfRange`] if `slot >= capacity`
    /// - [`SlotError::DoubleFree`] if `slot` is already free
    pub fn free(&mut self, slot: u32) -> SlotResult<()> {
        let Some(free) = self.is_free.get_mut(slot as usize) else {
            return Err(SlotError::OutOfRange {
                slot,
                capacity: self.capacity,
            });
        };
        if *free {
            return Err(SlotError::DoubleFree { slot });
        }

        *free = true;
        self.free_list.push(slot);
        Ok(())
    }

    /// Computes the capacity [`SlotAllocator::ensure_capacity`] would grow
    /// to, without changing anything.
    ///
    /// Returns `None` when `required` already fits.
    ///
    /// # Errors
    ///
    /// [`SlotError::CapacityOverflow`] if `required > max_capacity`.
    pub fn grown_capacity(&self, required: u64) -> SlotResult<Option<u32>> {
        if required <= u64::from(self.capacity) {
            return Ok(None);
        }
        if required > u64::from(self.max_capacity) {
            return Err(SlotError::CapacityOverflow {
                requested: required,
                max: self.max_capacity,
            });
        }

        let rounded = required
            .checked_next_power_of_two()
            .unwrap_or(u64::MAX)
            .min(u64::from(self.max_capacity));
        // `rounded <= max_capacity`, so this never truncates
        Ok(u32::try_from(rounded).ok())
    }

    /// Grows to the next power of two `>= required` if needed.
    ///
    /// New indices go to the bottom of the free stack, highest deepest.
    /// Growth that would pass the maximum is clamped to it when `required`
    /// still fits.
    ///
    /// Returns the new capacity when it grew.
    ///
    /// # Errors
    ///
    /// [`SlotError::CapacityOverflow`] if `required > max_capacity`. The
    /// allocator is unchanged on error.
    pub fn ensure_capacity(&mut self, required: u64) -> SlotResult<Option<u32>> {
        let Some(new_capacity) = self.grown_capacity(required)? else {
            return Ok(None);
        };

        let old_capacity = self.capacity;
        let mut grown: Vec<u32> = (old_capacity..new_capacity).rev().collect();
        grown.append(&mut self.free_list);
        self.free_list = grown;
        self.is_free.resize(new_capacity as usize, true);
        self.capacity = new_capacity;

        tracing::debug!(old_capacity, new_capacity, "slot allocator grew");
        debug_assert!(self.check_invariants());

        Ok(Some(new_capacity))
    }

    /// Verifies the capacity and free-list invariants.
    ///
    /// Walks every slot; intended for tests and `debug_assert!`.
    #[must_use]
    pub fn check_invariants(&self) -> bool {
        if self.is_free.len() != self.capacity as usize {
            return false;
        }

        let mut seen = vec![false; self.capacity as usize];
        for &slot in &self.free_list {
            match seen.get_mut(slot as usize) {
                Some(flag) if !*flag && self.is_free[slot as usize] => *flag = true,
                _ => return false,
            }
        }

        let flagged = self.is_free.iter().filter(|free| **free).count();
        flagged == self.free_list.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_free_lifo() {
        let mut slots = SlotAllocator::new(8, 64).unwrap();

        let allocated: Vec<u32> = (0..5).map(|_| slots.allocate().unwrap()).collect();
        assert_eq!(allocated, vec![0, 1, 2, 3, 4]);

        slots.free(3).unwrap();
        slots.free(1).unwrap();

        // Most recently freed first
        assert_eq!(slots.allocate().unwrap(), 1);
        assert_eq!(slots.allocate().unwrap(), 3);
        // Then the lowest untouched index
        assert_eq!(slots.allocate().unwrap(), 5);
        assert!(slots.check_invariants());
    }

    #[test]
    fn test_growth_from_one_to_eight() {
        let mut slots = SlotAllocator::new(1, 1 << 20).unwrap();
        assert_eq!(slots.free_slots(), &[0]);

        // 5 new entities against 1 free slot
        let required = u64::from(slots.capacity()) + 5 - u64::from(slots.free_count());
        assert_eq!(slots.ensure_capacity(required).unwrap(), Some(8));

        // The old free slot 0 goes first, then the grown range in order
        let got: Vec<u32> = (0..5).map(|_| slots.allocate().unwrap()).collect();
        assert_eq!(got, vec![0, 1, 2, 3, 4]);
        assert_eq!(slots.free_slots(), &[7, 6, 5]);

        assert_eq!(slots.capacity(), 8);
        assert_eq!(slots.free_count(), 3);
        assert_eq!(slots.live_count(), 5);
        assert!(slots.check_invariants());
    }

    #[test]
    fn test_freed_slot_reused_before_untouched() {
        let mut slots = SlotAllocator::new(8, 8).unwrap();
        for _ in 0..4 {
            slots.allocate().unwrap();
        }

        slots.free(3).unwrap();
        assert_eq!(slots.free_slots().last(), Some(&3));
        assert_eq!(slots.allocate().unwrap(), 3);
        assert_eq!(slots.allocate().unwrap(), 4);
    }

    #[test]
    fn test_double_free_reported() {
        let mut slots = SlotAllocator::new(4, 4).unwrap();
        let slot = slots.allocate().unwrap();

        slots.free(slot).unwrap();
        assert_eq!(slots.free(slot), Err(SlotError::DoubleFree { slot }));
        // Never-allocated slots count as free too
        assert_eq!(slots.free(2), Err(SlotError::DoubleFree { slot: 2 }));
        assert!(slots.check_invariants());
    }

    #[test]
    fn test_out_of_range_free() {
        let mut slots = SlotAllocator::new(4, 4).unwrap();
        assert_eq!(
            slots.free(9),
            Err(SlotError::OutOfRange {
                slot: 9,
                capacity: 4
            })
        );
    }

    #[test]
    fn test_exhausted_without_growth() {
        let mut slots = SlotAllocator::new(1, 16).unwrap();
        slots.allocate().unwrap();
        assert_eq!(slots.allocate(), Err(SlotError::Exhausted { capacity: 1 }));
    }

    #[test]
    fn test_capacity_overflow() {
        let mut slots = SlotAllocator::new(4, 100).unwrap();

        assert_eq!(
            slots.ensure_capacity(101),
            Err(SlotError::CapacityOverflow {
                requested: 101,
                max: 100
            })
        );
        assert_eq!(slots.capacity(), 4);

        // Next power of two would be 128, clamped to the maximum
        assert_eq!(slots.ensure_capacity(65).unwrap(), Some(100));
        assert!(slots.check_invariants());

        assert!(SlotAllocator::new(8, 4).is_err());
    }

    #[test]
    fn test_ensure_capacity_noop() {
        let mut slots = SlotAllocator::new(16, 64).unwrap();
        assert_eq!(slots.ensure_capacity(16).unwrap(), None);
        assert_eq!(slots.ensure_capacity(0).unwrap(), None);
        assert_eq!(slots.capacity(), 16);
    }

    #[test]
    fn test_growth_prefers_low_indices() {
        let mut slots = SlotAllocator::new(2, 64).unwrap();
        slots.allocate().unwrap();
        slots.allocate().unwrap();

        slots.ensure_capacity(3).unwrap();
        assert_eq!(slots.capacity(), 4);
        assert_eq!(slots.allocate().unwrap(), 2);
        assert_eq!(slots.allocate().unwrap(), 3);
    }

    #[test]
    fn test_growth_keeps_freed_slots_on_top() {
        let mut slots = SlotAllocator::new(4, 64).unwrap();
        for _ in 0..4 {
            slots.allocate().unwrap();
        }
        slots.free(2).unwrap();
        slots.free(0).unwrap();

        assert_eq!(slots.ensure_capacity(6).unwrap(), Some(8));
        assert_eq!(slots.free_slots(), &[7, 6, 5, 4, 2, 0]);
        let order: Vec<u32> = (0..6).map(|_| slots.allocate().unwrap()).collect();
        assert_eq!(order, vec![0, 2, 4, 5, 6, 7]);
        assert!(slots.check_invariants());
    }

    #[test]
    fn test_is_live() {
        let mut slots = SlotAllocator::new(4, 4).unwrap();
        let slot = slots.allocate().unwrap();
        assert!(slots.is_live(slot));
        assert!(!slots.is_live(1));
        assert!(!slots.is_live(99));
    }
}
