//! # Component Storage
//!
//! Pre-allocated, dense component storage.
//!
//! - All component slots are allocated at creation
//! - Access is O(1) via entity index
//! - Presence is tracked by the owning world's entity masks, not here

use super::component::Component;

/// Pre-allocated storage for a single component type.
///
/// # Example
///
/// ```rust,ignore
/// let mut storage: ComponentStorage<Transform> = ComponentStorage::new(1024);
/// storage.set(0, Transform::from_position([1.0, 2.0, 3.0]));
/// ```
pub struct ComponentStorage<C: Component> {
    /// The dense array of components.
    data: Box<[C]>,
}

impl<C: Component> ComponentStorage<C> {
    /// Creates new component storage with the specified capacity.
    ///
    /// All slots are initialized to the component's default value.
    ///
    /// # Panics
    ///
    /// Panics if capacity is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Capacity must be greater than zero");

        Self {
            data: vec![C::default(); capacity].into_boxed_slice(),
        }
    }

    /// Returns the capacity of this storage.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Gets a component by entity index.
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&C> {
        self.data.get(index)
    }

    /// Gets a mutable component by entity index.
    #[inline]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut C> {
        self.data.get_mut(index)
    }

    /// Overwrites the slot at `index`.
    ///
    /// Returns `false` if index was out of bounds.
    #[inline]
    pub fn set(&mut self, index: usize, component: C) -> bool {
        if let Some(slot) = self.data.get_mut(index) {
            *slot = component;
            true
        } else {
            false
        }
    }

    /// Resets the slot at `index` to the default value, returning the old one.
    #[inline]
    pub fn take(&mut self, index: usize) -> Option<C> {
        self.data.get_mut(index).map(std::mem::take)
    }

    /// Returns a slice of all components, live or not.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[C] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::component::{RenderSlot, Transform};

    #[test]
    fn test_storage_get_set() {
        let mut storage: ComponentStorage<Transform> = ComponentStorage::new(100);

        let transform = Transform::from_position([1.0, 2.0, 3.0]);
        assert!(storage.set(50, transform));
        assert_eq!(storage.get(50), Some(&transform));
    }

    #[test]
    fn test_storage_bounds() {
        let mut storage: ComponentStorage<RenderSlot> = ComponentStorage::new(100);
        assert!(storage.get(100).is_none());
        assert!(storage.get(99).is_some());
        assert!(!storage.set(100, RenderSlot { slot: 1 }));
    }

    #[test]
    fn test_take_resets_slot() {
        let mut storage: ComponentStorage<RenderSlot> = ComponentStorage::new(4);
        storage.set(2, RenderSlot { slot: 9 });
        assert_eq!(storage.take(2), Some(RenderSlot { slot: 9 }));
        assert_eq!(storage.get(2), Some(&RenderSlot::default()));
    }
}
