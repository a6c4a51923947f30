//! # Entity Management
//!
//! Entities are lightweight identifiers consisting of:
//! - An index into component arrays
//! - A generation counter so a recycled index never aliases an old handle

use std::fmt;

/// Unique identifier for an entity.
///
/// Lower 32 bits hold the index, upper 32 bits the generation. Two ids
/// compare equal only if both match, which makes the id safe to use as a
/// map key across ticks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct EntityId(u64);

impl EntityId {
    /// Null/invalid entity ID.
    pub const NULL: Self = Self(u64::MAX);

    /// Creates a new entity ID from index and generation.
    #[inline]
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | (index as u64))
    }

    /// Returns the index portion of the entity ID.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    /// Returns the generation portion of the entity ID.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Returns the packed 64-bit representation.
    #[inline]
    #[must_use]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Checks if this entity ID is null/invalid.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u64::MAX
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("entity(null)")
        } else {
            write!(f, "entity({}v{})", self.index(), self.generation())
        }
    }
}

/// Bitmask of component type ids (up to 64 component types).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ComponentMask(u64);

impl ComponentMask {
    /// The empty mask.
    pub const EMPTY: Self = Self(0);

    /// Mask with a single component bit set.
    #[inline]
    #[must_use]
    pub const fn single(component_id: u8) -> Self {
        Self(1 << component_id)
    }

    /// Returns this mask with `component_id` added.
    #[inline]
    #[must_use]
    pub const fn with(self, component_id: u8) -> Self {
        Self(self.0 | (1 << component_id))
    }

    /// True if every bit of `other` is set in `self`.
    #[inline]
    #[must_use]
    pub const fn contains_all(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if no bit of `other` is set in `self`.
    #[inline]
    #[must_use]
    pub const fn contains_none(self, other: Self) -> bool {
        self.0 & other.0 == 0
    }

    /// True if the given component bit is set.
    #[inline]
    #[must_use]
    pub const fn has(self, component_id: u8) -> bool {
        self.0 & (1 << component_id) != 0
    }

    /// Raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }
}

/// Entity slot with its components' presence flags.
#[derive(Clone, Copy, Debug)]
pub struct Entity {
    /// The unique identifier for this entity.
    pub id: EntityId,
    /// Components currently attached.
    pub components: ComponentMask,
    /// Whether this entity slot is currently alive.
    pub alive: bool,
}

impl Entity {
    /// Creates a new live entity with no components.
    #[inline]
    #[must_use]
    pub const fn new(id: EntityId) -> Self {
        Self {
            id,
            components: ComponentMask::EMPTY,
            alive: true,
        }
    }

    /// Creates a dead/empty entity slot.
    #[inline]
    #[must_use]
    pub const fn dead() -> Self {
        Self {
            id: EntityId::NULL,
            components: ComponentMask::EMPTY,
            alive: false,
        }
    }

    /// Checks if this entity has a specific component.
    #[inline]
    #[must_use]
    pub const fn has_component(&self, component_id: u8) -> bool {
        self.components.has(component_id)
    }

    /// Adds a component flag to this entity.
    #[inline]
    pub fn add_component(&mut self, component_id: u8) {
        self.components = self.components.with(component_id);
    }

    /// Removes a component flag from this entity.
    #[inline]
    pub fn remove_component(&mut self, component_id: u8) {
        self.components = ComponentMask(self.components.0 & !(1 << component_id));
    }
}

impl Default for Entity {
    fn default() -> Self {
        Self::dead()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_packing() {
        let id = EntityId::new(12345, 67890);
        assert_eq!(id.index(), 12345);
        assert_eq!(id.generation(), 67890);
        assert_ne!(id, EntityId::new(12345, 67891));
        assert_eq!(id.to_string(), "entity(12345v67890)");
    }

    #[test]
    fn test_entity_component_mask() {
        let mut entity = Entity::new(EntityId::new(0, 0));
        assert!(!entity.has_component(5));

        entity.add_component(5);
        assert!(entity.has_component(5));

        entity.remove_component(5);
        assert!(!entity.has_component(5));
    }

    #[test]
    fn test_mask_filters() {
        let mask = ComponentMask::single(1).with(3);
        assert!(mask.contains_all(ComponentMask::single(3)));
        assert!(!mask.contains_all(ComponentMask::single(2)));
        assert!(mask.contains_none(ComponentMask::single(2)));
        assert!(!mask.contains_none(ComponentMask::single(1).with(2)));
    }
}
