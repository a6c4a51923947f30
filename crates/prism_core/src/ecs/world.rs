//! # ECS World
//!
//! The central container for all entities and components.
//! Pre-allocates all memory at creation time.

use super::component::{Component, Destroyed, RenderSlot, Renderable, Transform};
use super::entity::{ComponentMask, Entity, EntityId};
use super::query::QueryFilter;
use super::storage::ComponentStorage;
use crate::error::{WorldError, WorldResult};

/// A component type the [`World`] has storage for.
pub trait WorldComponent: Component {
    /// Shared access to this component's storage.
    fn storage(world: &World) -> &ComponentStorage<Self>;

    /// Exclusive access to this component's storage.
    fn storage_mut(world: &mut World) -> &mut ComponentStorage<Self>;
}

macro_rules! world_components {
    ($($component:ty => $field:ident),* $(,)?) => {
        $(
            impl WorldComponent for $component {
                #[inline]
                fn storage(world: &World) -> &ComponentStorage<Self> {
                    &world.$field
                }

                #[inline]
                fn storage_mut(world: &mut World) -> &mut ComponentStorage<Self> {
                    &mut world.$field
                }
            }
        )*
    };
}

world_components! {
    Transform => transforms,
    Renderable => renderables,
    RenderSlot => render_slots,
    Destroyed => destroyed,
}

/// The ECS World - container for all simulation state the renderer observes.
///
/// # Capacity
///
/// The world has a fixed entity capacity set at creation.
///
/// # Example
///
/// ```rust
/// use prism_core::{Transform, World};
///
/// let mut world = World::new(16);
/// let entity = world.spawn();
/// world.insert(entity, Transform::from_position([1.0, 2.0, 3.0])).unwrap();
/// assert_eq!(world.get::<Transform>(entity).unwrap().position, [1.0, 2.0, 3.0]);
/// ```
pub struct World {
    /// All entity slots (pre-allocated).
    entities: Box<[Entity]>,
    /// Free list of entity indices for reuse.
    free_indices: Vec<u32>,
    /// Number of currently alive entities.
    alive_count: usize,

    // =========================================================================
    // Component Storages - add new component types here and to the macro above
    // =========================================================================
    transforms: ComponentStorage<Transform>,
    renderables: ComponentStorage<Renderable>,
    render_slots: ComponentStorage<RenderSlot>,
    destroyed: ComponentStorage<Destroyed>,
}

impl World {
    /// Creates a new world with the specified entity capacity.
    ///
    /// # Panics
    ///
    /// Panics if capacity is zero or exceeds `u32::MAX`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Capacity must be greater than zero");
        assert!(
            u32::try_from(capacity).is_ok(),
            "Capacity cannot exceed u32::MAX"
        );

        // Lowest index is popped first
        let free_indices: Vec<u32> = (0..capacity as u32).rev().collect();

        Self {
            entities: vec![Entity::dead(); capacity].into_boxed_slice(),
            free_indices,
            alive_count: 0,
            transforms: ComponentStorage::new(capacity),
            renderables: ComponentStorage::new(capacity),
            render_slots: ComponentStorage::new(capacity),
            destroyed: ComponentStorage::new(capacity),
        }
    }

    /// Returns the maximum capacity of this world.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entities.len()
    }

    /// Returns the number of currently alive entities.
    #[inline]
    #[must_use]
    pub const fn alive_count(&self) -> usize {
        self.alive_count
    }

    /// Spawns a new entity with no components.
    ///
    /// Returns `EntityId::NULL` if capacity is reached.
    #[inline]
    pub fn spawn(&mut self) -> EntityId {
        self.try_spawn().unwrap_or(EntityId::NULL)
    }

    /// Spawns a new entity, reporting exhaustion as an error.
    ///
    /// # Errors
    ///
    /// [`WorldError::CapacityReached`] when every index is alive.
    pub fn try_spawn(&mut self) -> WorldResult<EntityId> {
        let index = self
            .free_indices
            .pop()
            .ok_or(WorldError::CapacityReached(self.entities.len()))?;

        let entity = &mut self.entities[index as usize];

        // Increment generation to invalidate old references
        let generation = if entity.id.is_null() {
            0
        } else {
            entity.id.generation().wrapping_add(1)
        };
        let id = EntityId::new(index, generation);

        *entity = Entity::new(id);
        self.alive_count += 1;

        Ok(id)
    }

    /// Despawns an entity immediately, freeing its index for reuse.
    ///
    /// Renderable entities should go through [`World::mark_destroyed`]. A
    /// render slot dropped here is only reclaimed when the batcher next
    /// notices its owner is gone.
    ///
    /// Returns `false` if the entity was already dead or the ID was stale.
    pub fn despawn(&mut self, id: EntityId) -> bool {
        if !self.is_alive(id) {
            return false;
        }

        let idx = id.index() as usize;
        if self.entities[idx].has_component(RenderSlot::ID) {
            tracing::warn!(%id, "despawning entity that still owns a render slot, reclaimed next batch");
        }

        // Keep the id so the next spawn bumps its generation
        let entity = &mut self.entities[idx];
        entity.alive = false;
        entity.components = ComponentMask::EMPTY;
        self.alive_count -= 1;
        self.free_indices.push(id.index());

        self.transforms.take(idx);
        self.renderables.take(idx);
        self.render_slots.take(idx);
        self.destroyed.take(idx);

        true
    }

    /// Checks if an entity is alive.
    #[inline]
    #[must_use]
    pub fn is_alive(&self, id: EntityId) -> bool {
        self.entity(id).is_some()
    }

    /// Gets a live entity by ID.
    #[inline]
    #[must_use]
    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        if id.is_null() {
            return None;
        }
        self.entities
            .get(id.index() as usize)
            .filter(|entity| entity.alive && entity.id == id)
    }

    fn live_index(&self, id: EntityId) -> WorldResult<usize> {
        self.entity(id)
            .map(|_| id.index() as usize)
            .ok_or(WorldError::StaleEntity(id))
    }

    /// Attaches (or overwrites) component `C` on an entity.
    ///
    /// # Errors
    ///
    /// [`WorldError::StaleEntity`] if the entity is not alive.
    pub fn insert<C: WorldComponent>(&mut self, id: EntityId, component: C) -> WorldResult<()> {
        let idx = self.live_index(id)?;
        C::storage_mut(self).set(idx, component);
        self.entities[idx].add_component(C::ID);
        Ok(())
    }

    /// Detaches component `C`, returning it if it was present.
    ///
    /// # Errors
    ///
    /// [`WorldError::StaleEntity`] if the entity is not alive.
    pub fn remove<C: WorldComponent>(&mut self, id: EntityId) -> WorldResult<Option<C>> {
        let idx = self.live_index(id)?;
        if !self.entities[idx].has_component(C::ID) {
            return Ok(None);
        }
        self.entities[idx].remove_component(C::ID);
        Ok(C::storage_mut(self).take(idx))
    }

    /// Reads component `C` if the entity is alive and carries it.
    #[inline]
    #[must_use]
    pub fn get<C: WorldComponent>(&self, id: EntityId) -> Option<&C> {
        let entity = self.entity(id)?;
        if !entity.has_component(C::ID) {
            return None;
        }
        C::storage(self).get(id.index() as usize)
    }

    /// Mutable access to component `C` if the entity is alive and carries it.
    #[inline]
    pub fn get_mut<C: WorldComponent>(&mut self, id: EntityId) -> Option<&mut C> {
        if !self.has::<C>(id) {
            return None;
        }
        C::storage_mut(self).get_mut(id.index() as usize)
    }

    /// True if the entity is alive and carries `C`.
    #[inline]
    #[must_use]
    pub fn has<C: WorldComponent>(&self, id: EntityId) -> bool {
        self.entity(id).is_some_and(|entity| entity.has_component(C::ID))
    }

    /// Iterates live entities matching `filter`, in index order.
    pub fn query<'w>(&'w self, filter: &QueryFilter) -> impl Iterator<Item = EntityId> + 'w {
        let filter = *filter;
        self.entities
            .iter()
            .filter(move |entity| entity.alive && filter.matches(entity.components))
            .map(|entity| entity.id)
    }

    /// Tags an entity as destroyed on `tick`.
    ///
    /// The entity stays alive until [`World::flush_destroyed`] so observers
    /// can reclaim what they attached to it.
    ///
    /// # Errors
    ///
    /// [`WorldError::StaleEntity`] if the entity is not alive.
    pub fn mark_destroyed(&mut self, id: EntityId, tick: u32) -> WorldResult<()> {
        self.insert(id, Destroyed { tick })
    }

    /// Despawns every destroyed entity that no longer holds a render slot.
    ///
    /// Destroyed entities still holding a slot are kept for the next pass.
    /// Returns the number of entities despawned.
    pub fn flush_destroyed(&mut self) -> usize {
        let ready = QueryFilter::new().with::<Destroyed>().without::<RenderSlot>();
        let doomed: Vec<EntityId> = self.query(&ready).collect();
        for &id in &doomed {
            self.despawn(id);
        }
        doomed.len()
    }
}
