//! The world as seen by the render batcher.

use prism_core::{EntityId, QueryFilter, Renderable, Transform, WorldResult};

/// What the batcher reads to build an entity's instance record.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct InstanceSource {
    /// Placement; the world reports the default transform if none is set.
    pub transform: Transform,
    /// Shader, mesh and per-instance parameters.
    pub renderable: Renderable,
}

/// Interface the render batcher uses to observe and tag a world.
///
/// The batcher never owns entities. Its only mutations are attaching and
/// detaching the `RenderSlot` receipt.
///
/// Queries visit matching entities through a callback so the trait stays
/// object safe and implementations can walk their own storage without
/// allocating.
pub trait SceneWorld {
    /// Visits every live entity matching `filter`, in a stable order.
    ///
    /// # Errors
    ///
    /// Implementation-defined query failures.
    fn query(&self, filter: &QueryFilter, visit: &mut dyn FnMut(EntityId)) -> WorldResult<()>;

    /// True while `entity` is alive. A despawned id stays dead even after
    /// its index is recycled.
    fn is_alive(&self, entity: EntityId) -> bool;

    /// Reads the components an instance record is built from.
    ///
    /// # Errors
    ///
    /// `StaleEntity` for dead ids, `MissingComponent` without a `Renderable`.
    fn instance_source(&self, entity: EntityId) -> WorldResult<InstanceSource>;

    /// Slot recorded in the entity's `RenderSlot`, if any.
    ///
    /// # Errors
    ///
    /// `StaleEntity` for dead ids.
    fn render_slot(&self, entity: EntityId) -> WorldResult<Option<u32>>;

    /// Attaches `RenderSlot { slot }`.
    ///
    /// # Errors
    ///
    /// `StaleEntity` for dead ids.
    fn attach_slot(&mut self, entity: EntityId, slot: u32) -> WorldResult<()>;

    /// Removes the `RenderSlot`, returning the slot it held.
    ///
    /// # Errors
    ///
    /// `StaleEntity` for dead ids.
    fn detach_slot(&mut self, entity: EntityId) -> WorldResult<Option<u32>>;

    /// Collects the entities matching `filter`.
    ///
    /// # Errors
    ///
    /// Whatever [`query`](Self::query) reports.
    fn collect(&self, filter: &QueryFilter) -> WorldResult<Vec<EntityId>> {
        let mut entities = Vec::new();
        self.query(filter, &mut |entity| entities.push(entity))?;
        Ok(entities)
    }
}
