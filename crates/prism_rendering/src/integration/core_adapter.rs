//! Core Adapter - connects the batcher to `prism_core`'s reference [`World`]
//!
//! ## Usage
//!
//! ```rust
//! use prism_core::{QueryFilter, Renderable, World};
//! use prism_rendering::integration::SceneWorld;
//!
//! let mut world = World::new(16);
//! let entity = world.spawn();
//! world.insert(entity, Renderable::default()).unwrap();
//!
//! world.attach_slot(entity, 3).unwrap();
//! assert_eq!(world.render_slot(entity).unwrap(), Some(3));
//!
//! let drawable = QueryFilter::new().with::<Renderable>();
//! assert_eq!(SceneWorld::collect(&world, &drawable).unwrap(), vec![entity]);
//! ```

use prism_core::{
    Component, EntityId, QueryFilter, RenderSlot, Renderable, Transform, World, WorldError,
    WorldResult,
};

use super::scene_world::{InstanceSource, SceneWorld};

impl SceneWorld for World {
    fn query(&self, filter: &QueryFilter, visit: &mut dyn FnMut(EntityId)) -> WorldResult<()> {
        World::query(self, filter).for_each(visit);
        Ok(())
    }

    fn is_alive(&self, entity: EntityId) -> bool {
        World::is_alive(self, entity)
    }

    fn instance_source(&self, entity: EntityId) -> WorldResult<InstanceSource> {
        if !self.is_alive(entity) {
            return Err(WorldError::StaleEntity(entity));
        }
        let renderable = *self
            .get::<Renderable>(entity)
            .ok_or(WorldError::MissingComponent {
                entity,
                component: Renderable::ID,
            })?;
        let transform = self.get::<Transform>(entity).copied().unwrap_or_default();
        Ok(InstanceSource {
            transform,
            renderable,
        })
    }

    fn render_slot(&self, entity: EntityId) -> WorldResult<Option<u32>> {
        if !self.is_alive(entity) {
            return Err(WorldError::StaleEntity(entity));
        }
        Ok(self.get::<RenderSlot>(entity).map(|tag| tag.slot))
    }

    fn attach_slot(&mut self, entity: EntityId, slot: u32) -> WorldResult<()> {
        self.insert(entity, RenderSlot { slot })
    }

    fn detach_slot(&mut self, entity: EntityId) -> WorldResult<Option<u32>> {
        Ok(self.remove::<RenderSlot>(entity)?.map(|tag| tag.slot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::{MeshId, ShaderId};

    #[test]
    fn test_instance_source_defaults_transform() {
        let mut world = World::new(4);
        let entity = world.spawn();
        world
            .insert(entity, Renderable::new(ShaderId(2), MeshId(5)))
            .unwrap();

        let source = world.instance_source(entity).unwrap();
        assert_eq!(source.transform, Transform::default());
        assert_eq!(source.renderable.mesh, MeshId(5));
    }

    #[test]
    fn test_missing_renderable_and_stale_entity() {
        let mut world = World::new(4);
        let bare = world.spawn();
        assert!(matches!(
            world.instance_source(bare),
            Err(WorldError::MissingComponent { .. })
        ));

        world.despawn(bare);
        assert_eq!(world.render_slot(bare), Err(WorldError::StaleEntity(bare)));
        assert_eq!(world.attach_slot(bare, 0), Err(WorldError::StaleEntity(bare)));
    }

    #[test]
    fn test_attach_detach_roundtrip() {
        let mut world = World::new(4);
        let entity = world.spawn();
        world.attach_slot(entity, 9).unwrap();
        assert_eq!(world.detach_slot(entity).unwrap(), Some(9));
        assert_eq!(world.detach_slot(entity).unwrap(), None);
        assert_eq!(world.render_slot(entity).unwrap(), None);
    }
}
