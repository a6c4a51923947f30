//! Slot receipts kept on world entities through spawn/destroy churn.

use std::collections::HashSet;

use prism_core::{
    Destroyed, QueryFilter, RenderSlot, Renderable, SlotAllocator, Transform, World,
};

/// Minimal reconciliation: reclaim destroyed, then allocate pending.
fn reconcile(world: &mut World, slots: &mut SlotAllocator) {
    let doomed: Vec<_> = world
        .query(&QueryFilter::new().with::<Destroyed>().with::<RenderSlot>())
        .collect();
    for id in doomed {
        let receipt = world.remove::<RenderSlot>(id).unwrap().unwrap();
        slots.free(receipt.slot).unwrap();
    }

    let pending: Vec<_> = world
        .query(
            &QueryFilter::new()
                .with::<Renderable>()
                .without::<RenderSlot>()
                .without::<Destroyed>(),
        )
        .collect();
    let required = u64::from(slots.capacity()) + pending.len() as u64;
    let required = required.saturating_sub(u64::from(slots.free_count()));
    slots.ensure_capacity(required).unwrap();
    for id in pending {
        let slot = slots.allocate().unwrap();
        world.insert(id, RenderSlot { slot }).unwrap();
    }

    world.flush_destroyed();
}

fn spawn_renderable(world: &mut World, x: f32) {
    let id = world.spawn();
    world.insert(id, Transform::from_position([x, 0.0, 0.0])).unwrap();
    world.insert(id, Renderable::default()).unwrap();
}

#[test]
fn test_slots_stay_unique_across_churn() {
    let mut world = World::new(256);
    let mut slots = SlotAllocator::new(1, 1024).unwrap();

    for tick in 0..20_u32 {
        for i in 0..7 {
            spawn_renderable(&mut world, (tick * 7 + i) as f32);
        }

        let live: Vec<_> = world
            .query(&QueryFilter::new().with::<RenderSlot>())
            .collect();
        for id in live.iter().step_by(3) {
            world.mark_destroyed(*id, tick).unwrap();
        }

        reconcile(&mut world, &mut slots);

        let owned: Vec<u32> = world
            .query(&QueryFilter::new().with::<RenderSlot>())
            .map(|id| world.get::<RenderSlot>(id).unwrap().slot)
            .collect();
        let unique: HashSet<u32> = owned.iter().copied().collect();

        assert_eq!(owned.len(), unique.len(), "tick {tick}: shared slot");
        assert_eq!(slots.live_count() as usize, owned.len());
        assert_eq!(slots.capacity(), slots.live_count() + slots.free_count());
        assert!(slots.check_invariants());
    }
}

#[test]
fn test_destroyed_entity_slot_reused_next() {
    let mut world = World::new(16);
    let mut slots = SlotAllocator::new(8, 8).unwrap();

    for i in 0..5 {
        spawn_renderable(&mut world, i as f32);
    }
    reconcile(&mut world, &mut slots);

    let victim = world
        .query(&QueryFilter::new().with::<RenderSlot>())
        .find(|id| world.get::<RenderSlot>(*id).unwrap().slot == 3)
        .unwrap();
    world.mark_destroyed(victim, 1).unwrap();
    reconcile(&mut world, &mut slots);

    assert!(!world.is_alive(victim));
    assert_eq!(slots.free_slots().last(), Some(&3));
    assert_eq!(slots.allocate().unwrap(), 3);
}
