//! The render batcher: one slot allocator, one record array, one id list.

use std::sync::Arc;

use prism_core::{
    Destroyed, EntityId, MeshId, QueryFilter, RenderSlot, Renderable, ShaderId, SlotAllocator,
};

use super::{BatchStats, RenderBuckets};
use crate::buffer::{ParkedResources, TypedDeviceArray};
use crate::config::RendererConfig;
use crate::error::{RenderError, RenderResult, SlotAccessPolicy};
use crate::gpu::{BufferKind, GpuBackend};
use crate::instancing::InstanceRecord;
use crate::integration::SceneWorld;

const RECLAIM_DESTROYED: QueryFilter = QueryFilter::new().with::<Destroyed>().with::<RenderSlot>();
const RECLAIM_REMOVED: QueryFilter = QueryFilter::new()
    .with::<RenderSlot>()
    .without::<Renderable>();
const PENDING: QueryFilter = QueryFilter::new()
    .with::<Renderable>()
    .without::<RenderSlot>()
    .without::<Destroyed>();
const DRAWABLE: QueryFilter = QueryFilter::new().with::<Renderable>().with::<RenderSlot>();
const SLOTTED: QueryFilter = QueryFilter::new().with::<RenderSlot>();

type DrawEntry = (ShaderId, MeshId, u32, InstanceRecord);

/// A `RenderSlot` tag found on an entity during a reclaim phase.
#[derive(Clone, Copy)]
struct Receipt {
    entity: EntityId,
    slot: u32,
    /// False if this batcher never handed the slot to that entity.
    owned: bool,
}

/// Keeps one world's renderables in sync with a slot-addressed instance
/// array and publishes draw buckets.
///
/// Each phase is all-or-nothing: it gathers and validates first, then
/// changes world tags (rolled back if the world fails), and only then
/// touches the allocator. A failed tick keeps the last published buckets
/// and device data.
///
/// The batcher records which entity holds each live slot. A tag that does
/// not match that table is an [`RenderError::InvalidSlotAccess`], and a slot
/// whose entity was despawned outright is reclaimed on the next tick.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use prism_core::{Renderable, World};
/// use prism_rendering::batching::RenderBatcher;
/// use prism_rendering::gpu::{GpuBackend, SoftwareDevice, SubmissionMode};
///
/// let device: Arc<dyn GpuBackend> = Arc::new(SoftwareDevice::new(SubmissionMode::Immediate));
/// let mut batcher = RenderBatcher::new(device, "scene", 4, 1024).unwrap();
///
/// let mut world = World::new(64);
/// let entity = world.spawn();
/// world.insert(entity, Renderable::default()).unwrap();
///
/// let stats = batcher.execute(&mut world).unwrap();
/// assert_eq!(stats.allocated, 1);
/// assert_eq!(batcher.buckets().instance_count(), 1);
/// ```
pub struct RenderBatcher {
    label: String,
    slots: SlotAllocator,
    /// Entity holding each slot; `EntityId::NULL` for free slots.
    owners: Vec<EntityId>,
    records: TypedDeviceArray<InstanceRecord>,
    ids: TypedDeviceArray<u32>,
    buckets: RenderBuckets,
    policy: SlotAccessPolicy,
    tick: u64,
    last_stats: BatchStats,
}

impl RenderBatcher {
    /// Creates a batcher with `initial_capacity` slots, growable up to
    /// `max_capacity`.
    ///
    /// # Errors
    ///
    /// [`RenderError::AllocationExhausted`] if `initial_capacity` exceeds
    /// `max_capacity`, or device allocation failures.
    pub fn new(
        device: Arc<dyn GpuBackend>,
        label: impl Into<String>,
        initial_capacity: u32,
        max_capacity: u32,
    ) -> RenderResult<Self> {
        let label = label.into();
        let slots = SlotAllocator::new(initial_capacity, max_capacity)?;
        let records = TypedDeviceArray::new(
            Arc::clone(&device),
            "instance records",
            BufferKind::InstanceRecords,
            initial_capacity as usize,
        )?;
        let ids = match TypedDeviceArray::new(
            Arc::clone(&device),
            "instance ids",
            BufferKind::InstanceIds,
            initial_capacity as usize,
        ) {
            Ok(ids) => ids,
            Err(e) => {
                records.park().release(device.as_ref());
                return Err(e);
            }
        };

        tracing::debug!(%label, initial_capacity, max_capacity, "render batcher created");
        Ok(Self {
            label,
            slots,
            owners: vec![EntityId::NULL; initial_capacity as usize],
            records,
            ids,
            buckets: RenderBuckets::default(),
            policy: SlotAccessPolicy::default(),
            tick: 0,
            last_stats: BatchStats::default(),
        })
    }

    /// Creates a batcher sized by the renderer configuration.
    ///
    /// # Errors
    ///
    /// See [`RenderBatcher::new`].
    pub fn from_config(
        device: Arc<dyn GpuBackend>,
        label: impl Into<String>,
        config: &RendererConfig,
    ) -> RenderResult<Self> {
        Self::new(
            device,
            label,
            config.initial_slot_capacity,
            config.max_slot_capacity,
        )
    }

    /// Replaces the build's policy for tags and writes that point at slots
    /// this batcher does not hold.
    #[must_use]
    pub fn with_slot_policy(mut self, policy: SlotAccessPolicy) -> Self {
        self.policy = policy;
        self.records.set_slot_policy(policy);
        self.ids.set_slot_policy(policy);
        self
    }

    /// Policy for invalid slot access.
    #[inline]
    #[must_use]
    pub const fn slot_policy(&self) -> SlotAccessPolicy {
        self.policy
    }

    /// Debug label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Ticks completed so far.
    #[inline]
    #[must_use]
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Current slot capacity.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.slots.capacity()
    }

    /// Slots currently held by entities.
    #[inline]
    #[must_use]
    pub fn live_count(&self) -> u32 {
        self.slots.live_count()
    }

    /// The slot allocator.
    #[inline]
    #[must_use]
    pub const fn slots(&self) -> &SlotAllocator {
        &self.slots
    }

    /// Entity holding `slot`, if the slot is live.
    #[must_use]
    pub fn owner(&self, slot: u32) -> Option<EntityId> {
        self.owners
            .get(slot as usize)
            .copied()
            .filter(|owner| !owner.is_null())
    }

    /// Buckets published by the last successful tick.
    #[inline]
    #[must_use]
    pub const fn buckets(&self) -> &RenderBuckets {
        &self.buckets
    }

    /// Slot-addressed instance records.
    #[inline]
    #[must_use]
    pub const fn records(&self) -> &TypedDeviceArray<InstanceRecord> {
        &self.records
    }

    /// Bucket-ordered slot list.
    #[inline]
    #[must_use]
    pub const fn ids(&self) -> &TypedDeviceArray<u32> {
        &self.ids
    }

    /// Statistics of the last successful tick.
    #[inline]
    #[must_use]
    pub const fn last_stats(&self) -> BatchStats {
        self.last_stats
    }

    /// Runs the four phases against `world`.
    ///
    /// # Errors
    ///
    /// - [`RenderError::WorldQuery`] if the world fails (recoverable; the
    ///   failing phase is rolled back)
    /// - [`RenderError::AllocationExhausted`] if growth passes the maximum
    /// - [`RenderError::InvalidSlotAccess`] for tags this batcher did not
    ///   hand out, under [`SlotAccessPolicy::Strict`]. `Clamp` drops such
    ///   tags and skips the entity for this tick.
    /// - Device errors from growing or uploading the arrays
    pub fn execute<W: SceneWorld + ?Sized>(&mut self, world: &mut W) -> RenderResult<BatchStats> {
        let tick = self.tick + 1;
        let span = tracing::debug_span!("render_batcher", label = %self.label, tick);
        let _enter = span.enter();

        let (destroyed, dropped_destroyed) =
            self.reclaim(world, &RECLAIM_DESTROYED, "destroyed")?;
        let orphaned = self.reclaim_orphans(world)?;
        let (reclaimed_removed, dropped_removed) =
            self.reclaim(world, &RECLAIM_REMOVED, "component removed")?;

        let pending = world.collect(&PENDING)?;
        let grew_to = self.grow_for(pending.len())?;
        let allocated = self.allocate(world, &pending)?;

        let (written, dropped_drawn) = self.write_and_sort(world, tick)?;

        self.tick = tick;
        self.last_stats = BatchStats {
            tick,
            reclaimed_destroyed: destroyed + orphaned,
            reclaimed_removed,
            allocated,
            written,
            buckets: self.buckets.len(),
            grew_to,
            dropped_receipts: dropped_destroyed + dropped_removed + dropped_drawn,
        };
        debug_assert!(self.slots.check_invariants());
        tracing::debug!(stats = ?self.last_stats, "batcher tick complete");
        Ok(self.last_stats)
    }

    /// Drops every `RenderSlot` this batcher handed out in `world` and frees
    /// the slots. Used before retiring a batcher whose world lives on.
    ///
    /// # Errors
    ///
    /// Same as the reclaim phases of [`execute`](Self::execute).
    pub fn detach_all<W: SceneWorld + ?Sized>(&mut self, world: &mut W) -> RenderResult<u32> {
        let orphaned = self.reclaim_orphans(world)?;
        let (released, _) = self.reclaim(world, &SLOTTED, "detach all")?;
        self.buckets = RenderBuckets::from_sorted(self.tick, []);
        Ok(released + orphaned)
    }

    /// Releases array buffers replaced by growth once their copy finished.
    pub fn collect_garbage(&mut self) -> usize {
        self.records.collect_retired() + self.ids.collect_retired()
    }

    /// Hands every device buffer over for deferred release.
    pub fn park(self) -> ParkedResources {
        let mut parked = self.records.park();
        parked.merge(self.ids.park());
        parked
    }

    /// True if this batcher handed `slot` to `entity`.
    fn owns(&self, entity: EntityId, slot: u32) -> bool {
        self.slots.is_live(slot) && self.owners.get(slot as usize) == Some(&entity)
    }

    /// Reports a tag that points at a slot this batcher did not hand out.
    fn slot_violation(&self, slot: u32, reason: &'static str) -> RenderResult<()> {
        let err = RenderError::InvalidSlotAccess {
            slot,
            capacity: self.slots.capacity(),
            reason,
        };
        self.policy.check(err).map(|()| {
            tracing::debug!(label = %self.label, slot, "foreign render slot tag dropped");
        })
    }

    /// Returns `(slots freed, foreign tags dropped)`.
    fn reclaim<W: SceneWorld + ?Sized>(
        &mut self,
        world: &mut W,
        filter: &QueryFilter,
        phase: &'static str,
    ) -> RenderResult<(u32, u32)> {
        let mut receipts: Vec<Receipt> = Vec::new();
        for entity in world.collect(filter)? {
            let Some(slot) = world.render_slot(entity)? else {
                continue;
            };
            let owned = self.owns(entity, slot);
            if !owned {
                self.slot_violation(slot, "reclaiming a slot that is not allocated")?;
            }
            receipts.push(Receipt {
                entity,
                slot,
                owned,
            });
        }
        if receipts.is_empty() {
            return Ok((0, 0));
        }

        for (done, receipt) in receipts.iter().enumerate() {
            if let Err(e) = world.detach_slot(receipt.entity) {
                restore_tags(world, &receipts[..done]);
                return Err(e.into());
            }
        }
        let mut freed = 0;
        for receipt in receipts.iter().filter(|receipt| receipt.owned) {
            self.slots.free(receipt.slot)?;
            self.owners[receipt.slot as usize] = EntityId::NULL;
            freed += 1;
        }

        let dropped = receipts.len() as u32 - freed;
        tracing::debug!(phase, freed, dropped, "slots reclaimed");
        Ok((freed, dropped))
    }

    /// Frees slots whose entity was despawned without being marked
    /// `Destroyed` first. There is no tag left to drop.
    fn reclaim_orphans<W: SceneWorld + ?Sized>(&mut self, world: &W) -> RenderResult<u32> {
        let orphans: Vec<u32> = self
            .owners
            .iter()
            .enumerate()
            .filter(|(_, owner)| !owner.is_null() && !world.is_alive(**owner))
            .map(|(slot, _)| slot as u32)
            .collect();
        if orphans.is_empty() {
            return Ok(0);
        }

        for &slot in &orphans {
            self.slots.free(slot)?;
            self.owners[slot as usize] = EntityId::NULL;
        }
        tracing::warn!(
            label = %self.label,
            count = orphans.len(),
            "reclaimed slots of entities despawned while still renderable"
        );
        Ok(orphans.len() as u32)
    }

    fn grow_for(&mut self, pending: usize) -> RenderResult<Option<u32>> {
        let free = u64::from(self.slots.free_count());
        let pending = pending as u64;
        if pending <= free {
            return Ok(None);
        }

        let required = u64::from(self.slots.capacity()) + pending - free;
        let Some(capacity) = self.slots.grown_capacity(required)? else {
            return Ok(None);
        };
        // Device side first, so a failed copy leaves the allocator as it was
        self.records.resize(capacity as usize)?;
        self.slots.ensure_capacity(required)?;
        self.owners.resize(capacity as usize, EntityId::NULL);

        tracing::info!(label = %self.label, capacity, required, "instance arrays grown");
        Ok(Some(capacity))
    }

    fn allocate<W: SceneWorld + ?Sized>(
        &mut self,
        world: &mut W,
        pending: &[EntityId],
    ) -> RenderResult<u32> {
        if pending.is_empty() {
            return Ok(0);
        }
        let free = self.slots.free_slots();
        if free.len() < pending.len() {
            return Err(RenderError::AllocationExhausted {
                requested: u64::from(self.slots.live_count()) + pending.len() as u64,
                max: self.slots.max_capacity(),
            });
        }
        // The stack pops from the end
        let planned: Vec<u32> = free.iter().rev().take(pending.len()).copied().collect();

        for (done, (&entity, &slot)) in pending.iter().zip(&planned).enumerate() {
            if let Err(e) = world.attach_slot(entity, slot) {
                drop_tags(world, &pending[..done]);
                return Err(e.into());
            }
        }
        for (&entity, &slot) in pending.iter().zip(&planned) {
            let allocated = self.slots.allocate()?;
            debug_assert_eq!(allocated, slot);
            self.owners[slot as usize] = entity;
        }

        tracing::debug!(count = planned.len(), "slots allocated");
        Ok(planned.len() as u32)
    }

    /// Returns `(records written, foreign tags dropped)`.
    fn write_and_sort<W: SceneWorld + ?Sized>(
        &mut self,
        world: &mut W,
        tick: u64,
    ) -> RenderResult<(u32, u32)> {
        let mut entries: Vec<DrawEntry> = Vec::new();
        let mut foreign: Vec<EntityId> = Vec::new();

        for entity in world.collect(&DRAWABLE)? {
            let Some(slot) = world.render_slot(entity)? else {
                continue;
            };
            if !self.owns(entity, slot) {
                self.slot_violation(slot, "drawing a slot that is not allocated")?;
                foreign.push(entity);
                continue;
            }
            let source = world.instance_source(entity)?;
            let record = InstanceRecord::from_components(&source.transform, &source.renderable);
            entries.push((source.renderable.shader, source.renderable.mesh, slot, record));
        }

        entries.sort_unstable_by_key(|&(shader, mesh, slot, _)| (shader, mesh, slot));

        let mut writer = self.records.writer();
        for &(_, _, slot, record) in &entries {
            writer.write(slot as usize, record)?;
        }

        let buckets = RenderBuckets::from_sorted(
            tick,
            entries.iter().map(|&(shader, mesh, slot, _)| (shader, mesh, slot)),
        );
        if buckets.instance_count() > self.ids.len() {
            self.ids.resize(buckets.instance_count())?;
        }
        self.ids.writer().write_slice(0, buckets.instance_ids())?;

        self.records.flush()?;
        self.ids.flush()?;
        self.buckets = buckets;

        // Untagged, these entities get a slot of their own next tick
        drop_tags(world, &foreign);
        Ok((entries.len() as u32, foreign.len() as u32))
    }
}

fn restore_tags<W: SceneWorld + ?Sized>(world: &mut W, receipts: &[Receipt]) {
    for receipt in receipts {
        if let Err(e) = world.attach_slot(receipt.entity, receipt.slot) {
            tracing::error!(entity = %receipt.entity, slot = receipt.slot, "render slot lost during rollback: {e}");
        }
    }
}

fn drop_tags<W: SceneWorld + ?Sized>(world: &mut W, tagged: &[EntityId]) {
    for &entity in tagged {
        if let Err(e) = world.detach_slot(entity) {
            tracing::error!(%entity, "render slot tag left behind: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{SoftwareDevice, SubmissionMode};
    use prism_core::{Transform, World};

    fn batcher(initial: u32, max: u32) -> RenderBatcher {
        let device: Arc<dyn GpuBackend> = Arc::new(SoftwareDevice::new(SubmissionMode::Immediate));
        RenderBatcher::new(device, "test", initial, max).unwrap()
    }

    fn spawn_renderable(world: &mut World, x: f32) -> EntityId {
        let entity = world.spawn();
        world
            .insert(entity, Transform::from_position([x, 0.0, 0.0]))
            .unwrap();
        world.insert(entity, Renderable::default()).unwrap();
        entity
    }

    fn slot_of(world: &World, entity: EntityId) -> Option<u32> {
        world.get::<RenderSlot>(entity).map(|tag| tag.slot)
    }

    #[test]
    fn test_lowest_slots_first_in_entity_order() {
        let mut batcher = batcher(4, 64);
        let mut world = World::new(16);
        let entities: Vec<_> = (0..3).map(|i| spawn_renderable(&mut world, i as f32)).collect();

        let stats = batcher.execute(&mut world).unwrap();
        assert_eq!(stats.allocated, 3);
        assert_eq!(stats.written, 3);
        assert_eq!(stats.grew_to, None);
        for (expected, &entity) in entities.iter().enumerate() {
            assert_eq!(slot_of(&world, entity), Some(expected as u32));
        }
    }

    #[test]
    fn test_grows_once_for_a_burst() {
        let mut batcher = batcher(4, 64);
        let mut world = World::new(16);
        for i in 0..6 {
            spawn_renderable(&mut world, i as f32);
        }

        let stats = batcher.execute(&mut world).unwrap();
        assert_eq!(stats.grew_to, Some(8));
        assert_eq!(batcher.capacity(), 8);
        assert_eq!(batcher.live_count(), 6);
        assert_eq!(batcher.records().len(), 8);
        assert_eq!(batcher.records().generation(), 1);
    }

    #[test]
    fn test_destroyed_slot_reused_same_tick() {
        let mut batcher = batcher(4, 64);
        let mut world = World::new(16);
        let entities: Vec<_> = (0..3).map(|i| spawn_renderable(&mut world, i as f32)).collect();
        batcher.execute(&mut world).unwrap();

        world.mark_destroyed(entities[1], 2).unwrap();
        let newcomer = spawn_renderable(&mut world, 9.0);
        let stats = batcher.execute(&mut world).unwrap();

        assert_eq!(stats.reclaimed_destroyed, 1);
        assert_eq!(stats.allocated, 1);
        assert_eq!(slot_of(&world, newcomer), Some(1));
        assert_eq!(slot_of(&world, entities[1]), None);
        assert_eq!(world.flush_destroyed(), 1);
    }

    #[test]
    fn test_removed_component_reclaims_slot() {
        let mut batcher = batcher(4, 64);
        let mut world = World::new(16);
        let entity = spawn_renderable(&mut world, 0.0);
        batcher.execute(&mut world).unwrap();

        world.remove::<Renderable>(entity).unwrap();
        let stats = batcher.execute(&mut world).unwrap();
        assert_eq!(stats.reclaimed_removed, 1);
        assert_eq!(batcher.live_count(), 0);
        assert!(world.is_alive(entity));
        assert_eq!(slot_of(&world, entity), None);
        assert!(batcher.buckets().is_empty());
    }

    #[test]
    fn test_second_tick_without_changes_is_a_no_op() {
        let mut batcher = batcher(4, 64);
        let mut world = World::new(16);
        for i in 0..5 {
            spawn_renderable(&mut world, i as f32);
        }
        batcher.execute(&mut world).unwrap();
        let first = batcher.buckets().clone();

        let stats = batcher.execute(&mut world).unwrap();
        assert_eq!(stats.reclaimed_destroyed + stats.reclaimed_removed, 0);
        assert_eq!(stats.allocated, 0);
        assert_eq!(stats.grew_to, None);
        assert_eq!(batcher.buckets().buckets(), first.buckets());
        assert_eq!(batcher.buckets().instance_ids(), first.instance_ids());
    }

    #[test]
    fn test_growth_past_maximum_leaves_world_untouched() {
        let mut batcher = batcher(2, 4);
        let mut world = World::new(16);
        for i in 0..5 {
            spawn_renderable(&mut world, i as f32);
        }

        let err = batcher.execute(&mut world).unwrap_err();
        assert!(matches!(err, RenderError::AllocationExhausted { requested: 5, max: 4 }));
        assert!(!err.is_recoverable());
        assert_eq!(world.query(&SLOTTED).count(), 0);
        assert_eq!(batcher.capacity(), 2);
        assert_eq!(batcher.tick(), 0);
    }

    #[test]
    fn test_records_follow_transforms() {
        let mut batcher = batcher(4, 64);
        let mut world = World::new(16);
        let entity = spawn_renderable(&mut world, 0.25);
        batcher.execute(&mut world).unwrap();

        world.get_mut::<Transform>(entity).unwrap().position = [0.5, 0.5, 0.0];
        batcher.execute(&mut world).unwrap();

        let slot = slot_of(&world, entity).unwrap() as usize;
        assert_eq!(batcher.records().as_slice()[slot].position(), [0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_detach_all_clears_tags() {
        let mut batcher = batcher(4, 64);
        let mut world = World::new(16);
        for i in 0..3 {
            spawn_renderable(&mut world, i as f32);
        }
        batcher.execute(&mut world).unwrap();

        assert_eq!(batcher.detach_all(&mut world).unwrap(), 3);
        assert_eq!(batcher.live_count(), 0);
        assert!(batcher.buckets().is_empty());
        assert_eq!(world.query(&SLOTTED).count(), 0);
    }

    #[test]
    fn test_despawned_renderable_slot_is_reclaimed() {
        let mut batcher = batcher(4, 64);
        let mut world = World::new(16);
        let entity = spawn_renderable(&mut world, 0.0);
        batcher.execute(&mut world).unwrap();
        assert_eq!(batcher.owner(0), Some(entity));

        assert!(world.despawn(entity));
        // Reuses the index with a new generation
        let newcomer = spawn_renderable(&mut world, 1.0);
        assert_eq!(newcomer.index(), entity.index());

        let stats = batcher.execute(&mut world).unwrap();
        assert_eq!(stats.reclaimed_destroyed, 1);
        assert_eq!(stats.allocated, 1);
        assert_eq!(batcher.live_count(), 1);
        assert_eq!(slot_of(&world, newcomer), Some(0));
        assert_eq!(batcher.owner(0), Some(newcomer));
        assert_eq!(batcher.buckets().instance_count(), 1);
        assert_eq!(batcher.slots().free_slots(), &[3, 2, 1]);
    }

    #[test]
    fn test_despawn_without_respawn_frees_slot() {
        let mut batcher = batcher(4, 64);
        let mut world = World::new(16);
        let entities: Vec<_> = (0..2).map(|i| spawn_renderable(&mut world, i as f32)).collect();
        batcher.execute(&mut world).unwrap();

        world.despawn(entities[0]);
        let stats = batcher.execute(&mut world).unwrap();
        assert_eq!(stats.reclaimed_destroyed, 1);
        assert_eq!(batcher.live_count(), 1);
        assert_eq!(batcher.owner(0), None);
        assert_eq!(batcher.buckets().instance_ids(), &[1]);
    }

    fn forge_tag(world: &mut World, slot: u32) -> EntityId {
        let entity = spawn_renderable(world, 5.0);
        world.insert(entity, RenderSlot { slot }).unwrap();
        entity
    }

    #[test]
    fn test_foreign_tag_is_rejected_under_strict_policy() {
        let mut batcher = batcher(4, 64).with_slot_policy(SlotAccessPolicy::Strict);
        let mut world = World::new(16);
        spawn_renderable(&mut world, 0.0);
        batcher.execute(&mut world).unwrap();

        let forged = forge_tag(&mut world, 0);
        let err = batcher.execute(&mut world).unwrap_err();
        assert!(matches!(err, RenderError::InvalidSlotAccess { slot: 0, .. }));
        assert_eq!(slot_of(&world, forged), Some(0));
        assert_eq!(batcher.tick(), 1);
    }

    #[test]
    fn test_foreign_tag_is_dropped_under_clamp_policy() {
        let mut batcher = batcher(4, 64).with_slot_policy(SlotAccessPolicy::Clamp);
        let mut world = World::new(16);
        let original = spawn_renderable(&mut world, 0.0);
        batcher.execute(&mut world).unwrap();

        let forged = forge_tag(&mut world, 0);
        let stats = batcher.execute(&mut world).unwrap();
        assert_eq!(stats.dropped_receipts, 1);
        assert_eq!(stats.written, 1);
        assert_eq!(slot_of(&world, forged), None);
        assert_eq!(slot_of(&world, original), Some(0));
        assert_eq!(batcher.buckets().instance_count(), 1);

        // Next tick it is treated as a newcomer
        let stats = batcher.execute(&mut world).unwrap();
        assert_eq!(stats.dropped_receipts, 0);
        assert_eq!(stats.allocated, 1);
        assert_eq!(slot_of(&world, forged), Some(1));
        assert_eq!(batcher.owner(1), Some(forged));
        assert_eq!(batcher.buckets().instance_count(), 2);
    }

    #[test]
    fn test_stray_tag_on_destroyed_entity_is_dropped_not_freed() {
        let mut batcher = batcher(4, 64).with_slot_policy(SlotAccessPolicy::Clamp);
        let mut world = World::new(16);
        let original = spawn_renderable(&mut world, 0.0);
        batcher.execute(&mut world).unwrap();

        let forged = forge_tag(&mut world, 0);
        world.mark_destroyed(forged, 2).unwrap();
        let stats = batcher.execute(&mut world).unwrap();
        assert_eq!(stats.dropped_receipts, 1);
        assert_eq!(stats.reclaimed_destroyed, 0);
        assert_eq!(slot_of(&world, forged), None);
        assert_eq!(batcher.owner(0), Some(original));
        assert_eq!(batcher.live_count(), 1);
    }
}
