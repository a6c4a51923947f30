//! Per-ring-slot frame resources.

use std::collections::HashMap;

use crate::batching::BatcherId;
use crate::error::RenderResult;
use crate::gpu::{
    BufferDesc, BufferId, BufferKind, CommandList, FenceId, GpuBackend, SemaphoreId,
};

/// Smallest frame-local buffer, in bytes.
const MIN_BINDING_BYTES: u64 = 256;

/// Frame-local copies of one batcher's instance arrays.
///
/// The GPU reads these while the batcher keeps writing its own arrays for
/// later frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameBinding {
    /// Copy of the record array.
    pub records: BufferId,
    /// Capacity of `records` in bytes.
    pub records_size: u64,
    /// Copy of the id list.
    pub ids: BufferId,
    /// Capacity of `ids` in bytes.
    pub ids_size: u64,
    /// Source array generations these copies were sized for.
    pub source_generation: (u64, u64),
}

/// Everything one in-flight frame owns.
///
/// Created with its fence signaled so the first acquire never waits.
#[derive(Debug)]
pub struct FrameContext {
    index: usize,
    fence: FenceId,
    render_complete: SemaphoreId,
    commands: CommandList,
    bindings: HashMap<BatcherId, FrameBinding>,
    submitted_frame: Option<u64>,
}

impl FrameContext {
    /// Creates the context for ring slot `index`.
    ///
    /// # Errors
    ///
    /// Device failures; nothing is leaked on error.
    pub fn new(device: &dyn GpuBackend, index: usize) -> RenderResult<Self> {
        let fence = device.create_fence(true)?;
        let render_complete = match device.create_semaphore() {
            Ok(semaphore) => semaphore,
            Err(e) => {
                device.destroy_fence(fence);
                return Err(e);
            }
        };
        Ok(Self {
            index,
            fence,
            render_complete,
            commands: CommandList::new(),
            bindings: HashMap::new(),
            submitted_frame: None,
        })
    }

    /// Ring slot.
    #[inline]
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Signaled when the last submission from this context completes.
    #[inline]
    #[must_use]
    pub const fn fence(&self) -> FenceId {
        self.fence
    }

    /// Signaled for the present of this context's frame.
    #[inline]
    #[must_use]
    pub const fn render_complete(&self) -> SemaphoreId {
        self.render_complete
    }

    /// Frame number last submitted from this context.
    #[inline]
    #[must_use]
    pub const fn submitted_frame(&self) -> Option<u64> {
        self.submitted_frame
    }

    /// Commands recorded for the current (or last) frame.
    #[inline]
    #[must_use]
    pub const fn commands(&self) -> &CommandList {
        &self.commands
    }

    pub(crate) fn commands_mut(&mut self) -> &mut CommandList {
        &mut self.commands
    }

    /// Frame-local copies held for `batcher`.
    #[must_use]
    pub fn binding(&self, batcher: BatcherId) -> Option<&FrameBinding> {
        self.bindings.get(&batcher)
    }

    /// Number of batchers with frame-local copies.
    #[must_use]
    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    pub(crate) fn mark_submitted(&mut self, frame: u64) {
        self.submitted_frame = Some(frame);
    }

    /// Returns copies able to hold `records_size` and `ids_size` bytes,
    /// recreating them when the source generation changed or they are too
    /// small.
    ///
    /// Only called after this context's fence signaled, so replaced copies
    /// are no longer read.
    pub(crate) fn ensure_binding(
        &mut self,
        device: &dyn GpuBackend,
        batcher: BatcherId,
        records_size: u64,
        ids_size: u64,
        source_generation: (u64, u64),
    ) -> RenderResult<FrameBinding> {
        if let Some(binding) = self.bindings.get(&batcher) {
            if binding.source_generation == source_generation
                && binding.records_size >= records_size
                && binding.ids_size >= ids_size
            {
                return Ok(*binding);
            }
        }

        let records_size = binding_size(records_size);
        let ids_size = binding_size(ids_size);
        let records = device.create_buffer(&BufferDesc {
            label: "frame instance records",
            size: records_size,
            kind: BufferKind::InstanceRecords,
        })?;
        let ids = match device.create_buffer(&BufferDesc {
            label: "frame instance ids",
            size: ids_size,
            kind: BufferKind::InstanceIds,
        }) {
            Ok(ids) => ids,
            Err(e) => {
                device.destroy_buffer(records);
                return Err(e);
            }
        };

        let binding = FrameBinding {
            records,
            records_size,
            ids,
            ids_size,
            source_generation,
        };
        if let Some(old) = self.bindings.insert(batcher, binding) {
            device.destroy_buffer(old.records);
            device.destroy_buffer(old.ids);
        }
        tracing::debug!(
            ring_slot = self.index,
            %batcher,
            records_size,
            ids_size,
            "frame binding created"
        );
        Ok(binding)
    }

    /// Drops copies held for batchers that are gone. Returns how many were
    /// released.
    pub(crate) fn release_stale(
        &mut self,
        device: &dyn GpuBackend,
        is_live: &dyn Fn(BatcherId) -> bool,
    ) -> usize {
        let stale: Vec<BatcherId> = self
            .bindings
            .keys()
            .copied()
            .filter(|&id| !is_live(id))
            .collect();
        for id in &stale {
            if let Some(binding) = self.bindings.remove(id) {
                device.destroy_buffer(binding.records);
                device.destroy_buffer(binding.ids);
            }
        }
        stale.len()
    }

    /// Destroys every device object the context owns.
    pub fn release(mut self, device: &dyn GpuBackend) {
        for (_, binding) in self.bindings.drain() {
            device.destroy_buffer(binding.records);
            device.destroy_buffer(binding.ids);
        }
        device.destroy_semaphore(self.render_complete);
        device.destroy_fence(self.fence);
    }
}

fn binding_size(bytes: u64) -> u64 {
    bytes.max(MIN_BINDING_BYTES).next_power_of_two()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{SoftwareDevice, SubmissionMode};

    #[test]
    fn test_new_context_fence_is_signaled() {
        let device = SoftwareDevice::new(SubmissionMode::Manual);
        let context = FrameContext::new(&device, 2).unwrap();
        assert!(device.fence_signaled(context.fence()).unwrap());
        assert_eq!(context.index(), 2);
        assert_eq!(context.submitted_frame(), None);
    }

    #[test]
    fn test_binding_reused_until_generation_or_size_changes() {
        let device = SoftwareDevice::new(SubmissionMode::Manual);
        let mut context = FrameContext::new(&device, 0).unwrap();
        let batcher = BatcherId(1);

        let first = context
            .ensure_binding(&device, batcher, 1024, 64, (0, 0))
            .unwrap();
        let same = context
            .ensure_binding(&device, batcher, 512, 64, (0, 0))
            .unwrap();
        assert_eq!(first, same);

        let regrown = context
            .ensure_binding(&device, batcher, 1024, 64, (1, 0))
            .unwrap();
        assert_ne!(first.records, regrown.records);

        let bigger = context
            .ensure_binding(&device, batcher, 1024, 4096, (1, 0))
            .unwrap();
        assert_eq!(bigger.ids_size, 4096);

        device.complete_all();
        assert_eq!(device.live_buffers(), 2);
    }

    #[test]
    fn test_release_stale_bindings() {
        let device = SoftwareDevice::new(SubmissionMode::Manual);
        let mut context = FrameContext::new(&device, 0).unwrap();
        context
            .ensure_binding(&device, BatcherId(1), 64, 64, (0, 0))
            .unwrap();
        context
            .ensure_binding(&device, BatcherId(2), 64, 64, (0, 0))
            .unwrap();

        let released = context.release_stale(&device, &|id| id == BatcherId(2));
        assert_eq!(released, 1);
        assert!(context.binding(BatcherId(1)).is_none());
        assert_eq!(context.binding_count(), 1);

        context.release(&device);
        device.complete_all();
        assert_eq!(device.live_buffers(), 0);
        assert_eq!(device.live_fences(), 0);
    }
}
