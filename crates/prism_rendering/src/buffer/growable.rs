//! Byte-level growable device buffer.

use std::sync::Arc;

use crate::error::RenderResult;
use crate::gpu::{BufferDesc, BufferId, BufferKind, CommandList, FenceId, GpuBackend, SubmitInfo};

/// An old allocation waiting for the copy out of it to finish.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct RetiredBuffer {
    buffer: BufferId,
    fence: FenceId,
}

/// Device resources handed over for deferred release.
///
/// Produced when an owner goes away while work may still reference its
/// buffers. Release it once a fence submitted after that work signals.
#[derive(Debug, Default, PartialEq, Eq)]
#[must_use = "parked resources leak unless released"]
pub struct ParkedResources {
    buffers: Vec<BufferId>,
    fences: Vec<FenceId>,
}

impl ParkedResources {
    /// Nothing parked.
    pub const fn new() -> Self {
        Self {
            buffers: Vec::new(),
            fences: Vec::new(),
        }
    }

    /// True if nothing is parked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty() && self.fences.is_empty()
    }

    /// Parked buffers.
    #[must_use]
    pub fn buffers(&self) -> &[BufferId] {
        &self.buffers
    }

    /// Moves everything from `other` into this set.
    pub fn merge(&mut self, mut other: Self) {
        self.buffers.append(&mut other.buffers);
        self.fences.append(&mut other.fences);
    }

    /// Destroys every parked resource.
    pub fn release(self, device: &dyn GpuBackend) {
        for buffer in self.buffers {
            device.destroy_buffer(buffer);
        }
        for fence in self.fences {
            device.destroy_fence(fence);
        }
    }
}

/// A device buffer that is replaced, never reallocated in place, when it
/// grows.
///
/// Every replacement bumps [`generation`](Self::generation), so anything
/// bound to the old buffer can tell it is stale.
pub struct GrowableDeviceBuffer {
    device: Arc<dyn GpuBackend>,
    buffer: BufferId,
    size: u64,
    kind: BufferKind,
    label: &'static str,
    generation: u64,
    retired: Vec<RetiredBuffer>,
}

impl GrowableDeviceBuffer {
    /// Creates a zero-filled buffer of `size` bytes.
    ///
    /// # Errors
    ///
    /// Propagates device allocation failures.
    pub fn new(
        device: Arc<dyn GpuBackend>,
        label: &'static str,
        kind: BufferKind,
        size: u64,
    ) -> RenderResult<Self> {
        let buffer = device.create_buffer(&BufferDesc { label, size, kind })?;
        Ok(Self {
            device,
            buffer,
            size,
            kind,
            label,
            generation: 0,
            retired: Vec::new(),
        })
    }

    /// Current device buffer.
    #[inline]
    #[must_use]
    pub const fn buffer(&self) -> BufferId {
        self.buffer
    }

    /// Current size in bytes.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Number of replacements so far.
    #[inline]
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// What the buffer holds.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> BufferKind {
        self.kind
    }

    /// Debug label.
    #[inline]
    #[must_use]
    pub const fn label(&self) -> &'static str {
        self.label
    }

    /// Old buffers still waiting on their copy fence.
    #[must_use]
    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    /// Replaces the buffer with one of `new_size` bytes, carrying over the
    /// first `min(old, new)` bytes with a device-side copy.
    ///
    /// The copy is ordered after every write already queued against the old
    /// buffer. On error the current buffer is left in place.
    ///
    /// # Errors
    ///
    /// Propagates device allocation and submission failures.
    pub fn resize(&mut self, new_size: u64) -> RenderResult<()> {
        let device = Arc::clone(&self.device);
        let replacement = device.create_buffer(&BufferDesc {
            label: self.label,
            size: new_size,
            kind: self.kind,
        })?;
        let fence = match device.create_fence(false) {
            Ok(fence) => fence,
            Err(e) => {
                device.destroy_buffer(replacement);
                return Err(e);
            }
        };

        let carried = self.size.min(new_size);
        let mut commands = CommandList::new();
        if carried > 0 {
            commands.copy_buffer(self.buffer, 0, replacement, 0, carried);
        }
        if let Err(e) = device.submit(&commands, SubmitInfo::fence(fence)) {
            device.destroy_buffer(replacement);
            device.destroy_fence(fence);
            return Err(e);
        }

        let old = std::mem::replace(&mut self.buffer, replacement);
        self.retired.push(RetiredBuffer { buffer: old, fence });
        tracing::info!(
            label = self.label,
            old_size = self.size,
            new_size,
            carried,
            generation = self.generation + 1,
            "device buffer replaced"
        );
        self.size = new_size;
        self.generation += 1;
        Ok(())
    }

    /// Queues a host write into the current buffer.
    ///
    /// # Errors
    ///
    /// Propagates device errors, including out-of-range writes.
    pub fn write(&self, offset: u64, data: &[u8]) -> RenderResult<()> {
        self.device.write_buffer(self.buffer, offset, data)
    }

    /// Releases retired buffers whose copy has completed. Returns how many
    /// were released.
    pub fn collect_retired(&mut self) -> usize {
        let device = Arc::clone(&self.device);
        let before = self.retired.len();
        self.retired.retain(|retired| {
            match device.fence_signaled(retired.fence) {
                Ok(false) => return true,
                Ok(true) => {}
                Err(e) => {
                    tracing::warn!(buffer = %retired.buffer, "retire fence lost, releasing: {e}");
                }
            }
            device.destroy_buffer(retired.buffer);
            device.destroy_fence(retired.fence);
            false
        });
        before - self.retired.len()
    }

    /// Hands the current and every retired buffer over for deferred
    /// release.
    pub fn park(self) -> ParkedResources {
        let mut parked = ParkedResources::new();
        parked.buffers.push(self.buffer);
        for retired in self.retired {
            parked.buffers.push(retired.buffer);
            parked.fences.push(retired.fence);
        }
        parked
    }
}
