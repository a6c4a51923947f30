//! Element-typed device array with a host mirror.

use std::ops::Range;
use std::sync::Arc;

use bytemuck::Pod;

use super::growable::{GrowableDeviceBuffer, ParkedResources};
use crate::error::{RenderError, RenderResult, SlotAccessPolicy};
use crate::gpu::{BufferId, BufferKind, GpuBackend};

/// A device array of `T` whose length is always a power of two.
///
/// Writes go into a host-side mirror through an [`ArrayWriter`] and reach
/// the device on [`flush`](Self::flush), which uploads only the dirty range.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use prism_rendering::buffer::TypedDeviceArray;
/// use prism_rendering::gpu::{BufferKind, GpuBackend, SoftwareDevice, SubmissionMode};
///
/// let device: Arc<dyn GpuBackend> = Arc::new(SoftwareDevice::new(SubmissionMode::Immediate));
/// let mut ids = TypedDeviceArray::<u32>::new(device, "ids", BufferKind::InstanceIds, 3).unwrap();
/// assert_eq!(ids.len(), 4);
///
/// ids.writer().write(2, 7).unwrap();
/// assert_eq!(ids.flush().unwrap(), 1);
/// ```
pub struct TypedDeviceArray<T: Pod> {
    buffer: GrowableDeviceBuffer,
    staging: Vec<T>,
    dirty: Option<Range<usize>>,
    policy: SlotAccessPolicy,
}

/// Rounds an element count up to the array's power-of-two length.
fn array_len(count: usize) -> usize {
    count.max(1).next_power_of_two()
}

fn byte_len<T>(count: usize) -> u64 {
    (count * std::mem::size_of::<T>()) as u64
}

impl<T: Pod> TypedDeviceArray<T> {
    /// Creates a zeroed array holding at least `count` elements.
    ///
    /// # Errors
    ///
    /// Propagates device allocation failures.
    pub fn new(
        device: Arc<dyn GpuBackend>,
        label: &'static str,
        kind: BufferKind,
        count: usize,
    ) -> RenderResult<Self> {
        let len = array_len(count);
        let buffer = GrowableDeviceBuffer::new(device, label, kind, byte_len::<T>(len))?;
        Ok(Self {
            buffer,
            staging: vec![T::zeroed(); len],
            dirty: None,
            policy: SlotAccessPolicy::default(),
        })
    }

    /// Element capacity.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.staging.len()
    }

    /// Always false; the array holds at least one element.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.staging.is_empty()
    }

    /// Device buffer currently backing the array.
    #[inline]
    #[must_use]
    pub const fn buffer_id(&self) -> BufferId {
        self.buffer.buffer()
    }

    /// Bumped every time the backing buffer is replaced.
    #[inline]
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.buffer.generation()
    }

    /// Size of the backing buffer in bytes.
    #[inline]
    #[must_use]
    pub const fn byte_size(&self) -> u64 {
        self.buffer.size()
    }

    /// Host mirror, including writes not yet flushed.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.staging
    }

    /// How writers treat an index past the end.
    #[inline]
    #[must_use]
    pub const fn slot_policy(&self) -> SlotAccessPolicy {
        self.policy
    }

    /// Overrides the build's out-of-range policy.
    pub fn set_slot_policy(&mut self, policy: SlotAccessPolicy) {
        self.policy = policy;
    }

    /// Dirty element range awaiting [`flush`](Self::flush).
    #[must_use]
    pub fn dirty_range(&self) -> Option<Range<usize>> {
        self.dirty.clone()
    }

    /// Resizes to hold at least `count` elements, rounded up to a power of
    /// two. Returns `true` if the backing buffer was replaced.
    ///
    /// Existing elements below the new length survive on both sides: the
    /// device copies them forward and the mirror keeps them.
    ///
    /// # Errors
    ///
    /// Propagates device failures; the array is unchanged on error.
    pub fn resize(&mut self, count: usize) -> RenderResult<bool> {
        let len = array_len(count);
        if len == self.staging.len() {
            return Ok(false);
        }
        self.buffer.resize(byte_len::<T>(len))?;
        self.staging.resize(len, T::zeroed());
        self.dirty = self
            .dirty
            .take()
            .map(|range| range.start.min(len)..range.end.min(len))
            .filter(|range| !range.is_empty());
        Ok(true)
    }

    /// Bounded writer into the host mirror.
    pub fn writer(&mut self) -> ArrayWriter<'_, T> {
        ArrayWriter {
            staging: &mut self.staging,
            dirty: &mut self.dirty,
            policy: self.policy,
        }
    }

    /// Uploads the dirty range. Returns the number of elements uploaded.
    ///
    /// # Errors
    ///
    /// Propagates device write failures; the range stays dirty on error.
    pub fn flush(&mut self) -> RenderResult<usize> {
        let Some(range) = self.dirty.clone() else {
            return Ok(0);
        };
        let offset = byte_len::<T>(range.start);
        self.buffer
            .write(offset, bytemuck::cast_slice(&self.staging[range.clone()]))?;
        self.dirty = None;
        Ok(range.len())
    }

    /// Releases replaced buffers whose copy has completed.
    pub fn collect_retired(&mut self) -> usize {
        self.buffer.collect_retired()
    }

    /// Hands every device buffer over for deferred release.
    pub fn park(self) -> ParkedResources {
        self.buffer.park()
    }
}

/// Element-bounded access to a [`TypedDeviceArray`]'s host mirror.
///
/// An index past the end is [`RenderError::InvalidSlotAccess`] under
/// [`SlotAccessPolicy::Strict`]. Under `Clamp` it is logged and the write
/// ignored (reads yield a zeroed element).
pub struct ArrayWriter<'a, T: Pod> {
    staging: &'a mut Vec<T>,
    dirty: &'a mut Option<Range<usize>>,
    policy: SlotAccessPolicy,
}

impl<T: Pod> ArrayWriter<'_, T> {
    /// Element capacity.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.staging.len()
    }

    /// Always false; the array holds at least one element.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.staging.is_empty()
    }

    /// Writes one element.
    ///
    /// # Errors
    ///
    /// [`RenderError::InvalidSlotAccess`] for an index past the end (strict
    /// policy only).
    #[inline]
    pub fn write(&mut self, index: usize, value: T) -> RenderResult<()> {
        let Some(element) = self.staging.get_mut(index) else {
            let len = self.staging.len();
            return out_of_bounds(self.policy, index, len, "write past end of array");
        };
        *element = value;
        self.mark(index..index + 1);
        Ok(())
    }

    /// Writes a run of elements starting at `start`.
    ///
    /// # Errors
    ///
    /// [`RenderError::InvalidSlotAccess`] if the run does not fit (strict
    /// policy only). Nothing is written in that case.
    pub fn write_slice(&mut self, start: usize, values: &[T]) -> RenderResult<()> {
        let end = start.saturating_add(values.len());
        let Some(run) = self.staging.get_mut(start..end) else {
            return out_of_bounds(
                self.policy,
                end.saturating_sub(1),
                self.staging.len(),
                "slice past end of array",
            );
        };
        run.copy_from_slice(values);
        if !values.is_empty() {
            self.mark(start..end);
        }
        Ok(())
    }

    /// Reads one element from the mirror.
    ///
    /// # Errors
    ///
    /// [`RenderError::InvalidSlotAccess`] for an index past the end (strict
    /// policy only).
    #[inline]
    pub fn read(&self, index: usize) -> RenderResult<T> {
        match self.staging.get(index) {
            Some(value) => Ok(*value),
            None => {
                let len = self.staging.len();
                out_of_bounds(self.policy, index, len, "read past end of array")
                    .map(|()| T::zeroed())
            }
        }
    }

    fn mark(&mut self, range: Range<usize>) {
        *self.dirty = Some(match self.dirty.take() {
            Some(dirty) => dirty.start.min(range.start)..dirty.end.max(range.end),
            None => range,
        });
    }
}

fn out_of_bounds(
    policy: SlotAccessPolicy,
    index: usize,
    len: usize,
    reason: &'static str,
) -> RenderResult<()> {
    policy.check(RenderError::InvalidSlotAccess {
        slot: u32::try_from(index).unwrap_or(u32::MAX),
        capacity: u32::try_from(len).unwrap_or(u32::MAX),
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{SoftwareDevice, SubmissionMode};
    use crate::instancing::InstanceRecord;

    fn manual() -> (Arc<SoftwareDevice>, Arc<dyn GpuBackend>) {
        let device = Arc::new(SoftwareDevice::new(SubmissionMode::Manual));
        let backend: Arc<dyn GpuBackend> = device.clone();
        (device, backend)
    }

    #[test]
    fn test_length_rounds_to_power_of_two() {
        let (_device, backend) = manual();
        let mut array =
            TypedDeviceArray::<u32>::new(backend, "ids", BufferKind::InstanceIds, 5).unwrap();
        assert_eq!(array.len(), 8);
        assert_eq!(array.byte_size(), 32);

        assert!(array.resize(9).unwrap());
        assert_eq!(array.len(), 16);
        assert!(!array.resize(16).unwrap());
        assert_eq!(array.generation(), 1);
    }

    #[test]
    fn test_flush_uploads_dirty_range_only() {
        let (device, backend) = manual();
        let mut array =
            TypedDeviceArray::<u32>::new(backend, "ids", BufferKind::InstanceIds, 8).unwrap();
        {
            let mut writer = array.writer();
            writer.write(2, 20).unwrap();
            writer.write(5, 50).unwrap();
        }
        assert_eq!(array.dirty_range(), Some(2..6));
        assert_eq!(array.flush().unwrap(), 4);
        assert_eq!(array.dirty_range(), None);
        assert_eq!(array.flush().unwrap(), 0);

        device.complete_all();
        let bytes = device.read_buffer(array.buffer_id(), 0, 32).unwrap();
        let values: Vec<u32> = bytes
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned)
            .collect();
        assert_eq!(values, vec![0, 0, 20, 0, 0, 50, 0, 0]);
        assert_eq!(device.stats().bytes_written, 16);
    }

    #[test]
    fn test_growth_preserves_flushed_and_pending_data() {
        let (device, backend) = manual();
        let mut array = TypedDeviceArray::<InstanceRecord>::new(
            backend,
            "records",
            BufferKind::InstanceRecords,
            2,
        )
        .unwrap();

        let flushed = InstanceRecord {
            color: [1.0, 0.0, 0.0, 1.0],
            ..InstanceRecord::default()
        };
        let pending = InstanceRecord {
            color: [0.0, 1.0, 0.0, 1.0],
            ..InstanceRecord::default()
        };
        array.writer().write(0, flushed).unwrap();
        array.flush().unwrap();
        array.writer().write(1, pending).unwrap();

        array.resize(3).unwrap();
        array.flush().unwrap();
        device.complete_all();

        let bytes = device
            .read_buffer(array.buffer_id(), 0, array.byte_size())
            .unwrap();
        let records: Vec<InstanceRecord> = bytes
            .chunks_exact(InstanceRecord::SIZE)
            .map(bytemuck::pod_read_unaligned)
            .collect();
        assert_eq!(records.len(), 4);
        assert_eq!(records[0], flushed);
        assert_eq!(records[1], pending);
        assert_eq!(array.as_slice()[1], pending);
    }

    #[test]
    fn test_out_of_range_access_is_reported() {
        let (_device, backend) = manual();
        let mut array =
            TypedDeviceArray::<u32>::new(backend, "ids", BufferKind::InstanceIds, 4).unwrap();
        array.set_slot_policy(SlotAccessPolicy::Strict);
        let mut writer = array.writer();

        assert!(matches!(
            writer.write(4, 1),
            Err(RenderError::InvalidSlotAccess { slot: 4, capacity: 4, .. })
        ));
        assert!(writer.read(9).is_err());
        assert!(writer.write_slice(3, &[1, 2]).is_err());
        assert_eq!(writer.read(3).unwrap(), 0);
        assert!(array.dirty_range().is_none());
    }

    #[test]
    fn test_out_of_range_access_is_clamped() {
        let (_device, backend) = manual();
        let mut array =
            TypedDeviceArray::<u32>::new(backend, "ids", BufferKind::InstanceIds, 4).unwrap();
        array.set_slot_policy(SlotAccessPolicy::Clamp);
        {
            let mut writer = array.writer();
            writer.write(1, 11).unwrap();
            writer.write(4, 1).unwrap();
            writer.write_slice(3, &[1, 2]).unwrap();
            assert_eq!(writer.read(9).unwrap(), 0);
        }

        // Only the in-range write landed
        assert_eq!(array.as_slice(), &[0, 11, 0, 0]);
        assert_eq!(array.dirty_range(), Some(1..2));
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn test_release_build_clamps_by_default() {
        let (_device, backend) = manual();
        let mut array =
            TypedDeviceArray::<u32>::new(backend, "ids", BufferKind::InstanceIds, 4).unwrap();
        assert_eq!(array.slot_policy(), SlotAccessPolicy::Clamp);
        array.writer().write(8, 1).unwrap();
        assert!(array.dirty_range().is_none());
    }
}
