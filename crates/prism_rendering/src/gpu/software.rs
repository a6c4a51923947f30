//! # Software Device
//!
//! A CPU implementation of [`GpuBackend`] with a real asynchronous timeline.
//!
//! - Every write, submission, present and destruction is queued in order
//! - In [`SubmissionMode::Immediate`] a worker thread drains the queue,
//!   woken over a channel doorbell
//! - In [`SubmissionMode::Manual`] nothing completes until the owner calls
//!   [`SoftwareDevice::complete_next`] or [`SoftwareDevice::complete_all`],
//!   which makes fence timing fully deterministic in tests
//!
//! Draws rasterize each instance as a square point sprite at its x/y
//! position (normalized device coordinates, y up), sized by its scale in
//! pixels. That is enough for the headless stream to show real output.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};

use super::{
    BufferDesc, BufferId, BufferKind, Command, CommandList, FenceId, FenceStatus, GpuBackend,
    SemaphoreId, SubmitInfo, SurfaceImage, TargetId,
};
use crate::error::{RenderError, RenderResult};
use crate::instancing::InstanceRecord;

/// Smallest swapchain the simulated surface creates.
const MIN_SURFACE_IMAGES: usize = 2;

/// When queued work completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmissionMode {
    /// A worker thread executes work as soon as it is queued.
    Immediate,
    /// Work executes only when the owner steps the queue.
    Manual,
}

/// Counters over everything the device has executed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceStats {
    /// Command lists submitted.
    pub submissions: u64,
    /// Command lists executed.
    pub completed_submissions: u64,
    /// Host→device writes executed.
    pub writes: u64,
    /// Bytes written from the host.
    pub bytes_written: u64,
    /// Device-side buffer copies executed.
    pub copies: u64,
    /// Bytes moved by device-side copies.
    pub bytes_copied: u64,
    /// Render passes executed.
    pub passes: u64,
    /// Instanced draws executed.
    pub draws: u64,
    /// Instances drawn.
    pub instances_drawn: u64,
    /// Pipeline binds executed.
    pub pipeline_binds: u64,
    /// Mesh binds executed.
    pub mesh_binds: u64,
    /// Swapchain presents executed.
    pub presents: u64,
    /// Draw instances skipped because their slot or id was out of range.
    pub rejected_instances: u64,
}

struct SoftBuffer {
    label: &'static str,
    kind: BufferKind,
    data: Vec<u8>,
    doomed: bool,
}

struct SoftTarget {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    doomed: bool,
}

struct Swapchain {
    images: Vec<TargetId>,
    next: usize,
    last_presented: Option<u32>,
}

enum PendingOp {
    Write {
        buffer: BufferId,
        offset: u64,
        data: Vec<u8>,
    },
    Submit {
        commands: Vec<Command>,
        info: SubmitInfo,
    },
    Present {
        image: u32,
        wait: Option<SemaphoreId>,
    },
    DestroyBuffer(BufferId),
    DestroyTarget(TargetId),
}

#[derive(Default)]
struct DeviceState {
    next_id: u64,
    buffers: HashMap<BufferId, SoftBuffer>,
    targets: HashMap<TargetId, SoftTarget>,
    fences: HashMap<FenceId, bool>,
    semaphores: HashMap<SemaphoreId, u64>,
    pending: VecDeque<PendingOp>,
    swapchain: Option<Swapchain>,
    stats: DeviceStats,
}

struct Shared {
    state: Mutex<DeviceState>,
    completed: Condvar,
}

/// CPU-backed device with an asynchronous, in-order queue.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use prism_rendering::gpu::{FenceStatus, GpuBackend, SoftwareDevice, SubmissionMode, SubmitInfo, CommandList};
///
/// let device = SoftwareDevice::new(SubmissionMode::Manual);
/// let fence = device.create_fence(false).unwrap();
/// device.submit(&CommandList::new(), SubmitInfo::fence(fence)).unwrap();
///
/// assert_eq!(device.wait_fence(fence, Duration::from_millis(1)).unwrap(), FenceStatus::TimedOut);
/// device.complete_all();
/// assert_eq!(device.wait_fence(fence, Duration::from_millis(1)).unwrap(), FenceStatus::Signaled);
/// ```
pub struct SoftwareDevice {
    shared: Arc<Shared>,
    mode: SubmissionMode,
    doorbell: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl SoftwareDevice {
    /// Creates a device. Immediate mode spawns the queue worker thread.
    #[must_use]
    pub fn new(mode: SubmissionMode) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(DeviceState::default()),
            completed: Condvar::new(),
        });

        let (doorbell, worker) = match mode {
            SubmissionMode::Manual => (None, None),
            SubmissionMode::Immediate => {
                let (tx, rx) = crossbeam_channel::unbounded();
                let worker_shared = Arc::clone(&shared);
                let handle = std::thread::Builder::new()
                    .name("prism-software-queue".into())
                    .spawn(move || run_queue_worker(&worker_shared, &rx))
                    .map_err(|e| tracing::error!("failed to spawn device queue worker: {e}"))
                    .ok();
                if handle.is_some() {
                    (Some(tx), handle)
                } else {
                    (None, None)
                }
            }
        };

        tracing::debug!(?mode, threaded = worker.is_some(), "software device created");

        Self {
            shared,
            mode,
            doorbell,
            worker,
        }
    }

    /// Submission mode.
    #[must_use]
    pub const fn mode(&self) -> SubmissionMode {
        self.mode
    }

    /// Executes queued operations up to and including the next submission.
    ///
    /// Returns `false` if no submission was pending. Operations queued after
    /// the last submission stay pending.
    pub fn complete_next(&self) -> bool {
        let mut state = self.shared.state.lock();
        let Some(position) = state
            .pending
            .iter()
            .position(|op| matches!(op, PendingOp::Submit { .. }))
        else {
            return false;
        };
        for _ in 0..=position {
            if let Some(op) = state.pending.pop_front() {
                state.execute(op);
            }
        }
        drop(state);
        self.shared.completed.notify_all();
        true
    }

    /// Executes every queued operation.
    pub fn complete_all(&self) {
        self.shared.drain();
    }

    /// Queued operations not yet executed.
    #[must_use]
    pub fn pending_operations(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    /// Queued submissions not yet executed.
    #[must_use]
    pub fn pending_submissions(&self) -> usize {
        self.shared
            .state
            .lock()
            .pending
            .iter()
            .filter(|op| matches!(op, PendingOp::Submit { .. }))
            .count()
    }

    /// Execution counters.
    #[must_use]
    pub fn stats(&self) -> DeviceStats {
        self.shared.state.lock().stats
    }

    /// Buffers alive on the device (destruction executed removes them).
    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.shared.state.lock().buffers.len()
    }

    /// Fences alive on the device.
    #[must_use]
    pub fn live_fences(&self) -> usize {
        self.shared.state.lock().fences.len()
    }

    /// Render targets alive on the device.
    #[must_use]
    pub fn live_targets(&self) -> usize {
        self.shared.state.lock().targets.len()
    }

    /// Times `semaphore` has been signaled.
    #[must_use]
    pub fn semaphore_signals(&self, semaphore: SemaphoreId) -> Option<u64> {
        self.shared.state.lock().semaphores.get(&semaphore).copied()
    }

    /// Index of the swapchain image presented last.
    #[must_use]
    pub fn last_presented(&self) -> Option<u32> {
        self.shared
            .state
            .lock()
            .swapchain
            .as_ref()
            .and_then(|swapchain| swapchain.last_presented)
    }

    /// Debug label and kind of a live buffer.
    #[must_use]
    pub fn buffer_info(&self, buffer: BufferId) -> Option<(&'static str, BufferKind)> {
        self.shared
            .state
            .lock()
            .buffers
            .get(&buffer)
            .map(|b| (b.label, b.kind))
    }

    fn enqueue(&self, op: PendingOp) -> RenderResult<()> {
        self.shared.state.lock().pending.push_back(op);
        if let Some(doorbell) = &self.doorbell {
            doorbell
                .send(())
                .map_err(|_| RenderError::Device("software queue worker is gone".into()))?;
        }
        Ok(())
    }
}

impl Drop for SoftwareDevice {
    fn drop(&mut self) {
        // Closing the doorbell ends the worker loop
        self.doorbell.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("software device queue worker panicked");
            }
        }
    }
}

fn run_queue_worker(shared: &Shared, doorbell: &Receiver<()>) {
    while doorbell.recv().is_ok() {
        shared.drain();
    }
}

impl Shared {
    fn drain(&self) {
        let mut state = self.state.lock();
        while let Some(op) = state.pending.pop_front() {
            state.execute(op);
        }
        drop(state);
        self.completed.notify_all();
    }
}

impl DeviceState {
    fn alloc_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn live_buffer(&self, buffer: BufferId) -> RenderResult<&SoftBuffer> {
        self.buffers
            .get(&buffer)
            .filter(|b| !b.doomed)
            .ok_or(RenderError::UnknownResource {
                kind: BufferId::KIND,
                id: buffer.raw(),
            })
    }

    fn live_target(&self, target: TargetId) -> RenderResult<&SoftTarget> {
        self.targets
            .get(&target)
            .filter(|t| !t.doomed)
            .ok_or(RenderError::UnknownResource {
                kind: TargetId::KIND,
                id: target.raw(),
            })
    }

    fn check_range(&self, buffer: BufferId, offset: u64, len: u64) -> RenderResult<()> {
        let size = self.live_buffer(buffer)?.data.len() as u64;
        match offset.checked_add(len) {
            Some(end) if end <= size => Ok(()),
            _ => Err(RenderError::Device(format!(
                "range {offset}+{len} overruns {buffer} ({size} bytes)"
            ))),
        }
    }

    /// Submit-time validation of every resource a command list touches.
    fn validate_submission(&self, commands: &CommandList, info: SubmitInfo) -> RenderResult<()> {
        commands.validate()?;
        for command in commands.as_slice() {
            match *command {
                Command::CopyBuffer {
                    src,
                    src_offset,
                    dst,
                    dst_offset,
                    size,
                } => {
                    self.check_range(src, src_offset, size)?;
                    self.check_range(dst, dst_offset, size)?;
                }
                Command::BeginPass { target, .. } => {
                    self.live_target(target)?;
                }
                Command::SetInstances { records, ids } => {
                    self.live_buffer(records)?;
                    self.live_buffer(ids)?;
                }
                Command::SetPipeline { .. }
                | Command::SetMesh { .. }
                | Command::DrawInstanced { .. }
                | Command::EndPass => {}
            }
        }
        if let Some(fence) = info.signal_fence {
            if !self.fences.contains_key(&fence) {
                return Err(RenderError::UnknownResource {
                    kind: FenceId::KIND,
                    id: fence.raw(),
                });
            }
        }
        if let Some(semaphore) = info.signal_semaphore {
            if !self.semaphores.contains_key(&semaphore) {
                return Err(RenderError::UnknownResource {
                    kind: SemaphoreId::KIND,
                    id: semaphore.raw(),
                });
            }
        }
        Ok(())
    }

    fn execute(&mut self, op: PendingOp) {
        match op {
            PendingOp::Write {
                buffer,
                offset,
                data,
            } => {
                if let Some(target) = self.buffers.get_mut(&buffer) {
                    let start = offset as usize;
                    if let Some(dst) = target.data.get_mut(start..start + data.len()) {
                        dst.copy_from_slice(&data);
                        self.stats.writes += 1;
                        self.stats.bytes_written += data.len() as u64;
                    }
                }
            }
            PendingOp::Submit { commands, info } => self.execute_submission(&commands, info),
            PendingOp::Present { image, wait } => {
                if let Some(semaphore) = wait {
                    if self.semaphores.get(&semaphore).copied().unwrap_or(0) == 0 {
                        tracing::warn!(%semaphore, "present waits on a semaphore that never signaled");
                    }
                }
                if let Some(swapchain) = self.swapchain.as_mut() {
                    swapchain.last_presented = Some(image);
                }
                self.stats.presents += 1;
            }
            PendingOp::DestroyBuffer(buffer) => {
                self.buffers.remove(&buffer);
            }
            PendingOp::DestroyTarget(target) => {
                self.targets.remove(&target);
            }
        }
    }

    fn execute_submission(&mut self, commands: &[Command], info: SubmitInfo) {
        let mut pass_target: Option<TargetId> = None;
        let mut instances: Option<(BufferId, BufferId)> = None;

        for command in commands {
            match *command {
                Command::CopyBuffer {
                    src,
                    src_offset,
                    dst,
                    dst_offset,
                    size,
                } => self.copy_buffer(src, src_offset, dst, dst_offset, size),
                Command::BeginPass { target, clear } => {
                    if let Some(t) = self.targets.get_mut(&target) {
                        let rgba = color_to_rgba8(clear);
                        for pixel in t.pixels.chunks_exact_mut(4) {
                            pixel.copy_from_slice(&rgba);
                        }
                    }
                    pass_target = Some(target);
                }
                Command::SetPipeline { .. } => self.stats.pipeline_binds += 1,
                Command::SetMesh { .. } => self.stats.mesh_binds += 1,
                Command::SetInstances { records, ids } => instances = Some((records, ids)),
                Command::DrawInstanced { first, count } => {
                    self.stats.draws += 1;
                    self.stats.instances_drawn += u64::from(count);
                    if let (Some(target), Some((records, ids))) = (pass_target, instances) {
                        self.rasterize(target, records, ids, first, count);
                    }
                }
                Command::EndPass => {
                    pass_target = None;
                    self.stats.passes += 1;
                }
            }
        }

        if let Some(fence) = info.signal_fence {
            if let Some(signaled) = self.fences.get_mut(&fence) {
                *signaled = true;
            }
        }
        if let Some(semaphore) = info.signal_semaphore {
            if let Some(count) = self.semaphores.get_mut(&semaphore) {
                *count += 1;
            }
        }
        self.stats.completed_submissions += 1;
    }

    fn copy_buffer(&mut self, src: BufferId, src_offset: u64, dst: BufferId, dst_offset: u64, size: u64) {
        let (src_start, dst_start, len) = (src_offset as usize, dst_offset as usize, size as usize);
        let Some(chunk) = self
            .buffers
            .get(&src)
            .and_then(|b| b.data.get(src_start..src_start + len))
            .map(<[u8]>::to_vec)
        else {
            tracing::error!(%src, "copy source missing or too small at execution");
            return;
        };
        let Some(out) = self
            .buffers
            .get_mut(&dst)
            .and_then(|b| b.data.get_mut(dst_start..dst_start + len))
        else {
            tracing::error!(%dst, "copy destination missing or too small at execution");
            return;
        };
        out.copy_from_slice(&chunk);
        self.stats.copies += 1;
        self.stats.bytes_copied += size;
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss,
        clippy::cast_possible_wrap
    )]
    fn rasterize(&mut self, target: TargetId, records: BufferId, ids: BufferId, first: u32, count: u32) {
        let mut sprites = Vec::with_capacity(count as usize);
        {
            let (Some(records), Some(ids)) = (self.buffers.get(&records), self.buffers.get(&ids))
            else {
                return;
            };
            for entry in first..first.saturating_add(count) {
                let at = entry as usize * 4;
                let Some(id_bytes) = ids.data.get(at..at + 4) else {
                    self.stats.rejected_instances += 1;
                    continue;
                };
                let slot = bytemuck::pod_read_unaligned::<u32>(id_bytes) as usize;
                let at = slot * InstanceRecord::SIZE;
                let Some(record_bytes) = records.data.get(at..at + InstanceRecord::SIZE) else {
                    self.stats.rejected_instances += 1;
                    continue;
                };
                sprites.push(bytemuck::pod_read_unaligned::<InstanceRecord>(record_bytes));
            }
        }

        let Some(target) = self.targets.get_mut(&target) else {
            return;
        };
        let (width, height) = (target.width as i64, target.height as i64);
        for sprite in sprites {
            let [x, y, _] = sprite.position();
            let cx = ((x + 1.0) * 0.5 * width as f32) as i64;
            let cy = ((1.0 - y) * 0.5 * height as f32) as i64;
            let half = (sprite.scale().max(1.0) * 0.5) as i64;
            let rgba = color_to_rgba8(sprite.color);

            for py in (cy - half).max(0)..=(cy + half).min(height - 1) {
                for px in (cx - half).max(0)..=(cx + half).min(width - 1) {
                    let at = ((py * width + px) * 4) as usize;
                    target.pixels[at..at + 4].copy_from_slice(&rgba);
                }
            }
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn color_to_rgba8(color: [f32; 4]) -> [u8; 4] {
    color.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)
}

impl GpuBackend for SoftwareDevice {
    fn name(&self) -> &'static str {
        "software"
    }

    fn create_buffer(&self, desc: &BufferDesc) -> RenderResult<BufferId> {
        let len = usize::try_from(desc.size)
            .map_err(|_| RenderError::Device(format!("buffer size {} too large", desc.size)))?;
        let mut state = self.shared.state.lock();
        let id = BufferId::from_raw(state.alloc_id());
        state.buffers.insert(
            id,
            SoftBuffer {
                label: desc.label,
                kind: desc.kind,
                data: vec![0; len],
                doomed: false,
            },
        );
        Ok(id)
    }

    fn destroy_buffer(&self, buffer: BufferId) {
        if let Some(b) = self.shared.state.lock().buffers.get_mut(&buffer) {
            b.doomed = true;
        }
        if let Err(e) = self.enqueue(PendingOp::DestroyBuffer(buffer)) {
            tracing::warn!(%buffer, "destroy not queued: {e}");
        }
    }

    fn buffer_size(&self, buffer: BufferId) -> RenderResult<u64> {
        Ok(self.shared.state.lock().live_buffer(buffer)?.data.len() as u64)
    }

    fn write_buffer(&self, buffer: BufferId, offset: u64, data: &[u8]) -> RenderResult<()> {
        self.shared
            .state
            .lock()
            .check_range(buffer, offset, data.len() as u64)?;
        self.enqueue(PendingOp::Write {
            buffer,
            offset,
            data: data.to_vec(),
        })
    }

    fn read_buffer(&self, buffer: BufferId, offset: u64, len: u64) -> RenderResult<Vec<u8>> {
        let state = self.shared.state.lock();
        state.check_range(buffer, offset, len)?;
        let start = offset as usize;
        Ok(state.live_buffer(buffer)?.data[start..start + len as usize].to_vec())
    }

    fn create_fence(&self, signaled: bool) -> RenderResult<FenceId> {
        let mut state = self.shared.state.lock();
        let id = FenceId::from_raw(state.alloc_id());
        state.fences.insert(id, signaled);
        Ok(id)
    }

    fn destroy_fence(&self, fence: FenceId) {
        self.shared.state.lock().fences.remove(&fence);
    }

    fn fence_signaled(&self, fence: FenceId) -> RenderResult<bool> {
        self.shared
            .state
            .lock()
            .fences
            .get(&fence)
            .copied()
            .ok_or(RenderError::UnknownResource {
                kind: FenceId::KIND,
                id: fence.raw(),
            })
    }

    fn wait_fence(&self, fence: FenceId, timeout: Duration) -> RenderResult<FenceStatus> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            match state.fences.get(&fence) {
                Some(true) => return Ok(FenceStatus::Signaled),
                Some(false) => {}
                None => {
                    return Err(RenderError::UnknownResource {
                        kind: FenceId::KIND,
                        id: fence.raw(),
                    })
                }
            }
            if self
                .shared
                .completed
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                let signaled = state.fences.get(&fence).copied().unwrap_or(false);
                return Ok(if signaled {
                    FenceStatus::Signaled
                } else {
                    FenceStatus::TimedOut
                });
            }
        }
    }

    fn create_semaphore(&self) -> RenderResult<SemaphoreId> {
        let mut state = self.shared.state.lock();
        let id = SemaphoreId::from_raw(state.alloc_id());
        state.semaphores.insert(id, 0);
        Ok(id)
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreId) {
        self.shared.state.lock().semaphores.remove(&semaphore);
    }

    fn create_render_target(&self, width: u32, height: u32) -> RenderResult<TargetId> {
        if width == 0 || height == 0 {
            return Err(RenderError::Device(format!(
                "render target {width}x{height} is empty"
            )));
        }
        let mut state = self.shared.state.lock();
        let id = TargetId::from_raw(state.alloc_id());
        state.targets.insert(
            id,
            SoftTarget {
                width,
                height,
                pixels: vec![0; width as usize * height as usize * 4],
                doomed: false,
            },
        );
        Ok(id)
    }

    fn destroy_render_target(&self, target: TargetId) {
        if let Some(t) = self.shared.state.lock().targets.get_mut(&target) {
            t.doomed = true;
        }
        if let Err(e) = self.enqueue(PendingOp::DestroyTarget(target)) {
            tracing::warn!(%target, "destroy not queued: {e}");
        }
    }

    fn read_render_target(&self, target: TargetId) -> RenderResult<Vec<u8>> {
        Ok(self.shared.state.lock().live_target(target)?.pixels.clone())
    }

    fn submit(&self, commands: &CommandList, info: SubmitInfo) -> RenderResult<()> {
        {
            let mut state = self.shared.state.lock();
            state.validate_submission(commands, info)?;
            if let Some(signaled) = info.signal_fence.and_then(|f| state.fences.get_mut(&f)) {
                *signaled = false;
            }
            state.stats.submissions += 1;
        }
        self.enqueue(PendingOp::Submit {
            commands: commands.as_slice().to_vec(),
            info,
        })
    }

    fn configure_surface(
        &self,
        width: u32,
        height: u32,
        image_count: usize,
    ) -> RenderResult<usize> {
        let count = image_count.max(MIN_SURFACE_IMAGES);
        let images = (0..count)
            .map(|_| self.create_render_target(width, height))
            .collect::<RenderResult<Vec<_>>>()?;

        let old = self.shared.state.lock().swapchain.replace(Swapchain {
            images,
            next: 0,
            last_presented: None,
        });
        if let Some(old) = old {
            for image in old.images {
                self.destroy_render_target(image);
            }
        }

        tracing::debug!(width, height, count, "software surface configured");
        Ok(count)
    }

    fn acquire_surface_image(&self) -> RenderResult<SurfaceImage> {
        let mut state = self.shared.state.lock();
        let swapchain = state
            .swapchain
            .as_mut()
            .ok_or(RenderError::Device("surface not configured".into()))?;
        let index = swapchain.next;
        swapchain.next = (index + 1) % swapchain.images.len();
        Ok(SurfaceImage {
            index: u32::try_from(index)
                .map_err(|_| RenderError::Device("swapchain index overflow".into()))?,
            target: swapchain.images[index],
        })
    }

    fn present(&self, image: u32, wait: Option<SemaphoreId>) -> RenderResult<()> {
        {
            let state = self.shared.state.lock();
            let count = state.swapchain.as_ref().map_or(0, |s| s.images.len());
            if image as usize >= count {
                return Err(RenderError::Device(format!(
                    "present of image {image} with {count} swapchain images"
                )));
            }
        }
        self.enqueue(PendingOp::Present { image, wait })
    }

    fn wait_idle(&self, timeout: Duration) -> RenderResult<FenceStatus> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while !state.pending.is_empty() {
            if self
                .shared
                .completed
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return Ok(if state.pending.is_empty() {
                    FenceStatus::Signaled
                } else {
                    FenceStatus::TimedOut
                });
            }
        }
        Ok(FenceStatus::Signaled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::{MeshId, ShaderId};

    const SHORT: Duration = Duration::from_millis(2);

    fn desc(size: u64) -> BufferDesc {
        BufferDesc {
            label: "test",
            size,
            kind: BufferKind::InstanceRecords,
        }
    }

    #[test]
    fn test_manual_fence_signals_only_when_stepped() {
        let device = SoftwareDevice::new(SubmissionMode::Manual);
        let fence = device.create_fence(false).unwrap();

        device
            .submit(&CommandList::new(), SubmitInfo::fence(fence))
            .unwrap();
        assert_eq!(device.wait_fence(fence, SHORT).unwrap(), FenceStatus::TimedOut);
        assert_eq!(device.pending_submissions(), 1);

        assert!(device.complete_next());
        assert_eq!(device.wait_fence(fence, SHORT).unwrap(), FenceStatus::Signaled);
        assert!(!device.complete_next());
    }

    #[test]
    fn test_accepted_submit_resets_signal_fence() {
        let device = SoftwareDevice::new(SubmissionMode::Manual);
        let fence = device.create_fence(true).unwrap();

        let mut bad = CommandList::new();
        bad.end_pass();
        assert!(device.submit(&bad, SubmitInfo::fence(fence)).is_err());
        assert!(device.fence_signaled(fence).unwrap());

        device
            .submit(&CommandList::new(), SubmitInfo::fence(fence))
            .unwrap();
        assert!(!device.fence_signaled(fence).unwrap());
        device.complete_all();
        assert!(device.fence_signaled(fence).unwrap());
    }

    #[test]
    fn test_writes_are_queued_in_order() {
        let device = SoftwareDevice::new(SubmissionMode::Manual);
        let buffer = device.create_buffer(&desc(8)).unwrap();

        device.write_buffer(buffer, 0, &[1, 2, 3, 4]).unwrap();
        assert_eq!(device.read_buffer(buffer, 0, 4).unwrap(), vec![0, 0, 0, 0]);

        device.complete_all();
        assert_eq!(device.read_buffer(buffer, 0, 4).unwrap(), vec![1, 2, 3, 4]);
        assert!(device.write_buffer(buffer, 6, &[0; 4]).is_err());
    }

    #[test]
    fn test_copy_executes_after_prior_write() {
        let device = SoftwareDevice::new(SubmissionMode::Manual);
        let src = device.create_buffer(&desc(4)).unwrap();
        let dst = device.create_buffer(&desc(4)).unwrap();

        device.write_buffer(src, 0, &[9, 8, 7, 6]).unwrap();
        let mut commands = CommandList::new();
        commands.copy_buffer(src, 0, dst, 0, 4);
        device.submit(&commands, SubmitInfo::default()).unwrap();

        device.complete_all();
        assert_eq!(device.read_buffer(dst, 0, 4).unwrap(), vec![9, 8, 7, 6]);
        assert_eq!(device.stats().bytes_copied, 4);
    }

    #[test]
    fn test_destroy_deferred_behind_pending_work() {
        let device = SoftwareDevice::new(SubmissionMode::Manual);
        let buffer = device.create_buffer(&desc(4)).unwrap();
        device.destroy_buffer(buffer);

        // Doomed buffers reject new work but still exist on the device
        assert!(device.buffer_size(buffer).is_err());
        assert_eq!(device.live_buffers(), 1);

        device.complete_all();
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn test_submit_rejects_unknown_resources() {
        let device = SoftwareDevice::new(SubmissionMode::Manual);
        let mut commands = CommandList::new();
        commands.copy_buffer(BufferId::from_raw(77), 0, BufferId::from_raw(78), 0, 4);
        assert!(matches!(
            device.submit(&commands, SubmitInfo::default()),
            Err(RenderError::UnknownResource { kind: "buffer", .. })
        ));
    }

    #[test]
    fn test_draw_rasterizes_point_sprites() {
        let device = SoftwareDevice::new(SubmissionMode::Manual);
        let target = device.create_render_target(4, 4).unwrap();
        let records = device.create_buffer(&desc(64)).unwrap();
        let ids = device
            .create_buffer(&BufferDesc {
                label: "ids",
                size: 4,
                kind: BufferKind::InstanceIds,
            })
            .unwrap();

        let record = InstanceRecord {
            position_scale: [0.0, 0.0, 0.0, 1.0],
            color: [1.0, 0.0, 0.0, 1.0],
            ..InstanceRecord::default()
        };
        device.write_buffer(records, 0, bytemuck::bytes_of(&record)).unwrap();
        device.write_buffer(ids, 0, bytemuck::bytes_of(&0_u32)).unwrap();

        let mut commands = CommandList::new();
        commands.begin_pass(target, [0.0, 0.0, 1.0, 1.0]);
        commands.set_instances(records, ids);
        commands.set_pipeline(ShaderId(0));
        commands.set_mesh(MeshId(0));
        commands.draw_instanced(0, 1);
        commands.end_pass();
        device.submit(&commands, SubmitInfo::default()).unwrap();
        device.complete_all();

        let pixels = device.read_render_target(target).unwrap();
        // Center pixel (2, 2) is red, corner stays the clear color
        let center = (2 * 4 + 2) * 4;
        assert_eq!(&pixels[center..center + 4], &[255, 0, 0, 255]);
        assert_eq!(&pixels[0..4], &[0, 0, 255, 255]);

        let stats = device.stats();
        assert_eq!(stats.draws, 1);
        assert_eq!(stats.instances_drawn, 1);
        assert_eq!(stats.pipeline_binds, 1);
    }

    #[test]
    fn test_immediate_mode_completes_on_worker() {
        let device = SoftwareDevice::new(SubmissionMode::Immediate);
        let fence = device.create_fence(false).unwrap();
        device
            .submit(&CommandList::new(), SubmitInfo::fence(fence))
            .unwrap();

        assert_eq!(
            device.wait_fence(fence, Duration::from_secs(5)).unwrap(),
            FenceStatus::Signaled
        );
        assert_eq!(
            device.wait_idle(Duration::from_secs(5)).unwrap(),
            FenceStatus::Signaled
        );
    }

    #[test]
    fn test_swapchain_round_robin() {
        let device = SoftwareDevice::new(SubmissionMode::Manual);
        assert_eq!(device.configure_surface(8, 8, 1).unwrap(), 2);

        let a = device.acquire_surface_image().unwrap();
        let b = device.acquire_surface_image().unwrap();
        let c = device.acquire_surface_image().unwrap();
        assert_eq!((a.index, b.index, c.index), (0, 1, 0));
        assert_eq!(a.target, c.target);

        device.present(b.index, None).unwrap();
        assert!(device.present(5, None).is_err());
        device.complete_all();
        assert_eq!(device.last_presented(), Some(1));
    }
}
