//! The frames-in-flight ring.

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::context::FrameContext;
use super::present::{PresentImage, PresentTarget};
use super::stats::PipelineStats;
use crate::batching::{BatcherId, RenderBatcher};
use crate::config::RendererConfig;
use crate::error::{RenderError, RenderResult};
use crate::gpu::{FenceStatus, GpuBackend, SubmitInfo, TargetId};

/// Where the pipeline is within a frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrameState {
    /// No frame acquired.
    #[default]
    Idle,
    /// Waiting for the ring slot's fence.
    Acquiring,
    /// Ring slot released; batchers may update their arrays.
    Syncing,
    /// Commands being recorded.
    Recording,
    /// Last frame handed to the device.
    Submitted,
}

/// A frame between acquire and submit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AcquiredFrame {
    /// Frame number.
    pub frame: u64,
    /// Ring slot the frame owns.
    pub ring_slot: usize,
    /// Image the frame renders into.
    pub image: PresentImage,
}

/// Commands recorded for one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecordedFrame {
    /// Instanced draws.
    pub draws: u32,
    /// Instances across all draws.
    pub instances: u32,
}

/// N frame contexts used round robin.
///
/// Frame `f` uses ring slot `f mod N` and may only start once the fence of
/// frame `f - N` signaled. The wait is bounded: a timeout skips the frame
/// and the same slot is tried again on the next call.
///
/// ```text
/// acquire ──► Syncing ──► record ──► Recording ──► submit ──► Submitted
///    │                                   │
///    └── SyncTimeout ──► Idle ◄── abort ─┘
/// ```
pub struct FramePipeline {
    device: Arc<dyn GpuBackend>,
    present: Box<dyn PresentTarget>,
    contexts: Vec<FrameContext>,
    frames_in_flight: usize,
    frame_counter: u64,
    state: FrameState,
    fence_timeout: Duration,
    clear_color: [f32; 4],
    current: Option<(AcquiredFrame, Instant)>,
    stats: PipelineStats,
}

impl FramePipeline {
    /// Configures `present` at the configured surface extent and creates
    /// one context per frame in flight.
    ///
    /// # Errors
    ///
    /// Device failures. Anything created before the failure is released.
    pub fn new(
        device: Arc<dyn GpuBackend>,
        mut present: Box<dyn PresentTarget>,
        config: &RendererConfig,
    ) -> RenderResult<Self> {
        let ring = present.configure(
            device.as_ref(),
            config.surface.width,
            config.surface.height,
            config.frames_in_flight,
        )?;
        let contexts = match create_contexts(device.as_ref(), ring) {
            Ok(contexts) => contexts,
            Err(e) => {
                present.release(device.as_ref());
                return Err(e);
            }
        };

        tracing::info!(
            backend = device.name(),
            ring,
            width = config.surface.width,
            height = config.surface.height,
            headless = present.is_headless(),
            "frame pipeline ready"
        );
        Ok(Self {
            device,
            present,
            contexts,
            frames_in_flight: config.frames_in_flight,
            frame_counter: 0,
            state: FrameState::Idle,
            fence_timeout: config.fence_timeout(),
            clear_color: config.clear_color,
            current: None,
            stats: PipelineStats::default(),
        })
    }

    /// Number of frame contexts.
    #[inline]
    #[must_use]
    pub fn ring_size(&self) -> usize {
        self.contexts.len()
    }

    /// Current state.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> FrameState {
        self.state
    }

    /// Number of the next frame to acquire.
    #[inline]
    #[must_use]
    pub const fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    /// Frame contexts in ring order.
    #[must_use]
    pub fn contexts(&self) -> &[FrameContext] {
        &self.contexts
    }

    /// The frame between acquire and submit, if any.
    #[must_use]
    pub fn current(&self) -> Option<AcquiredFrame> {
        self.current.map(|(frame, _)| frame)
    }

    /// Lifetime counters.
    #[inline]
    #[must_use]
    pub const fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut PipelineStats {
        &mut self.stats
    }

    /// Where frames go.
    #[must_use]
    pub fn present_target(&self) -> &dyn PresentTarget {
        self.present.as_ref()
    }

    /// Bound on a single fence wait.
    #[inline]
    #[must_use]
    pub const fn fence_timeout(&self) -> Duration {
        self.fence_timeout
    }

    /// Waits for the next ring slot and hands out its image.
    ///
    /// Frame-local copies of batchers for which `is_live` is false are
    /// released once the slot is free.
    ///
    /// # Errors
    ///
    /// - [`RenderError::SyncTimeout`] if the slot's fence did not signal in
    ///   time (recoverable; the frame is counted as skipped)
    /// - [`RenderError::Device`] if a frame is already acquired or the ring
    ///   is empty
    /// - Device failures
    pub fn acquire(&mut self, is_live: &dyn Fn(BatcherId) -> bool) -> RenderResult<AcquiredFrame> {
        if let Some((frame, _)) = self.current {
            return Err(RenderError::Device(format!(
                "frame {} acquired twice",
                frame.frame
            )));
        }
        if self.contexts.is_empty() {
            return Err(RenderError::Device("frame pipeline has no contexts".into()));
        }

        let started = Instant::now();
        let frame = self.frame_counter;
        let ring_slot = (frame % self.contexts.len() as u64) as usize;
        self.state = FrameState::Acquiring;

        let context = &mut self.contexts[ring_slot];
        let status = match self.device.wait_fence(context.fence(), self.fence_timeout) {
            Ok(status) => status,
            Err(e) => {
                self.state = FrameState::Idle;
                return Err(e);
            }
        };
        if status == FenceStatus::TimedOut {
            self.stats.stalls += 1;
            self.stats.skipped += 1;
            self.state = FrameState::Idle;
            tracing::warn!(
                frame,
                ring_slot,
                waited = ?self.fence_timeout,
                "ring slot still in flight, frame skipped"
            );
            return Err(RenderError::SyncTimeout {
                frame,
                ring_slot,
                waited: self.fence_timeout,
            });
        }

        let released = context.release_stale(self.device.as_ref(), is_live);
        if released > 0 {
            tracing::debug!(ring_slot, released, "stale frame bindings released");
        }

        let image = match self.present.acquire(self.device.as_ref(), ring_slot) {
            Ok(image) => image,
            Err(e) => {
                self.state = FrameState::Idle;
                return Err(e);
            }
        };

        let acquired = AcquiredFrame {
            frame,
            ring_slot,
            image,
        };
        self.current = Some((acquired, started));
        self.state = FrameState::Syncing;
        tracing::trace!(frame, ring_slot, "frame acquired");
        Ok(acquired)
    }

    /// Records the acquired frame: copies each batcher's arrays into the
    /// frame-local copies, then one render pass with one instanced draw per
    /// bucket. Pipeline and mesh are only rebound when they change.
    ///
    /// # Errors
    ///
    /// [`RenderError::Device`] without an acquired frame, or device
    /// failures while sizing frame-local copies.
    pub fn record<'b>(
        &mut self,
        batchers: impl IntoIterator<Item = (BatcherId, &'b RenderBatcher)>,
    ) -> RenderResult<RecordedFrame> {
        let Some((acquired, _)) = self.current else {
            return Err(RenderError::Device("record without an acquired frame".into()));
        };
        self.state = FrameState::Recording;

        let device = self.device.as_ref();
        let context = &mut self.contexts[acquired.ring_slot];
        context.commands_mut().reset();

        let mut bound = Vec::new();
        for (id, batcher) in batchers {
            let records = batcher.records();
            let ids = batcher.ids();
            let binding = context.ensure_binding(
                device,
                id,
                records.byte_size(),
                ids.byte_size(),
                (records.generation(), ids.generation()),
            )?;

            let commands = context.commands_mut();
            if records.byte_size() > 0 {
                commands.copy_buffer(records.buffer_id(), 0, binding.records, 0, records.byte_size());
            }
            let id_bytes = (batcher.buckets().instance_count() * std::mem::size_of::<u32>()) as u64;
            if id_bytes > 0 {
                commands.copy_buffer(ids.buffer_id(), 0, binding.ids, 0, id_bytes);
            }
            bound.push((binding, batcher));
        }

        let mut recorded = RecordedFrame::default();
        let commands = context.commands_mut();
        commands.begin_pass(acquired.image.target, self.clear_color);
        for (binding, batcher) in bound {
            let buckets = batcher.buckets();
            if buckets.is_empty() {
                continue;
            }
            commands.set_instances(binding.records, binding.ids);

            let mut shader = None;
            let mut mesh = None;
            for bucket in buckets.buckets() {
                if shader != Some(bucket.shader) {
                    commands.set_pipeline(bucket.shader);
                    shader = Some(bucket.shader);
                }
                if mesh != Some(bucket.mesh) {
                    commands.set_mesh(bucket.mesh);
                    mesh = Some(bucket.mesh);
                }
                commands.draw_instanced(bucket.first, bucket.count);
                recorded.draws += 1;
                recorded.instances += bucket.count;
            }
        }
        commands.end_pass();

        tracing::trace!(
            frame = acquired.frame,
            draws = recorded.draws,
            instances = recorded.instances,
            commands = commands.len(),
            "frame recorded"
        );
        Ok(recorded)
    }

    /// Submits the recorded frame with its fence and render-complete
    /// semaphore, then presents once the semaphore signals.
    ///
    /// Returns the frame and its CPU time.
    ///
    /// # Errors
    ///
    /// [`RenderError::Device`] without a recorded frame, or device
    /// failures. A rejected submission drops the frame.
    pub fn submit(&mut self) -> RenderResult<(AcquiredFrame, Duration)> {
        let Some((acquired, started)) = self.current else {
            return Err(RenderError::Device("submit without an acquired frame".into()));
        };
        if self.state != FrameState::Recording {
            return Err(RenderError::Device(format!(
                "frame {} submitted before recording",
                acquired.frame
            )));
        }
        self.current = None;

        let context = &mut self.contexts[acquired.ring_slot];
        let info = SubmitInfo {
            signal_fence: Some(context.fence()),
            signal_semaphore: Some(context.render_complete()),
        };
        if let Err(e) = self.device.submit(context.commands(), info) {
            self.stats.skipped += 1;
            self.state = FrameState::Idle;
            return Err(e);
        }
        context.mark_submitted(acquired.frame);
        self.frame_counter += 1;
        self.state = FrameState::Submitted;

        self.present
            .present(self.device.as_ref(), acquired.image, context.render_complete())?;

        let cpu_time = started.elapsed();
        self.stats.record_frame(cpu_time);
        Ok((acquired, cpu_time))
    }

    /// Drops the acquired frame without submitting it.
    pub fn abort(&mut self) {
        if let Some((acquired, _)) = self.current.take() {
            self.contexts[acquired.ring_slot].commands_mut().reset();
            self.stats.skipped += 1;
            tracing::debug!(frame = acquired.frame, "frame aborted");
        }
        self.state = FrameState::Idle;
    }

    /// Waits for every context's fence.
    ///
    /// # Errors
    ///
    /// [`RenderError::ResizeRace`] with the number of contexts that did not
    /// signal in time, or device failures.
    pub fn drain(&self) -> RenderResult<()> {
        let mut pending = 0;
        for context in &self.contexts {
            if self.device.wait_fence(context.fence(), self.fence_timeout)? == FenceStatus::TimedOut {
                pending += 1;
            }
        }
        if pending > 0 {
            return Err(RenderError::ResizeRace { pending });
        }
        Ok(())
    }

    /// Drains the ring, then rebuilds the present target and every context
    /// at the new extent.
    ///
    /// # Errors
    ///
    /// [`RenderError::ResizeRace`] if frames did not drain (nothing is
    /// changed), or device failures while recreating.
    pub fn resize(&mut self, width: u32, height: u32) -> RenderResult<()> {
        self.abort();
        self.drain()?;

        for context in self.contexts.drain(..) {
            context.release(self.device.as_ref());
        }
        let ring = self
            .present
            .configure(self.device.as_ref(), width, height, self.frames_in_flight)?;
        self.contexts = create_contexts(self.device.as_ref(), ring)?;
        self.stats.resizes += 1;

        tracing::info!(width, height, ring, "frame pipeline resized");
        Ok(())
    }

    /// Ring slot and number of the newest submitted frame whose fence has
    /// signaled.
    #[must_use]
    pub fn latest_completed(&self) -> Option<(usize, u64)> {
        self.contexts
            .iter()
            .filter_map(|context| {
                let frame = context.submitted_frame()?;
                let done = self.device.fence_signaled(context.fence()).ok()?;
                done.then_some((context.index(), frame))
            })
            .max_by_key(|&(_, frame)| frame)
    }

    /// Readable target and frame number of the newest completed frame.
    /// `None` when presenting to a surface or before any frame completed.
    #[must_use]
    pub fn latest_readable(&self) -> Option<(TargetId, u64)> {
        let (ring_slot, frame) = self.latest_completed()?;
        let target = self.present.readable_target(ring_slot)?;
        Some((target, frame))
    }

    /// Blocks until the device is idle.
    ///
    /// # Errors
    ///
    /// Device failures.
    pub fn wait_idle(&self) -> RenderResult<FenceStatus> {
        self.device.wait_idle(self.fence_timeout)
    }

    /// Destroys every context and the present target's images. Safe to call
    /// more than once.
    pub fn release(&mut self) {
        self.abort();
        for context in self.contexts.drain(..) {
            context.release(self.device.as_ref());
        }
        self.present.release(self.device.as_ref());
    }
}

fn create_contexts(device: &dyn GpuBackend, ring: usize) -> RenderResult<Vec<FrameContext>> {
    let mut contexts = Vec::with_capacity(ring);
    for index in 0..ring {
        match FrameContext::new(device, index) {
            Ok(context) => contexts.push(context),
            Err(e) => {
                for context in contexts {
                    context.release(device);
                }
                return Err(e);
            }
        }
    }
    Ok(contexts)
}
