//! Graphics Module - the single entry point a host drives once per tick
//!
//! ```text
//! execute_frame(world)
//!   ├── reap parked batcher resources whose marker fence signaled
//!   ├── acquire ring slot          (bounded fence wait, SyncTimeout → skip)
//!   ├── every batcher.execute()    (WorldQuery → redraw old data)
//!   ├── record                     (copy arrays, one draw per bucket)
//!   └── submit + present
//! ```

use std::sync::Arc;

use super::scene_world::SceneWorld;
use super::target_stream::RenderTargetStream;
use crate::batching::{BatchStats, BatcherId, RenderBatcher};
use crate::buffer::ParkedResources;
use crate::config::{RendererConfig, SurfaceMode};
use crate::error::{RenderError, RenderResult};
use crate::frame::{
    FramePipeline, FrameReport, OffscreenTarget, PipelineStats, PresentTarget, SwapchainTarget,
};
use crate::gpu::{CommandList, FenceId, FenceStatus, GpuBackend, SubmitInfo};

/// Owns the batchers and the frame pipeline of one device.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use prism_core::{Renderable, World};
/// use prism_rendering::gpu::{GpuBackend, SoftwareDevice, SubmissionMode};
/// use prism_rendering::{GraphicsModule, RendererConfig};
///
/// let device: Arc<dyn GpuBackend> = Arc::new(SoftwareDevice::new(SubmissionMode::Immediate));
/// let mut module = GraphicsModule::new(device, RendererConfig::default()).unwrap();
/// module.create_batcher("scene").unwrap();
///
/// let mut world = World::new(64);
/// let entity = world.spawn();
/// world.insert(entity, Renderable::default()).unwrap();
///
/// let report = module.execute_frame(&mut world).unwrap();
/// assert_eq!(report.instances, 1);
/// ```
pub struct GraphicsModule {
    device: Arc<dyn GpuBackend>,
    config: RendererConfig,
    pipeline: FramePipeline,
    batchers: Vec<(BatcherId, RenderBatcher)>,
    next_batcher: u32,
    parked: Vec<(FenceId, ParkedResources)>,
    last_report: Option<FrameReport>,
    shut_down: bool,
}

impl GraphicsModule {
    /// Validates `config` and builds the pipeline with the present target
    /// its surface mode names.
    ///
    /// # Errors
    ///
    /// [`RenderError::Config`] for invalid values, or device failures.
    pub fn new(device: Arc<dyn GpuBackend>, config: RendererConfig) -> RenderResult<Self> {
        let present: Box<dyn PresentTarget> = match config.surface.mode {
            SurfaceMode::Headless => Box::new(OffscreenTarget::new()),
            SurfaceMode::Windowed => Box::new(SwapchainTarget::new()),
        };
        Self::with_present_target(device, config, present)
    }

    /// Builds the pipeline around a caller-supplied present target.
    ///
    /// # Errors
    ///
    /// See [`GraphicsModule::new`].
    pub fn with_present_target(
        device: Arc<dyn GpuBackend>,
        config: RendererConfig,
        present: Box<dyn PresentTarget>,
    ) -> RenderResult<Self> {
        config.validate()?;
        let pipeline = FramePipeline::new(Arc::clone(&device), present, &config)?;
        Ok(Self {
            device,
            config,
            pipeline,
            batchers: Vec::new(),
            next_batcher: 0,
            parked: Vec::new(),
            last_report: None,
            shut_down: false,
        })
    }

    /// The device every batcher and frame uses.
    #[must_use]
    pub fn device(&self) -> &Arc<dyn GpuBackend> {
        &self.device
    }

    /// Active configuration. The surface extent follows resizes.
    #[must_use]
    pub const fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// The frame pipeline.
    #[must_use]
    pub const fn pipeline(&self) -> &FramePipeline {
        &self.pipeline
    }

    /// Lifetime frame counters.
    #[must_use]
    pub const fn stats(&self) -> &PipelineStats {
        self.pipeline.stats()
    }

    /// Report of the last submitted frame.
    #[must_use]
    pub const fn last_report(&self) -> Option<&FrameReport> {
        self.last_report.as_ref()
    }

    /// Creates a batcher sized by the configuration and registers it.
    ///
    /// # Errors
    ///
    /// Device failures while creating its arrays.
    pub fn create_batcher(&mut self, label: impl Into<String>) -> RenderResult<BatcherId> {
        let batcher = RenderBatcher::from_config(Arc::clone(&self.device), label, &self.config)?;
        Ok(self.add_batcher(batcher))
    }

    /// Registers a batcher. It ticks and draws from the next frame on, in
    /// registration order.
    pub fn add_batcher(&mut self, batcher: RenderBatcher) -> BatcherId {
        let id = BatcherId(self.next_batcher);
        self.next_batcher += 1;
        tracing::debug!(%id, label = batcher.label(), "batcher registered");
        self.batchers.push((id, batcher));
        id
    }

    /// Unregisters a batcher. Its buffers are released once every frame
    /// queued before the removal has completed.
    ///
    /// Slot tags it attached stay on the world's entities; call
    /// [`RenderBatcher::detach_all`] first if that world lives on.
    ///
    /// # Errors
    ///
    /// [`RenderError::UnknownResource`] for an unknown id.
    pub fn remove_batcher(&mut self, id: BatcherId) -> RenderResult<()> {
        let position = self
            .batchers
            .iter()
            .position(|(candidate, _)| *candidate == id)
            .ok_or(RenderError::UnknownResource {
                kind: "batcher",
                id: u64::from(id.raw()),
            })?;
        let (_, batcher) = self.batchers.remove(position);
        let parked = batcher.park();
        if parked.is_empty() {
            return Ok(());
        }

        match self.park_behind_marker(parked) {
            Ok(count) => tracing::debug!(%id, buffers = count, "batcher parked"),
            Err((e, parked)) => {
                // The device queues destruction in order, so releasing now
                // still lands after every frame that reads these buffers
                tracing::warn!(%id, "marker fence unavailable ({e}), releasing directly");
                parked.release(self.device.as_ref());
            }
        }
        Ok(())
    }

    fn park_behind_marker(
        &mut self,
        parked: ParkedResources,
    ) -> Result<usize, (RenderError, ParkedResources)> {
        let fence = match self.device.create_fence(false) {
            Ok(fence) => fence,
            Err(e) => return Err((e, parked)),
        };
        if let Err(e) = self.device.submit(&CommandList::new(), SubmitInfo::fence(fence)) {
            self.device.destroy_fence(fence);
            return Err((e, parked));
        }
        let count = parked.buffers().len();
        self.parked.push((fence, parked));
        Ok(count)
    }

    /// A registered batcher.
    #[must_use]
    pub fn batcher(&self, id: BatcherId) -> Option<&RenderBatcher> {
        self.batchers
            .iter()
            .find(|(candidate, _)| *candidate == id)
            .map(|(_, batcher)| batcher)
    }

    /// A registered batcher, mutably.
    pub fn batcher_mut(&mut self, id: BatcherId) -> Option<&mut RenderBatcher> {
        self.batchers
            .iter_mut()
            .find(|(candidate, _)| *candidate == id)
            .map(|(_, batcher)| batcher)
    }

    /// Registered batchers in tick order.
    pub fn batcher_ids(&self) -> impl Iterator<Item = BatcherId> + '_ {
        self.batchers.iter().map(|(id, _)| *id)
    }

    /// Removed batchers whose buffers are still waiting for release.
    #[must_use]
    pub fn parked_count(&self) -> usize {
        self.parked.len()
    }

    /// Runs one frame, ticking the batcher against `world`.
    ///
    /// An entity carries a single `RenderSlot`, so one world feeds at most
    /// one batcher. With several batchers use
    /// [`execute_frame_with`](Self::execute_frame_with) and give each its
    /// own world.
    ///
    /// # Errors
    ///
    /// - [`RenderError::Config`] if more than one batcher is registered; no
    ///   frame is started
    /// - [`RenderError::SyncTimeout`] if the ring slot was still in flight
    ///   (recoverable; call again next tick)
    /// - Any non-recoverable batcher or device error; the frame is aborted
    pub fn execute_frame<W: SceneWorld + ?Sized>(
        &mut self,
        world: &mut W,
    ) -> RenderResult<FrameReport> {
        if self.batchers.len() > 1 {
            return Err(RenderError::Config(format!(
                "{} batchers would share one world's render slots; use execute_frame_with",
                self.batchers.len()
            )));
        }
        self.execute_frame_with(|_, batcher| batcher.execute(&mut *world))
    }

    /// Runs one frame, letting `tick` drive each batcher. Use this when
    /// batchers observe different worlds.
    ///
    /// `tick` returning a recoverable error marks that batcher degraded: it
    /// is drawn from its previously published data.
    ///
    /// # Errors
    ///
    /// See [`GraphicsModule::execute_frame`].
    pub fn execute_frame_with<F>(&mut self, mut tick: F) -> RenderResult<FrameReport>
    where
        F: FnMut(BatcherId, &mut RenderBatcher) -> RenderResult<BatchStats>,
    {
        let span = tracing::debug_span!("frame", frame = self.pipeline.frame_counter());
        let _enter = span.enter();

        self.reap_parked();

        let live: Vec<BatcherId> = self.batcher_ids().collect();
        let acquired = self.pipeline.acquire(&|id| live.contains(&id))?;

        let mut batches = Vec::with_capacity(self.batchers.len());
        let mut degraded = Vec::new();
        for (id, batcher) in &mut self.batchers {
            match tick(*id, batcher) {
                Ok(stats) => {
                    batcher.collect_garbage();
                    batches.push((*id, stats));
                }
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(batcher = %id, "tick failed, redrawing previous data: {e}");
                    self.pipeline.stats_mut().batcher_failures += 1;
                    degraded.push(*id);
                }
                Err(e) => {
                    tracing::error!(batcher = %id, "tick failed, frame aborted: {e}");
                    self.pipeline.abort();
                    return Err(e);
                }
            }
        }

        let recorded = match self
            .pipeline
            .record(self.batchers.iter().map(|(id, batcher)| (*id, batcher)))
        {
            Ok(recorded) => recorded,
            Err(e) => {
                self.pipeline.abort();
                return Err(e);
            }
        };
        let (_, cpu_time) = self.pipeline.submit()?;

        let report = FrameReport {
            frame: acquired.frame,
            ring_slot: acquired.ring_slot,
            draws: recorded.draws,
            instances: recorded.instances,
            batches,
            degraded,
            cpu_time,
        };
        tracing::debug!(
            draws = report.draws,
            instances = report.instances,
            ?cpu_time,
            "frame submitted"
        );
        self.last_report = Some(report.clone());
        Ok(report)
    }

    /// Releases parked batcher resources whose marker fence signaled.
    fn reap_parked(&mut self) {
        let device = Arc::clone(&self.device);
        self.parked.retain_mut(|(fence, parked)| {
            match device.fence_signaled(*fence) {
                Ok(false) => return true,
                Ok(true) => {}
                Err(e) => tracing::warn!(%fence, "marker fence lost ({e}), releasing anyway"),
            }
            std::mem::take(parked).release(device.as_ref());
            device.destroy_fence(*fence);
            false
        });
    }

    /// Rebuilds the pipeline at a new extent. A zero extent (minimized
    /// window) and an unchanged extent are ignored.
    ///
    /// # Errors
    ///
    /// [`RenderError::ResizeRace`] if in-flight frames did not drain; the
    /// old extent stays in use.
    pub fn resize(&mut self, width: u32, height: u32) -> RenderResult<()> {
        if width == 0 || height == 0 {
            tracing::debug!(width, height, "zero extent, resize ignored");
            return Ok(());
        }
        if (width, height) == self.pipeline.present_target().extent() {
            return Ok(());
        }
        self.pipeline.resize(width, height)?;
        self.config.surface.width = width;
        self.config.surface.height = height;
        Ok(())
    }

    /// Pixels of the newest completed frame. `None` when presenting to a
    /// window or before any frame completed.
    ///
    /// # Errors
    ///
    /// Device failures during readback.
    pub fn render_target_stream(&self) -> RenderResult<Option<RenderTargetStream>> {
        if !self.pipeline.present_target().is_headless() {
            return Ok(None);
        }
        let Some((target, frame)) = self.pipeline.latest_readable() else {
            return Ok(None);
        };
        let pixels = self.device.read_render_target(target)?;
        let (width, height) = self.pipeline.present_target().extent();
        Ok(Some(RenderTargetStream::new(width, height, frame, pixels)))
    }

    /// Blocks until every submitted frame has completed.
    ///
    /// # Errors
    ///
    /// Device failures.
    pub fn wait_idle(&self) -> RenderResult<FenceStatus> {
        self.pipeline.wait_idle()
    }

    /// Waits for the device, then releases every batcher, parked resource
    /// and frame context. Later frames fail. Safe to call more than once.
    ///
    /// # Errors
    ///
    /// Device failures while waiting; resources are released regardless.
    pub fn shutdown(&mut self) -> RenderResult<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;

        let idle = self.pipeline.wait_idle();
        if matches!(idle, Ok(FenceStatus::TimedOut)) {
            tracing::warn!("device still busy at shutdown, releasing anyway");
        }

        let device = self.device.as_ref();
        for (_, batcher) in self.batchers.drain(..) {
            batcher.park().release(device);
        }
        for (fence, parked) in self.parked.drain(..) {
            parked.release(device);
            device.destroy_fence(fence);
        }
        self.pipeline.release();
        tracing::info!(frames = self.pipeline.stats().submitted, "graphics module shut down");
        idle.map(|_| ())
    }
}

impl Drop for GraphicsModule {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!("graphics module shutdown failed: {e}");
        }
    }
}
