//! Where finished frames go.
//!
//! The pipeline is the same for windowed and headless rendering; only the
//! injected [`PresentTarget`] differs.

use crate::error::{RenderError, RenderResult};
use crate::gpu::{GpuBackend, SemaphoreId, TargetId};

/// The color target a frame renders into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresentImage {
    /// Render target of this frame.
    pub target: TargetId,
    /// Swapchain image index, when presenting to a surface.
    pub image: Option<u32>,
}

/// Destination of the frame pipeline's render passes.
pub trait PresentTarget: Send {
    /// (Re)creates the backing images. Returns how many frames may be in
    /// flight, which becomes the ring size.
    ///
    /// # Errors
    ///
    /// Device failures.
    fn configure(
        &mut self,
        device: &dyn GpuBackend,
        width: u32,
        height: u32,
        frames_in_flight: usize,
    ) -> RenderResult<usize>;

    /// Image the frame on `ring_slot` renders into.
    ///
    /// # Errors
    ///
    /// Device failures, or an unconfigured target.
    fn acquire(&mut self, device: &dyn GpuBackend, ring_slot: usize) -> RenderResult<PresentImage>;

    /// Hands a rendered image off once `wait` signals.
    ///
    /// # Errors
    ///
    /// Device failures.
    fn present(
        &mut self,
        device: &dyn GpuBackend,
        image: PresentImage,
        wait: SemaphoreId,
    ) -> RenderResult<()>;

    /// Render target the CPU may read back for `ring_slot`, if any.
    fn readable_target(&self, ring_slot: usize) -> Option<TargetId>;

    /// Destroys the backing images.
    fn release(&mut self, device: &dyn GpuBackend);

    /// Current extent in pixels.
    fn extent(&self) -> (u32, u32);

    /// True if frames are only read back, never shown.
    fn is_headless(&self) -> bool;
}

/// One off-screen render target per ring slot.
#[derive(Debug, Default)]
pub struct OffscreenTarget {
    targets: Vec<TargetId>,
    width: u32,
    height: u32,
}

impl OffscreenTarget {
    /// Creates an unconfigured target set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            targets: Vec::new(),
            width: 0,
            height: 0,
        }
    }
}

impl PresentTarget for OffscreenTarget {
    fn configure(
        &mut self,
        device: &dyn GpuBackend,
        width: u32,
        height: u32,
        frames_in_flight: usize,
    ) -> RenderResult<usize> {
        let mut targets = Vec::with_capacity(frames_in_flight);
        for _ in 0..frames_in_flight {
            match device.create_render_target(width, height) {
                Ok(target) => targets.push(target),
                Err(e) => {
                    for target in targets {
                        device.destroy_render_target(target);
                    }
                    return Err(e);
                }
            }
        }

        self.release(device);
        self.targets = targets;
        self.width = width;
        self.height = height;
        tracing::debug!(width, height, frames_in_flight, "offscreen targets configured");
        Ok(frames_in_flight)
    }

    fn acquire(&mut self, _device: &dyn GpuBackend, ring_slot: usize) -> RenderResult<PresentImage> {
        let target = *self
            .targets
            .get(ring_slot)
            .ok_or_else(|| {
                RenderError::Device(format!("no offscreen target for ring slot {ring_slot}"))
            })?;
        Ok(PresentImage {
            target,
            image: None,
        })
    }

    fn present(
        &mut self,
        _device: &dyn GpuBackend,
        _image: PresentImage,
        _wait: SemaphoreId,
    ) -> RenderResult<()> {
        Ok(())
    }

    fn readable_target(&self, ring_slot: usize) -> Option<TargetId> {
        self.targets.get(ring_slot).copied()
    }

    fn release(&mut self, device: &dyn GpuBackend) {
        for target in self.targets.drain(..) {
            device.destroy_render_target(target);
        }
    }

    fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn is_headless(&self) -> bool {
        true
    }
}

/// The device's swapchain. The ring follows its image count.
#[derive(Debug, Default)]
pub struct SwapchainTarget {
    images: usize,
    width: u32,
    height: u32,
}

impl SwapchainTarget {
    /// Creates an unconfigured swapchain target.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            images: 0,
            width: 0,
            height: 0,
        }
    }
}

impl PresentTarget for SwapchainTarget {
    fn configure(
        &mut self,
        device: &dyn GpuBackend,
        width: u32,
        height: u32,
        frames_in_flight: usize,
    ) -> RenderResult<usize> {
        self.images = device.configure_surface(width, height, frames_in_flight)?;
        self.width = width;
        self.height = height;
        Ok(self.images)
    }

    fn acquire(&mut self, device: &dyn GpuBackend, _ring_slot: usize) -> RenderResult<PresentImage> {
        let image = device.acquire_surface_image()?;
        Ok(PresentImage {
            target: image.target,
            image: Some(image.index),
        })
    }

    fn present(
        &mut self,
        device: &dyn GpuBackend,
        image: PresentImage,
        wait: SemaphoreId,
    ) -> RenderResult<()> {
        let index = image
            .image
            .ok_or(RenderError::Device("swapchain frame without an image index".into()))?;
        device.present(index, Some(wait))
    }

    fn readable_target(&self, _ring_slot: usize) -> Option<TargetId> {
        None
    }

    fn release(&mut self, _device: &dyn GpuBackend) {
        self.images = 0;
    }

    fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn is_headless(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{SoftwareDevice, SubmissionMode};

    #[test]
    fn test_offscreen_one_target_per_slot() {
        let device = SoftwareDevice::new(SubmissionMode::Manual);
        let mut target = OffscreenTarget::new();
        assert_eq!(target.configure(&device, 8, 4, 3).unwrap(), 3);
        assert_eq!(device.live_targets(), 3);

        let a = target.acquire(&device, 0).unwrap();
        let c = target.acquire(&device, 2).unwrap();
        assert_ne!(a.target, c.target);
        assert_eq!(target.readable_target(2), Some(c.target));
        assert!(target.acquire(&device, 3).is_err());

        target.configure(&device, 16, 16, 2).unwrap();
        device.complete_all();
        assert_eq!(device.live_targets(), 2);
        assert_eq!(target.extent(), (16, 16));
    }

    #[test]
    fn test_swapchain_presents_acquired_image() {
        let device = SoftwareDevice::new(SubmissionMode::Manual);
        let semaphore = device.create_semaphore().unwrap();
        let mut target = SwapchainTarget::new();
        assert_eq!(target.configure(&device, 8, 8, 3).unwrap(), 3);
        assert!(!target.is_headless());

        let image = target.acquire(&device, 0).unwrap();
        assert_eq!(image.image, Some(0));
        target.present(&device, image, semaphore).unwrap();
        device.complete_all();
        assert_eq!(device.last_presented(), Some(0));
        assert_eq!(target.readable_target(0), None);
    }
}
