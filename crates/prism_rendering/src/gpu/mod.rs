//! # Device Abstraction
//!
//! The seam between the render sync core and an explicit, asynchronous
//! graphics API.
//!
//! ## Execution Model
//!
//! ```text
//! CPU (producer)                         Device queue (in order)
//! ──────────────                         ───────────────────────
//! write_buffer ───────────────────────►  [write]
//! submit(cmds, fence F, semaphore S) ─►  [copy, pass, draws] → signal F, S
//! present(image, wait S) ─────────────►  [present]
//! wait_fence(F, timeout) ◄────────────── F signaled
//! ```
//!
//! Every operation lands on a single in-order queue. A signaled fence
//! therefore implies that everything queued before its submission has
//! completed too. Destruction is queued as well, so a resource is never
//! freed under work that was already submitted.

mod commands;
mod software;
#[cfg(feature = "wgpu")]
mod wgpu_device;

pub use commands::{Command, CommandList};
pub use software::{DeviceStats, SoftwareDevice, SubmissionMode};
#[cfg(feature = "wgpu")]
pub use wgpu_device::WgpuDevice;

use std::fmt;
use std::time::Duration;

use crate::error::RenderResult;

macro_rules! resource_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Resource kind, for diagnostics.
            pub const KIND: &'static str = $kind;

            /// Wraps a raw device handle.
            #[inline]
            #[must_use]
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            /// Raw device handle.
            #[inline]
            #[must_use]
            pub const fn raw(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", $kind, self.0)
            }
        }
    };
}

resource_id!(
    /// Device buffer handle.
    BufferId,
    "buffer"
);
resource_id!(
    /// GPU→CPU completion signal.
    FenceId,
    "fence"
);
resource_id!(
    /// GPU→GPU ordering signal (render complete → present).
    SemaphoreId,
    "semaphore"
);
resource_id!(
    /// Color render target handle.
    TargetId,
    "target"
);

/// What a buffer holds, which decides its usage flags on real hardware.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// `InstanceRecord` array, read as storage by the vertex stage.
    InstanceRecords,
    /// Bucket-ordered `u32` slot list, read per instance.
    InstanceIds,
}

/// Buffer creation parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferDesc {
    /// Debug label.
    pub label: &'static str,
    /// Size in bytes.
    pub size: u64,
    /// Contents.
    pub kind: BufferKind,
}

/// Outcome of a bounded fence wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FenceStatus {
    /// The fence signaled within the bound.
    Signaled,
    /// The bound elapsed first.
    TimedOut,
}

/// Signals attached to a submission.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SubmitInfo {
    /// Fence signaled once the submission (and all before it) completes.
    pub signal_fence: Option<FenceId>,
    /// Semaphore signaled for a later present.
    pub signal_semaphore: Option<SemaphoreId>,
}

impl SubmitInfo {
    /// Signal only `fence`.
    #[must_use]
    pub const fn fence(fence: FenceId) -> Self {
        Self {
            signal_fence: Some(fence),
            signal_semaphore: None,
        }
    }
}

/// A swapchain image handed out by [`GpuBackend::acquire_surface_image`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceImage {
    /// Image index within the swapchain.
    pub index: u32,
    /// Render target aliasing the image.
    pub target: TargetId,
}

/// An explicit, asynchronous graphics device.
///
/// Object safe, so the core holds it as `Arc<dyn GpuBackend>` and passes it
/// into every constructor that needs it. All methods take `&self`;
/// implementations synchronize internally.
pub trait GpuBackend: Send + Sync {
    /// Human-readable backend name.
    fn name(&self) -> &'static str;

    // --- buffers -----------------------------------------------------------

    /// Creates a zero-initialized device buffer.
    fn create_buffer(&self, desc: &BufferDesc) -> RenderResult<BufferId>;

    /// Queues destruction after all previously queued work.
    fn destroy_buffer(&self, buffer: BufferId);

    /// Size of a live buffer in bytes.
    fn buffer_size(&self, buffer: BufferId) -> RenderResult<u64>;

    /// Queues a host→device write, ordered before later submissions.
    fn write_buffer(&self, buffer: BufferId, offset: u64, data: &[u8]) -> RenderResult<()>;

    /// Reads buffer contents as of the last completed queue operation.
    fn read_buffer(&self, buffer: BufferId, offset: u64, len: u64) -> RenderResult<Vec<u8>>;

    // --- synchronization ---------------------------------------------------

    /// Creates a fence, optionally already signaled.
    fn create_fence(&self, signaled: bool) -> RenderResult<FenceId>;

    /// Destroys a fence. The caller guarantees no pending work signals it.
    fn destroy_fence(&self, fence: FenceId);

    /// Non-blocking fence query.
    fn fence_signaled(&self, fence: FenceId) -> RenderResult<bool>;

    /// Blocks until the fence signals or `timeout` elapses.
    fn wait_fence(&self, fence: FenceId, timeout: Duration) -> RenderResult<FenceStatus>;

    /// Creates a binary semaphore.
    fn create_semaphore(&self) -> RenderResult<SemaphoreId>;

    /// Destroys a semaphore.
    fn destroy_semaphore(&self, semaphore: SemaphoreId);

    // --- render targets ----------------------------------------------------

    /// Creates an RGBA8 color target.
    fn create_render_target(&self, width: u32, height: u32) -> RenderResult<TargetId>;

    /// Queues destruction of a render target.
    fn destroy_render_target(&self, target: TargetId);

    /// Reads a target's pixels as tightly packed RGBA8 rows.
    fn read_render_target(&self, target: TargetId) -> RenderResult<Vec<u8>>;

    // --- submission --------------------------------------------------------

    /// Queues a recorded command list.
    ///
    /// An accepted submission returns `info.signal_fence` to the unsignaled
    /// state before queuing. A rejected one leaves the fence untouched, so a
    /// caller never strands a fence that nothing will signal.
    fn submit(&self, commands: &CommandList, info: SubmitInfo) -> RenderResult<()>;

    // --- surface -----------------------------------------------------------

    /// (Re)creates the swapchain. Returns the image count actually used.
    fn configure_surface(&self, width: u32, height: u32, image_count: usize)
        -> RenderResult<usize>;

    /// Hands out the next swapchain image.
    fn acquire_surface_image(&self) -> RenderResult<SurfaceImage>;

    /// Queues a present of `image`, after `wait` is signaled.
    fn present(&self, image: u32, wait: Option<SemaphoreId>) -> RenderResult<()>;

    // --- lifetime ----------------------------------------------------------

    /// Blocks until every queued operation has completed.
    fn wait_idle(&self, timeout: Duration) -> RenderResult<FenceStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_id_display() {
        assert_eq!(BufferId::from_raw(3).to_string(), "buffer#3");
        assert_eq!(FenceId::from_raw(1).to_string(), "fence#1");
        assert_eq!(TargetId::KIND, "target");
    }

    #[test]
    fn test_backend_is_object_safe() {
        fn takes_dyn(_: &dyn GpuBackend) {}
        let device = SoftwareDevice::new(SubmissionMode::Manual);
        takes_dyn(&device);
    }
}
