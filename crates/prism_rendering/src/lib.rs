//! # PRISM Rendering
//!
//! The render sync core: keeps a world's renderables in GPU instance arrays
//! and drives an N-frames-in-flight ring without the CPU ever writing
//! memory the GPU may still be reading.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      RENDER SYNC CORE                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  World ─► RenderBatcher ─► TypedDeviceArray ─► FrameContext  │
//! │             (4 phases)      (slot-addressed)   (copy + draw) │
//! │                                   ↓                  ↓       │
//! │                          GrowableDeviceBuffer   GpuBackend   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Rules
//!
//! - A ring slot is reused only after its fence signaled
//! - Buffers are replaced on growth, never reallocated under the GPU
//! - Fence waits are bounded; a timeout skips the frame

#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod batching;
pub mod buffer;
pub mod config;
pub mod error;
pub mod frame;
pub mod gpu;
pub mod instancing;
pub mod integration;

pub use batching::{BatchStats, BatcherId, RenderBatcher, RenderBucket, RenderBuckets};
pub use buffer::{GrowableDeviceBuffer, ParkedResources, TypedDeviceArray};
pub use config::{RendererConfig, SurfaceConfig, SurfaceMode};
pub use error::{RenderError, RenderResult, SlotAccessPolicy};
pub use frame::{FramePipeline, FrameReport, FrameState, PipelineStats};
pub use gpu::{GpuBackend, SoftwareDevice, SubmissionMode};
#[cfg(feature = "wgpu")]
pub use gpu::WgpuDevice;
pub use instancing::InstanceRecord;
pub use integration::{GraphicsModule, RenderTargetStream, SceneWorld};
