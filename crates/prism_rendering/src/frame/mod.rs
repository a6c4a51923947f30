//! # Frame Pipeline
//!
//! N frames in flight, each owning a [`FrameContext`]: a fence, a
//! render-complete semaphore, a reusable command list and frame-local copies
//! of every batcher's instance arrays.
//!
//! ```text
//! frame:      0      1      2      3      4
//! ring slot:  0      1      2      0      1
//!                                  └── waits for frame 0's fence
//! ```
//!
//! A batcher only ever writes its own arrays. Each frame copies them into
//! its slot's frame-local buffers on the device timeline, so the GPU reads
//! a snapshot while the next tick is already being written.

mod context;
mod pipeline;
mod present;
mod stats;

pub use context::{FrameBinding, FrameContext};
pub use pipeline::{AcquiredFrame, FramePipeline, FrameState, RecordedFrame};
pub use present::{OffscreenTarget, PresentImage, PresentTarget, SwapchainTarget};
pub use stats::{FrameReport, PipelineStats};
