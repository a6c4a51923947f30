//! # Rendering Integration Layer
//!
//! Connects the render sync core to the host.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         DATA FLOW                               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │   Host world ──── SceneWorld (query, tag) ───┐                  │
//! │                                              ▼                  │
//! │   GraphicsModule ──► RenderBatcher(s) ──► FramePipeline         │
//! │        │                                     │                  │
//! │        └── RenderTargetStream ◄── readback ◄─┴──► GpuBackend    │
//! │                                                                 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Rules
//!
//! 1. The batcher only adds and removes its `RenderSlot` receipt
//! 2. One producer thread owns the world and calls `execute_frame`
//! 3. A stalled ring slot skips the frame, it never blocks forever

pub mod scene_world;
mod core_adapter;
mod graphics_module;
mod target_stream;

pub use scene_world::{InstanceSource, SceneWorld};
pub use graphics_module::GraphicsModule;
pub use target_stream::RenderTargetStream;
