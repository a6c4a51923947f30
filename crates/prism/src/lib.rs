//! # PRISM
//!
//! Umbrella crate over the two layers of the render sync core.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  prism_core        World, Renderable, slots  │
//! │       │                                      │
//! │       ▼                                      │
//! │  prism_rendering   batchers, frame ring, GPU │
//! └──────────────────────────────────────────────┘
//! ```

pub use prism_core as core;
pub use prism_rendering as rendering;

pub use prism_core::{EntityId, Renderable, Transform, World};
pub use prism_rendering::{
    GraphicsModule, RenderError, RenderResult, RendererConfig, SoftwareDevice, SubmissionMode,
};
