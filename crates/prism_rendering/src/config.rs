//! # Renderer Configuration
//!
//! Loaded from TOML. Every field has a default, so an empty file is valid.
//!
//! ```toml
//! frames_in_flight = 3
//! fence_timeout_ms = 250
//! initial_slot_capacity = 64
//! max_slot_capacity = 1048576
//! clear_color = [0.0, 0.0, 0.0, 1.0]
//!
//! [surface]
//! mode = "headless"
//! width = 1280
//! height = 720
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RenderError, RenderResult};

/// Largest ring the pipeline accepts.
pub const MAX_FRAMES_IN_FLIGHT: usize = 8;

/// Where finished frames go.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceMode {
    /// Off-screen render targets, readable through the render target stream.
    #[default]
    Headless,
    /// A device swapchain, presented every frame.
    Windowed,
}

/// Surface section of the configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    /// Headless or windowed.
    pub mode: SurfaceMode,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            mode: SurfaceMode::Headless,
            width: 1280,
            height: 720,
        }
    }
}

/// Configuration for the graphics module and its batchers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Ring size for off-screen rendering. Windowed mode uses the
    /// swapchain's image count instead.
    pub frames_in_flight: usize,
    /// Bound on a single fence wait, in milliseconds.
    pub fence_timeout_ms: u64,
    /// Slots each new batcher starts with.
    pub initial_slot_capacity: u32,
    /// Upper bound on slots per batcher.
    pub max_slot_capacity: u32,
    /// RGBA clear color of every frame.
    pub clear_color: [f32; 4],
    /// Output surface.
    pub surface: SurfaceConfig,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 3,
            fence_timeout_ms: 250,
            initial_slot_capacity: 64,
            max_slot_capacity: 1 << 20,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            surface: SurfaceConfig::default(),
        }
    }
}

impl RendererConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`RenderError::Config`] on malformed TOML or invalid values.
    pub fn from_toml_str(source: &str) -> RenderResult<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| RenderError::Config(format!("failed to parse renderer config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// [`RenderError::Config`] if the file cannot be read or is invalid.
    pub fn load(path: impl AsRef<Path>) -> RenderResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            RenderError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&source)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// [`RenderError::Config`] naming the first offending field.
    pub fn validate(&self) -> RenderResult<()> {
        if !(1..=MAX_FRAMES_IN_FLIGHT).contains(&self.frames_in_flight) {
            return Err(RenderError::Config(format!(
                "frames_in_flight must be in 1..={MAX_FRAMES_IN_FLIGHT}, got {}",
                self.frames_in_flight
            )));
        }
        if self.fence_timeout_ms == 0 {
            return Err(RenderError::Config("fence_timeout_ms must be positive".into()));
        }
        if self.max_slot_capacity == 0 {
            return Err(RenderError::Config("max_slot_capacity must be positive".into()));
        }
        if self.initial_slot_capacity > self.max_slot_capacity {
            return Err(RenderError::Config(format!(
                "initial_slot_capacity {} exceeds max_slot_capacity {}",
                self.initial_slot_capacity, self.max_slot_capacity
            )));
        }
        if self.surface.width == 0 || self.surface.height == 0 {
            return Err(RenderError::Config(format!(
                "surface extent {}x{} is empty",
                self.surface.width, self.surface.height
            )));
        }
        if self.clear_color.iter().any(|c| !c.is_finite()) {
            return Err(RenderError::Config("clear_color must be finite".into()));
        }
        Ok(())
    }

    /// Fence wait bound as a [`Duration`].
    #[inline]
    #[must_use]
    pub const fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.fence_timeout_ms)
    }
}
