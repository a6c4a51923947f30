//! # Component System
//!
//! Components are pure data containers with no behavior.
//! They must be Copy and have a fixed size so storage stays pre-allocated.

use bytemuck::{Pod, Zeroable};
use std::fmt;

/// Marker trait for ECS components.
///
/// Components must be:
/// - `Copy`: No heap allocations, bitwise copyable
/// - `Pod`: Plain old data, safe to upload as bytes
/// - `Zeroable`: Can be safely zeroed
/// - `Default`: Must have a default value for pre-allocation
pub trait Component: Copy + Pod + Zeroable + Default + Send + Sync + 'static {
    /// Unique identifier for this component type (0-63).
    ///
    /// This ID is used for the component bitmask in entities.
    const ID: u8;
}

/// Opaque shader handle, resolved into pipeline state by the device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct ShaderId(pub u32);

impl fmt::Display for ShaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shader#{}", self.0)
    }
}

/// Opaque mesh handle, resolved into vertex/index buffers by the device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct MeshId(pub u32);

impl fmt::Display for MeshId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mesh#{}", self.0)
    }
}

/// World-space placement of an entity.
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Transform {
    /// Position in world space.
    pub position: [f32; 3],
    /// Uniform scale.
    pub scale: f32,
    /// Rotation quaternion (x, y, z, w).
    pub rotation: [f32; 4],
}

impl Component for Transform {
    const ID: u8 = 0;
}

impl Transform {
    /// Identity rotation quaternion.
    pub const IDENTITY_ROTATION: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

    /// Unrotated, unit-scale transform at `position`.
    #[inline]
    #[must_use]
    pub const fn from_position(position: [f32; 3]) -> Self {
        Self {
            position,
            scale: 1.0,
            rotation: Self::IDENTITY_ROTATION,
        }
    }

    /// Returns this transform with a different uniform scale.
    #[inline]
    #[must_use]
    pub const fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::from_position([0.0; 3])
    }
}

/// Marks an entity as drawable: which shader and mesh, plus per-instance
/// parameters.
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Renderable {
    /// Shader handle.
    pub shader: ShaderId,
    /// Mesh handle.
    pub mesh: MeshId,
    /// Material table index.
    pub material: u32,
    /// Free-form per-instance flags passed to the shader.
    pub flags: u32,
    /// Per-instance tint (RGBA).
    pub color: [f32; 4],
}

impl Component for Renderable {
    const ID: u8 = 1;
}

impl Renderable {
    /// A white, material-0 renderable for the given shader and mesh.
    #[inline]
    #[must_use]
    pub const fn new(shader: ShaderId, mesh: MeshId) -> Self {
        Self {
            shader,
            mesh,
            material: 0,
            flags: 0,
            color: [1.0, 1.0, 1.0, 1.0],
        }
    }

    /// Returns this renderable with a different tint.
    #[inline]
    #[must_use]
    pub const fn with_color(mut self, color: [f32; 4]) -> Self {
        self.color = color;
        self
    }
}

impl Default for Renderable {
    fn default() -> Self {
        Self::new(ShaderId(0), MeshId(0))
    }
}

/// Allocation receipt: the entity owns `slot` in the batched GPU arrays.
///
/// Attached and removed only by the render batcher.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct RenderSlot {
    /// Index into the instance arrays.
    pub slot: u32,
}

impl Component for RenderSlot {
    const ID: u8 = 2;
}

/// Tag set by the simulation when an entity is destroyed this tick.
///
/// The entity stays queryable until `World::flush_destroyed` so the render
/// batcher can reclaim its slot first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct Destroyed {
    /// Simulation tick the entity was destroyed on.
    pub tick: u32,
}

impl Component for Destroyed {
    const ID: u8 = 3;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_sizes() {
        // 16-byte multiples keep uploads aligned
        assert_eq!(std::mem::size_of::<Transform>(), 32);
        assert_eq!(std::mem::size_of::<Renderable>(), 32);
        assert_eq!(std::mem::size_of::<RenderSlot>(), 4);
    }

    #[test]
    fn test_component_ids_unique() {
        let ids = [Transform::ID, Renderable::ID, RenderSlot::ID, Destroyed::ID];
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_handle_ordering() {
        assert!(ShaderId(1) < ShaderId(2));
        assert!(MeshId(0) < MeshId(7));
        assert_eq!(ShaderId(3).to_string(), "shader#3");
    }
}
