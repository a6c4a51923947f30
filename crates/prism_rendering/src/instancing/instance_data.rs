//! Instance data structures for GPU upload.

use bytemuck::{Pod, Zeroable};
use prism_core::{MeshId, Renderable, ShaderId, Transform};

/// Per-instance data sent to the GPU.
///
/// Uploaded into the record array at the entity's slot and read by the
/// vertex stage through the bucket-ordered instance id list.
/// Four 16-byte vectors, so the array stride matches WGSL `array<vec4>` rules.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct InstanceRecord {
    /// World position (x, y, z) + uniform scale packed in w.
    pub position_scale: [f32; 4],

    /// Rotation quaternion (x, y, z, w).
    pub rotation: [f32; 4],

    /// RGBA tint.
    pub color: [f32; 4],

    /// Shader id, mesh id, material index, flags.
    pub material: [u32; 4],
}

impl InstanceRecord {
    /// Size in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Builds the record for an entity's current transform and renderable.
    #[must_use]
    pub fn from_components(transform: &Transform, renderable: &Renderable) -> Self {
        let [x, y, z] = transform.position;
        Self {
            position_scale: [x, y, z, transform.scale],
            rotation: transform.rotation,
            color: renderable.color,
            material: [
                renderable.shader.0,
                renderable.mesh.0,
                renderable.material,
                renderable.flags,
            ],
        }
    }

    /// Shader this instance is drawn with.
    #[inline]
    #[must_use]
    pub const fn shader(&self) -> ShaderId {
        ShaderId(self.material[0])
    }

    /// Mesh this instance is drawn with.
    #[inline]
    #[must_use]
    pub const fn mesh(&self) -> MeshId {
        MeshId(self.material[1])
    }

    /// Position in world space.
    #[inline]
    #[must_use]
    pub const fn position(&self) -> [f32; 3] {
        [
            self.position_scale[0],
            self.position_scale[1],
            self.position_scale[2],
        ]
    }

    /// Uniform scale.
    #[inline]
    #[must_use]
    pub const fn scale(&self) -> f32 {
        self.position_scale[3]
    }
}
