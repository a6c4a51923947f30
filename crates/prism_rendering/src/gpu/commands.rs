//! Recorded device commands.
//!
//! A [`CommandList`] is owned by one frame context and reused every time
//! that ring slot comes around; `reset` keeps its allocation.

use prism_core::{MeshId, ShaderId};

use super::{BufferId, TargetId};
use crate::error::{RenderError, RenderResult};

/// One recorded device command.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Command {
    /// Device-side copy between buffers.
    CopyBuffer {
        /// Source buffer.
        src: BufferId,
        /// Byte offset into the source.
        src_offset: u64,
        /// Destination buffer.
        dst: BufferId,
        /// Byte offset into the destination.
        dst_offset: u64,
        /// Bytes to copy.
        size: u64,
    },
    /// Starts a render pass, clearing `target`.
    BeginPass {
        /// Color target.
        target: TargetId,
        /// RGBA clear color.
        clear: [f32; 4],
    },
    /// Binds the pipeline state resolved from `shader`.
    SetPipeline {
        /// Shader handle.
        shader: ShaderId,
    },
    /// Binds the vertex/index buffers resolved from `mesh`.
    SetMesh {
        /// Mesh handle.
        mesh: MeshId,
    },
    /// Binds the instance record array and the ordered id list.
    SetInstances {
        /// `InstanceRecord` array.
        records: BufferId,
        /// `u32` slot list.
        ids: BufferId,
    },
    /// Draws `count` instances starting at `first` in the id list.
    DrawInstanced {
        /// First entry of the id list.
        first: u32,
        /// Instance count.
        count: u32,
    },
    /// Ends the current render pass.
    EndPass,
}

/// A reusable list of recorded commands.
#[derive(Clone, Debug, Default)]
pub struct CommandList {
    commands: Vec<Command>,
}

impl CommandList {
    /// Creates an empty list.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            commands: Vec::new(),
        }
    }

    /// Clears the list, keeping its allocation.
    #[inline]
    pub fn reset(&mut self) {
        self.commands.clear();
    }

    /// Number of recorded commands.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// True if nothing is recorded.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Recorded commands in order.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[Command] {
        &self.commands
    }

    /// Records a buffer-to-buffer copy.
    pub fn copy_buffer(
        &mut self,
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    ) {
        self.commands.push(Command::CopyBuffer {
            src,
            src_offset,
            dst,
            dst_offset,
            size,
        });
    }

    /// Records the start of a render pass.
    pub fn begin_pass(&mut self, target: TargetId, clear: [f32; 4]) {
        self.commands.push(Command::BeginPass { target, clear });
    }

    /// Records a pipeline bind.
    pub fn set_pipeline(&mut self, shader: ShaderId) {
        self.commands.push(Command::SetPipeline { shader });
    }

    /// Records a mesh bind.
    pub fn set_mesh(&mut self, mesh: MeshId) {
        self.commands.push(Command::SetMesh { mesh });
    }

    /// Records an instance data bind.
    pub fn set_instances(&mut self, records: BufferId, ids: BufferId) {
        self.commands.push(Command::SetInstances { records, ids });
    }

    /// Records an instanced draw.
    pub fn draw_instanced(&mut self, first: u32, count: u32) {
        self.commands.push(Command::DrawInstanced { first, count });
    }

    /// Records the end of the current render pass.
    pub fn end_pass(&mut self) {
        self.commands.push(Command::EndPass);
    }

    /// Number of draw commands.
    #[must_use]
    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::DrawInstanced { .. }))
            .count()
    }

    /// Checks command ordering: copies outside passes, draws inside a pass
    /// with pipeline, mesh and instances bound, passes closed.
    ///
    /// # Errors
    ///
    /// [`RenderError::Device`] describing the first malformed command.
    pub fn validate(&self) -> RenderResult<()> {
        let mut in_pass = false;
        let mut pipeline = false;
        let mut mesh = false;
        let mut instances = false;

        for (index, command) in self.commands.iter().enumerate() {
            let fail = |what: &str| {
                Err(RenderError::Device(format!(
                    "command {index} ({command:?}): {what}"
                )))
            };
            match command {
                Command::CopyBuffer { .. } if in_pass => return fail("copy inside a render pass"),
                Command::CopyBuffer { .. } => {}
                Command::BeginPass { .. } if in_pass => return fail("nested render pass"),
                Command::BeginPass { .. } => {
                    in_pass = true;
                    pipeline = false;
                    mesh = false;
                    instances = false;
                }
                Command::SetPipeline { .. } => pipeline = true,
                Command::SetMesh { .. } => mesh = true,
                Command::SetInstances { .. } => instances = true,
                Command::DrawInstanced { .. } if !in_pass => return fail("draw outside a pass"),
                Command::DrawInstanced { .. } if !(pipeline && mesh && instances) => {
                    return fail("draw without pipeline, mesh and instances bound");
                }
                Command::DrawInstanced { .. } => {}
                Command::EndPass if !in_pass => return fail("end without begin"),
                Command::EndPass => in_pass = false,
            }
        }

        if in_pass {
            return Err(RenderError::Device("render pass left open".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(raw: u64) -> BufferId {
        BufferId::from_raw(raw)
    }

    #[test]
    fn test_well_formed_list() {
        let mut list = CommandList::new();
        list.copy_buffer(buffer(1), 0, buffer(2), 0, 64);
        list.begin_pass(TargetId::from_raw(9), [0.0; 4]);
        list.set_instances(buffer(2), buffer(3));
        list.set_pipeline(ShaderId(0));
        list.set_mesh(MeshId(0));
        list.draw_instanced(0, 4);
        list.end_pass();

        assert!(list.validate().is_ok());
        assert_eq!(list.draw_count(), 1);
        assert_eq!(list.len(), 7);

        list.reset();
        assert!(list.is_empty());
    }

    #[test]
    fn test_rejects_unbound_draw() {
        let mut list = CommandList::new();
        list.begin_pass(TargetId::from_raw(1), [0.0; 4]);
        list.set_pipeline(ShaderId(0));
        list.draw_instanced(0, 1);
        list.end_pass();
        assert!(list.validate().is_err());
    }

    #[test]
    fn test_rejects_copy_in_pass_and_open_pass() {
        let mut list = CommandList::new();
        list.begin_pass(TargetId::from_raw(1), [0.0; 4]);
        list.copy_buffer(buffer(1), 0, buffer(2), 0, 4);
        assert!(list.validate().is_err());

        let mut open = CommandList::new();
        open.begin_pass(TargetId::from_raw(1), [0.0; 4]);
        assert!(open.validate().is_err());
    }
}
