//! # wgpu Device
//!
//! [`GpuBackend`] over wgpu 0.19.
//!
//! wgpu has no user-visible fences, so each fence is an `AtomicBool` set from
//! `Queue::on_submitted_work_done`. Bounded waits poll the device until the
//! flag flips or the timeout passes. Semaphores are bookkeeping only: wgpu
//! already orders a present after the submissions that precede it.
//!
//! Shader and mesh handles are resolved through [`WgpuDevice::register_pipeline`]
//! and [`WgpuDevice::register_mesh`]. Every pipeline shares one layout:
//! the record array as a read-only storage buffer at `@group(0) @binding(0)`,
//! mesh positions at vertex location 0 and the per-instance slot id at
//! location 1.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use prism_core::{MeshId, ShaderId};
use wgpu::util::DeviceExt;

use super::{
    BufferDesc, BufferId, BufferKind, Command, CommandList, FenceId, FenceStatus, GpuBackend,
    SemaphoreId, SubmitInfo, SurfaceImage, TargetId,
};
use crate::error::{RenderError, RenderResult};

/// WGSL matching the `InstanceRecord` layout. Usable as-is for any shader id.
pub const DEFAULT_INSTANCE_SHADER: &str = r"
struct InstanceRecord {
    position_scale: vec4<f32>,
    rotation: vec4<f32>,
    color: vec4<f32>,
    material: vec4<u32>,
};

@group(0) @binding(0) var<storage, read> records: array<InstanceRecord>;

struct VertexOut {
    @builtin(position) clip: vec4<f32>,
    @location(0) color: vec4<f32>,
};

fn rotate(q: vec4<f32>, v: vec3<f32>) -> vec3<f32> {
    let t = 2.0 * cross(q.xyz, v);
    return v + q.w * t + cross(q.xyz, t);
}

@vertex
fn vs_main(@location(0) position: vec3<f32>, @location(1) slot: u32) -> VertexOut {
    let record = records[slot];
    let world = rotate(record.rotation, position * record.position_scale.w) + record.position_scale.xyz;
    var out: VertexOut;
    out.clip = vec4<f32>(world.xy, 0.5, 1.0);
    out.color = record.color;
    return out;
}

@fragment
fn fs_main(input: VertexOut) -> @location(0) vec4<f32> {
    return input.color;
}
";

/// Off-screen target format.
const OFFSCREEN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Spacing between fence polls.
const FENCE_POLL_INTERVAL: Duration = Duration::from_micros(200);

const MESH_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x3];
const INSTANCE_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![1 => Uint32];

struct WgpuTarget {
    texture: Option<wgpu::Texture>,
    view: wgpu::TextureView,
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
}

struct WgpuMesh {
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
    index_count: u32,
}

struct AcquiredImage {
    index: u32,
    target: TargetId,
    texture: wgpu::SurfaceTexture,
}

#[derive(Default)]
struct WgpuState {
    next_id: u64,
    buffers: HashMap<BufferId, wgpu::Buffer>,
    fences: HashMap<FenceId, Arc<AtomicBool>>,
    semaphores: HashSet<SemaphoreId>,
    targets: HashMap<TargetId, WgpuTarget>,
    shaders: HashMap<ShaderId, wgpu::ShaderModule>,
    pipelines: HashMap<(ShaderId, wgpu::TextureFormat), wgpu::RenderPipeline>,
    meshes: HashMap<MeshId, WgpuMesh>,
    bind_groups: HashMap<BufferId, wgpu::BindGroup>,
    surface_config: Option<wgpu::SurfaceConfiguration>,
    surface_images: usize,
    acquired_count: u64,
    acquired: Option<AcquiredImage>,
}

impl WgpuState {
    fn alloc_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn buffer(&self, buffer: BufferId) -> RenderResult<&wgpu::Buffer> {
        self.buffers.get(&buffer).ok_or(RenderError::UnknownResource {
            kind: BufferId::KIND,
            id: buffer.raw(),
        })
    }

    fn target(&self, target: TargetId) -> RenderResult<&WgpuTarget> {
        self.targets.get(&target).ok_or(RenderError::UnknownResource {
            kind: TargetId::KIND,
            id: target.raw(),
        })
    }

    fn fence(&self, fence: FenceId) -> RenderResult<&Arc<AtomicBool>> {
        self.fences.get(&fence).ok_or(RenderError::UnknownResource {
            kind: FenceId::KIND,
            id: fence.raw(),
        })
    }
}

/// Hardware device backed by wgpu.
pub struct WgpuDevice {
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface: Option<wgpu::Surface<'static>>,
    records_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    state: Mutex<WgpuState>,
}

impl WgpuDevice {
    /// Opens the default adapter without a surface.
    ///
    /// # Errors
    ///
    /// [`RenderError::Device`] if no adapter or device is available.
    pub fn new_headless() -> RenderResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });
        Self::open(&instance, None)
    }

    /// Opens an adapter compatible with `surface`, which the caller created
    /// from its window.
    ///
    /// # Errors
    ///
    /// [`RenderError::Device`] if no compatible adapter or device is available.
    pub fn with_surface(
        instance: &wgpu::Instance,
        surface: wgpu::Surface<'static>,
    ) -> RenderResult<Self> {
        Self::open(instance, Some(surface))
    }

    fn open(
        instance: &wgpu::Instance,
        surface: Option<wgpu::Surface<'static>>,
    ) -> RenderResult<Self> {
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: surface.as_ref(),
            force_fallback_adapter: false,
        }))
        .ok_or(RenderError::Device("no compatible GPU adapter".into()))?;

        tracing::info!(adapter = %adapter.get_info().name, "wgpu adapter selected");

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("PRISM"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
            },
            None,
        ))
        .map_err(|e| RenderError::Device(format!("failed to create device: {e}")))?;

        let records_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("prism instance records"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: true },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("prism instance pipeline layout"),
            bind_group_layouts: &[&records_layout],
            push_constant_ranges: &[],
        });

        Ok(Self {
            adapter,
            device,
            queue,
            surface,
            records_layout,
            pipeline_layout,
            state: Mutex::new(WgpuState::default()),
        })
    }

    /// Compiles `wgsl` as the program behind `shader`. Entry points must be
    /// `vs_main` and `fs_main`, with the shared binding layout.
    pub fn register_pipeline(&self, shader: ShaderId, wgsl: &str) {
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("prism instance shader"),
            source: wgpu::ShaderSource::Wgsl(wgsl.into()),
        });
        let mut state = self.state.lock();
        state.pipelines.retain(|(id, _), _| *id != shader);
        state.shaders.insert(shader, module);
    }

    /// Uploads the geometry behind `mesh`.
    pub fn register_mesh(&self, mesh: MeshId, positions: &[[f32; 3]], indices: &[u32]) {
        let vertices = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("prism mesh vertices"),
            contents: bytemuck::cast_slice(positions),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("prism mesh indices"),
            contents: bytemuck::cast_slice(indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        self.state.lock().meshes.insert(
            mesh,
            WgpuMesh {
                vertices,
                indices: index_buffer,
                index_count: u32::try_from(indices.len()).unwrap_or(u32::MAX),
            },
        );
    }

    fn ensure_pipeline(
        &self,
        state: &mut WgpuState,
        shader: ShaderId,
        format: wgpu::TextureFormat,
    ) -> RenderResult<()> {
        if state.pipelines.contains_key(&(shader, format)) {
            return Ok(());
        }
        let module = state.shaders.get(&shader).ok_or(RenderError::UnknownResource {
            kind: "shader",
            id: u64::from(shader.0),
        })?;

        let pipeline = self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("prism instance pipeline"),
            layout: Some(&self.pipeline_layout),
            vertex: wgpu::VertexState {
                module,
                entry_point: "vs_main",
                buffers: &[
                    wgpu::VertexBufferLayout {
                        array_stride: 12,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &MESH_ATTRIBUTES,
                    },
                    wgpu::VertexBufferLayout {
                        array_stride: 4,
                        step_mode: wgpu::VertexStepMode::Instance,
                        attributes: &INSTANCE_ATTRIBUTES,
                    },
                ],
            },
            fragment: Some(wgpu::FragmentState {
                module,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });
        state.pipelines.insert((shader, format), pipeline);
        Ok(())
    }

    fn ensure_bind_group(&self, state: &mut WgpuState, records: BufferId) -> RenderResult<()> {
        if state.bind_groups.contains_key(&records) {
            return Ok(());
        }
        let buffer = state.buffer(records)?;
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("prism instance records"),
            layout: &self.records_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        });
        state.bind_groups.insert(records, bind_group);
        Ok(())
    }

    /// Creates pipelines and bind groups the command list will need.
    fn prepare(&self, state: &mut WgpuState, commands: &[Command]) -> RenderResult<()> {
        let mut format = OFFSCREEN_FORMAT;
        for command in commands {
            match *command {
                Command::BeginPass { target, .. } => format = state.target(target)?.format,
                Command::SetPipeline { shader } => self.ensure_pipeline(state, shader, format)?,
                Command::SetInstances { records, .. } => self.ensure_bind_group(state, records)?,
                _ => {}
            }
        }
        Ok(())
    }

    fn encode(
        state: &WgpuState,
        commands: &[Command],
        encoder: &mut wgpu::CommandEncoder,
    ) -> RenderResult<()> {
        let mut index = 0;
        while index < commands.len() {
            match commands[index] {
                Command::CopyBuffer {
                    src,
                    src_offset,
                    dst,
                    dst_offset,
                    size,
                } => {
                    encoder.copy_buffer_to_buffer(
                        state.buffer(src)?,
                        src_offset,
                        state.buffer(dst)?,
                        dst_offset,
                        size,
                    );
                    index += 1;
                }
                Command::BeginPass { target, clear } => {
                    let end = commands[index..]
                        .iter()
                        .position(|c| matches!(c, Command::EndPass))
                        .map(|offset| index + offset)
                        .ok_or(RenderError::Device("render pass left open".into()))?;
                    let target = state.target(target)?;
                    Self::encode_pass(state, target, clear, &commands[index + 1..end], encoder)?;
                    index = end + 1;
                }
                _ => index += 1,
            }
        }
        Ok(())
    }

    fn encode_pass(
        state: &WgpuState,
        target: &WgpuTarget,
        clear: [f32; 4],
        commands: &[Command],
        encoder: &mut wgpu::CommandEncoder,
    ) -> RenderResult<()> {
        let [r, g, b, a] = clear.map(f64::from);
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("prism frame pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &target.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                    store: wgpu::StoreOp::Store,
                },
            })],
            ..Default::default()
        });

        let mut index_count = 0;
        for command in commands {
            match *command {
                Command::SetPipeline { shader } => {
                    let pipeline = state.pipelines.get(&(shader, target.format)).ok_or(
                        RenderError::UnknownResource {
                            kind: "shader",
                            id: u64::from(shader.0),
                        },
                    )?;
                    pass.set_pipeline(pipeline);
                }
                Command::SetMesh { mesh } => {
                    let geometry = state.meshes.get(&mesh).ok_or(RenderError::UnknownResource {
                        kind: "mesh",
                        id: u64::from(mesh.0),
                    })?;
                    pass.set_vertex_buffer(0, geometry.vertices.slice(..));
                    pass.set_index_buffer(geometry.indices.slice(..), wgpu::IndexFormat::Uint32);
                    index_count = geometry.index_count;
                }
                Command::SetInstances { records, ids } => {
                    let bind_group =
                        state
                            .bind_groups
                            .get(&records)
                            .ok_or(RenderError::UnknownResource {
                                kind: BufferId::KIND,
                                id: records.raw(),
                            })?;
                    pass.set_bind_group(0, bind_group, &[]);
                    pass.set_vertex_buffer(1, state.buffer(ids)?.slice(..));
                }
                Command::DrawInstanced { first, count } => {
                    pass.draw_indexed(0..index_count, 0, first..first + count);
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn block_on_map(&self, staging: &wgpu::Buffer) -> RenderResult<Vec<u8>> {
        let slice = staging.slice(..);
        let (tx, rx) = crossbeam_channel::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| RenderError::Device("map callback dropped".into()))?
            .map_err(|e| RenderError::Device(format!("buffer map failed: {e}")))?;

        let data = slice.get_mapped_range().to_vec();
        staging.unmap();
        Ok(data)
    }

    fn wait_flag(&self, flag: &AtomicBool, timeout: Duration) -> FenceStatus {
        let deadline = Instant::now() + timeout;
        loop {
            if flag.load(Ordering::Acquire) {
                return FenceStatus::Signaled;
            }
            let _ = self.device.poll(wgpu::Maintain::Poll);
            if Instant::now() >= deadline {
                return if flag.load(Ordering::Acquire) {
                    FenceStatus::Signaled
                } else {
                    FenceStatus::TimedOut
                };
            }
            std::thread::sleep(FENCE_POLL_INTERVAL);
        }
    }
}

fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

impl GpuBackend for WgpuDevice {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn create_buffer(&self, desc: &BufferDesc) -> RenderResult<BufferId> {
        let usage = match desc.kind {
            BufferKind::InstanceRecords => wgpu::BufferUsages::STORAGE,
            BufferKind::InstanceIds => wgpu::BufferUsages::VERTEX,
        } | wgpu::BufferUsages::COPY_SRC
            | wgpu::BufferUsages::COPY_DST;

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.label),
            size: align_up(desc.size.max(4), wgpu::COPY_BUFFER_ALIGNMENT),
            usage,
            mapped_at_creation: false,
        });
        let mut state = self.state.lock();
        let id = BufferId::from_raw(state.alloc_id());
        state.buffers.insert(id, buffer);
        Ok(id)
    }

    fn destroy_buffer(&self, buffer: BufferId) {
        // Dropping defers the free until submitted work stops using it
        let mut state = self.state.lock();
        state.bind_groups.remove(&buffer);
        state.buffers.remove(&buffer);
    }

    fn buffer_size(&self, buffer: BufferId) -> RenderResult<u64> {
        Ok(self.state.lock().buffer(buffer)?.size())
    }

    fn write_buffer(&self, buffer: BufferId, offset: u64, data: &[u8]) -> RenderResult<()> {
        let state = self.state.lock();
        let target = state.buffer(buffer)?;
        if offset + data.len() as u64 > target.size() {
            return Err(RenderError::Device(format!(
                "write of {} bytes at {offset} overruns {buffer}",
                data.len()
            )));
        }
        self.queue.write_buffer(target, offset, data);
        Ok(())
    }

    fn read_buffer(&self, buffer: BufferId, offset: u64, len: u64) -> RenderResult<Vec<u8>> {
        let padded = align_up(len.max(4), wgpu::COPY_BUFFER_ALIGNMENT);
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("prism readback"),
            size: padded,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        {
            let state = self.state.lock();
            let source = state.buffer(buffer)?;
            if offset + padded > source.size() {
                return Err(RenderError::Device(format!(
                    "read of {len} bytes at {offset} overruns {buffer}"
                )));
            }
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("prism readback"),
                });
            encoder.copy_buffer_to_buffer(source, offset, &staging, 0, padded);
            self.queue.submit(Some(encoder.finish()));
        }
        let mut data = self.block_on_map(&staging)?;
        data.truncate(usize::try_from(len).unwrap_or(usize::MAX));
        Ok(data)
    }

    fn create_fence(&self, signaled: bool) -> RenderResult<FenceId> {
        let mut state = self.state.lock();
        let id = FenceId::from_raw(state.alloc_id());
        state.fences.insert(id, Arc::new(AtomicBool::new(signaled)));
        Ok(id)
    }

    fn destroy_fence(&self, fence: FenceId) {
        self.state.lock().fences.remove(&fence);
    }

    fn fence_signaled(&self, fence: FenceId) -> RenderResult<bool> {
        let flag = Arc::clone(self.state.lock().fence(fence)?);
        let _ = self.device.poll(wgpu::Maintain::Poll);
        Ok(flag.load(Ordering::Acquire))
    }

    fn wait_fence(&self, fence: FenceId, timeout: Duration) -> RenderResult<FenceStatus> {
        let flag = Arc::clone(self.state.lock().fence(fence)?);
        Ok(self.wait_flag(&flag, timeout))
    }

    fn create_semaphore(&self) -> RenderResult<SemaphoreId> {
        let mut state = self.state.lock();
        let id = SemaphoreId::from_raw(state.alloc_id());
        state.semaphores.insert(id);
        Ok(id)
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreId) {
        self.state.lock().semaphores.remove(&semaphore);
    }

    fn create_render_target(&self, width: u32, height: u32) -> RenderResult<TargetId> {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("prism offscreen target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: OFFSCREEN_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let mut state = self.state.lock();
        let id = TargetId::from_raw(state.alloc_id());
        state.targets.insert(
            id,
            WgpuTarget {
                texture: Some(texture),
                view,
                format: OFFSCREEN_FORMAT,
                width,
                height,
            },
        );
        Ok(id)
    }

    fn destroy_render_target(&self, target: TargetId) {
        self.state.lock().targets.remove(&target);
    }

    fn read_render_target(&self, target: TargetId) -> RenderResult<Vec<u8>> {
        let state = self.state.lock();
        let source = state.target(target)?;
        let texture = source
            .texture
            .as_ref()
            .ok_or(RenderError::Unsupported("reading back a swapchain image"))?;

        let row_bytes = u64::from(source.width) * 4;
        let padded_row = align_up(row_bytes, u64::from(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT));
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("prism target readback"),
            size: padded_row * u64::from(source.height),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("prism target readback"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(
                        u32::try_from(padded_row)
                            .map_err(|_| RenderError::Device("target row too wide".into()))?,
                    ),
                    rows_per_image: Some(source.height),
                },
            },
            wgpu::Extent3d {
                width: source.width,
                height: source.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));
        let (row_bytes, padded_row) = (row_bytes as usize, padded_row as usize);
        drop(state);

        let padded = self.block_on_map(&staging)?;
        Ok(padded
            .chunks_exact(padded_row)
            .flat_map(|row| &row[..row_bytes])
            .copied()
            .collect())
    }

    fn submit(&self, commands: &CommandList, info: SubmitInfo) -> RenderResult<()> {
        commands.validate()?;
        let mut state = self.state.lock();
        self.prepare(&mut state, commands.as_slice())?;

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("prism frame"),
            });
        Self::encode(&state, commands.as_slice(), &mut encoder)?;

        let flag = info
            .signal_fence
            .map(|fence| state.fence(fence).map(Arc::clone))
            .transpose()?;
        if let Some(flag) = &flag {
            flag.store(false, Ordering::Release);
        }
        self.queue.submit(Some(encoder.finish()));
        drop(state);

        if let Some(flag) = flag {
            self.queue.on_submitted_work_done(move || {
                flag.store(true, Ordering::Release);
            });
        }
        Ok(())
    }

    fn configure_surface(
        &self,
        width: u32,
        height: u32,
        image_count: usize,
    ) -> RenderResult<usize> {
        let surface = self
            .surface
            .as_ref()
            .ok_or(RenderError::Unsupported("device was opened without a surface"))?;
        let caps = surface.get_capabilities(&self.adapter);
        let format = caps
            .formats
            .iter()
            .copied()
            .find(wgpu::TextureFormat::is_srgb)
            .or_else(|| caps.formats.first().copied())
            .ok_or(RenderError::Device("surface reports no formats".into()))?;
        let alpha_mode = caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let image_count = image_count.clamp(2, 3);
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width,
            height,
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: u32::try_from(image_count).unwrap_or(2),
        };
        surface.configure(&self.device, &config);

        let mut state = self.state.lock();
        state.surface_config = Some(config);
        state.surface_images = image_count;
        tracing::info!(width, height, image_count, ?format, "wgpu surface configured");
        Ok(image_count)
    }

    fn acquire_surface_image(&self) -> RenderResult<SurfaceImage> {
        let surface = self
            .surface
            .as_ref()
            .ok_or(RenderError::Unsupported("device was opened without a surface"))?;
        let mut state = self.state.lock();
        let config = state
            .surface_config
            .clone()
            .ok_or(RenderError::Device("surface not configured".into()))?;

        let texture = match surface.get_current_texture() {
            Ok(texture) => texture,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                surface.configure(&self.device, &config);
                surface
                    .get_current_texture()
                    .map_err(|e| RenderError::Device(format!("surface acquire failed: {e}")))?
            }
            Err(e) => return Err(RenderError::Device(format!("surface acquire failed: {e}"))),
        };

        let view = texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let id = TargetId::from_raw(state.alloc_id());
        state.targets.insert(
            id,
            WgpuTarget {
                texture: None,
                view,
                format: config.format,
                width: config.width,
                height: config.height,
            },
        );

        let images = state.surface_images.max(1) as u64;
        let index = u32::try_from(state.acquired_count % images).unwrap_or(0);
        state.acquired_count += 1;
        state.acquired = Some(AcquiredImage {
            index,
            target: id,
            texture,
        });
        Ok(SurfaceImage { index, target: id })
    }

    fn present(&self, image: u32, _wait: Option<SemaphoreId>) -> RenderResult<()> {
        let mut state = self.state.lock();
        let acquired = state
            .acquired
            .take()
            .ok_or(RenderError::Device("present without an acquired image".into()))?;
        if acquired.index != image {
            tracing::warn!(expected = acquired.index, image, "presenting a different image index");
        }
        state.targets.remove(&acquired.target);
        drop(state);
        acquired.texture.present();
        Ok(())
    }

    fn wait_idle(&self, timeout: Duration) -> RenderResult<FenceStatus> {
        let flag = Arc::new(AtomicBool::new(false));
        let signal = Arc::clone(&flag);
        self.queue.on_submitted_work_done(move || {
            signal.store(true, Ordering::Release);
        });
        // An empty submit flushes the callback registration
        self.queue.submit(std::iter::empty());
        Ok(self.wait_flag(&flag, timeout))
    }
}
