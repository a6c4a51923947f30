//! Frames in flight: fence-gated ring reuse, resize draining, deferred
//! batcher release and headless readback.

use std::io::Read;
use std::sync::Arc;
use std::time::{Duration, Instant};

use prism_core::{QueryFilter, RenderSlot, Renderable, Transform, World};
use prism_rendering::frame::FrameState;
use prism_rendering::gpu::{GpuBackend, SoftwareDevice, SubmissionMode};
use prism_rendering::{GraphicsModule, RenderError, RendererConfig, SurfaceMode};

const MANUAL_TIMEOUT_MS: u64 = 5;

fn config(frames: usize, fence_timeout_ms: u64) -> RendererConfig {
    let mut config = RendererConfig::default();
    config.frames_in_flight = frames;
    config.fence_timeout_ms = fence_timeout_ms;
    config.surface.width = 8;
    config.surface.height = 8;
    config.initial_slot_capacity = 4;
    config
}

fn module(device: &Arc<SoftwareDevice>, config: RendererConfig) -> GraphicsModule {
    GraphicsModule::new(Arc::clone(device) as Arc<dyn GpuBackend>, config).unwrap()
}

fn world_with(count: usize) -> World {
    let mut world = World::new(256);
    for i in 0..count {
        let entity = world.spawn();
        let x = i as f32 / count as f32 - 0.5;
        world
            .insert(entity, Transform::from_position([x, 0.0, 0.0]))
            .unwrap();
        world.insert(entity, Renderable::default()).unwrap();
    }
    world
}

#[test]
fn test_fourth_frame_waits_for_first_fence() {
    let device = Arc::new(SoftwareDevice::new(SubmissionMode::Manual));
    let mut module = module(&device, config(3, MANUAL_TIMEOUT_MS));
    module.create_batcher("scene").unwrap();
    let mut world = world_with(4);

    for expected in 0..3 {
        let report = module.execute_frame(&mut world).unwrap();
        assert_eq!(report.ring_slot, expected);
    }
    assert_eq!(device.pending_submissions(), 3);

    let started = Instant::now();
    let err = module.execute_frame(&mut world).unwrap_err();
    assert!(started.elapsed() >= Duration::from_millis(MANUAL_TIMEOUT_MS));
    assert!(matches!(err, RenderError::SyncTimeout { frame: 3, ring_slot: 0, .. }));
    assert!(err.is_recoverable());
    assert_eq!(module.pipeline().state(), FrameState::Idle);
    assert_eq!(module.stats().stalls, 1);

    // Still in flight: the same slot times out again
    assert!(module.execute_frame(&mut world).is_err());

    assert!(device.complete_next());
    let report = module.execute_frame(&mut world).unwrap();
    assert_eq!((report.frame, report.ring_slot), (3, 0));
    assert_eq!(module.stats().submitted, 4);
    assert_eq!(module.stats().skipped, 2);
}

#[test]
fn test_threaded_queue_never_exceeds_ring() {
    let device = Arc::new(SoftwareDevice::new(SubmissionMode::Immediate));
    let mut module = module(&device, config(3, 2_000));
    module.create_batcher("scene").unwrap();
    let mut world = world_with(16);

    for tick in 0..60_u32 {
        let victims: Vec<_> = world
            .query(&QueryFilter::new().with::<RenderSlot>())
            .take(2)
            .collect();
        for entity in victims {
            world.mark_destroyed(entity, tick).unwrap();
        }
        for _ in 0..2 {
            let entity = world.spawn();
            world.insert(entity, Renderable::default()).unwrap();
        }

        let report = module.execute_frame(&mut world).unwrap();
        assert_eq!(report.frame, u64::from(tick));
        assert_eq!(report.ring_slot, tick as usize % 3);
        assert!(device.pending_submissions() <= 3);
        world.flush_destroyed();
    }

    module.wait_idle().unwrap();
    let stats = device.stats();
    assert_eq!(stats.submissions, stats.completed_submissions);
    assert_eq!(stats.rejected_instances, 0);
    assert_eq!(module.stats().submitted, 60);
    assert_eq!(module.stats().stalls, 0);
}

#[test]
fn test_resize_refused_while_frames_in_flight() {
    let device = Arc::new(SoftwareDevice::new(SubmissionMode::Manual));
    let mut module = module(&device, config(3, MANUAL_TIMEOUT_MS));
    module.create_batcher("scene").unwrap();
    let mut world = world_with(2);
    module.execute_frame(&mut world).unwrap();
    module.execute_frame(&mut world).unwrap();

    let err = module.resize(16, 16).unwrap_err();
    assert_eq!(err, RenderError::ResizeRace { pending: 2 });
    assert_eq!(module.config().surface.width, 8);
    assert_eq!(module.pipeline().present_target().extent(), (8, 8));

    device.complete_all();
    module.resize(16, 16).unwrap();
    assert_eq!(module.pipeline().present_target().extent(), (16, 16));
    assert_eq!(module.pipeline().ring_size(), 3);

    module.execute_frame(&mut world).unwrap();
    device.complete_all();
    let stream = module.render_target_stream().unwrap().unwrap();
    assert_eq!((stream.width(), stream.height()), (16, 16));
    assert_eq!(stream.pixels().len(), 16 * 16 * 4);
}

#[test]
fn test_removed_batcher_released_after_marker_fence() {
    let device = Arc::new(SoftwareDevice::new(SubmissionMode::Manual));
    let mut module = module(&device, config(3, MANUAL_TIMEOUT_MS));
    let id = module.create_batcher("doomed").unwrap();
    let mut world = world_with(3);
    module.execute_frame(&mut world).unwrap();

    let batcher = module.batcher(id).unwrap();
    let owned = [batcher.records().buffer_id(), batcher.ids().buffer_id()];
    module.remove_batcher(id).unwrap();
    assert!(module.batcher(id).is_none());
    assert_eq!(module.parked_count(), 1);

    // Marker not reached yet
    module.execute_frame(&mut world).unwrap();
    assert_eq!(module.parked_count(), 1);

    device.complete_all();
    module.execute_frame(&mut world).unwrap();
    assert_eq!(module.parked_count(), 0);
    device.complete_all();
    for buffer in owned {
        assert!(device.buffer_info(buffer).is_none());
    }

    // Ring slot 0 comes around again and drops its frame-local copies
    assert_eq!(module.pipeline().contexts()[0].binding_count(), 1);
    module.execute_frame(&mut world).unwrap();
    assert_eq!(module.pipeline().contexts()[0].binding_count(), 0);
}

#[test]
fn test_headless_stream_shows_last_completed_frame() {
    let device = Arc::new(SoftwareDevice::new(SubmissionMode::Manual));
    let mut module = module(&device, config(2, MANUAL_TIMEOUT_MS));
    module.create_batcher("scene").unwrap();

    let mut world = World::new(8);
    let entity = world.spawn();
    world.insert(entity, Transform::default()).unwrap();
    world
        .insert(
            entity,
            Renderable::default().with_color([1.0, 0.0, 0.0, 1.0]),
        )
        .unwrap();

    module.execute_frame(&mut world).unwrap();
    assert!(module.render_target_stream().unwrap().is_none());

    device.complete_all();
    let mut stream = module.render_target_stream().unwrap().unwrap();
    assert_eq!(stream.frame(), 0);
    assert_eq!(stream.pixel(4, 4), Some([255, 0, 0, 255]));
    assert_eq!(stream.pixel(0, 0), Some([0, 0, 0, 255]));

    let mut bytes = Vec::new();
    stream.read_to_end(&mut bytes).unwrap();
    assert_eq!(bytes.len(), 8 * 8 * 4);
}

#[test]
fn test_windowed_mode_presents_every_frame() {
    let device = Arc::new(SoftwareDevice::new(SubmissionMode::Immediate));
    let mut config = config(3, 2_000);
    config.surface.mode = SurfaceMode::Windowed;
    let mut module = module(&device, config);
    module.create_batcher("scene").unwrap();
    let mut world = world_with(3);

    for _ in 0..5 {
        module.execute_frame(&mut world).unwrap();
    }
    module.wait_idle().unwrap();

    assert_eq!(device.stats().presents, 5);
    assert!(device.last_presented().is_some());
    assert!(module.render_target_stream().unwrap().is_none());
}
