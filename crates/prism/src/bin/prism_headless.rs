//! # PRISM Headless
//!
//! Runs the render loop against the software device and an offscreen
//! target, churning a few entities every frame, then logs a checksum of
//! the last completed image.
//!
//! ```bash
//! # Defaults: 120 frames, built-in config
//! RUST_LOG=prism_rendering=debug ./prism_headless
//!
//! # Custom config and frame count
//! ./prism_headless renderer.toml 600
//! ```

use std::sync::Arc;

use prism::core::{
    Destroyed, EntityId, MeshId, QueryFilter, Renderable, ShaderId, Transform, World,
};
use prism::rendering::gpu::GpuBackend;
use prism::{
    GraphicsModule, RenderError, RenderResult, RendererConfig, SoftwareDevice, SubmissionMode,
};
use tracing::metadata::LevelFilter;
use tracing::{error, info, warn};

const DEFAULT_FRAMES: u64 = 120;
const POPULATION: usize = 512;
const CHURN_PER_FRAME: usize = 8;

fn main() {
    configure_logging();

    if let Err(e) = run() {
        error!(%e, "headless run failed");
        std::process::exit(1);
    }
}

fn configure_logging() {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("a global tracing subscriber was already set");
    }
}

fn run() -> RenderResult<()> {
    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => {
            info!(%path, "loading renderer config");
            RendererConfig::load(path)?
        }
        None => RendererConfig::default(),
    };
    let frames = match args.next() {
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|e| RenderError::Config(format!("frame count {raw:?}: {e}")))?,
        None => DEFAULT_FRAMES,
    };

    info!(
        frames,
        frames_in_flight = config.frames_in_flight,
        width = config.surface.width,
        height = config.surface.height,
        "starting headless render loop"
    );

    let device = Arc::new(SoftwareDevice::new(SubmissionMode::Immediate));
    let mut module = GraphicsModule::new(Arc::clone(&device) as Arc<dyn GpuBackend>, config)?;
    module.create_batcher("scene")?;

    let mut world = World::new(POPULATION * 2);
    let mut spawned = 0_usize;
    for _ in 0..POPULATION {
        spawn_sprite(&mut world, spawned)?;
        spawned += 1;
    }

    let mut tick = 0_u32;
    let mut completed = 0_u64;
    while completed < frames {
        tick = tick.wrapping_add(1);

        let victims: Vec<EntityId> = world
            .query(&QueryFilter::new().with::<Renderable>().without::<Destroyed>())
            .take(CHURN_PER_FRAME)
            .collect();
        for entity in victims {
            world.mark_destroyed(entity, tick)?;
        }
        for _ in 0..CHURN_PER_FRAME {
            spawn_sprite(&mut world, spawned)?;
            spawned += 1;
        }

        match module.execute_frame(&mut world) {
            Ok(report) => {
                if !report.is_clean() {
                    warn!(
                        frame = report.frame,
                        degraded = report.degraded.len(),
                        "frame redrew stale data"
                    );
                }
                completed += 1;
            }
            Err(e) if e.is_recoverable() => warn!(%e, "frame skipped"),
            Err(e) => return Err(e),
        }
        world.flush_destroyed();
    }

    module.wait_idle()?;

    let stats = *module.stats();
    info!(
        submitted = stats.submitted,
        skipped = stats.skipped,
        stalls = stats.stalls,
        worst_frame = ?stats.worst_frame_time,
        "render loop finished"
    );

    match module.render_target_stream()? {
        Some(stream) => {
            let lit = stream
                .pixels()
                .chunks_exact(4)
                .filter(|px| px[..3].iter().any(|&c| c != 0))
                .count();
            info!(
                frame = stream.frame(),
                width = stream.width(),
                height = stream.height(),
                lit_pixels = lit,
                checksum = %format!("{:08x}", checksum(stream.pixels())),
                "last completed image"
            );
        }
        None => warn!("no completed frame to read back"),
    }

    module.shutdown()
}

/// Spreads sprites over clip space on a fixed grid, cycling four shaders.
fn spawn_sprite(world: &mut World, n: usize) -> RenderResult<()> {
    let column = (n % 32) as f32;
    let row = ((n / 32) % 32) as f32;
    let position = [column / 16.0 - 1.0, row / 16.0 - 1.0, 0.0];
    let color = [
        (n % 3) as f32 / 2.0,
        (n % 5) as f32 / 4.0,
        (n % 7) as f32 / 6.0,
        1.0,
    ];

    let entity = world.try_spawn()?;
    world.insert(entity, Transform::from_position(position))?;
    world.insert(
        entity,
        Renderable::new(ShaderId((n % 4) as u32), MeshId(0)).with_color(color),
    )?;
    Ok(())
}

/// FNV-1a over the pixel bytes.
fn checksum(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0x811c_9dc5, |hash, &b| {
        (hash ^ u32::from(b)).wrapping_mul(0x0100_0193)
    })
}
