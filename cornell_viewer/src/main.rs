//! Cornell box viewer
//!
//! Drives the progressive tracer through a scripted viewing session: the
//! camera sits still to accumulate, flies forward, orbits, toggles blur,
//! survives a window resize and finally snaps back to its reset pose.
//!
//! Usage: `cornell_viewer [config.toml|config.ron] [ticks]`

use std::path::PathBuf;
use std::time::{Duration, Instant};

use progressive_tracer::config::Config;
use progressive_tracer::core::config::{BackendKind, TracerConfig};
use progressive_tracer::foundation::logging;
use progressive_tracer::render::{
    GpuDevice, GpuError, HeadlessDevice, HeadlessOptions, MoveDirection, PathTracer, RendererError,
    VulkanDevice, VulkanError,
};
use progressive_tracer::scene::{cornell_box, SceneError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// Session script
const DEFAULT_TICKS: u64 = 240;
const SCRIPT_PERIOD: u64 = 240;
const REPORT_INTERVAL: u64 = 60;
const ORBIT_DRAG_PIXELS: f32 = 6.0;

#[derive(thiserror::Error, Debug)]
enum ViewerError {
    #[error("usage: cornell_viewer [config.toml|config.ron] [ticks] ({0})")]
    Usage(String),

    #[error(transparent)]
    Config(#[from] progressive_tracer::config::ConfigError),

    #[error(transparent)]
    Scene(#[from] SceneError),

    #[error(transparent)]
    Renderer(#[from] RendererError),

    #[error(transparent)]
    Gpu(#[from] GpuError),

    #[error(transparent)]
    Vulkan(#[from] VulkanError),
}

/// Input the script injects on a tick
#[derive(Debug, Clone, Copy, PartialEq)]
enum ScriptEvent {
    Key(MoveDirection, bool),
    Drag(f32, f32),
    ToggleBlur,
    ResetCamera,
    Resize(u32, u32),
}

struct Args {
    config: Option<PathBuf>,
    ticks: u64,
}

fn parse_args() -> Result<Args, ViewerError> {
    let mut args = Args { config: None, ticks: DEFAULT_TICKS };
    for arg in std::env::args().skip(1) {
        if let Ok(ticks) = arg.parse::<u64>() {
            args.ticks = ticks;
        } else if args.config.is_none() {
            args.config = Some(PathBuf::from(arg));
        } else {
            return Err(ViewerError::Usage(format!("unexpected argument '{arg}'")));
        }
    }
    Ok(args)
}

fn script_events(tick: u64, base: (u32, u32), rng: &mut StdRng) -> Vec<ScriptEvent> {
    match tick % SCRIPT_PERIOD {
        60 => vec![ScriptEvent::Key(MoveDirection::Forward, true)],
        75 => vec![ScriptEvent::Key(MoveDirection::Forward, false)],
        90..=119 => {
            let jitter = rng.gen_range(-1.0..1.0);
            vec![ScriptEvent::Drag(ORBIT_DRAG_PIXELS, jitter)]
        }
        150 => vec![ScriptEvent::ToggleBlur],
        180 => vec![ScriptEvent::Resize(base.0 / 2, base.1 / 2)],
        200 => vec![ScriptEvent::Resize(base.0, base.1)],
        220 => vec![ScriptEvent::ResetCamera, ScriptEvent::ToggleBlur],
        _ => Vec::new(),
    }
}

fn apply<D: GpuDevice>(tracer: &mut PathTracer<D>, event: ScriptEvent) -> Result<(), ViewerError> {
    log::debug!("Script event: {:?}", event);
    match event {
        ScriptEvent::Key(direction, is_down) => tracer.on_move_key_changed(direction, is_down),
        ScriptEvent::Drag(dx, dy) => tracer.on_mouse_drag_delta(dx, dy),
        ScriptEvent::ToggleBlur => tracer.on_toggle_blur(),
        ScriptEvent::ResetCamera => tracer.on_reset_camera(),
        ScriptEvent::Resize(width, height) => tracer.on_resize(width, height)?,
    }
    Ok(())
}

fn run<D: GpuDevice>(device: D, config: &TracerConfig, ticks: u64) -> Result<(), ViewerError> {
    let scene = cornell_box(config.scene)?;
    let mut tracer = PathTracer::init(device, config, &scene)?;
    let base = tracer.viewport();
    let mut rng = StdRng::seed_from_u64(config.accumulation.rng_seed);

    let start = Instant::now();
    let mut report_start = start;
    for tick in 0..ticks {
        for event in script_events(tick, base, &mut rng) {
            apply(&mut tracer, event)?;
        }
        tracer.update()?;
        tracer.render()?;

        if (tick + 1) % REPORT_INTERVAL == 0 {
            let elapsed = report_start.elapsed().as_secs_f32().max(f32::EPSILON);
            let state = tracer.accumulation_state();
            log::info!(
                "Tick {}: {} samples accumulated, {}x{}, {:.1} fps",
                tick + 1,
                state.frame_index + 1,
                tracer.viewport().0,
                tracer.viewport().1,
                REPORT_INTERVAL as f32 / elapsed
            );
            report_start = Instant::now();
        }
    }

    let stats = tracer.scheduler_stats();
    log::info!(
        "Rendered {} frames in {:.2}s ({} blocking waits, {} drains)",
        tracer.frames_rendered(),
        start.elapsed().as_secs_f32(),
        stats.blocking_waits,
        stats.drains
    );
    tracer.release()?;
    Ok(())
}

fn main() -> Result<(), ViewerError> {
    logging::init();

    let args = parse_args()?;
    let config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from {}", path.display());
            TracerConfig::load_from_file(path)?
        }
        None => TracerConfig::default(),
    };

    log::info!("Starting Cornell viewer with the {:?} backend", config.backend.kind);
    let result = match config.backend.kind {
        BackendKind::Headless => {
            let device = HeadlessDevice::new(HeadlessOptions {
                latency: Duration::from_micros(config.backend.headless_latency_us),
                ..HeadlessOptions::default()
            })?;
            run(device, &config, args.ticks)
        }
        BackendKind::Vulkan => run(VulkanDevice::new(&config.backend)?, &config, args.ticks),
    };

    match result {
        Ok(()) => {
            log::info!("Cornell viewer finished");
            Ok(())
        }
        Err(e) => {
            log::error!("Cornell viewer failed: {}", e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_cycle() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(script_events(0, (512, 512), &mut rng).is_empty());
        assert_eq!(
            script_events(180, (512, 512), &mut rng),
            vec![ScriptEvent::Resize(256, 256)]
        );
        assert_eq!(
            script_events(SCRIPT_PERIOD + 60, (512, 512), &mut rng),
            vec![ScriptEvent::Key(MoveDirection::Forward, true)]
        );
        let orbit = script_events(100, (512, 512), &mut rng);
        assert!(matches!(
            orbit.as_slice(),
            [ScriptEvent::Drag(dx, _)] if *dx == ORBIT_DRAG_PIXELS
        ));
    }

    #[test]
    fn test_short_headless_session() {
        logging::init_for_tests();
        let config = TracerConfig::default().with_size(64, 64);
        let device = HeadlessDevice::new(HeadlessOptions::default()).unwrap();
        run(device, &config, SCRIPT_PERIOD).unwrap();
    }
}
