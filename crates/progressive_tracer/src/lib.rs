//! # Progressive Tracer
//!
//! A progressive path-tracing viewer engine. Each frame the accelerator runs
//! an external path-tracing program over a fullscreen quad, blends the new
//! sample into an accumulation buffer and tone-maps the running average into
//! a present target. Camera motion restarts the average.
//!
//! ## Features
//!
//! - **Frame pipelining**: up to three frames in flight, guarded by one fence
//! - **Progressive accumulation**: per-frame jitter and sampler seeds
//! - **Interactive camera**: WASD/QE flight, drag to look, reset and blur keys
//! - **Backends**: Vulkan, plus a headless journal device for tests and tooling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use progressive_tracer::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TracerConfig::default().with_size(512, 512);
//!     let scene = cornell_box(config.scene)?;
//!     let device = HeadlessDevice::new(HeadlessOptions::default())?;
//!
//!     let mut tracer = PathTracer::init(device, &config, &scene)?;
//!     for _ in 0..16 {
//!         tracer.update()?;
//!         tracer.render()?;
//!     }
//!     tracer.release()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod core;
pub mod foundation;
pub mod render;
pub mod scene;

/// Common imports for tracer users
pub mod prelude {
    pub use crate::{
        core::config::{AccumulationFormat, BackendKind, TracerConfig},
        foundation::{
            math::{Mat4, Vec2, Vec3, Vec4},
            time::Timer,
        },
        render::{
            Camera, GpuDevice, HeadlessDevice, HeadlessOptions, MoveDirection, PathTracer,
            RendererError, VulkanDevice,
        },
        scene::{cornell_box, Scene},
    };
    pub use crate::config::Config;
}
