//! # Rendering System
//!
//! Progressive path tracing on top of an abstract accelerator.
//!
//! ## Architecture
//!
//! - **Backend**: [`GpuDevice`] and its resources, implemented by Vulkan and a
//!   headless journal device used for testing
//! - **Frame scheduling**: a ring of frame slots guarded by one monotonic fence
//! - **Accumulation**: running average of per-frame samples, reset on motion
//! - **Camera**: interactive fly camera driven by keyboard and mouse drag
//! - **Renderer**: [`PathTracer`] ties it all together per frame
//!
//! ```text
//! update ── camera ── accumulation ── view block
//!                                          │
//! render ── clear? ── integrator ── tone map ── submit + signal ── next slot
//! ```

pub mod accumulation;
pub mod backend;
pub mod camera;
pub mod constants;
pub mod frame_sync;
pub mod headless;
pub mod renderer;
pub mod upload;
pub mod vulkan;

#[cfg(test)]
mod tracer_tests;

pub use accumulation::{AccumulationEngine, AccumulationState, SamplerSeeds};
pub use backend::{
    BufferDesc, BufferResource, BufferUsage, CommandRecorder, GpuDevice, GpuError, GpuResult,
    IntegratorPass, MemoryLocation, ResourceState, SceneBindings, TextureDesc, TextureFormat,
    TextureResource, TextureUsage, ToneMapPass,
};
pub use camera::{Camera, CameraController, InputState, MoveDirection, MoveKeys};
pub use constants::{SceneConstants, ViewConstants};
pub use frame_sync::{AcquiredSlot, FenceTimeline, FrameScheduler, SchedulerStats, SlotState};
pub use headless::{HeadlessDevice, HeadlessOptions, HeadlessProbe, Journal, JournalCommand};
pub use renderer::{PathTracer, RendererError, RendererResult};
pub use upload::{upload_scene, SceneBuffers};
pub use vulkan::{PassProgram, VulkanDevice, VulkanError};
