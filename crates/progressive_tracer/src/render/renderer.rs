//! Progressive path-tracing viewer
//!
//! [`PathTracer`] ties the pieces together: it owns the device, the uploaded
//! scene, the persistent accumulation buffer, the constant buffer and the
//! frame scheduler, and turns input events into camera motion and
//! accumulation resets.
//!
//! A frame is driven in two calls. [`PathTracer::update`] applies input,
//! advances the accumulation state and writes the view block of the slot
//! that is already acquired; [`PathTracer::render`] records the integrator
//! and tone-map passes into that slot, submits and presents, and acquires the
//! next slot. Holding the next slot between frames is what makes the view
//! block write in `update` safe: the GPU is known to be done with it.

use crate::config::ConfigError;
use crate::core::config::{AccumulationFormat, TracerConfig};
use crate::foundation::time::Timer;
use crate::scene::{Scene, SceneError};

use super::accumulation::{AccumulationEngine, AccumulationState};
use super::backend::{
    BufferDesc, BufferResource, BufferUsage, CommandRecorder, GpuDevice, GpuError, GpuResult,
    IntegratorPass, MemoryLocation, ResourceState, TextureDesc, TextureFormat, TextureResource,
    TextureUsage, ToneMapPass,
};
use super::camera::{Camera, CameraController, InputState, MoveDirection};
use super::constants::{align_constant_block, SceneConstants, ViewConstants};
use super::frame_sync::{AcquiredSlot, FrameScheduler, SchedulerStats};
use super::upload::{upload_scene, SceneBuffers};

/// Colour the present target is cleared to before tone mapping
pub const PRESENT_CLEAR_COLOR: [f32; 4] = [0.8, 0.8, 1.0, 1.0];

/// Colour the accumulation buffer is cleared to on reset
pub const ACCUMULATION_CLEAR_COLOR: [f32; 4] = [0.0; 4];

/// Errors raised by the renderer
#[derive(thiserror::Error, Debug)]
pub enum RendererError {
    /// Accelerator failure
    #[error(transparent)]
    Gpu(#[from] GpuError),

    /// Scene could not be built
    #[error(transparent)]
    Scene(#[from] SceneError),

    /// Configuration rejected
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for renderer operations
pub type RendererResult<T> = Result<T, RendererError>;

impl From<AccumulationFormat> for TextureFormat {
    fn from(format: AccumulationFormat) -> Self {
        match format {
            AccumulationFormat::Rgba16Float => Self::Rgba16Float,
            AccumulationFormat::Rgba32Float => Self::Rgba32Float,
        }
    }
}

/// The persistent running-average render target
pub struct AccumulationBuffer<D: GpuDevice> {
    texture: D::Texture,
}

impl<D: GpuDevice> AccumulationBuffer<D> {
    /// Allocate at `extent`, starting in the render-target state
    pub fn new(device: &D, extent: (u32, u32), format: AccumulationFormat) -> GpuResult<Self> {
        let texture = device.create_texture(&TextureDesc {
            label: "accumulation",
            width: extent.0,
            height: extent.1,
            format: format.into(),
            usage: TextureUsage::Accumulation,
            initial_state: ResourceState::RenderTarget,
        })?;
        log::debug!("Accumulation buffer allocated at {}x{} ({:?})", extent.0, extent.1, format);
        Ok(Self { texture })
    }

    /// The render target
    pub fn texture(&self) -> &D::Texture {
        &self.texture
    }

    /// Size in texels
    pub fn extent(&self) -> (u32, u32) {
        self.texture.extent()
    }
}

/// Host-visible buffer holding the scene block and one view block per slot
pub struct ConstantBuffer<D: GpuDevice> {
    buffer: D::Buffer,
    view_offsets: Vec<u64>,
}

impl<D: GpuDevice> ConstantBuffer<D> {
    /// Offset of the scene block
    pub const SCENE_OFFSET: u64 = 0;

    /// Lay out the scene block followed by `frames` view blocks
    pub fn new(device: &D, frames: usize) -> GpuResult<Self> {
        let scene_size = align_constant_block(std::mem::size_of::<SceneConstants>() as u64);
        let view_size = align_constant_block(std::mem::size_of::<ViewConstants>() as u64);
        let view_offsets: Vec<u64> =
            (0..frames as u64).map(|i| scene_size + i * view_size).collect();
        let size = scene_size + view_size * frames as u64;

        let buffer = device.create_buffer(&BufferDesc {
            label: "constants",
            size,
            location: MemoryLocation::Upload,
            usage: BufferUsage::Constant,
        })?;
        Ok(Self { buffer, view_offsets })
    }

    /// Offsets of the per-slot view blocks
    pub fn view_offsets(&self) -> &[u64] {
        &self.view_offsets
    }

    /// The underlying buffer
    pub fn buffer(&self) -> &D::Buffer {
        &self.buffer
    }

    /// Write the scene block
    pub fn write_scene(&self, block: &SceneConstants) -> GpuResult<()> {
        self.buffer.write(Self::SCENE_OFFSET, bytemuck::bytes_of(block))
    }

    /// Write a view block at `offset`
    pub fn write_view(&self, offset: u64, block: &ViewConstants) -> GpuResult<()> {
        self.buffer.write(offset, bytemuck::bytes_of(block))
    }
}

/// Progressive path-tracing viewer over a [`GpuDevice`]
///
/// Fields drop in declaration order, so every GPU resource is released before
/// the device itself.
pub struct PathTracer<D: GpuDevice> {
    acquired: Option<AcquiredSlot>,
    scheduler: FrameScheduler<D>,
    accumulation_buffer: AccumulationBuffer<D>,
    constants: ConstantBuffer<D>,
    scene_buffers: SceneBuffers<D>,
    camera: CameraController,
    input: InputState,
    accumulation: AccumulationEngine,
    timer: Timer,
    viewport: (u32, u32),
    accumulation_format: AccumulationFormat,
    blur_enabled: bool,
    frames_rendered: u64,
    released: bool,
    device: D,
}

fn aspect(extent: (u32, u32)) -> f32 {
    extent.0 as f32 / extent.1.max(1) as f32
}

impl<D: GpuDevice> PathTracer<D> {
    /// Upload `scene`, allocate the per-size resources and acquire the first slot
    ///
    /// Any failure, including a staging write failure during upload, aborts
    /// initialization; nothing is returned that could be driven further.
    pub fn init(device: D, config: &TracerConfig, scene: &Scene) -> RendererResult<Self> {
        config.validate()?;
        let viewport = (config.window.width, config.window.height);

        let constants = ConstantBuffer::new(&device, config.frames.frames_in_flight)?;
        constants.write_scene(&scene.constants())?;

        let mut scheduler = FrameScheduler::new(&device, viewport, constants.view_offsets())?;
        let scene_buffers = upload_scene(&device, scene, scheduler.timeline_mut())?;
        let accumulation_buffer =
            AccumulationBuffer::new(&device, viewport, config.accumulation.format)?;
        let acquired = scheduler.acquire_slot(&device)?;

        log::info!(
            "Path tracer ready on {}: {}x{}, {} frames in flight, {} meshes, {} lights",
            device.name(),
            viewport.0,
            viewport.1,
            scheduler.frames_in_flight(),
            scene.mesh_count(),
            scene.lights().len()
        );

        let mut tracer = Self {
            acquired: Some(acquired),
            scheduler,
            accumulation_buffer,
            constants,
            scene_buffers,
            camera: CameraController::new(&config.camera, aspect(viewport)),
            input: InputState::default(),
            accumulation: AccumulationEngine::new(config.accumulation.rng_seed),
            timer: Timer::new(),
            viewport,
            accumulation_format: config.accumulation.format,
            blur_enabled: config.accumulation.blur_enabled,
            frames_rendered: 0,
            released: false,
            device,
        };
        tracer.write_view_block()?;
        Ok(tracer)
    }

    /// Simulate one tick using wall-clock time since the previous tick
    pub fn update(&mut self) -> RendererResult<()> {
        let dt = self.timer.tick();
        self.step(dt)
    }

    /// Simulate one tick of `dt` seconds
    pub fn update_with_delta(&mut self, dt: f32) -> RendererResult<()> {
        let dt = self.timer.advance(dt);
        self.step(dt)
    }

    fn step(&mut self, dt: f32) -> RendererResult<()> {
        let mut moved = self.camera.translate(self.input.keys(), dt);
        let (dx, dy) = self.input.take_drag();
        moved |= self.camera.rotate(dx, dy);

        let state = self.accumulation.tick(moved, self.viewport);
        log::trace!(
            "Tick: frame index {}, moved {}, blend {:.4}",
            state.frame_index,
            moved,
            state.blend_factor()
        );
        self.write_view_block()
    }

    /// Write the view block of the acquired slot; without one, the block is
    /// written when `render` acquires it.
    fn write_view_block(&mut self) -> RendererResult<()> {
        let Some(offset) = self.acquired.as_ref().map(AcquiredSlot::view_offset) else {
            return Ok(());
        };
        let state = self.accumulation.state();
        let block = ViewConstants::new(
            &self.camera.view_projection_inverse(),
            self.camera.camera().position,
            state.frame_index,
            state.jitter,
            self.viewport,
            state.seeds.to_array(),
            self.blur_enabled,
        );
        self.constants.write_view(offset, &block)?;
        Ok(())
    }

    /// Record, submit and present one frame, then acquire the next slot
    pub fn render(&mut self) -> RendererResult<()> {
        if self.acquired.is_none() {
            self.acquired = Some(self.scheduler.acquire_slot(&self.device)?);
            self.write_view_block()?;
        }
        let acquired = self
            .acquired
            .take()
            .ok_or_else(|| GpuError::invalid("no frame slot is acquired"))?;

        let state = self.accumulation.state();
        let view_offset = acquired.view_offset();
        let viewport = self.viewport;
        let accumulation = self.accumulation_buffer.texture();
        let constants = self.constants.buffer();
        let scene = &self.scene_buffers;

        let submitted = self.scheduler.submit(&self.device, acquired, |recorder, target| {
            if state.needs_clear() {
                recorder.clear_texture(accumulation, ACCUMULATION_CLEAR_COLOR)?;
            }
            recorder.integrator_pass(&IntegratorPass {
                target: accumulation,
                blend_factor: state.blend_factor(),
                frame_index: state.frame_index,
                constants,
                view_offset,
                scene_offset: ConstantBuffer::<D>::SCENE_OFFSET,
                scene: scene.bindings(),
                quad: &scene.quad,
                viewport,
            })?;
            recorder.transition_texture(
                accumulation,
                ResourceState::RenderTarget,
                ResourceState::ShaderResource,
            )?;
            recorder.clear_texture(target, PRESENT_CLEAR_COLOR)?;
            recorder.tone_map_pass(&ToneMapPass {
                source: accumulation,
                target,
                constants,
                view_offset,
                quad: &scene.quad,
            })?;
            recorder.transition_texture(
                accumulation,
                ResourceState::ShaderResource,
                ResourceState::RenderTarget,
            )
        });

        // A failed recording leaves the slot current, so it can be acquired again.
        let next = self
            .scheduler
            .acquire_slot(&self.device)
            .map(|slot| self.acquired = Some(slot));
        submitted?;
        self.accumulation.mark_cleared();
        self.frames_rendered += 1;
        next?;
        Ok(())
    }

    /// Resize the viewport, reallocating every size-dependent resource
    ///
    /// An unchanged size does nothing and a zero dimension (a minimized
    /// window) is ignored. Otherwise the GPU is drained first and
    /// accumulation restarts at once, so the next frame clears the new buffer
    /// whether or not a tick runs in between.
    pub fn resize(&mut self, width: u32, height: u32) -> RendererResult<()> {
        if (width, height) == self.viewport {
            return Ok(());
        }
        if width == 0 || height == 0 {
            log::debug!("Ignoring resize to {}x{}", width, height);
            return Ok(());
        }

        self.scheduler.drain_all(&self.device)?;
        self.scheduler.recreate_present_targets(&self.device, (width, height))?;
        self.accumulation_buffer =
            AccumulationBuffer::new(&self.device, (width, height), self.accumulation_format)?;

        log::debug!(
            "Resized {}x{} -> {}x{}",
            self.viewport.0,
            self.viewport.1,
            width,
            height
        );
        self.viewport = (width, height);
        self.camera.set_aspect(aspect(self.viewport));
        self.accumulation.reset_now();
        self.write_view_block()
    }

    /// Drain the GPU and free every resource
    pub fn release(mut self) -> RendererResult<()> {
        self.scheduler.drain_all(&self.device)?;
        self.released = true;
        log::debug!("Path tracer released after {} frames", self.frames_rendered);
        Ok(())
    }

    /// Movement key pressed or released
    pub fn on_move_key_changed(&mut self, direction: MoveDirection, is_down: bool) {
        self.input.set_key(direction, is_down);
    }

    /// Rotation button pressed or released
    pub fn on_mouse_button(&mut self, is_down: bool) {
        self.input.set_mouse_button(is_down);
    }

    /// Cursor moved, in screen coordinates
    pub fn on_cursor_moved(&mut self, x: i32, y: i32) {
        self.input.cursor_moved(x, y);
    }

    /// Rotation drag in pixels
    pub fn on_mouse_drag_delta(&mut self, dx: f32, dy: f32) {
        self.input.add_drag(dx, dy);
    }

    /// Return the camera to its reset pose and restart accumulation
    pub fn on_reset_camera(&mut self) {
        self.camera.reset();
        self.accumulation.request_reset();
    }

    /// Flip the integrator's blur flag; accumulation continues
    pub fn on_toggle_blur(&mut self) {
        self.blur_enabled = !self.blur_enabled;
        log::debug!("Blur {}", if self.blur_enabled { "enabled" } else { "disabled" });
    }

    /// Window resized
    pub fn on_resize(&mut self, width: u32, height: u32) -> RendererResult<()> {
        self.resize(width, height)
    }

    /// Window moved, in screen coordinates
    pub fn on_window_moved(&mut self, x: i32, y: i32) {
        self.input.window_moved(x, y);
    }

    /// The device
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Accumulation state of the current tick
    pub fn accumulation_state(&self) -> AccumulationState {
        self.accumulation.state()
    }

    /// Current camera
    pub fn camera(&self) -> &Camera {
        self.camera.camera()
    }

    /// Viewport size in pixels
    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    /// Scene and view constant blocks
    pub fn constant_buffer(&self) -> &ConstantBuffer<D> {
        &self.constants
    }

    /// Size of the accumulation buffer
    pub fn accumulation_extent(&self) -> (u32, u32) {
        self.accumulation_buffer.extent()
    }

    /// Whether the blur flag is set
    pub fn blur_enabled(&self) -> bool {
        self.blur_enabled
    }

    /// Frames successfully submitted
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Scheduler counters
    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// Number of frame slots
    pub fn frames_in_flight(&self) -> usize {
        self.scheduler.frames_in_flight()
    }
}

impl<D: GpuDevice> Drop for PathTracer<D> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        log::warn!("Path tracer dropped without release(); draining");
        if let Err(err) = self.scheduler.drain_all(&self.device) {
            log::error!("Drain on drop failed: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::SceneCapacity;
    use crate::render::headless::{HeadlessDevice, HeadlessOptions, JournalCommand};
    use crate::scene::cornell_box;
    use approx::assert_relative_eq;

    fn tracer(config: &TracerConfig) -> PathTracer<HeadlessDevice> {
        let device = HeadlessDevice::new(HeadlessOptions::default()).unwrap();
        let scene = cornell_box(SceneCapacity::default()).unwrap();
        PathTracer::init(device, config, &scene).unwrap()
    }

    #[test]
    fn test_constant_layout() {
        let device = HeadlessDevice::new(HeadlessOptions::default()).unwrap();
        let constants = ConstantBuffer::new(&device, 3).unwrap();
        assert_eq!(constants.view_offsets(), &[768, 1024, 1280]);
        assert_eq!(constants.buffer().size(), 768 + 3 * 256);
    }

    #[test]
    fn test_scene_block_written_at_init() {
        let tracer = tracer(&TracerConfig::default());
        let bytes = tracer.constants.buffer().contents();
        let size = std::mem::size_of::<SceneConstants>();
        let block: SceneConstants = bytemuck::pod_read_unaligned(&bytes[..size]);
        assert_eq!(block.num_meshes, 5);
        assert_eq!(block.num_lights, 1);
        tracer.release().unwrap();
    }

    #[test]
    fn test_view_block_tracks_frame_index() {
        let mut tracer = tracer(&TracerConfig::default());
        for _ in 0..3 {
            tracer.update_with_delta(0.016).unwrap();
            tracer.render().unwrap();
        }
        tracer.update_with_delta(0.016).unwrap();
        let offset = tracer.acquired.as_ref().unwrap().view_offset() as usize;
        let bytes = tracer.constants.buffer().contents();
        let block: ViewConstants =
            bytemuck::pod_read_unaligned(
                &bytes[offset..offset + std::mem::size_of::<ViewConstants>()],
            );
        assert_eq!(block.frame_index, 3);
        assert_eq!((block.viewport_width, block.viewport_height), (512, 512));
        assert_eq!(block.blur_enabled, 1);
        tracer.release().unwrap();
    }

    #[test]
    fn test_blur_toggle_keeps_accumulating() {
        let mut tracer = tracer(&TracerConfig::default());
        tracer.update_with_delta(0.016).unwrap();
        tracer.update_with_delta(0.016).unwrap();
        tracer.on_toggle_blur();
        tracer.update_with_delta(0.016).unwrap();
        assert!(!tracer.blur_enabled());
        assert_eq!(tracer.accumulation_state().frame_index, 2);
        tracer.release().unwrap();
    }

    #[test]
    fn test_reset_camera_restarts_accumulation() {
        let mut tracer = tracer(&TracerConfig::default());
        for _ in 0..4 {
            tracer.update_with_delta(0.016).unwrap();
        }
        tracer.on_reset_camera();
        tracer.update_with_delta(0.016).unwrap();
        assert_eq!(tracer.accumulation_state(), AccumulationState::RESET);
        tracer.release().unwrap();
    }

    #[test]
    fn test_drag_rotates_and_resets() {
        let mut tracer = tracer(&TracerConfig::default());
        tracer.update_with_delta(0.016).unwrap();
        tracer.update_with_delta(0.016).unwrap();
        let before = tracer.camera().direction();
        tracer.on_mouse_drag_delta(10.0, 0.0);
        tracer.update_with_delta(0.016).unwrap();
        assert_eq!(tracer.accumulation_state().frame_index, 0);
        assert!(tracer.camera().direction() != before);
        tracer.release().unwrap();
    }

    #[test]
    fn test_ignored_resizes() {
        let mut tracer = tracer(&TracerConfig::default());
        tracer.update_with_delta(0.016).unwrap();
        tracer.update_with_delta(0.016).unwrap();
        tracer.resize(512, 512).unwrap();
        tracer.resize(0, 300).unwrap();
        tracer.update_with_delta(0.016).unwrap();
        assert_eq!(tracer.accumulation_state().frame_index, 2);
        assert_eq!(tracer.scheduler_stats().drains, 0);
        tracer.release().unwrap();
    }

    #[test]
    fn test_resize_updates_aspect() {
        let mut tracer = tracer(&TracerConfig::default());
        tracer.resize(400, 200).unwrap();
        assert_relative_eq!(tracer.camera().aspect, 2.0);
        assert_eq!(tracer.accumulation_extent(), (400, 200));
        tracer.release().unwrap();
    }

    #[test]
    fn test_sixteen_bit_accumulation() {
        let config =
            TracerConfig::default().with_accumulation_format(AccumulationFormat::Rgba16Float);
        let tracer = tracer(&config);
        assert_eq!(tracer.accumulation_buffer.texture().format(), TextureFormat::Rgba16Float);
        tracer.release().unwrap();
    }

    #[test]
    fn test_first_frame_clears_accumulation() {
        let mut tracer = tracer(&TracerConfig::default());
        let probe = tracer.device().probe();
        tracer.update_with_delta(0.016).unwrap();
        tracer.render().unwrap();
        tracer.update_with_delta(0.016).unwrap();
        tracer.render().unwrap();
        tracer.release().unwrap();

        let journal = probe.journal();
        let frames: Vec<_> =
            journal.submissions.iter().filter(|s| s.recorder.starts_with("frame")).collect();
        assert_eq!(frames.len(), 2);
        let clears = |i: usize| {
            frames[i]
                .commands
                .iter()
                .filter(|c| {
                    matches!(c, JournalCommand::Clear { texture, .. } if texture == "accumulation")
                })
                .count()
        };
        assert_eq!(clears(0), 1);
        assert_eq!(clears(1), 0);
    }
}
