//! Backend abstraction traits for the accelerator
//!
//! The tracer drives the accelerator only through [`GpuDevice`] and the
//! resource types it hands out. Resources are owned values: dropping one
//! releases the underlying allocation, so callers must make sure the GPU has
//! stopped using it first (the frame scheduler's drain does exactly that).

use std::fmt;

/// Result type for backend operations
pub type GpuResult<T> = Result<T, GpuError>;

/// Errors reported by an accelerator backend
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    /// Native API call failed
    #[error("Accelerator API error: {0}")]
    Api(String),

    /// Host mapping of a buffer failed
    #[error("Failed to map buffer '{label}': {reason}")]
    MapFailed {
        /// Buffer label
        label: String,
        /// Backend-specific cause
        reason: String,
    },

    /// Allocation failed
    #[error("Out of memory: requested {requested} bytes")]
    OutOfMemory {
        /// Requested size in bytes
        requested: u64,
    },

    /// Operation is not valid in the current state
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// What went wrong
        reason: String,
    },

    /// A recording context was reset while its last submission was still executing
    #[error("Recording context '{label}' reset while still in flight")]
    RecorderInFlight {
        /// Context label
        label: String,
    },

    /// The device stopped responding
    #[error("Device lost")]
    DeviceLost,

    /// Requested capability is not available
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl GpuError {
    /// Shorthand for [`GpuError::InvalidOperation`]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidOperation { reason: reason.into() }
    }
}

/// Where a buffer's memory lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryLocation {
    /// Host-visible, written by the CPU
    Upload,
    /// Device-local, only reachable through copies
    DeviceLocal,
}

/// How a buffer is consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Source of copies into device-local memory
    Staging,
    /// Vertex input of the screen-space passes
    Vertex,
    /// Read-only structured data for the integrator
    Storage,
    /// Constant blocks
    Constant,
}

/// Buffer creation parameters
#[derive(Debug, Clone, Copy)]
pub struct BufferDesc<'a> {
    /// Debug label
    pub label: &'a str,
    /// Size in bytes
    pub size: u64,
    /// Memory placement
    pub location: MemoryLocation,
    /// Intended use
    pub usage: BufferUsage,
}

/// Texel formats used by the tracer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// 8-bit normalized RGBA, the presentation format
    Rgba8Unorm,
    /// 16-bit float RGBA
    Rgba16Float,
    /// 32-bit float RGBA
    Rgba32Float,
}

impl TextureFormat {
    /// Bytes per texel
    pub const fn bytes_per_texel(self) -> u32 {
        match self {
            Self::Rgba8Unorm => 4,
            Self::Rgba16Float => 8,
            Self::Rgba32Float => 16,
        }
    }
}

/// How a texture is consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureUsage {
    /// Integrator output, later sampled by the tone-map pass
    Accumulation,
    /// Per-slot colour target handed to presentation
    Present,
}

/// Texture creation parameters
#[derive(Debug, Clone, Copy)]
pub struct TextureDesc<'a> {
    /// Debug label
    pub label: &'a str,
    /// Width in texels
    pub width: u32,
    /// Height in texels
    pub height: u32,
    /// Texel format
    pub format: TextureFormat,
    /// Intended use
    pub usage: TextureUsage,
    /// State the texture is in when first recorded against
    pub initial_state: ResourceState,
}

/// Access state of a resource between barriers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// Contents undefined, nothing pending
    Undefined,
    /// Destination of a copy
    CopyDest,
    /// Read by shaders
    ShaderResource,
    /// Vertex input
    VertexBuffer,
    /// Colour attachment
    RenderTarget,
    /// Ready for presentation
    Present,
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A buffer owned by a backend
pub trait BufferResource {
    /// Debug label
    fn label(&self) -> &str;

    /// Size in bytes
    fn size(&self) -> u64;

    /// Copy `data` into host-visible memory at `offset` (map, copy, unmap)
    fn write(&self, offset: u64, data: &[u8]) -> GpuResult<()>;
}

/// A 2D texture owned by a backend
pub trait TextureResource {
    /// Debug label
    fn label(&self) -> &str;

    /// Width and height in texels
    fn extent(&self) -> (u32, u32);

    /// Texel format
    fn format(&self) -> TextureFormat;
}

/// The five read-only scene arrays bound to the integrator
pub struct SceneBindings<'a, D: GpuDevice + ?Sized> {
    /// Vertex positions
    pub positions: &'a D::Buffer,
    /// Vertex normals
    pub normals: &'a D::Buffer,
    /// Triangle indices
    pub indices: &'a D::Buffer,
    /// Per-mesh materials
    pub materials: &'a D::Buffer,
    /// Per-mesh index ranges
    pub mesh_ranges: &'a D::Buffer,
}

/// One invocation of the external path-tracing program
pub struct IntegratorPass<'a, D: GpuDevice + ?Sized> {
    /// Accumulation buffer, in the render-target state
    pub target: &'a D::Texture,
    /// Weight of the existing average; the new sample gets `1 - blend_factor`
    pub blend_factor: f32,
    /// Samples already in `target`
    pub frame_index: u32,
    /// Buffer holding the per-frame view blocks
    pub constants: &'a D::Buffer,
    /// Offset of this frame's view block
    pub view_offset: u64,
    /// Offset of the scene block
    pub scene_offset: u64,
    /// Scene arrays
    pub scene: SceneBindings<'a, D>,
    /// Fullscreen quad
    pub quad: &'a D::Buffer,
    /// Viewport size in pixels
    pub viewport: (u32, u32),
}

/// One invocation of the external tone-map program
pub struct ToneMapPass<'a, D: GpuDevice + ?Sized> {
    /// Accumulation buffer, in the shader-resource state
    pub source: &'a D::Texture,
    /// Present target, in the render-target state
    pub target: &'a D::Texture,
    /// Buffer holding the per-frame view blocks
    pub constants: &'a D::Buffer,
    /// Offset of this frame's view block
    pub view_offset: u64,
    /// Fullscreen quad
    pub quad: &'a D::Buffer,
}

/// A reusable command-recording context
pub trait CommandRecorder<D: GpuDevice + ?Sized> {
    /// Debug label
    fn label(&self) -> &str;

    /// Reset and start recording. Only valid once the previous submission of
    /// this context has finished executing.
    fn begin(&mut self) -> GpuResult<()>;

    /// Copy `size` bytes from the start of `src` to the start of `dst`
    fn copy_buffer(&mut self, src: &D::Buffer, dst: &D::Buffer, size: u64) -> GpuResult<()>;

    /// Barrier moving a buffer between access states
    fn transition_buffer(
        &mut self,
        buffer: &D::Buffer,
        before: ResourceState,
        after: ResourceState,
    ) -> GpuResult<()>;

    /// Barrier moving a texture between access states
    fn transition_texture(
        &mut self,
        texture: &D::Texture,
        before: ResourceState,
        after: ResourceState,
    ) -> GpuResult<()>;

    /// Fill a render target with a constant colour
    fn clear_texture(&mut self, texture: &D::Texture, color: [f32; 4]) -> GpuResult<()>;

    /// Draw the integrator into the accumulation buffer
    fn integrator_pass(&mut self, pass: &IntegratorPass<'_, D>) -> GpuResult<()>;

    /// Draw the tone-mapped accumulation buffer into a present target
    fn tone_map_pass(&mut self, pass: &ToneMapPass<'_, D>) -> GpuResult<()>;

    /// Finish recording
    fn end(&mut self) -> GpuResult<()>;
}

/// An accelerator with a single FIFO queue and a monotonically increasing fence
pub trait GpuDevice {
    /// Buffer wrapper; dropping it frees the allocation
    type Buffer: BufferResource;
    /// Texture wrapper; dropping it frees the allocation
    type Texture: TextureResource;
    /// Recording context wrapper
    type Recorder: CommandRecorder<Self>;

    /// Human-readable adapter name
    fn name(&self) -> &str;

    /// Allocate a buffer
    fn create_buffer(&self, desc: &BufferDesc<'_>) -> GpuResult<Self::Buffer>;

    /// Allocate a texture
    fn create_texture(&self, desc: &TextureDesc<'_>) -> GpuResult<Self::Texture>;

    /// Create a recording context
    fn create_recorder(&self, label: &str) -> GpuResult<Self::Recorder>;

    /// Queue the recorded commands for execution after everything submitted before
    fn submit(&self, recorder: &mut Self::Recorder) -> GpuResult<()>;

    /// Queue a fence signal to `value` after everything submitted before
    fn signal(&self, value: u64) -> GpuResult<()>;

    /// Highest fence value the GPU has reached
    fn completed_value(&self) -> GpuResult<u64>;

    /// Block until the fence reaches `value`
    fn wait_for(&self, value: u64) -> GpuResult<()>;

    /// Hand a present target to the presentation engine
    fn present(&self, target: &Self::Texture) -> GpuResult<()>;
}
