//! # Tracer Configuration
//!
//! Every tunable of the progressive tracer in one serializable tree. Each
//! section has sensible defaults so a config file only needs to name what it
//! changes.
//!
//! ## Sections
//!
//! - **window**: initial viewport size
//! - **frames**: frames-in-flight count
//! - **accumulation**: accumulation buffer format, RNG seed, blur default
//! - **camera**: reset pose, projection, input speeds
//! - **scene**: hard capacities of the shared scene arrays
//! - **backend**: which accelerator backend to drive

use serde::{Deserialize, Serialize};

pub use crate::config::{Config, ConfigError};
use crate::foundation::math::Vec3;
use crate::render::constants::MAX_AREA_LIGHTS;

/// Upper bound on frames in flight
pub const MAX_FRAMES_IN_FLIGHT: usize = 8;

/// Initial viewport size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { width: 512, height: 512 }
    }
}

/// Frame pipelining
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Number of frames the CPU may record ahead of the GPU
    pub frames_in_flight: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self { frames_in_flight: 2 }
    }
}

/// Storage format of the accumulation buffer. Both carry more than 8 bits per
/// channel so long averages do not band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccumulationFormat {
    /// Four 16-bit floats
    Rgba16Float,
    /// Four 32-bit floats
    Rgba32Float,
}

/// Accumulation behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccumulationConfig {
    /// Accumulation buffer format
    pub format: AccumulationFormat,
    /// Seed for the per-frame sampling parameters
    pub rng_seed: u64,
    /// Whether the integrator's blur is enabled at startup
    pub blur_enabled: bool,
}

impl Default for AccumulationConfig {
    fn default() -> Self {
        Self {
            format: AccumulationFormat::Rgba32Float,
            rng_seed: 0x5eed_cafe,
            blur_enabled: true,
        }
    }
}

/// Camera reset pose, projection and input response
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Position restored by a camera reset
    pub position: Vec3,
    /// Look-at target restored by a camera reset
    pub look_at: Vec3,
    /// Vertical field of view in degrees
    pub fov_y_degrees: f32,
    /// Near clip distance
    pub near: f32,
    /// Far clip distance
    pub far: f32,
    /// Translation speed in units per second
    pub move_speed: f32,
    /// Rotation in radians per dragged pixel
    pub rotate_speed: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.278, 0.273, -0.8),
            look_at: Vec3::new(0.278, 0.273, 0.0),
            fov_y_degrees: 60.0,
            near: 0.1,
            far: 1.0,
            move_speed: 1.0,
            rotate_speed: -0.008,
        }
    }
}

/// Fixed capacities of the shared scene arrays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneCapacity {
    /// Total vertices across all meshes
    pub max_vertices: usize,
    /// Total indices across all meshes
    pub max_indices: usize,
    /// Material records (one per mesh)
    pub max_materials: usize,
    /// Meshes
    pub max_meshes: usize,
    /// Area lights
    pub max_lights: usize,
}

impl Default for SceneCapacity {
    fn default() -> Self {
        Self {
            max_vertices: 4096,
            max_indices: 8192,
            max_materials: 128,
            max_meshes: 128,
            max_lights: MAX_AREA_LIGHTS,
        }
    }
}

/// Which accelerator backend drives the frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    /// Simulated accelerator with a worker-thread queue
    Headless,
    /// Vulkan through `ash`
    Vulkan,
}

/// Backend selection and tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend to create
    pub kind: BackendKind,
    /// Application name reported to the driver
    pub application_name: String,
    /// Whether to enable Vulkan validation layers; `None` follows the build type
    pub enable_validation: Option<bool>,
    /// Simulated execution time of one headless submission, in microseconds
    pub headless_latency_us: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Headless,
            application_name: "Progressive Tracer".to_string(),
            enable_validation: None,
            headless_latency_us: 0,
        }
    }
}

impl BackendConfig {
    /// Resolved validation flag
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }
}

/// Complete tracer configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerConfig {
    /// Initial viewport
    pub window: WindowConfig,
    /// Frames in flight
    pub frames: FrameConfig,
    /// Accumulation
    pub accumulation: AccumulationConfig,
    /// Camera
    pub camera: CameraConfig,
    /// Scene capacities
    pub scene: SceneCapacity,
    /// Backend
    pub backend: BackendConfig,
}

impl Config for TracerConfig {}

impl TracerConfig {
    /// Set the initial viewport size
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.window = WindowConfig { width, height };
        self
    }

    /// Set the number of frames in flight
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames.frames_in_flight = frames;
        self
    }

    /// Set the accumulation buffer format
    pub fn with_accumulation_format(mut self, format: AccumulationFormat) -> Self {
        self.accumulation.format = format;
        self
    }

    /// Set the sampling RNG seed
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.accumulation.rng_seed = seed;
        self
    }

    /// Select the backend
    pub fn with_backend(mut self, kind: BackendKind) -> Self {
        self.backend.kind = kind;
        self
    }

    /// Set the simulated headless queue latency
    pub fn with_headless_latency_us(mut self, micros: u64) -> Self {
        self.backend.headless_latency_us = micros;
        self
    }

    /// Enable or disable validation layers
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.backend.enable_validation = Some(enabled);
        self
    }

    /// Override the scene capacities
    pub fn with_scene_capacity(mut self, capacity: SceneCapacity) -> Self {
        self.scene = capacity;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Validation(msg));

        if self.window.width == 0 || self.window.height == 0 {
            return invalid(format!(
                "Viewport must be non-empty, got {}x{}",
                self.window.width, self.window.height
            ));
        }

        let frames = self.frames.frames_in_flight;
        if frames == 0 {
            return invalid("Frames in flight must be at least 1".to_string());
        }
        if frames > MAX_FRAMES_IN_FLIGHT {
            return invalid(format!(
                "Frames in flight should not exceed {MAX_FRAMES_IN_FLIGHT}, got {frames}"
            ));
        }

        let camera = &self.camera;
        if !(camera.fov_y_degrees > 0.0 && camera.fov_y_degrees < 180.0) {
            return invalid(format!(
                "Field of view must be in (0, 180), got {}",
                camera.fov_y_degrees
            ));
        }
        if !(camera.near > 0.0 && camera.far > camera.near) {
            return invalid(format!(
                "Clip planes must satisfy 0 < near < far, got near={} far={}",
                camera.near, camera.far
            ));
        }
        if (camera.look_at - camera.position).length_squared() == 0.0 {
            return invalid("Camera look-at must differ from its position".to_string());
        }

        let scene = &self.scene;
        if scene.max_lights > MAX_AREA_LIGHTS {
            return invalid(format!(
                "At most {MAX_AREA_LIGHTS} area lights fit the scene block, got {}",
                scene.max_lights
            ));
        }
        if scene.max_vertices == 0
            || scene.max_indices == 0
            || scene.max_meshes == 0
            || scene.max_materials == 0
        {
            return invalid("Scene capacities must be non-zero".to_string());
        }

        if self.backend.application_name.is_empty() {
            return invalid("Application name cannot be empty".to_string());
        }

        Ok(())
    }
}
