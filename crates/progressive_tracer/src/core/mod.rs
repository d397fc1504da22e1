//! # Core Module
//!
//! Shared configuration used by every subsystem of the tracer.

pub mod config;

pub use config::{
    AccumulationConfig,
    AccumulationFormat,
    BackendConfig,
    BackendKind,
    CameraConfig,
    Config,
    ConfigError,
    FrameConfig,
    SceneCapacity,
    TracerConfig,
    WindowConfig,
};
