//! Vulkan accelerator backend
//!
//! Low-level Vulkan wrappers behind [`GpuDevice`](crate::render::backend::GpuDevice).
//! Every resource holds an `Arc` of the context, so the logical device
//! outlives everything created from it.

pub mod buffer;
pub mod commands;
pub mod context;
pub mod device;
pub mod sync;
pub mod texture;

pub use buffer::VulkanBuffer;
pub use commands::{state_access, PassProgram, StateAccess, VulkanRecorder};
pub use context::{
    LogicalDevice, PhysicalDeviceInfo, VulkanContext, VulkanError, VulkanInstance, VulkanResult,
};
pub use device::VulkanDevice;
pub use sync::TimelineSemaphore;
pub use texture::VulkanTexture;
