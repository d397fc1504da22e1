//! Vulkan render-target images
//!
//! Both the accumulation buffer and the per-slot present targets are plain
//! 2D colour images with a view. Each texture remembers the access state its
//! last recorded barrier left it in, so that clears can return it to that
//! state and the very first barrier can start from `UNDEFINED`.

use std::cell::Cell;
use std::sync::Arc;

use ash::vk;

use crate::render::backend::{ResourceState, TextureDesc, TextureFormat, TextureResource};

use super::context::{VulkanContext, VulkanError, VulkanResult};

/// Native format of a texel format
pub fn vk_format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        TextureFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
    }
}

/// Colour image with view and memory
pub struct VulkanTexture {
    context: Arc<VulkanContext>,
    image: vk::Image,
    image_view: vk::ImageView,
    memory: vk::DeviceMemory,
    extent: vk::Extent2D,
    format: TextureFormat,
    label: String,
    state: Cell<ResourceState>,
    initialized: Cell<bool>,
}

impl VulkanTexture {
    /// Create the image, bind device-local memory and create a view
    pub fn new(context: Arc<VulkanContext>, desc: &TextureDesc<'_>) -> VulkanResult<Self> {
        let device = context.raw_device();
        let extent = vk::Extent2D { width: desc.width, height: desc.height };

        let image_create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D { width: extent.width, height: extent.height, depth: 1 })
            .mip_levels(1)
            .array_layers(1)
            .format(vk_format(desc.format))
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(
                vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::TRANSFER_SRC,
            )
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);

        let image = unsafe {
            device.create_image(&image_create_info, None)
                .map_err(|e| {
                    VulkanError::InitializationFailed(format!(
                        "Failed to create image '{}': {:?}",
                        desc.label, e
                    ))
                })?
        };

        let memory_requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory = context
            .physical_device
            .find_memory_type(
                memory_requirements.memory_type_bits,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )
            .and_then(|memory_type_index| {
                let alloc_info = vk::MemoryAllocateInfo::builder()
                    .allocation_size(memory_requirements.size)
                    .memory_type_index(memory_type_index);
                unsafe { device.allocate_memory(&alloc_info, None).map_err(VulkanError::Api) }
            })
            .and_then(|memory| unsafe {
                match device.bind_image_memory(image, memory, 0) {
                    Ok(()) => Ok(memory),
                    Err(err) => {
                        device.free_memory(memory, None);
                        Err(VulkanError::Api(err))
                    }
                }
            });
        let memory = match memory {
            Ok(memory) => memory,
            Err(err) => {
                unsafe { device.destroy_image(image, None) };
                return Err(err);
            }
        };

        let view_create_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(vk_format(desc.format))
            .subresource_range(color_range());

        let image_view = match unsafe { device.create_image_view(&view_create_info, None) } {
            Ok(view) => view,
            Err(err) => {
                unsafe {
                    device.destroy_image(image, None);
                    device.free_memory(memory, None);
                }
                return Err(VulkanError::Api(err));
            }
        };

        Ok(Self {
            context,
            image,
            image_view,
            memory,
            extent,
            format: desc.format,
            label: desc.label.to_string(),
            state: Cell::new(desc.initial_state),
            initialized: Cell::new(false),
        })
    }

    /// Get image handle
    pub fn image(&self) -> vk::Image {
        self.image
    }

    /// Get image view handle
    pub fn image_view(&self) -> vk::ImageView {
        self.image_view
    }

    /// State left by the last recorded barrier
    pub(crate) fn recorded_state(&self) -> ResourceState {
        self.state.get()
    }

    /// Layout the image is actually in, `UNDEFINED` before its first barrier
    pub(crate) fn current_layout(&self, assumed: ResourceState) -> vk::ImageLayout {
        if self.initialized.get() {
            super::commands::state_access(assumed).layout
        } else {
            vk::ImageLayout::UNDEFINED
        }
    }

    pub(crate) fn set_recorded_state(&self, state: ResourceState) {
        self.state.set(state);
        self.initialized.set(true);
    }
}

/// Whole-image colour subresource range
pub fn color_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

impl TextureResource for VulkanTexture {
    fn label(&self) -> &str {
        &self.label
    }

    fn extent(&self) -> (u32, u32) {
        (self.extent.width, self.extent.height)
    }

    fn format(&self) -> TextureFormat {
        self.format
    }
}

impl Drop for VulkanTexture {
    fn drop(&mut self) {
        unsafe {
            let device = self.context.raw_device();
            device.destroy_image_view(self.image_view, None);
            device.destroy_image(self.image, None);
            device.free_memory(self.memory, None);
        }
    }
}
