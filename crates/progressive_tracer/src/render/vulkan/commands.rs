//! Command buffer management
//!
//! Every recording context owns its own command pool with a single primary
//! command buffer, so resetting one context never touches another slot's
//! commands. Resource states map onto image layouts, access masks and
//! pipeline stages in [`state_access`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ash::vk;

use crate::render::backend::{
    CommandRecorder, GpuError, GpuResult, IntegratorPass, ResourceState, ToneMapPass,
};

use super::buffer::VulkanBuffer;
use super::context::{VulkanContext, VulkanError, VulkanResult};
use super::device::VulkanDevice;
use super::texture::{color_range, VulkanTexture};

/// Native view of a [`ResourceState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateAccess {
    /// Image layout; buffers ignore it
    pub layout: vk::ImageLayout,
    /// Access mask
    pub access: vk::AccessFlags,
    /// Pipeline stage that performs the access
    pub stage: vk::PipelineStageFlags,
}

/// Map a resource state to layout, access and stage
///
/// Present targets are handed to an external presenter by copy, so the
/// present state is a transfer source.
pub fn state_access(state: ResourceState) -> StateAccess {
    let (layout, access, stage) = match state {
        ResourceState::Undefined => (
            vk::ImageLayout::UNDEFINED,
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::TOP_OF_PIPE,
        ),
        ResourceState::CopyDest => (
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TRANSFER,
        ),
        ResourceState::ShaderResource => (
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        ),
        ResourceState::VertexBuffer => (
            vk::ImageLayout::UNDEFINED,
            vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
            vk::PipelineStageFlags::VERTEX_INPUT,
        ),
        ResourceState::RenderTarget => (
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        ResourceState::Present => (
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::AccessFlags::TRANSFER_READ,
            vk::PipelineStageFlags::TRANSFER,
        ),
    };
    StateAccess { layout, access, stage }
}

/// The external shader programs behind the two screen-space passes
///
/// Implementations bind their pipelines and descriptors and draw the
/// fullscreen quad; render-pass or dynamic-rendering setup is theirs too.
pub trait PassProgram: Send + Sync {
    /// Record the integrator draw into `pass.target`
    fn record_integrator(
        &self,
        device: &ash::Device,
        command_buffer: vk::CommandBuffer,
        pass: &IntegratorPass<'_, VulkanDevice>,
    ) -> VulkanResult<()>;

    /// Record the tone-map draw from `pass.source` into `pass.target`
    fn record_tone_map(
        &self,
        device: &ash::Device,
        command_buffer: vk::CommandBuffer,
        pass: &ToneMapPass<'_, VulkanDevice>,
    ) -> VulkanResult<()>;
}

/// Recording context: a command pool with one primary command buffer
pub struct VulkanRecorder {
    context: Arc<VulkanContext>,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    label: String,
    recording: bool,
    program: Option<Arc<dyn PassProgram>>,
    missing_program_warned: Arc<AtomicBool>,
}

impl VulkanRecorder {
    /// Create the pool and allocate the command buffer
    pub fn new(
        context: Arc<VulkanContext>,
        label: &str,
        program: Option<Arc<dyn PassProgram>>,
        missing_program_warned: Arc<AtomicBool>,
    ) -> VulkanResult<Self> {
        let device = context.raw_device();
        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(context.graphics_queue_family());

        let command_pool = unsafe {
            device.create_command_pool(&pool_create_info, None)
                .map_err(VulkanError::Api)?
        };

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let command_buffer = match unsafe { device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers[0],
            Err(err) => {
                unsafe { device.destroy_command_pool(command_pool, None) };
                return Err(VulkanError::Api(err));
            }
        };

        Ok(Self {
            context,
            command_pool,
            command_buffer,
            label: label.to_string(),
            recording: false,
            program,
            missing_program_warned,
        })
    }

    /// Get the command buffer handle
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// Whether commands are being recorded
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    fn ensure_recording(&self) -> GpuResult<()> {
        if self.recording {
            Ok(())
        } else {
            Err(GpuError::invalid(format!("'{}' is not recording", self.label)))
        }
    }

    fn image_barrier(
        &self,
        texture: &VulkanTexture,
        old_layout: vk::ImageLayout,
        from: StateAccess,
        to: StateAccess,
    ) {
        let (src_access, src_stage) = if old_layout == vk::ImageLayout::UNDEFINED {
            (vk::AccessFlags::empty(), vk::PipelineStageFlags::TOP_OF_PIPE)
        } else {
            (from.access, from.stage)
        };
        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(old_layout)
            .new_layout(to.layout)
            .src_access_mask(src_access)
            .dst_access_mask(to.access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(texture.image())
            .subresource_range(color_range())
            .build();

        unsafe {
            self.context.raw_device().cmd_pipeline_barrier(
                self.command_buffer,
                src_stage,
                to.stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }

    fn skip_pass(&self, name: &str) {
        if !self.missing_program_warned.swap(true, Ordering::Relaxed) {
            log::warn!("No pass program installed; skipping {} and all later passes", name);
        }
    }
}

impl CommandRecorder<VulkanDevice> for VulkanRecorder {
    fn label(&self) -> &str {
        &self.label
    }

    fn begin(&mut self) -> GpuResult<()> {
        if self.recording {
            return Err(GpuError::invalid(format!("'{}' is already recording", self.label)));
        }
        let device = self.context.raw_device();
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            device
                .reset_command_buffer(self.command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(VulkanError::Api)?;
            device
                .begin_command_buffer(self.command_buffer, &begin_info)
                .map_err(VulkanError::Api)?;
        }

        self.recording = true;
        Ok(())
    }

    fn copy_buffer(&mut self, src: &VulkanBuffer, dst: &VulkanBuffer, size: u64) -> GpuResult<()> {
        self.ensure_recording()?;
        let region = vk::BufferCopy { src_offset: 0, dst_offset: 0, size };
        unsafe {
            self.context
                .raw_device()
                .cmd_copy_buffer(self.command_buffer, src.handle(), dst.handle(), &[region]);
        }
        Ok(())
    }

    fn transition_buffer(
        &mut self,
        buffer: &VulkanBuffer,
        before: ResourceState,
        after: ResourceState,
    ) -> GpuResult<()> {
        self.ensure_recording()?;
        let (from, to) = (state_access(before), state_access(after));
        let barrier = vk::BufferMemoryBarrier::builder()
            .src_access_mask(from.access)
            .dst_access_mask(to.access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(buffer.handle())
            .offset(0)
            .size(vk::WHOLE_SIZE)
            .build();

        unsafe {
            self.context.raw_device().cmd_pipeline_barrier(
                self.command_buffer,
                from.stage,
                to.stage,
                vk::DependencyFlags::empty(),
                &[],
                &[barrier],
                &[],
            );
        }
        Ok(())
    }

    fn transition_texture(
        &mut self,
        texture: &VulkanTexture,
        before: ResourceState,
        after: ResourceState,
    ) -> GpuResult<()> {
        self.ensure_recording()?;
        let old_layout = texture.current_layout(before);
        self.image_barrier(texture, old_layout, state_access(before), state_access(after));
        texture.set_recorded_state(after);
        Ok(())
    }

    fn clear_texture(&mut self, texture: &VulkanTexture, color: [f32; 4]) -> GpuResult<()> {
        self.ensure_recording()?;
        let state = texture.recorded_state();
        let resting = state_access(state);
        let transfer = state_access(ResourceState::CopyDest);

        self.image_barrier(texture, texture.current_layout(state), resting, transfer);
        unsafe {
            self.context.raw_device().cmd_clear_color_image(
                self.command_buffer,
                texture.image(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &vk::ClearColorValue { float32: color },
                &[color_range()],
            );
        }
        self.image_barrier(texture, transfer.layout, transfer, resting);
        texture.set_recorded_state(state);
        Ok(())
    }

    fn integrator_pass(&mut self, pass: &IntegratorPass<'_, VulkanDevice>) -> GpuResult<()> {
        self.ensure_recording()?;
        match &self.program {
            Some(program) => {
                program.record_integrator(self.context.raw_device(), self.command_buffer, pass)?;
            }
            None => self.skip_pass("integrator"),
        }
        Ok(())
    }

    fn tone_map_pass(&mut self, pass: &ToneMapPass<'_, VulkanDevice>) -> GpuResult<()> {
        self.ensure_recording()?;
        match &self.program {
            Some(program) => {
                program.record_tone_map(self.context.raw_device(), self.command_buffer, pass)?;
            }
            None => self.skip_pass("tone map"),
        }
        Ok(())
    }

    fn end(&mut self) -> GpuResult<()> {
        self.ensure_recording()?;
        self.recording = false;
        unsafe {
            self.context
                .raw_device()
                .end_command_buffer(self.command_buffer)
                .map_err(VulkanError::Api)?;
        }
        Ok(())
    }
}

impl Drop for VulkanRecorder {
    fn drop(&mut self) {
        unsafe {
            // Destroying the pool frees its command buffer.
            self.context.raw_device().destroy_command_pool(self.command_pool, None);
        }
    }
}
