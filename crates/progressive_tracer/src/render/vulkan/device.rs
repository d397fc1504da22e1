//! [`GpuDevice`] implementation on top of Vulkan
//!
//! All work goes to the single graphics queue. The frame fence is a timeline
//! semaphore signalled by empty submissions queued behind the frame's work.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use ash::vk;

use crate::core::config::BackendConfig;
use crate::render::backend::{BufferDesc, GpuDevice, GpuError, GpuResult, TextureDesc};

use super::buffer::VulkanBuffer;
use super::commands::{PassProgram, VulkanRecorder};
use super::context::{VulkanContext, VulkanError, VulkanResult};
use super::sync::TimelineSemaphore;
use super::texture::VulkanTexture;

/// Vulkan accelerator
pub struct VulkanDevice {
    semaphore: TimelineSemaphore,
    pass_program: Option<Arc<dyn PassProgram>>,
    missing_program_warned: Arc<AtomicBool>,
    context: Arc<VulkanContext>,
}

impl VulkanDevice {
    /// Create an instance, pick a device and create the frame fence
    pub fn new(config: &BackendConfig) -> VulkanResult<Self> {
        let context = Arc::new(VulkanContext::new(
            &config.application_name,
            config.validation_enabled(),
        )?);
        let semaphore = TimelineSemaphore::new(Arc::clone(&context))?;

        log::info!("Vulkan device ready: {}", context.physical_device.name);
        Ok(Self {
            semaphore,
            pass_program: None,
            missing_program_warned: Arc::new(AtomicBool::new(false)),
            context,
        })
    }

    /// Install the shader programs recorded by the screen-space passes
    ///
    /// Only recorders created afterwards use it.
    pub fn with_pass_program(mut self, program: Arc<dyn PassProgram>) -> Self {
        self.pass_program = Some(program);
        self
    }

    /// Shared Vulkan context
    pub fn context(&self) -> &Arc<VulkanContext> {
        &self.context
    }
}

impl GpuDevice for VulkanDevice {
    type Buffer = VulkanBuffer;
    type Texture = VulkanTexture;
    type Recorder = VulkanRecorder;

    fn name(&self) -> &str {
        &self.context.physical_device.name
    }

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> GpuResult<VulkanBuffer> {
        Ok(VulkanBuffer::new(Arc::clone(&self.context), desc)?)
    }

    fn create_texture(&self, desc: &TextureDesc<'_>) -> GpuResult<VulkanTexture> {
        Ok(VulkanTexture::new(Arc::clone(&self.context), desc)?)
    }

    fn create_recorder(&self, label: &str) -> GpuResult<VulkanRecorder> {
        Ok(VulkanRecorder::new(
            Arc::clone(&self.context),
            label,
            self.pass_program.clone(),
            Arc::clone(&self.missing_program_warned),
        )?)
    }

    fn submit(&self, recorder: &mut VulkanRecorder) -> GpuResult<()> {
        if recorder.is_recording() {
            return Err(GpuError::invalid("cannot submit a context that is still recording"));
        }
        let command_buffers = [recorder.command_buffer()];
        let submit_info = vk::SubmitInfo::builder()
            .command_buffers(&command_buffers)
            .build();

        unsafe {
            self.context
                .raw_device()
                .queue_submit(self.context.graphics_queue(), &[submit_info], vk::Fence::null())
                .map_err(VulkanError::Api)?;
        }
        Ok(())
    }

    fn signal(&self, value: u64) -> GpuResult<()> {
        Ok(self.semaphore.signal_on_queue(value)?)
    }

    fn completed_value(&self) -> GpuResult<u64> {
        Ok(self.semaphore.value()?)
    }

    fn wait_for(&self, value: u64) -> GpuResult<()> {
        Ok(self.semaphore.wait_for_value(value, u64::MAX)?)
    }

    fn present(&self, _target: &VulkanTexture) -> GpuResult<()> {
        // Presentation is owned by the embedding host, which copies the
        // target out of its transfer-source layout.
        log::trace!("present target ready");
        Ok(())
    }
}
