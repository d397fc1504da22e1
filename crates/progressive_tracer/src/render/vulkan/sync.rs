//! Vulkan synchronization primitives for GPU/CPU coordination
//!
//! The tracer needs exactly one synchronization object: a timeline semaphore
//! whose counter plays the role of the monotonic frame fence. The queue
//! signals increasing values after each batch of work, and the CPU either
//! polls the counter or blocks until it reaches a value.
//!
//! ```text
//! CPU: submit(frame) signal(5) ... wait(5)
//! GPU:        [frame ...........] -> counter = 5
//! ```
//!
//! Binary semaphores and per-frame fences are not needed: there is no
//! swapchain, and a single counter covers every frame slot.

use std::sync::Arc;

use ash::vk;

use super::context::{VulkanContext, VulkanError, VulkanResult};

/// Timeline semaphore wrapper with RAII cleanup
pub struct TimelineSemaphore {
    context: Arc<VulkanContext>,
    semaphore: vk::Semaphore,
}

impl TimelineSemaphore {
    /// Create a timeline semaphore starting at 0
    pub fn new(context: Arc<VulkanContext>) -> VulkanResult<Self> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::builder()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(0);
        let create_info = vk::SemaphoreCreateInfo::builder().push_next(&mut type_info);

        let semaphore = unsafe {
            context.raw_device().create_semaphore(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { context, semaphore })
    }

    /// Queue a signal of `value` after everything submitted before
    pub fn signal_on_queue(&self, value: u64) -> VulkanResult<()> {
        let semaphores = [self.semaphore];
        let values = [value];
        let mut timeline_info =
            vk::TimelineSemaphoreSubmitInfo::builder().signal_semaphore_values(&values);
        let submit_info = vk::SubmitInfo::builder()
            .signal_semaphores(&semaphores)
            .push_next(&mut timeline_info)
            .build();

        unsafe {
            self.context
                .raw_device()
                .queue_submit(self.context.graphics_queue(), &[submit_info], vk::Fence::null())
                .map_err(VulkanError::Api)
        }
    }

    /// Current counter value
    pub fn value(&self) -> VulkanResult<u64> {
        unsafe {
            self.context
                .raw_device()
                .get_semaphore_counter_value(self.semaphore)
                .map_err(VulkanError::Api)
        }
    }

    /// Block until the counter reaches `value` or `timeout_ns` elapses
    pub fn wait_for_value(&self, value: u64, timeout_ns: u64) -> VulkanResult<()> {
        let semaphores = [self.semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::builder()
            .semaphores(&semaphores)
            .values(&values);

        unsafe {
            self.context
                .raw_device()
                .wait_semaphores(&wait_info, timeout_ns)
                .map_err(VulkanError::Api)
        }
    }

    /// Get semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for TimelineSemaphore {
    fn drop(&mut self) {
        unsafe {
            self.context.raw_device().destroy_semaphore(self.semaphore, None);
        }
    }
}
