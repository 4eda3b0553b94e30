//! Per-frame-slot synchronization primitives and command recording state.

use std::sync::Arc;

use ash::vk;

use crate::context::VulkanContext;
use crate::Result;

/// Everything one in-flight frame slot needs: a fence (created signaled so
/// the first wait passes), an acquire and a render-complete semaphore, and
/// a command buffer reset each time the slot is reused.
pub struct FrameSync {
    device: Arc<ash::Device>,
    pub render_fence: vk::Fence,
    pub swapchain_semaphore: vk::Semaphore,
    pub render_semaphore: vk::Semaphore,
    pub command_pool: vk::CommandPool,
    pub command_buffer: vk::CommandBuffer,
}

impl FrameSync {
    pub fn new(context: &VulkanContext) -> Result<Self> {
        let fence_info =
            vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
        let render_fence = unsafe { context.device.create_fence(&fence_info, None)? };
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let swapchain_semaphore =
            unsafe { context.device.create_semaphore(&semaphore_info, None)? };
        let render_semaphore =
            unsafe { context.device.create_semaphore(&semaphore_info, None)? };
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(context.graphics_queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { context.device.create_command_pool(&pool_info, None)? };
        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer =
            unsafe { context.device.allocate_command_buffers(&allocate_info)?[0] };
        Ok(Self {
            device: Arc::clone(&context.device),
            render_fence,
            swapchain_semaphore,
            render_semaphore,
            command_pool,
            command_buffer,
        })
    }

    /// Blocks until the slot's previous submission has retired, then
    /// re-arms the fence.
    pub fn wait_and_reset(&self) -> Result<()> {
        unsafe {
            self.device
                .wait_for_fences(&[self.render_fence], true, u64::MAX)?;
            self.device.reset_fences(&[self.render_fence])?;
        }
        Ok(())
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_semaphore(self.render_semaphore, None);
            self.device.destroy_semaphore(self.swapchain_semaphore, None);
            self.device.destroy_fence(self.render_fence, None);
        }
    }
}
