//! Off-screen render targets. Rendering happens into a fixed-format draw
//! image plus a depth image; the draw image is blitted to the swapchain
//! each frame.

use std::sync::Arc;

use ash::vk;

use crate::context::VulkanContext;
use crate::{Result, DEPTH_IMAGE_FORMAT, DRAW_IMAGE_FORMAT};

pub struct AllocatedImage {
    device: Arc<ash::Device>,
    pub image: vk::Image,
    pub view: vk::ImageView,
    memory: vk::DeviceMemory,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl AllocatedImage {
    pub fn new(
        context: &VulkanContext,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
    ) -> Result<Self> {
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { context.device.create_image(&create_info, None)? };
        let requirements = unsafe { context.device.get_image_memory_requirements(image) };
        let memory_type_index =
            context.find_memory_type(requirements, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;
        let allocate_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);
        let memory = unsafe { context.device.allocate_memory(&allocate_info, None)? };
        unsafe { context.device.bind_image_memory(image, memory, 0)? };

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(crate::cmd::subresource_range(aspect));
        let view = unsafe { context.device.create_image_view(&view_info, None)? };

        Ok(Self {
            device: Arc::clone(&context.device),
            image,
            view,
            memory,
            format,
            extent,
        })
    }
}

impl Drop for AllocatedImage {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// The draw + depth image pair every frame renders into.
pub struct RenderTargets {
    pub draw: AllocatedImage,
    pub depth: AllocatedImage,
}

impl RenderTargets {
    pub fn new(context: &VulkanContext, extent: vk::Extent2D) -> Result<Self> {
        let draw = AllocatedImage::new(
            context,
            extent,
            DRAW_IMAGE_FORMAT,
            vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST,
            vk::ImageAspectFlags::COLOR,
        )?;
        let depth = AllocatedImage::new(
            context,
            extent,
            DEPTH_IMAGE_FORMAT,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageAspectFlags::DEPTH,
        )?;
        Ok(Self { draw, depth })
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.draw.extent
    }
}
