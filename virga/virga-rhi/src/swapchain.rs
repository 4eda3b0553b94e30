//! Swapchain wrapper: fixed SRGB format, three images, FIFO presentation.
//! Acquire/present report a stale or suboptimal surface as a typed error;
//! the demo treats that as fatal rather than recreating the swapchain.

use std::sync::Arc;

use ash::vk;

use crate::context::VulkanContext;
use crate::{Error, Result, SWAPCHAIN_COLOR_SPACE, SWAPCHAIN_IMAGE_FORMAT};

pub struct Swapchain {
    device: Arc<ash::Device>,
    loader: ash::khr::swapchain::Device,
    pub handle: vk::SwapchainKHR,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
}

impl Swapchain {
    pub fn new(context: &VulkanContext, width: u32, height: u32) -> Result<Self> {
        let capabilities = unsafe {
            context
                .surface_loader
                .get_physical_device_surface_capabilities(
                    context.physical_device,
                    context.surface,
                )?
        };
        let extent = vk::Extent2D {
            width: width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        };
        let formats = unsafe {
            context
                .surface_loader
                .get_physical_device_surface_formats(context.physical_device, context.surface)?
        };
        let format = formats
            .iter()
            .find(|f| {
                f.format == SWAPCHAIN_IMAGE_FORMAT && f.color_space == SWAPCHAIN_COLOR_SPACE
            })
            .copied()
            .ok_or(Error::DeviceSelection(String::from(
                "surface does not support the B8G8R8A8_SRGB swapchain format",
            )))?;

        // Frame pacing assumes exactly FRAMES_IN_FLIGHT swapchain images.
        let image_count = (crate::FRAMES_IN_FLIGHT as u32)
            .max(capabilities.min_image_count)
            .min(if capabilities.max_image_count == 0 {
                u32::MAX
            } else {
                capabilities.max_image_count
            });

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(context.surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(vk::PresentModeKHR::FIFO)
            .clipped(true);
        let handle = unsafe { context.swapchain_loader.create_swapchain(&create_info, None)? };
        let images = unsafe { context.swapchain_loader.get_swapchain_images(handle)? };

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            let view_create_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format.format)
                .subresource_range(crate::subresource_range(vk::ImageAspectFlags::COLOR));
            let view = unsafe { context.device.create_image_view(&view_create_info, None)? };
            image_views.push(view);
        }

        Ok(Self {
            device: Arc::clone(&context.device),
            loader: context.swapchain_loader.clone(),
            handle,
            format: format.format,
            extent,
            images,
            image_views,
        })
    }

    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// Blocking acquire; the semaphore is signaled when the image is ready.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<u32> {
        let result = unsafe {
            self.loader
                .acquire_next_image(self.handle, u64::MAX, semaphore, vk::Fence::null())
        };
        match result {
            Ok((index, false)) => Ok(index),
            Ok((_, true)) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                Err(Error::SurfaceOutdated("acquire"))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<()> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [self.handle];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        let result = unsafe { self.loader.queue_present(queue, &present_info) };
        match result {
            Ok(false) => Ok(()),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                Err(Error::SurfaceOutdated("present"))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.handle, None);
        }
    }
}

impl std::fmt::Debug for Swapchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Swapchain")
            .field("extent", &self.extent)
            .field("image_count", &self.images.len())
            .finish()
    }
}
