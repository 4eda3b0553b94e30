//! Instance/device/queue setup. The device is created with the fixed
//! feature set the demo depends on: dynamic rendering, synchronization2,
//! buffer device addresses and EXT task/mesh shaders.

use std::ffi::CStr;
use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::{Error, Result};

const DEVICE_EXTENSIONS: [&CStr; 2] = [ash::khr::swapchain::NAME, ash::ext::mesh_shader::NAME];

pub struct VulkanContext {
    #[allow(dead_code)]
    entry: ash::Entry,
    pub instance: ash::Instance,
    pub surface: vk::SurfaceKHR,
    pub surface_loader: ash::khr::surface::Instance,
    pub physical_device: vk::PhysicalDevice,
    pub device: Arc<ash::Device>,
    pub swapchain_loader: ash::khr::swapchain::Device,
    pub mesh_shader_loader: ash::ext::mesh_shader::Device,
    pub graphics_queue: vk::Queue,
    pub graphics_queue_family: u32,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl VulkanContext {
    pub fn new(window: &(impl HasDisplayHandle + HasWindowHandle)) -> Result<Self> {
        let display_handle = window
            .display_handle()
            .map_err(|e| Error::WindowHandle(e.to_string()))?
            .as_raw();
        let window_handle = window
            .window_handle()
            .map_err(|e| Error::WindowHandle(e.to_string()))?
            .as_raw();

        let entry = unsafe { ash::Entry::load()? };
        let app_info = vk::ApplicationInfo::default()
            .application_name(c"Virga Task Mesh Rendering")
            .engine_name(c"Virga")
            .api_version(vk::API_VERSION_1_3);
        let instance_extensions = ash_window::enumerate_required_extensions(display_handle)?;
        let instance_create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(instance_extensions);
        let instance = unsafe { entry.create_instance(&instance_create_info, None)? };

        let surface = unsafe {
            ash_window::create_surface(&entry, &instance, display_handle, window_handle, None)?
        };
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

        let (physical_device, graphics_queue_family) =
            Self::select_physical_device(&instance, &surface_loader, surface)?;
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let device_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
        log::info!("using physical device {:?}", device_name);

        let queue_priorities = [1.0f32];
        let queue_create_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(graphics_queue_family)
            .queue_priorities(&queue_priorities);

        let mut features13 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);
        let mut features12 =
            vk::PhysicalDeviceVulkan12Features::default().buffer_device_address(true);
        let mut mesh_shader_features = vk::PhysicalDeviceMeshShaderFeaturesEXT::default()
            .task_shader(true)
            .mesh_shader(true);
        let mut features2 = vk::PhysicalDeviceFeatures2::default()
            .push_next(&mut features13)
            .push_next(&mut features12)
            .push_next(&mut mesh_shader_features);

        let extension_names: Vec<*const std::ffi::c_char> =
            DEVICE_EXTENSIONS.iter().map(|name| name.as_ptr()).collect();
        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_extension_names(&extension_names)
            .push_next(&mut features2);
        let device =
            unsafe { instance.create_device(physical_device, &device_create_info, None)? };
        let graphics_queue = unsafe { device.get_device_queue(graphics_queue_family, 0) };

        let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);
        let mesh_shader_loader = ash::ext::mesh_shader::Device::new(&instance, &device);
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        Ok(Self {
            entry,
            instance,
            surface,
            surface_loader,
            physical_device,
            device: Arc::new(device),
            swapchain_loader,
            mesh_shader_loader,
            graphics_queue,
            graphics_queue_family,
            memory_properties,
        })
    }

    /// First device offering a graphics+present queue family and the
    /// required extensions.
    fn select_physical_device(
        instance: &ash::Instance,
        surface_loader: &ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> Result<(vk::PhysicalDevice, u32)> {
        let devices = unsafe { instance.enumerate_physical_devices()? };
        for device in devices {
            let extensions =
                unsafe { instance.enumerate_device_extension_properties(device)? };
            let has_required = DEVICE_EXTENSIONS.iter().all(|required| {
                extensions.iter().any(|ext| {
                    let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
                    name == *required
                })
            });
            if !has_required {
                continue;
            }
            let families =
                unsafe { instance.get_physical_device_queue_family_properties(device) };
            let family = families.iter().enumerate().find_map(|(index, family)| {
                let graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
                let present = unsafe {
                    surface_loader
                        .get_physical_device_surface_support(device, index as u32, surface)
                        .unwrap_or(false)
                };
                (graphics && present).then_some(index as u32)
            });
            if let Some(family) = family {
                return Ok((device, family));
            }
        }
        Err(Error::DeviceSelection(
            "no device with graphics+present queue, swapchain and mesh shader support".into(),
        ))
    }

    pub fn find_memory_type(
        &self,
        requirements: vk::MemoryRequirements,
        flags: vk::MemoryPropertyFlags,
    ) -> Result<u32> {
        (0..self.memory_properties.memory_type_count)
            .find(|&i| {
                let suitable = requirements.memory_type_bits & (1 << i) != 0;
                let has_flags = self.memory_properties.memory_types[i as usize]
                    .property_flags
                    .contains(flags);
                suitable && has_flags
            })
            .ok_or_else(|| Error::DeviceSelection(format!("no memory type with {flags:?}")))
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            self.instance.destroy_instance(None);
        }
    }
}

impl std::fmt::Debug for VulkanContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanContext")
            .field("graphics_queue_family", &self.graphics_queue_family)
            .finish_non_exhaustive()
    }
}
