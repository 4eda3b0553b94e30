//! Buffer allocation: device-address buffers, the init-time staging arena
//! (bump allocator, whole-arena reset) and the fence-waited immediate
//! uploader used for one-off asset transfers.

use std::sync::Arc;

use ash::vk;

use crate::context::VulkanContext;
use crate::{Error, Result};

pub struct AllocatedBuffer {
    device: Arc<ash::Device>,
    pub buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    pub size: u64,
    /// Raw GPU pointer, non-zero when created with SHADER_DEVICE_ADDRESS.
    pub device_address: vk::DeviceAddress,
    mapped: Option<*mut u8>,
}

impl AllocatedBuffer {
    fn create(
        context: &VulkanContext,
        size: u64,
        usage: vk::BufferUsageFlags,
        memory_flags: vk::MemoryPropertyFlags,
        map: bool,
    ) -> Result<Self> {
        let size = size.max(1);
        let create_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { context.device.create_buffer(&create_info, None)? };
        let requirements = unsafe { context.device.get_buffer_memory_requirements(buffer) };
        let memory_type_index = context.find_memory_type(requirements, memory_flags)?;

        let wants_address = usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS);
        let mut flags_info =
            vk::MemoryAllocateFlagsInfo::default().flags(vk::MemoryAllocateFlags::DEVICE_ADDRESS);
        let mut allocate_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);
        if wants_address {
            allocate_info = allocate_info.push_next(&mut flags_info);
        }
        let memory = unsafe { context.device.allocate_memory(&allocate_info, None)? };
        unsafe { context.device.bind_buffer_memory(buffer, memory, 0)? };

        let device_address = if wants_address {
            let address_info = vk::BufferDeviceAddressInfo::default().buffer(buffer);
            unsafe { context.device.get_buffer_device_address(&address_info) }
        } else {
            0
        };
        let mapped = if map {
            let ptr = unsafe {
                context
                    .device
                    .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())?
            };
            Some(ptr.cast::<u8>())
        } else {
            None
        };

        Ok(Self {
            device: Arc::clone(&context.device),
            buffer,
            memory,
            size,
            device_address,
            mapped,
        })
    }

    /// Device-local buffer, filled once through the immediate uploader.
    pub fn device_local(
        context: &VulkanContext,
        size: u64,
        usage: vk::BufferUsageFlags,
    ) -> Result<Self> {
        Self::create(
            context,
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            false,
        )
    }

    /// Host-visible, coherent, persistently mapped buffer.
    pub fn host_visible(
        context: &VulkanContext,
        size: u64,
        usage: vk::BufferUsageFlags,
    ) -> Result<Self> {
        Self::create(
            context,
            size,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            true,
        )
    }

    /// Copies `data` into the mapped region at `offset`.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mapped = self.mapped.ok_or(vk::Result::ERROR_MEMORY_MAP_FAILED)?;
        debug_assert!(offset + data.len() as u64 <= self.size);
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.add(offset as usize), data.len());
        }
        Ok(())
    }
}

impl Drop for AllocatedBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

impl std::fmt::Debug for AllocatedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocatedBuffer")
            .field("size", &self.size)
            .field("device_address", &self.device_address)
            .finish_non_exhaustive()
    }
}

/// Bump allocator over one host-visible staging buffer. Allocations are
/// only reclaimed by resetting the whole arena; uploads happen at init
/// time only, so no finer-grained reclamation is needed.
pub struct StagingArena {
    pub buffer: AllocatedBuffer,
    offset: u64,
}

impl StagingArena {
    pub fn new(context: &VulkanContext, capacity: u64) -> Result<Self> {
        let buffer =
            AllocatedBuffer::host_visible(context, capacity, vk::BufferUsageFlags::TRANSFER_SRC)?;
        Ok(Self { buffer, offset: 0 })
    }

    pub fn capacity(&self) -> u64 {
        self.buffer.size
    }

    pub fn allocate(&mut self, size: u64, align: u64) -> Result<u64> {
        let aligned = self.offset.next_multiple_of(align.max(1));
        if aligned + size > self.buffer.size {
            return Err(Error::StagingExhausted {
                requested: size,
                available: self.buffer.size.saturating_sub(aligned),
            });
        }
        self.offset = aligned + size;
        Ok(aligned)
    }

    /// Bump-allocates and writes `data`; returns its offset in the arena.
    pub fn push(&mut self, data: &[u8]) -> Result<u64> {
        let offset = self.allocate(data.len() as u64, 16)?;
        self.buffer.write(offset, data)?;
        Ok(offset)
    }

    pub fn reset(&mut self) {
        self.offset = 0;
    }
}

/// One command buffer plus fence for synchronous, one-off transfers.
pub struct ImmediateUploader {
    device: Arc<ash::Device>,
    queue: vk::Queue,
    fence: vk::Fence,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    staging: StagingArena,
}

impl ImmediateUploader {
    pub fn new(context: &VulkanContext, staging_capacity: u64) -> Result<Self> {
        let fence_info = vk::FenceCreateInfo::default();
        let fence = unsafe { context.device.create_fence(&fence_info, None)? };
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
        let staging = StagingArena::new(context, staging_capacity)?;
        Ok(Self {
            device: Arc::clone(&context.device),
            queue: context.graphics_queue,
            fence,
            command_pool,
            command_buffer,
            staging,
        })
    }

    /// Copies `data` into `dst` at offset 0, chunking through the staging
    /// arena and blocking on the fence for each chunk.
    pub fn upload(&mut self, data: &[u8], dst: &AllocatedBuffer) -> Result<()> {
        let capacity = self.staging.capacity() as usize;
        let mut written = 0usize;
        while written < data.len() {
            let chunk = (data.len() - written).min(capacity);
            self.staging.reset();
            let src_offset = self.staging.push(&data[written..written + chunk])?;
            self.submit_copy(src_offset, dst, written as u64, chunk as u64)?;
            written += chunk;
        }
        Ok(())
    }

    fn submit_copy(
        &self,
        src_offset: u64,
        dst: &AllocatedBuffer,
        dst_offset: u64,
        size: u64,
    ) -> Result<()> {
        unsafe {
            self.device.reset_command_buffer(
                self.command_buffer,
                vk::CommandBufferResetFlags::empty(),
            )?;
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.device.begin_command_buffer(self.command_buffer, &begin_info)?;
            let region = vk::BufferCopy::default()
                .src_offset(src_offset)
                .dst_offset(dst_offset)
                .size(size);
            self.device.cmd_copy_buffer(
                self.command_buffer,
                self.staging.buffer.buffer,
                dst.buffer,
                &[region],
            );
            self.device.end_command_buffer(self.command_buffer)?;

            let command_buffer_info =
                vk::CommandBufferSubmitInfo::default().command_buffer(self.command_buffer);
            let submit_info = vk::SubmitInfo2::default()
                .command_buffer_infos(std::slice::from_ref(&command_buffer_info));
            self.device
                .queue_submit2(self.queue, &[submit_info], self.fence)?;
            self.device.wait_for_fences(&[self.fence], true, u64::MAX)?;
            self.device.reset_fences(&[self.fence])?;
        }
        Ok(())
    }
}

impl Drop for ImmediateUploader {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_fence(self.fence, None);
        }
    }
}
