//! Frame orchestration: slot rotation over three frames in flight, scene
//! constant upload, command recording and the blit to the swapchain.

use ash::vk;
use bytemuck::bytes_of;
use glam::Mat4;

use virga_cluster::ExtractedMeshletModel;
use virga_rhi::{
    blit_image, image_barrier, render_target_barriers, AllocatedBuffer, FrameSync,
    ImmediateUploader, RenderTargets, Swapchain, VulkanContext, FRAMES_IN_FLIGHT,
};

use crate::scene::{Camera, FrameClock, SceneData};
use crate::strategy::{
    ClusterCullStrategy, ClusterSampleStrategy, DrawParams, DrawStrategy, GpuModelAddresses,
    MeshOnlyStrategy, RenderMode,
};
use crate::{Error, Result};

const STAGING_CAPACITY: u64 = 32 * 1024;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum SlotState {
    Idle,
    Recording,
    Submitted,
}

/// Attempted to record into a slot whose previous submission has not
/// been observed retired.
#[derive(Debug, PartialEq, Eq)]
pub struct SlotInFlight(pub usize);

/// Pure frame-slot rotation. The GPU side (fences) lives in `FrameSync`;
/// this tracks which slot the next frame uses and refuses to hand out a
/// slot that is still in flight.
pub struct FrameSlots {
    states: [SlotState; FRAMES_IN_FLIGHT],
    frame_number: u64,
}

impl FrameSlots {
    pub fn new() -> Self {
        Self {
            states: [SlotState::Idle; FRAMES_IN_FLIGHT],
            frame_number: 0,
        }
    }

    pub fn current(&self) -> usize {
        (self.frame_number % FRAMES_IN_FLIGHT as u64) as usize
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Marks the slot's submission retired (its fence was seen signaled).
    /// A slot that was never submitted stays idle.
    pub fn retired(&mut self, slot: usize) {
        if self.states[slot] == SlotState::Submitted {
            self.states[slot] = SlotState::Idle;
        }
    }

    /// Claims the current slot for recording.
    pub fn acquire(&mut self) -> std::result::Result<usize, SlotInFlight> {
        let slot = self.current();
        if self.states[slot] != SlotState::Idle {
            return Err(SlotInFlight(slot));
        }
        self.states[slot] = SlotState::Recording;
        Ok(slot)
    }

    /// Marks the slot submitted and advances to the next frame.
    pub fn submitted(&mut self, slot: usize) {
        debug_assert_eq!(self.states[slot], SlotState::Recording);
        self.states[slot] = SlotState::Submitted;
        self.frame_number += 1;
    }
}

impl Default for FrameSlots {
    fn default() -> Self {
        Self::new()
    }
}

/// Hook for drawing on top of the scene before the strategy dispatch.
pub trait Overlay {
    fn draw(&mut self, context: &VulkanContext, cmd: vk::CommandBuffer);
}

pub struct NoOverlay;

impl Overlay for NoOverlay {
    fn draw(&mut self, _context: &VulkanContext, _cmd: vk::CommandBuffer) {}
}

/// The model's arrays uploaded once into device-local, address-visible
/// buffers.
pub struct GpuModel {
    _vertex_buffer: AllocatedBuffer,
    _meshlet_buffer: AllocatedBuffer,
    _meshlet_vertices: AllocatedBuffer,
    _meshlet_triangles: AllocatedBuffer,
    pub addresses: GpuModelAddresses,
    pub meshlet_count: u32,
    pub model_matrix: Mat4,
}

impl GpuModel {
    pub fn upload(
        context: &VulkanContext,
        uploader: &mut ImmediateUploader,
        model: &ExtractedMeshletModel,
    ) -> Result<Self> {
        let usage = vk::BufferUsageFlags::STORAGE_BUFFER
            | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;

        let vertex_bytes = bytemuck::cast_slice::<_, u8>(&model.vertices);
        let meshlet_bytes = bytemuck::cast_slice::<_, u8>(&model.meshlets);
        let meshlet_vertex_bytes = bytemuck::cast_slice::<_, u8>(&model.meshlet_vertices);
        // Triangle indices are bytes; pad the upload to a 4-byte multiple
        // so the shader can address them as packed words.
        let mut triangle_bytes = model.meshlet_triangles.clone();
        triangle_bytes.resize(triangle_bytes.len().next_multiple_of(4), 0);

        let vertex_buffer =
            AllocatedBuffer::device_local(context, vertex_bytes.len() as u64, usage)?;
        let meshlet_buffer =
            AllocatedBuffer::device_local(context, meshlet_bytes.len() as u64, usage)?;
        let meshlet_vertices =
            AllocatedBuffer::device_local(context, meshlet_vertex_bytes.len() as u64, usage)?;
        let meshlet_triangles =
            AllocatedBuffer::device_local(context, triangle_bytes.len() as u64, usage)?;

        uploader.upload(vertex_bytes, &vertex_buffer)?;
        uploader.upload(meshlet_bytes, &meshlet_buffer)?;
        uploader.upload(meshlet_vertex_bytes, &meshlet_vertices)?;
        uploader.upload(&triangle_bytes, &meshlet_triangles)?;

        let addresses = GpuModelAddresses {
            vertex_buffer: vertex_buffer.device_address,
            meshlet_buffer: meshlet_buffer.device_address,
            meshlet_vertices: meshlet_vertices.device_address,
            meshlet_triangles: meshlet_triangles.device_address,
        };
        Ok(Self {
            _vertex_buffer: vertex_buffer,
            _meshlet_buffer: meshlet_buffer,
            _meshlet_vertices: meshlet_vertices,
            _meshlet_triangles: meshlet_triangles,
            addresses,
            meshlet_count: model.meshlets.len() as u32,
            model_matrix: model.transform.model_matrix(),
        })
    }
}

pub struct Renderer {
    // Declaration order is drop order; the context must outlive every
    // resource below, so it is the last field.
    slots: FrameSlots,
    frames: Vec<FrameSync>,
    scene_buffers: Vec<AllocatedBuffer>,
    previous_scene: Option<SceneData>,
    camera: Camera,
    clock: FrameClock,
    model: GpuModel,
    mesh_only: MeshOnlyStrategy,
    cluster_sample: ClusterSampleStrategy,
    cluster_cull: ClusterCullStrategy,
    mode: RenderMode,
    overlay: Box<dyn Overlay>,
    targets: RenderTargets,
    swapchain: Swapchain,
    context: VulkanContext,
}

impl Renderer {
    pub fn new(
        context: VulkanContext,
        width: u32,
        height: u32,
        shader_dir: &std::path::Path,
        model: &ExtractedMeshletModel,
    ) -> Result<Self> {
        let swapchain = Swapchain::new(&context, width, height)?;
        let targets = RenderTargets::new(&context, swapchain.extent)?;

        let mut frames = Vec::with_capacity(FRAMES_IN_FLIGHT);
        let mut scene_buffers = Vec::with_capacity(FRAMES_IN_FLIGHT);
        for _ in 0..FRAMES_IN_FLIGHT {
            frames.push(FrameSync::new(&context)?);
            scene_buffers.push(AllocatedBuffer::host_visible(
                &context,
                std::mem::size_of::<SceneData>() as u64,
                vk::BufferUsageFlags::STORAGE_BUFFER
                    | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            )?);
        }

        let mut uploader = ImmediateUploader::new(&context, STAGING_CAPACITY)?;
        let model = GpuModel::upload(&context, &mut uploader, model)?;
        drop(uploader);

        let mesh_only = MeshOnlyStrategy::new(&context, shader_dir)?;
        let cluster_sample = ClusterSampleStrategy::new(&context, shader_dir)?;
        let cluster_cull = ClusterCullStrategy::new(&context, shader_dir)?;

        log::info!(
            "renderer ready: {}x{}, {} swapchain images, {} meshlets",
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.image_count(),
            model.meshlet_count
        );

        Ok(Self {
            slots: FrameSlots::new(),
            frames,
            scene_buffers,
            previous_scene: None,
            camera: Camera::new(),
            clock: FrameClock::new(),
            model,
            mesh_only,
            cluster_sample,
            cluster_cull,
            mode: RenderMode::default(),
            overlay: Box::new(NoOverlay),
            targets,
            swapchain,
            context,
        })
    }

    pub fn set_mode(&mut self, mode: RenderMode) {
        if self.mode != mode {
            self.mode = mode;
            log::info!("render mode: {}", self.strategy().label());
        }
    }

    fn strategy(&self) -> &dyn DrawStrategy {
        match self.mode {
            RenderMode::MeshOnly => &self.mesh_only,
            RenderMode::Sample => &self.cluster_sample,
            RenderMode::ClusterCull => &self.cluster_cull,
        }
    }

    pub fn draw_frame(&mut self) -> Result<()> {
        let slot = self.slots.current();
        self.frames[slot].wait_and_reset()?;
        self.slots.retired(slot);
        let slot = self.slots.acquire().map_err(|SlotInFlight(i)| Error::SlotInFlight(i))?;

        let extent = self.targets.extent();
        let scene = self.camera.scene_data(
            extent.width,
            extent.height,
            self.clock.tick(),
            self.previous_scene.as_ref(),
        );
        self.scene_buffers[slot].write(0, bytes_of(&scene))?;
        self.previous_scene = Some(scene);

        let image_index = self.record(slot)?;
        self.submit(slot)?;
        self.slots.submitted(slot);
        self.swapchain.present(
            self.context.graphics_queue,
            image_index,
            self.frames[slot].render_semaphore,
        )?;
        Ok(())
    }

    fn record(&mut self, slot: usize) -> Result<u32> {
        let cmd = self.frames[slot].command_buffer;
        let acquire_semaphore = self.frames[slot].swapchain_semaphore;
        let extent = self.targets.extent();

        unsafe {
            self.context
                .device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.context.device.begin_command_buffer(cmd, &begin_info)?;
        }

        // Both attachments must be in their declared layouts before the
        // rendering pass begins; contents are cleared, so UNDEFINED is fine
        // as the source.
        let barriers =
            render_target_barriers(self.targets.draw.image, self.targets.depth.image);
        let dependency_info =
            vk::DependencyInfo::default().image_memory_barriers(&barriers);
        unsafe {
            self.context
                .device
                .cmd_pipeline_barrier2(cmd, &dependency_info);
        }

        self.overlay_pass(cmd);
        self.geometry_pass(slot, cmd, extent);

        let image_index = self.swapchain.acquire_next_image(acquire_semaphore)?;
        let swapchain_image = self.swapchain.images[image_index as usize];

        self.barrier(
            cmd,
            image_barrier(
                self.targets.draw.image,
                vk::ImageAspectFlags::COLOR,
                vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::PipelineStageFlags2::BLIT,
                vk::AccessFlags2::TRANSFER_READ,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            ),
        );
        self.barrier(
            cmd,
            image_barrier(
                swapchain_image,
                vk::ImageAspectFlags::COLOR,
                vk::PipelineStageFlags2::TOP_OF_PIPE,
                vk::AccessFlags2::empty(),
                vk::ImageLayout::UNDEFINED,
                vk::PipelineStageFlags2::BLIT,
                vk::AccessFlags2::TRANSFER_WRITE,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ),
        );

        blit_image(
            &self.context.device,
            cmd,
            self.targets.draw.image,
            extent,
            swapchain_image,
            self.swapchain.extent,
        );

        self.barrier(
            cmd,
            image_barrier(
                swapchain_image,
                vk::ImageAspectFlags::COLOR,
                vk::PipelineStageFlags2::BLIT,
                vk::AccessFlags2::TRANSFER_WRITE,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
                vk::AccessFlags2::empty(),
                vk::ImageLayout::PRESENT_SRC_KHR,
            ),
        );

        unsafe { self.context.device.end_command_buffer(cmd)? };
        Ok(image_index)
    }

    fn overlay_pass(&mut self, cmd: vk::CommandBuffer) {
        // Split-borrow the overlay so it can take &mut self alongside the
        // context reference.
        let mut overlay = std::mem::replace(&mut self.overlay, Box::new(NoOverlay));
        overlay.draw(&self.context, cmd);
        self.overlay = overlay;
    }

    fn geometry_pass(&self, slot: usize, cmd: vk::CommandBuffer, extent: vk::Extent2D) {
        let device = &self.context.device;
        let color_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(self.targets.draw.view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: [0.02, 0.02, 0.03, 1.0],
                },
            });
        // Reversed depth clears to 0.0 (the farthest value).
        let depth_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(self.targets.depth.view)
            .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 0.0,
                    stencil: 0,
                },
            });
        let rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .layer_count(1)
            .color_attachments(std::slice::from_ref(&color_attachment))
            .depth_attachment(&depth_attachment);

        let viewport = vk::Viewport::default()
            .width(extent.width as f32)
            .height(extent.height as f32)
            .min_depth(0.0)
            .max_depth(1.0);
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };

        unsafe {
            device.cmd_begin_rendering(cmd, &rendering_info);
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[scissor]);
            let params = DrawParams {
                model_matrix: self.model.model_matrix,
                scene_address: self.scene_buffers[slot].device_address,
                model: &self.model.addresses,
                meshlet_count: self.model.meshlet_count,
            };
            self.strategy().draw(&self.context, cmd, &params);
            device.cmd_end_rendering(cmd);
        }
    }

    fn barrier(&self, cmd: vk::CommandBuffer, barrier: vk::ImageMemoryBarrier2<'static>) {
        let dependency_info = vk::DependencyInfo::default()
            .image_memory_barriers(std::slice::from_ref(&barrier));
        unsafe {
            self.context.device.cmd_pipeline_barrier2(cmd, &dependency_info);
        }
    }

    fn submit(&self, slot: usize) -> Result<()> {
        let frame = &self.frames[slot];
        let wait_info = vk::SemaphoreSubmitInfo::default()
            .semaphore(frame.swapchain_semaphore)
            .stage_mask(vk::PipelineStageFlags2::BLIT);
        let signal_info = vk::SemaphoreSubmitInfo::default()
            .semaphore(frame.render_semaphore)
            .stage_mask(vk::PipelineStageFlags2::ALL_GRAPHICS);
        let command_buffer_info =
            vk::CommandBufferSubmitInfo::default().command_buffer(frame.command_buffer);
        let submit_info = vk::SubmitInfo2::default()
            .wait_semaphore_infos(std::slice::from_ref(&wait_info))
            .command_buffer_infos(std::slice::from_ref(&command_buffer_info))
            .signal_semaphore_infos(std::slice::from_ref(&signal_info));
        unsafe {
            self.context.device.queue_submit2(
                self.context.graphics_queue,
                &[submit_info],
                frame.render_fence,
            )?;
        }
        Ok(())
    }

    /// Blocks until the GPU is idle; call before teardown.
    pub fn wait_idle(&self) -> Result<()> {
        self.context.wait_idle()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_cycle_in_order() {
        let mut slots = FrameSlots::new();
        for expected in [0usize, 1, 2, 0, 1, 2, 0] {
            // Fence observed signaled immediately (GPU keeps up).
            let slot = slots.current();
            slots.retired(slot);
            let slot = slots.acquire().unwrap();
            assert_eq!(slot, expected);
            slots.submitted(slot);
        }
        assert_eq!(slots.frame_number(), 7);
    }

    #[test]
    fn refuses_outstanding_slot() {
        let mut slots = FrameSlots::new();
        let slot = slots.acquire().unwrap();
        slots.submitted(slot);
        slots.acquire().unwrap();
        slots.submitted(1);
        slots.acquire().unwrap();
        slots.submitted(2);
        // Back at slot 0, whose submission was never retired.
        assert_eq!(slots.acquire(), Err(SlotInFlight(0)));
        slots.retired(0);
        assert_eq!(slots.acquire(), Ok(0));
    }

    #[test]
    fn retiring_idle_slot_is_harmless() {
        let mut slots = FrameSlots::new();
        slots.retired(0);
        assert_eq!(slots.acquire(), Ok(0));
    }
}
