//! The three render strategies and their push-constant ABIs. Every
//! strategy owns its pipeline and layout; resource access is through
//! buffer device addresses carried in push constants.

use std::path::Path;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use virga_rhi::{
    load_shader_module, Pipeline, PipelineLayout, RenderPipelineBuilder, VulkanContext,
    DEPTH_IMAGE_FORMAT, DRAW_IMAGE_FORMAT,
};

use crate::Result;

/// Meshlets handled per task-shader workgroup.
pub const TASK_WORKGROUP_SIZE: u32 = 32;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum RenderMode {
    MeshOnly,
    Sample,
    #[default]
    ClusterCull,
}

/// Device addresses of the uploaded model arrays.
#[derive(Clone, Copy, Debug)]
pub struct GpuModelAddresses {
    pub vertex_buffer: vk::DeviceAddress,
    pub meshlet_buffer: vk::DeviceAddress,
    pub meshlet_vertices: vk::DeviceAddress,
    pub meshlet_triangles: vk::DeviceAddress,
}

pub struct DrawParams<'a> {
    pub model_matrix: Mat4,
    pub scene_address: vk::DeviceAddress,
    pub model: &'a GpuModelAddresses,
    pub meshlet_count: u32,
}

pub trait DrawStrategy {
    fn label(&self) -> &'static str;
    fn draw(&self, context: &VulkanContext, cmd: vk::CommandBuffer, params: &DrawParams);
}

/// One mesh workgroup per meshlet, no GPU-side culling; the per-cluster
/// baseline the culling strategy is compared against.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct MeshOnlyPushConstant {
    pub model: Mat4,
    pub scene_data: u64,
    pub vertex_buffer: u64,
    pub meshlet_vertices: u64,
    pub meshlet_triangles: u64,
    pub meshlet_buffer: u64,
    pub _padding: [u32; 2],
}

/// Minimal mesh-shader sample: one workgroup, geometry generated in the
/// shader, only the scene constants are addressed.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct ClusterSamplePushConstant {
    pub model: Mat4,
    pub scene_data: u64,
    pub _padding: [u32; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct ClusterCullPushConstant {
    pub model: Mat4,
    pub scene_data: u64,
    pub vertex_buffer: u64,
    pub meshlet_vertices: u64,
    pub meshlet_triangles: u64,
    pub meshlet_buffer: u64,
    pub meshlet_count: u32,
    pub _padding: u32,
}

fn base_pipeline<'a>() -> RenderPipelineBuilder<'a> {
    RenderPipelineBuilder::new()
        .input_topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .polygon_mode(vk::PolygonMode::FILL)
        .cull_mode(vk::CullModeFlags::BACK, vk::FrontFace::COUNTER_CLOCKWISE)
        .disable_multisampling()
        .enable_depth_test(true, vk::CompareOp::GREATER_OR_EQUAL)
        .color_attachment_format(DRAW_IMAGE_FORMAT)
        .depth_attachment_format(DEPTH_IMAGE_FORMAT)
}

fn push_constants<T: Pod>(
    context: &VulkanContext,
    cmd: vk::CommandBuffer,
    layout: &PipelineLayout,
    stages: vk::ShaderStageFlags,
    value: &T,
) {
    unsafe {
        context.device.cmd_push_constants(
            cmd,
            layout.layout,
            stages,
            0,
            bytemuck::bytes_of(value),
        );
    }
}

pub struct MeshOnlyStrategy {
    layout: PipelineLayout,
    pipeline: Pipeline,
}

impl MeshOnlyStrategy {
    pub fn new(context: &VulkanContext, shader_dir: &Path) -> Result<Self> {
        let mesh = load_shader_module(context, &shader_dir.join("mesh_only.mesh.spv"))?;
        let fragment = load_shader_module(context, &shader_dir.join("mesh_only.frag.spv"))?;
        let layout = PipelineLayout::new(
            context,
            std::mem::size_of::<MeshOnlyPushConstant>() as u32,
            vk::ShaderStageFlags::MESH_EXT,
        )?;
        let pipeline = base_pipeline()
            .set_mesh_shaders(mesh.module, fragment.module)
            .build(context, &layout)?;
        Ok(Self { layout, pipeline })
    }
}

impl DrawStrategy for MeshOnlyStrategy {
    fn label(&self) -> &'static str {
        "mesh_only"
    }

    fn draw(&self, context: &VulkanContext, cmd: vk::CommandBuffer, params: &DrawParams) {
        let pc = MeshOnlyPushConstant {
            model: params.model_matrix,
            scene_data: params.scene_address,
            vertex_buffer: params.model.vertex_buffer,
            meshlet_vertices: params.model.meshlet_vertices,
            meshlet_triangles: params.model.meshlet_triangles,
            meshlet_buffer: params.model.meshlet_buffer,
            _padding: [0; 2],
        };
        unsafe {
            context.device.cmd_bind_pipeline(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline.pipeline,
            );
            push_constants(context, cmd, &self.layout, vk::ShaderStageFlags::MESH_EXT, &pc);
            context
                .mesh_shader_loader
                .cmd_draw_mesh_tasks(cmd, params.meshlet_count, 1, 1);
        }
    }
}

pub struct ClusterSampleStrategy {
    layout: PipelineLayout,
    pipeline: Pipeline,
}

impl ClusterSampleStrategy {
    pub fn new(context: &VulkanContext, shader_dir: &Path) -> Result<Self> {
        let mesh = load_shader_module(context, &shader_dir.join("cluster_sample.mesh.spv"))?;
        let fragment =
            load_shader_module(context, &shader_dir.join("cluster_sample.frag.spv"))?;
        let layout = PipelineLayout::new(
            context,
            std::mem::size_of::<ClusterSamplePushConstant>() as u32,
            vk::ShaderStageFlags::MESH_EXT,
        )?;
        let pipeline = base_pipeline()
            .cull_mode(vk::CullModeFlags::NONE, vk::FrontFace::COUNTER_CLOCKWISE)
            .set_mesh_shaders(mesh.module, fragment.module)
            .build(context, &layout)?;
        Ok(Self { layout, pipeline })
    }
}

impl DrawStrategy for ClusterSampleStrategy {
    fn label(&self) -> &'static str {
        "cluster_sample"
    }

    fn draw(&self, context: &VulkanContext, cmd: vk::CommandBuffer, params: &DrawParams) {
        let pc = ClusterSamplePushConstant {
            model: params.model_matrix,
            scene_data: params.scene_address,
            _padding: [0; 2],
        };
        unsafe {
            context.device.cmd_bind_pipeline(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline.pipeline,
            );
            push_constants(context, cmd, &self.layout, vk::ShaderStageFlags::MESH_EXT, &pc);
            context.mesh_shader_loader.cmd_draw_mesh_tasks(cmd, 1, 1, 1);
        }
    }
}

/// Task stage tests each meshlet's bounding sphere against the frustum and
/// its normal cone against the camera; only survivors get mesh workgroups.
pub struct ClusterCullStrategy {
    layout: PipelineLayout,
    pipeline: Pipeline,
}

impl ClusterCullStrategy {
    pub fn new(context: &VulkanContext, shader_dir: &Path) -> Result<Self> {
        let task = load_shader_module(context, &shader_dir.join("cluster_cull.task.spv"))?;
        let mesh = load_shader_module(context, &shader_dir.join("cluster_cull.mesh.spv"))?;
        let fragment = load_shader_module(context, &shader_dir.join("cluster_cull.frag.spv"))?;
        let layout = PipelineLayout::new(
            context,
            std::mem::size_of::<ClusterCullPushConstant>() as u32,
            vk::ShaderStageFlags::TASK_EXT | vk::ShaderStageFlags::MESH_EXT,
        )?;
        let pipeline = base_pipeline()
            .set_task_mesh_shaders(task.module, mesh.module, fragment.module)
            .build(context, &layout)?;
        Ok(Self { layout, pipeline })
    }
}

impl DrawStrategy for ClusterCullStrategy {
    fn label(&self) -> &'static str {
        "cluster_cull"
    }

    fn draw(&self, context: &VulkanContext, cmd: vk::CommandBuffer, params: &DrawParams) {
        let pc = ClusterCullPushConstant {
            model: params.model_matrix,
            scene_data: params.scene_address,
            vertex_buffer: params.model.vertex_buffer,
            meshlet_vertices: params.model.meshlet_vertices,
            meshlet_triangles: params.model.meshlet_triangles,
            meshlet_buffer: params.model.meshlet_buffer,
            meshlet_count: params.meshlet_count,
            _padding: 0,
        };
        let groups = params.meshlet_count.div_ceil(TASK_WORKGROUP_SIZE);
        unsafe {
            context.device.cmd_bind_pipeline(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline.pipeline,
            );
            push_constants(
                context,
                cmd,
                &self.layout,
                vk::ShaderStageFlags::TASK_EXT | vk::ShaderStageFlags::MESH_EXT,
                &pc,
            );
            context
                .mesh_shader_loader
                .cmd_draw_mesh_tasks(cmd, groups, 1, 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_constant_sizes() {
        assert_eq!(std::mem::size_of::<MeshOnlyPushConstant>(), 112);
        assert_eq!(std::mem::size_of::<ClusterSamplePushConstant>(), 80);
        assert_eq!(std::mem::size_of::<ClusterCullPushConstant>(), 112);
    }

    #[test]
    fn default_mode_is_cluster_cull() {
        assert_eq!(RenderMode::default(), RenderMode::ClusterCull);
    }

    #[test]
    fn task_group_rounding() {
        assert_eq!(0u32.div_ceil(TASK_WORKGROUP_SIZE), 0);
        assert_eq!(1u32.div_ceil(TASK_WORKGROUP_SIZE), 1);
        assert_eq!(32u32.div_ceil(TASK_WORKGROUP_SIZE), 1);
        assert_eq!(33u32.div_ceil(TASK_WORKGROUP_SIZE), 2);
    }
}
