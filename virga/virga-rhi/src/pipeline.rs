//! Shader module loading and a builder for dynamic-rendering graphics
//! pipelines with task/mesh shader stages.

use std::path::Path;
use std::sync::Arc;

use ash::vk;

use crate::context::VulkanContext;
use crate::{Error, Result};

const SHADER_ENTRY: &std::ffi::CStr = c"main";

/// A shader module released on drop, so a failure partway through pipeline
/// construction cannot leak the modules loaded before it.
pub struct ShaderModule {
    device: Arc<ash::Device>,
    pub module: vk::ShaderModule,
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.device.destroy_shader_module(self.module, None) };
    }
}

/// Reads a SPIR-V file into words; a missing or malformed file is a typed
/// error carrying the path.
fn read_spirv(path: &Path) -> Result<Vec<u32>> {
    let bytes = std::fs::read(path).map_err(|e| Error::Shader {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    ash::util::read_spv(&mut std::io::Cursor::new(&bytes)).map_err(|e| Error::Shader {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Reads a SPIR-V file and creates a shader module from it.
pub fn load_shader_module(context: &VulkanContext, path: &Path) -> Result<ShaderModule> {
    let words = read_spirv(path)?;
    let create_info = vk::ShaderModuleCreateInfo::default().code(&words);
    let module = unsafe { context.device.create_shader_module(&create_info, None)? };
    Ok(ShaderModule {
        device: Arc::clone(&context.device),
        module,
    })
}

pub struct PipelineLayout {
    device: Arc<ash::Device>,
    pub layout: vk::PipelineLayout,
}

impl PipelineLayout {
    /// Layout with a single push-constant range and no descriptor sets;
    /// all resource access goes through buffer device addresses.
    pub fn new(
        context: &VulkanContext,
        push_constant_size: u32,
        stages: vk::ShaderStageFlags,
    ) -> Result<Self> {
        let range = vk::PushConstantRange::default()
            .stage_flags(stages)
            .offset(0)
            .size(push_constant_size);
        let create_info = vk::PipelineLayoutCreateInfo::default()
            .push_constant_ranges(std::slice::from_ref(&range));
        let layout = unsafe { context.device.create_pipeline_layout(&create_info, None)? };
        Ok(Self {
            device: Arc::clone(&context.device),
            layout,
        })
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe { self.device.destroy_pipeline_layout(self.layout, None) };
    }
}

pub struct Pipeline {
    device: Arc<ash::Device>,
    pub pipeline: vk::Pipeline,
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe { self.device.destroy_pipeline(self.pipeline, None) };
    }
}

/// Builder for graphics pipelines using dynamic rendering. Viewport and
/// scissor are dynamic state; there is no vertex input stage since vertex
/// data is pulled in the mesh shader.
pub struct RenderPipelineBuilder<'a> {
    shader_stages: Vec<vk::PipelineShaderStageCreateInfo<'a>>,
    input_assembly: vk::PipelineInputAssemblyStateCreateInfo<'a>,
    rasterization: vk::PipelineRasterizationStateCreateInfo<'a>,
    multisample: vk::PipelineMultisampleStateCreateInfo<'a>,
    depth_stencil: vk::PipelineDepthStencilStateCreateInfo<'a>,
    color_blend_attachment: vk::PipelineColorBlendAttachmentState,
    color_attachment_format: vk::Format,
    depth_attachment_format: vk::Format,
}

impl<'a> RenderPipelineBuilder<'a> {
    pub fn new() -> Self {
        Self {
            shader_stages: Vec::new(),
            input_assembly: vk::PipelineInputAssemblyStateCreateInfo::default(),
            rasterization: vk::PipelineRasterizationStateCreateInfo::default().line_width(1.0),
            multisample: vk::PipelineMultisampleStateCreateInfo::default(),
            depth_stencil: vk::PipelineDepthStencilStateCreateInfo::default(),
            color_blend_attachment: vk::PipelineColorBlendAttachmentState::default()
                .color_write_mask(vk::ColorComponentFlags::RGBA),
            color_attachment_format: vk::Format::UNDEFINED,
            depth_attachment_format: vk::Format::UNDEFINED,
        }
    }

    pub fn set_mesh_shaders(
        mut self,
        mesh: vk::ShaderModule,
        fragment: vk::ShaderModule,
    ) -> Self {
        self.shader_stages = vec![
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::MESH_EXT)
                .module(mesh)
                .name(SHADER_ENTRY),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment)
                .name(SHADER_ENTRY),
        ];
        self
    }

    pub fn set_task_mesh_shaders(
        mut self,
        task: vk::ShaderModule,
        mesh: vk::ShaderModule,
        fragment: vk::ShaderModule,
    ) -> Self {
        self.shader_stages = vec![
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::TASK_EXT)
                .module(task)
                .name(SHADER_ENTRY),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::MESH_EXT)
                .module(mesh)
                .name(SHADER_ENTRY),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment)
                .name(SHADER_ENTRY),
        ];
        self
    }

    pub fn input_topology(mut self, topology: vk::PrimitiveTopology) -> Self {
        self.input_assembly = self.input_assembly.topology(topology);
        self
    }

    pub fn polygon_mode(mut self, mode: vk::PolygonMode) -> Self {
        self.rasterization = self.rasterization.polygon_mode(mode);
        self
    }

    pub fn cull_mode(mut self, cull: vk::CullModeFlags, front_face: vk::FrontFace) -> Self {
        self.rasterization = self.rasterization.cull_mode(cull).front_face(front_face);
        self
    }

    pub fn disable_multisampling(mut self) -> Self {
        self.multisample = self
            .multisample
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .min_sample_shading(1.0);
        self
    }

    pub fn enable_depth_test(mut self, write: bool, compare: vk::CompareOp) -> Self {
        self.depth_stencil = self
            .depth_stencil
            .depth_test_enable(true)
            .depth_write_enable(write)
            .depth_compare_op(compare)
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0);
        self
    }

    pub fn color_attachment_format(mut self, format: vk::Format) -> Self {
        self.color_attachment_format = format;
        self
    }

    pub fn depth_attachment_format(mut self, format: vk::Format) -> Self {
        self.depth_attachment_format = format;
        self
    }

    pub fn build(self, context: &VulkanContext, layout: &PipelineLayout) -> Result<Pipeline> {
        let color_formats = [self.color_attachment_format];
        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(self.depth_attachment_format);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let color_blend = vk::PipelineColorBlendStateCreateInfo::default()
            .attachments(std::slice::from_ref(&self.color_blend_attachment));
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&self.shader_stages)
            .input_assembly_state(&self.input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&self.rasterization)
            .multisample_state(&self.multisample)
            .depth_stencil_state(&self.depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(layout.layout)
            .push_next(&mut rendering_info);

        let pipeline = unsafe {
            context
                .device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, e)| e)?[0]
        };
        Ok(Pipeline {
            device: Arc::clone(&context.device),
            pipeline,
        })
    }
}

impl Default for RenderPipelineBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_spirv_file_reports_its_path() {
        let path = Path::new("shaders/does_not_exist.spv");
        match read_spirv(path) {
            Err(Error::Shader { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected a shader error, got {other:?}"),
        }
    }

    #[test]
    fn malformed_spirv_is_rejected() {
        let path = std::env::temp_dir().join("virga_truncated.spv");
        std::fs::write(&path, [0x03, 0x02, 0x23]).unwrap();
        let result = read_spirv(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(Error::Shader { .. })));
    }
}
