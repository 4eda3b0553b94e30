//! Vulkan plumbing for the Virga task/mesh-shading demo.
//! Wraps instance/device setup, the swapchain, offscreen render targets,
//! device-address buffers, pipeline construction and per-frame sync objects
//! in move-only RAII types.

mod buffer;
mod cmd;
mod context;
mod pipeline;
mod swapchain;
mod sync;
mod target;

pub use buffer::{AllocatedBuffer, ImmediateUploader, StagingArena};
pub use cmd::{blit_image, image_barrier, render_target_barriers, subresource_range};
pub use context::VulkanContext;
pub use pipeline::{
    load_shader_module, Pipeline, PipelineLayout, RenderPipelineBuilder, ShaderModule,
};
pub use swapchain::Swapchain;
pub use sync::FrameSync;
pub use target::{AllocatedImage, RenderTargets};

use ash::vk;
use std::path::PathBuf;

/// Offscreen color target format; every strategy pipeline renders into it.
pub const DRAW_IMAGE_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
/// Offscreen depth target format (reversed-Z, cleared to 0.0).
pub const DEPTH_IMAGE_FORMAT: vk::Format = vk::Format::D32_SFLOAT;
pub const SWAPCHAIN_IMAGE_FORMAT: vk::Format = vk::Format::B8G8R8A8_SRGB;
pub const SWAPCHAIN_COLOR_SPACE: vk::ColorSpaceKHR = vk::ColorSpaceKHR::SRGB_NONLINEAR;

/// Frame slots cycled round-robin by frame number.
pub const FRAMES_IN_FLIGHT: usize = 3;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("vulkan call failed: {0}")]
    Vulkan(#[from] vk::Result),

    #[error("failed to load the vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("no suitable physical device: {0}")]
    DeviceSelection(String),

    #[error("window handle unavailable: {0}")]
    WindowHandle(String),

    /// Stale or suboptimal presentation surface. Treated as fatal by the
    /// demo; a long-running renderer would recreate the swapchain instead.
    #[error("swapchain out of date or suboptimal ({0})")]
    SurfaceOutdated(&'static str),

    #[error("shader module {path:?}: {message}")]
    Shader { path: PathBuf, message: String },

    #[error("staging arena exhausted: requested {requested} bytes, {available} free")]
    StagingExhausted { requested: u64, available: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
