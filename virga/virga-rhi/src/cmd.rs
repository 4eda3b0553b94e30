//! Command-recording helpers: synchronization2 image barriers and the
//! offscreen-to-swapchain blit.

use ash::vk;

pub fn subresource_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(aspect)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

/// Builds a synchronization2 image barrier for one layout/stage handoff.
#[allow(clippy::too_many_arguments)]
pub fn image_barrier(
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    src_stage: vk::PipelineStageFlags2,
    src_access: vk::AccessFlags2,
    old_layout: vk::ImageLayout,
    dst_stage: vk::PipelineStageFlags2,
    dst_access: vk::AccessFlags2,
    new_layout: vk::ImageLayout,
) -> vk::ImageMemoryBarrier2<'static> {
    vk::ImageMemoryBarrier2::default()
        .image(image)
        .subresource_range(subresource_range(aspect))
        .src_stage_mask(src_stage)
        .src_access_mask(src_access)
        .old_layout(old_layout)
        .dst_stage_mask(dst_stage)
        .dst_access_mask(dst_access)
        .new_layout(new_layout)
}

/// Barriers bringing the offscreen draw and depth images into their
/// attachment layouts at the top of a frame. Contents are discarded, so
/// both transition from UNDEFINED.
pub fn render_target_barriers(
    draw: vk::Image,
    depth: vk::Image,
) -> [vk::ImageMemoryBarrier2<'static>; 2] {
    [
        image_barrier(
            draw,
            vk::ImageAspectFlags::COLOR,
            vk::PipelineStageFlags2::TOP_OF_PIPE,
            vk::AccessFlags2::empty(),
            vk::ImageLayout::UNDEFINED,
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ),
        image_barrier(
            depth,
            vk::ImageAspectFlags::DEPTH,
            vk::PipelineStageFlags2::TOP_OF_PIPE,
            vk::AccessFlags2::empty(),
            vk::ImageLayout::UNDEFINED,
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
        ),
    ]
}

/// Full-extent linear blit from the offscreen draw image to a swapchain
/// image; both must already be in the matching TRANSFER layouts.
pub fn blit_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    src: vk::Image,
    src_extent: vk::Extent2D,
    dst: vk::Image,
    dst_extent: vk::Extent2D,
) {
    let subresource = vk::ImageSubresourceLayers::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .mip_level(0)
        .base_array_layer(0)
        .layer_count(1);
    let blit_region = vk::ImageBlit2::default()
        .src_subresource(subresource)
        .dst_subresource(subresource)
        .src_offsets([
            vk::Offset3D::default(),
            vk::Offset3D {
                x: src_extent.width as i32,
                y: src_extent.height as i32,
                z: 1,
            },
        ])
        .dst_offsets([
            vk::Offset3D::default(),
            vk::Offset3D {
                x: dst_extent.width as i32,
                y: dst_extent.height as i32,
                z: 1,
            },
        ]);
    let blit_info = vk::BlitImageInfo2::default()
        .src_image(src)
        .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
        .dst_image(dst)
        .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .regions(std::slice::from_ref(&blit_region))
        .filter(vk::Filter::LINEAR);
    unsafe { device.cmd_blit_image2(cmd, &blit_info) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_start_transitions_both_attachments() {
        let draw = vk::Image::null();
        let depth = vk::Image::null();
        let [color, depth_barrier] = render_target_barriers(draw, depth);

        assert_eq!(color.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(color.new_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(
            color.subresource_range.aspect_mask,
            vk::ImageAspectFlags::COLOR
        );

        assert_eq!(depth_barrier.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(
            depth_barrier.new_layout,
            vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL
        );
        assert_eq!(
            depth_barrier.subresource_range.aspect_mask,
            vk::ImageAspectFlags::DEPTH
        );
        assert!(depth_barrier
            .dst_stage_mask
            .contains(vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS));
        assert!(depth_barrier
            .dst_access_mask
            .contains(vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE));
    }
}
