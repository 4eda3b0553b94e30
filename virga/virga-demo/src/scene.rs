//! Per-frame scene constants, the fixed demo camera and frame timing.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4};

use virga_cluster::Frustum;

pub const CAMERA_NEAR: f32 = 1000.0;
pub const CAMERA_FAR: f32 = 0.1;
pub const CAMERA_FOV_Y: f32 = 75.0 * std::f32::consts::PI / 180.0;

/// GPU-visible per-frame constants, written into a persistently mapped
/// per-slot buffer and read by shaders through its device address.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct SceneData {
    pub view: Mat4,
    pub proj: Mat4,
    pub view_proj: Mat4,
    pub inv_view: Mat4,
    pub inv_proj: Mat4,
    pub inv_view_proj: Mat4,
    pub prev_view: Mat4,
    pub prev_proj: Mat4,
    pub prev_view_proj: Mat4,
    pub camera_world_pos: Vec4,
    pub frustum: Frustum,
    pub render_target_size: Vec2,
    pub texel_size: Vec2,
    /// x = near, y = far; depth is reversed so near > far.
    pub camera_planes: Vec2,
    pub delta_time: f32,
    pub _padding: f32,
}

/// Fixed camera: sits at (0, 0, -4) looking at the origin. Reversed-Z
/// projection, so the depth compare is GREATER_OR_EQUAL and the far plane
/// value in the projection is the smaller number.
pub struct Camera {
    pub position: Vec3,
}

impl Camera {
    pub fn new() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, -4.0),
        }
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, Vec3::ZERO, Vec3::Y)
    }

    pub fn projection(&self, width: f32, height: f32) -> Mat4 {
        let mut proj = Mat4::perspective_rh(CAMERA_FOV_Y, width / height, CAMERA_NEAR, CAMERA_FAR);
        // Vulkan clip space has y pointing down.
        proj.y_axis.y *= -1.0;
        proj
    }

    /// Builds the full constant block for one frame; `previous` supplies
    /// the prev-frame matrices (the current matrices on the first frame).
    pub fn scene_data(
        &self,
        width: u32,
        height: u32,
        delta_time: f32,
        previous: Option<&SceneData>,
    ) -> SceneData {
        let view = self.view();
        let proj = self.projection(width as f32, height as f32);
        let view_proj = proj * view;
        let (prev_view, prev_proj, prev_view_proj) = match previous {
            Some(p) => (p.view, p.proj, p.view_proj),
            None => (view, proj, view_proj),
        };
        SceneData {
            view,
            proj,
            view_proj,
            inv_view: view.inverse(),
            inv_proj: proj.inverse(),
            inv_view_proj: view_proj.inverse(),
            prev_view,
            prev_proj,
            prev_view_proj,
            camera_world_pos: self.position.extend(1.0),
            frustum: Frustum::from_view_proj(view_proj),
            render_target_size: Vec2::new(width as f32, height as f32),
            texel_size: Vec2::new(1.0 / width as f32, 1.0 / height as f32),
            camera_planes: Vec2::new(CAMERA_NEAR, CAMERA_FAR),
            delta_time,
            _padding: 0.0,
        }
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new()
    }
}

/// Wall-clock frame timer. Delta is reported in seconds; a hitch longer
/// than a second is clamped to a third of a second so simulation-time
/// consumers never see a huge step.
pub struct FrameClock {
    last: std::time::Instant,
}

impl FrameClock {
    pub fn new() -> Self {
        Self {
            last: std::time::Instant::now(),
        }
    }

    pub fn tick(&mut self) -> f32 {
        let now = std::time::Instant::now();
        let millis = now.duration_since(self.last).as_secs_f32() * 1000.0;
        self.last = now;
        let millis = if millis > 1000.0 { 333.0 } else { millis };
        millis / 1000.0
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_data_layout() {
        assert_eq!(std::mem::size_of::<SceneData>(), 9 * 64 + 16 + 96 + 32);
        assert_eq!(std::mem::align_of::<SceneData>(), 16);
    }

    #[test]
    fn first_frame_prev_matrices_match_current() {
        let camera = Camera::new();
        let data = camera.scene_data(1920, 1080, 0.016, None);
        assert_eq!(data.prev_view_proj, data.view_proj);
    }

    #[test]
    fn prev_matrices_carry_over() {
        let camera = Camera::new();
        let first = camera.scene_data(1920, 1080, 0.016, None);
        let second = camera.scene_data(1920, 1080, 0.016, Some(&first));
        assert_eq!(second.prev_view, first.view);
        assert_eq!(second.prev_view_proj, first.view_proj);
    }

    #[test]
    fn camera_sees_origin() {
        let camera = Camera::new();
        let data = camera.scene_data(800, 600, 0.016, None);
        assert!(data.frustum.intersects_sphere(Vec3::ZERO, 0.5));
        // A point far behind the camera is culled.
        assert!(!data.frustum.intersects_sphere(Vec3::new(0.0, 0.0, -50.0), 0.5));
    }

    #[test]
    fn reversed_depth_projection() {
        let camera = Camera::new();
        let proj = camera.projection(1.0, 1.0);
        // Near geometry lands at depth ~1, far geometry at ~0.
        let near = proj * Vec4::new(0.0, 0.0, -0.11, 1.0);
        let far = proj * Vec4::new(0.0, 0.0, -900.0, 1.0);
        assert!(near.z / near.w > 0.9);
        assert!(far.z / far.w < 0.1);
    }
}
