//! Per-meshlet visibility predicates. The task shader evaluates the same
//! tests on the GPU; this module is the CPU reference used by the tests.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4, Vec4Swizzles};

use crate::model::Meshlet;

/// Six plane equations (normal xyz, distance w) extracted from a
/// view-projection matrix, normals pointing into the visible volume.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Frustum {
    pub planes: [Vec4; 6],
}

impl Frustum {
    /// Gribb-Hartmann plane extraction for a zero-to-one depth range.
    pub fn from_view_proj(view_proj: Mat4) -> Self {
        let rows = [
            view_proj.row(0),
            view_proj.row(1),
            view_proj.row(2),
            view_proj.row(3),
        ];
        let mut planes = [
            rows[3] + rows[0], // left
            rows[3] - rows[0], // right
            rows[3] + rows[1], // bottom
            rows[3] - rows[1], // top
            rows[2],           // near (z >= 0)
            rows[3] - rows[2], // far
        ];
        for plane in &mut planes {
            let length = plane.xyz().length();
            if length > 0.0 {
                *plane /= length;
            }
        }
        Self { planes }
    }

    /// True when the sphere is at least partially inside every plane.
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.xyz().dot(center) + plane.w >= -radius)
    }
}

/// Perspective cone-backface test: the cluster is rejected when the camera
/// sits entirely in the cone's backface region. A cutoff of 1 marks a
/// degenerate cone and never culls.
pub fn cone_backfacing(apex: Vec3, axis: Vec3, cutoff: f32, camera: Vec3) -> bool {
    if cutoff >= 1.0 {
        return false;
    }
    let to_apex = apex - camera;
    let length = to_apex.length();
    if length == 0.0 {
        return false;
    }
    (to_apex / length).dot(axis) >= cutoff
}

/// Combined visibility test the task stage applies per meshlet.
pub fn meshlet_visible(meshlet: &Meshlet, frustum: &Frustum, camera: Vec3) -> bool {
    let center = Vec3::from_array(meshlet.center);
    if !frustum.intersects_sphere(center, meshlet.radius) {
        return false;
    }
    !cone_backfacing(
        Vec3::from_array(meshlet.cone_apex),
        Vec3::from_array(meshlet.cone_axis),
        meshlet.cone_cutoff,
        camera,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_frustum() -> Frustum {
        // Camera at origin looking down -z, reversed-z perspective.
        let view = Mat4::look_at_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        let proj = Mat4::perspective_rh(75f32.to_radians(), 16.0 / 9.0, 1000.0, 0.1);
        Frustum::from_view_proj(proj * view)
    }

    #[test]
    fn sphere_in_front_of_camera_is_visible() {
        let frustum = test_frustum();
        assert!(frustum.intersects_sphere(Vec3::new(0.0, 0.0, -5.0), 1.0));
    }

    #[test]
    fn sphere_behind_camera_is_rejected() {
        let frustum = test_frustum();
        assert!(!frustum.intersects_sphere(Vec3::new(0.0, 0.0, 5.0), 1.0));
    }

    #[test]
    fn sphere_straddling_a_plane_is_kept() {
        let frustum = test_frustum();
        // Far off to the left but huge: still touches the volume.
        assert!(frustum.intersects_sphere(Vec3::new(-100.0, 0.0, -5.0), 200.0));
    }

    #[test]
    fn cone_facing_away_is_backfacing() {
        // Cluster at -z whose normals point away from the camera at origin.
        let apex = Vec3::new(0.0, 0.0, -10.0);
        let axis = Vec3::NEG_Z;
        assert!(cone_backfacing(apex, axis, 0.5, Vec3::ZERO));
        assert!(!cone_backfacing(apex, Vec3::Z, 0.5, Vec3::ZERO));
    }

    #[test]
    fn degenerate_cone_never_culls() {
        assert!(!cone_backfacing(Vec3::NEG_Z, Vec3::NEG_Z, 1.0, Vec3::ZERO));
    }

    #[test]
    fn culling_draws_the_full_set_when_everything_is_visible() {
        use crate::builder::build_meshlets;
        use crate::model::Vertex;
        use std::collections::BTreeSet;

        // Flat grid at z = 0 with CCW winding facing +z; the camera sits
        // in front of it, so neither test may reject a cluster.
        let n = 12u32;
        let mut vertices = Vec::new();
        for y in 0..=n {
            for x in 0..=n {
                vertices.push(Vertex {
                    position: [x as f32 * 0.1, y as f32 * 0.1, 0.0, 1.0],
                });
            }
        }
        let mut indices = Vec::new();
        for y in 0..n {
            for x in 0..n {
                let i = y * (n + 1) + x;
                indices.extend_from_slice(&[i, i + 1, i + n + 2]);
                indices.extend_from_slice(&[i, i + n + 2, i + n + 1]);
            }
        }
        let meshlets = build_meshlets(&vertices, &indices).unwrap();
        assert!(meshlets.meshlets.len() > 1);

        let camera = Vec3::new(0.6, 0.6, 4.0);
        let view = Mat4::look_at_rh(camera, Vec3::new(0.6, 0.6, 0.0), Vec3::Y);
        let proj = Mat4::perspective_rh(75f32.to_radians(), 1.0, 1000.0, 0.1);
        let frustum = Frustum::from_view_proj(proj * view);

        let triangle_set = |selected: &dyn Fn(&Meshlet) -> bool| -> BTreeSet<[u32; 3]> {
            let mut set = BTreeSet::new();
            for meshlet in &meshlets.meshlets {
                if !selected(meshlet) {
                    continue;
                }
                let locals = &meshlets.triangles[meshlet.meshlet_triangles_offset as usize..]
                    [..meshlet.meshlet_triangles_count as usize * 3];
                for tri in locals.chunks_exact(3) {
                    let global = |local: u8| {
                        meshlets.vertices
                            [(meshlet.meshlet_vertices_offset + local as u32) as usize]
                            + meshlet.vertex_offset
                    };
                    set.insert([global(tri[0]), global(tri[1]), global(tri[2])]);
                }
            }
            set
        };

        let baseline = triangle_set(&|_| true);
        let culled = triangle_set(&|m| meshlet_visible(m, &frustum, camera));
        assert_eq!(baseline.len(), (n * n * 2) as usize);
        assert_eq!(culled, baseline);
    }
}
