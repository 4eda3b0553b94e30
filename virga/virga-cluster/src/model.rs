//! Cluster descriptor model: the CPU-side, GPU-layout data produced by the
//! meshlet builder and consumed by the frame orchestrator.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Quat, Vec3};

use crate::{Error, Result};

/// Position-only vertex, padded to 16 bytes for device-address access.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 4],
}

impl Vertex {
    pub fn new(position: Vec3) -> Self {
        Self {
            position: [position.x, position.y, position.z, 1.0],
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec3::new(self.position[0], self.position[1], self.position[2])
    }
}

/// One bounded cluster of at most 64 vertices and 64 triangles.
///
/// Layout matches the shader-side struct: 64 bytes, no implicit padding.
/// `vertex_offset` is the base added to every meshlet-vertex index to reach
/// the global vertex array; the two offset/count pairs index the shared
/// meshlet-vertex and meshlet-triangle arrays.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Meshlet {
    pub center: [f32; 3],
    pub radius: f32,
    pub cone_apex: [f32; 3],
    pub cone_cutoff: f32,
    pub cone_axis: [f32; 3],
    pub vertex_offset: u32,
    pub meshlet_vertices_offset: u32,
    pub meshlet_vertices_count: u32,
    pub meshlet_triangles_offset: u32,
    pub meshlet_triangles_count: u32,
}

/// One drawable surface: a contiguous run of meshlets plus a coarse bound.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MeshletPrimitive {
    pub center: [f32; 3],
    pub radius: f32,
    pub meshlet_offset: u32,
    pub meshlet_count: u32,
    pub material_index: u32,
    pub _padding: u32,
}

/// Rigid transform extracted from the asset's single node.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn model_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

/// Fully built representation of one asset. Built once at startup, immutable
/// afterwards, uploaded to device-visible buffers exactly once.
#[derive(Clone, Debug, Default)]
pub struct ExtractedMeshletModel {
    pub vertices: Vec<Vertex>,
    /// Indices into `vertices`, grouped per meshlet.
    pub meshlet_vertices: Vec<u32>,
    /// Meshlet-local corner indices, three per triangle; the global array is
    /// padded to a 4-byte multiple for the GPU copy.
    pub meshlet_triangles: Vec<u8>,
    pub meshlets: Vec<Meshlet>,
    pub primitive: MeshletPrimitive,
    pub transform: Transform,
}

impl ExtractedMeshletModel {
    /// Checks every offset/count pair against the owning array lengths.
    pub fn validate(&self) -> Result<()> {
        for (i, meshlet) in self.meshlets.iter().enumerate() {
            if meshlet.meshlet_vertices_count > crate::MAX_MESHLET_VERTICES as u32
                || meshlet.meshlet_triangles_count > crate::MAX_MESHLET_TRIANGLES as u32
            {
                return Err(Error::Bounds(format!(
                    "meshlet {i} exceeds cluster caps: {} vertices, {} triangles",
                    meshlet.meshlet_vertices_count, meshlet.meshlet_triangles_count
                )));
            }
            let vertex_end =
                meshlet.meshlet_vertices_offset as usize + meshlet.meshlet_vertices_count as usize;
            if vertex_end > self.meshlet_vertices.len() {
                return Err(Error::Bounds(format!(
                    "meshlet {i} vertex range ends at {vertex_end}, array holds {}",
                    self.meshlet_vertices.len()
                )));
            }
            let triangle_end = meshlet.meshlet_triangles_offset as usize
                + meshlet.meshlet_triangles_count as usize * 3;
            if triangle_end > self.meshlet_triangles.len() {
                return Err(Error::Bounds(format!(
                    "meshlet {i} triangle range ends at {triangle_end}, array holds {}",
                    self.meshlet_triangles.len()
                )));
            }
            for &local in &self.meshlet_vertices[meshlet.meshlet_vertices_offset as usize..vertex_end]
            {
                let global = meshlet.vertex_offset as usize + local as usize;
                if global >= self.vertices.len() {
                    return Err(Error::Bounds(format!(
                        "meshlet {i} references vertex {global}, array holds {}",
                        self.vertices.len()
                    )));
                }
            }
        }
        let primitive_end =
            self.primitive.meshlet_offset as usize + self.primitive.meshlet_count as usize;
        if primitive_end > self.meshlets.len() {
            return Err(Error::Bounds(format!(
                "primitive meshlet range ends at {primitive_end}, model holds {}",
                self.meshlets.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meshlet_layout_is_gpu_exact() {
        assert_eq!(std::mem::size_of::<Meshlet>(), 64);
        assert_eq!(std::mem::size_of::<Vertex>(), 16);
        assert_eq!(std::mem::size_of::<MeshletPrimitive>(), 32);
    }

    #[test]
    fn validate_rejects_overflowing_primitive() {
        let model = ExtractedMeshletModel {
            primitive: MeshletPrimitive {
                meshlet_count: 1,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(model.validate().is_err());
    }

    #[test]
    fn transform_round_trips_through_matrix() {
        let transform = Transform {
            translation: Vec3::new(1.0, 2.0, 3.0),
            rotation: Quat::from_rotation_y(0.5),
            scale: Vec3::splat(2.0),
        };
        let m = transform.model_matrix();
        let (scale, rotation, translation) = m.to_scale_rotation_translation();
        assert!((scale - transform.scale).length() < 1e-5);
        assert!((translation - transform.translation).length() < 1e-5);
        assert!(rotation.dot(transform.rotation).abs() > 0.9999);
    }
}
