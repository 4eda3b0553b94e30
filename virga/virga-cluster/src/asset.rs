//! glTF asset loading. This is deliberately not a general loader: the demo
//! supports exactly one mesh with one primitive referenced by one node, and
//! anything else is a typed load error the caller treats as fatal.

use std::path::Path;

use glam::{Quat, Vec3};

use crate::builder::build_meshlets;
use crate::model::{ExtractedMeshletModel, MeshletPrimitive, Transform, Vertex};
use crate::{Error, Result};

/// Loads the scene file and extracts its single mesh into meshlet form.
pub fn load_meshlet_model(path: &Path) -> Result<ExtractedMeshletModel> {
    let (document, buffers, _images) = gltf::import(path)?;

    let mut meshes = document.meshes();
    let mesh = meshes
        .next()
        .ok_or_else(|| Error::AssetShape("asset contains no mesh".into()))?;
    if meshes.next().is_some() {
        return Err(Error::AssetShape("asset contains more than one mesh".into()));
    }
    let mut primitives = mesh.primitives();
    let primitive = primitives
        .next()
        .ok_or_else(|| Error::AssetShape("mesh contains no primitive".into()))?;
    if primitives.next().is_some() {
        return Err(Error::AssetShape(
            "mesh contains more than one primitive".into(),
        ));
    }
    let mut nodes = document.nodes().filter(|n| n.mesh().is_some());
    let node = nodes
        .next()
        .ok_or_else(|| Error::AssetShape("no node references the mesh".into()))?;
    if nodes.next().is_some() {
        return Err(Error::AssetShape(
            "more than one node references the mesh".into(),
        ));
    }

    let (translation, rotation, scale) = node.transform().decomposed();
    let transform = Transform {
        translation: Vec3::from_array(translation),
        rotation: Quat::from_array(rotation),
        scale: Vec3::from_array(scale),
    };

    let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|b| &b.0[..]));
    let positions = reader
        .read_positions()
        .ok_or(Error::MissingAccessor("POSITION"))?;
    let vertices: Vec<Vertex> = positions
        .map(|p| Vertex::new(Vec3::from_array(p)))
        .collect();
    let indices: Vec<u32> = reader
        .read_indices()
        .ok_or(Error::MissingAccessor("indices"))?
        .into_u32()
        .collect();

    extract_model(vertices, &indices, transform)
}

/// Builds the full cluster descriptor model for one primitive's geometry.
pub fn extract_model(
    vertices: Vec<Vertex>,
    indices: &[u32],
    transform: Transform,
) -> Result<ExtractedMeshletModel> {
    let meshlets = build_meshlets(&vertices, indices)?;

    let mut center = Vec3::ZERO;
    for vertex in &vertices {
        center += vertex.position();
    }
    if !vertices.is_empty() {
        center /= vertices.len() as f32;
    }
    let mut radius_sq = 0.0f32;
    for vertex in &vertices {
        radius_sq = radius_sq.max(vertex.position().distance_squared(center));
    }

    let primitive = MeshletPrimitive {
        center: center.to_array(),
        radius: radius_sq.sqrt(),
        meshlet_offset: 0,
        meshlet_count: meshlets.len() as u32,
        material_index: 0,
        _padding: 0,
    };

    let model = ExtractedMeshletModel {
        vertices,
        meshlet_vertices: meshlets.vertices,
        meshlet_triangles: meshlets.triangles,
        meshlets: meshlets.meshlets,
        primitive,
        transform,
    };
    model.validate()?;
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_model_covers_every_meshlet() {
        let vertices: Vec<Vertex> = (0..9)
            .map(|i| Vertex::new(Vec3::new((i % 3) as f32, (i / 3) as f32, 0.0)))
            .collect();
        let indices = [0u32, 1, 3, 1, 4, 3, 1, 2, 4, 2, 5, 4, 3, 4, 6, 4, 7, 6];
        let model = extract_model(vertices, &indices, Transform::default()).unwrap();
        assert_eq!(model.primitive.meshlet_offset, 0);
        assert_eq!(model.primitive.meshlet_count as usize, model.meshlets.len());
        assert!(model.validate().is_ok());
    }

    #[test]
    fn primitive_sphere_contains_all_vertices() {
        let vertices: Vec<Vertex> = (0..4)
            .map(|i| Vertex::new(Vec3::new(i as f32, 0.0, -(i as f32))))
            .collect();
        let indices = [0u32, 1, 2, 1, 3, 2];
        let model = extract_model(vertices, &indices, Transform::default()).unwrap();
        let center = Vec3::from_array(model.primitive.center);
        for vertex in &model.vertices {
            assert!(vertex.position().distance(center) <= model.primitive.radius + 1e-5);
        }
    }

    #[test]
    fn missing_asset_file_is_an_import_error() {
        let err = load_meshlet_model(Path::new("does/not/exist.glb")).unwrap_err();
        assert!(matches!(err, Error::Import(_)));
    }
}
