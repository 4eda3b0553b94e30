//! Meshlet extraction for the Virga task/mesh-shading renderer.
//!
//! Converts an indexed triangle mesh into bounded clusters (meshlets) with
//! precomputed bounding spheres and normal cones, plus the flat descriptor
//! arrays the GPU pipelines consume. Everything here is pure CPU code.

mod asset;
mod builder;
mod cull;
mod model;

pub use asset::{extract_model, load_meshlet_model};
pub use builder::{build_meshlets, Meshlets};
pub use cull::{cone_backfacing, meshlet_visible, Frustum};
pub use model::{ExtractedMeshletModel, Meshlet, MeshletPrimitive, Transform, Vertex};

/// Hard cap on unique vertices per meshlet.
pub const MAX_MESHLET_VERTICES: usize = 64;
/// Hard cap on triangles per meshlet.
pub const MAX_MESHLET_TRIANGLES: usize = 64;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The asset does not match the single-mesh/single-primitive/single-node
    /// shape this demo supports.
    #[error("asset shape violation: {0}")]
    AssetShape(String),

    #[error("asset is missing the required {0} accessor")]
    MissingAccessor(&'static str),

    #[error("index {index} out of range for {vertex_count} vertices")]
    IndexOutOfRange { index: u32, vertex_count: usize },

    #[error("offset/count outside owning buffer: {0}")]
    Bounds(String),

    #[error("glTF import failed: {0}")]
    Import(#[from] gltf::Error),
}
