//! Meshlet builder: greedy spatial clustering of an indexed triangle list
//! into bounded clusters with precomputed sphere and normal-cone data.

use glam::Vec3;

use crate::model::{Meshlet, Vertex};
use crate::{Error, Result, MAX_MESHLET_TRIANGLES, MAX_MESHLET_VERTICES};

/// Flat output of the builder: meshlet records plus the two shared index
/// arrays they point into. After the trim pass both arrays end exactly at
/// the last meshlet's offset + count.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Meshlets {
    pub meshlets: Vec<Meshlet>,
    /// Indices into the source vertex array.
    pub vertices: Vec<u32>,
    /// Meshlet-local corner indices, three per triangle.
    pub triangles: Vec<u8>,
}

impl Meshlets {
    pub fn len(&self) -> usize {
        self.meshlets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshlets.is_empty()
    }

    /// Cluster-local views into the shared arrays.
    pub fn get(&self, index: usize) -> (&[u32], &[u8]) {
        let m = &self.meshlets[index];
        let vertices = &self.vertices[m.meshlet_vertices_offset as usize
            ..m.meshlet_vertices_offset as usize + m.meshlet_vertices_count as usize];
        let triangles = &self.triangles[m.meshlet_triangles_offset as usize
            ..m.meshlet_triangles_offset as usize + m.meshlet_triangles_count as usize * 3];
        (vertices, triangles)
    }
}

struct ClusterState {
    /// Global vertex indices in local-slot order.
    vertices: Vec<u32>,
    /// Corner triples of local slots.
    triangles: Vec<[u8; 3]>,
    /// Running sum of added triangle centroids.
    centroid_sum: Vec3,
}

impl ClusterState {
    fn new() -> Self {
        Self {
            vertices: Vec::with_capacity(MAX_MESHLET_VERTICES),
            triangles: Vec::with_capacity(MAX_MESHLET_TRIANGLES),
            centroid_sum: Vec3::ZERO,
        }
    }

    fn centroid(&self) -> Vec3 {
        if self.triangles.is_empty() {
            Vec3::ZERO
        } else {
            self.centroid_sum / self.triangles.len() as f32
        }
    }
}

/// Splits `indices` into clusters of at most [`MAX_MESHLET_VERTICES`]
/// vertices and [`MAX_MESHLET_TRIANGLES`] triangles.
///
/// Clusters grow greedily along the index-buffer adjacency, preferring
/// triangles that reuse vertices already in the cluster and, among those,
/// triangles closest to the running cluster centroid. No cone weight is
/// applied. The builder is deterministic: the same input yields identical
/// cluster counts, offsets and bounds.
pub fn build_meshlets(vertices: &[Vertex], indices: &[u32]) -> Result<Meshlets> {
    if indices.len() % 3 != 0 {
        return Err(Error::Bounds(format!(
            "index count {} is not a multiple of 3",
            indices.len()
        )));
    }
    let triangle_count = indices.len() / 3;
    let mut out = Meshlets::default();
    if triangle_count == 0 {
        return Ok(out);
    }
    for &index in indices {
        if index as usize >= vertices.len() {
            return Err(Error::IndexOutOfRange {
                index,
                vertex_count: vertices.len(),
            });
        }
    }

    let adjacency = VertexAdjacency::build(vertices.len(), indices);
    let positions: Vec<Vec3> = vertices.iter().map(Vertex::position).collect();

    let mut emitted = vec![false; triangle_count];
    // Local slot per global vertex, u32::MAX while unused by the open cluster.
    let mut used = vec![u32::MAX; vertices.len()];
    let mut cluster = ClusterState::new();
    let mut candidates: Vec<u32> = Vec::new();
    let mut cursor = 0usize;
    let mut remaining = triangle_count;

    while remaining > 0 {
        let triangle = match pick_candidate(&mut candidates, &emitted, &used, indices, &positions, &cluster)
        {
            Some(t) => t,
            None => {
                while emitted[cursor] {
                    cursor += 1;
                }
                cursor
            }
        };

        let corners = [
            indices[triangle * 3],
            indices[triangle * 3 + 1],
            indices[triangle * 3 + 2],
        ];
        let extra = new_vertex_count(&corners, &used);
        if cluster.triangles.len() + 1 > MAX_MESHLET_TRIANGLES
            || cluster.vertices.len() + extra > MAX_MESHLET_VERTICES
        {
            flush_cluster(&mut out, &mut cluster, &mut used, &positions);
            candidates.clear();
            continue;
        }

        let mut local = [0u8; 3];
        for (slot, &corner) in local.iter_mut().zip(&corners) {
            if used[corner as usize] == u32::MAX {
                used[corner as usize] = cluster.vertices.len() as u32;
                cluster.vertices.push(corner);
            }
            *slot = used[corner as usize] as u8;
        }
        cluster.triangles.push(local);
        cluster.centroid_sum += triangle_centroid(&corners, &positions);
        emitted[triangle] = true;
        remaining -= 1;

        for &corner in &corners {
            for &neighbor in adjacency.triangles_of(corner) {
                if !emitted[neighbor as usize] {
                    candidates.push(neighbor);
                }
            }
        }
    }
    flush_cluster(&mut out, &mut cluster, &mut used, &positions);

    // Trim pass: the shared arrays must hold no trailing waste.
    if let Some(last) = out.meshlets.last() {
        out.vertices
            .truncate((last.meshlet_vertices_offset + last.meshlet_vertices_count) as usize);
        out.triangles
            .truncate((last.meshlet_triangles_offset + last.meshlet_triangles_count * 3) as usize);
    }
    Ok(out)
}

struct VertexAdjacency {
    offsets: Vec<u32>,
    triangles: Vec<u32>,
}

impl VertexAdjacency {
    fn build(vertex_count: usize, indices: &[u32]) -> Self {
        let mut offsets = vec![0u32; vertex_count + 1];
        for &index in indices {
            offsets[index as usize + 1] += 1;
        }
        for i in 1..offsets.len() {
            offsets[i] += offsets[i - 1];
        }
        let mut fill: Vec<u32> = offsets[..vertex_count].to_vec();
        let mut triangles = vec![0u32; indices.len()];
        for (i, &index) in indices.iter().enumerate() {
            triangles[fill[index as usize] as usize] = (i / 3) as u32;
            fill[index as usize] += 1;
        }
        Self { offsets, triangles }
    }

    fn triangles_of(&self, vertex: u32) -> &[u32] {
        &self.triangles[self.offsets[vertex as usize] as usize..self.offsets[vertex as usize + 1] as usize]
    }
}

fn new_vertex_count(corners: &[u32; 3], used: &[u32]) -> usize {
    let mut count = 0;
    for (i, &corner) in corners.iter().enumerate() {
        if used[corner as usize] == u32::MAX && !corners[..i].contains(&corner) {
            count += 1;
        }
    }
    count
}

fn triangle_centroid(corners: &[u32; 3], positions: &[Vec3]) -> Vec3 {
    (positions[corners[0] as usize] + positions[corners[1] as usize] + positions[corners[2] as usize])
        / 3.0
}

/// Best unemitted triangle adjacent to the open cluster: maximize shared
/// vertices, then minimize distance to the cluster centroid, then take the
/// lowest triangle index. Returns None when no live candidate remains.
fn pick_candidate(
    candidates: &mut Vec<u32>,
    emitted: &[bool],
    used: &[u32],
    indices: &[u32],
    positions: &[Vec3],
    cluster: &ClusterState,
) -> Option<usize> {
    candidates.retain(|&t| !emitted[t as usize]);
    if candidates.is_empty() {
        return None;
    }
    let centroid = cluster.centroid();
    let mut best: Option<(usize, usize, f32)> = None;
    for &t in candidates.iter() {
        let t = t as usize;
        let corners = [indices[t * 3], indices[t * 3 + 1], indices[t * 3 + 2]];
        let shared = corners
            .iter()
            .filter(|&&c| used[c as usize] != u32::MAX)
            .count();
        let distance = triangle_centroid(&corners, positions).distance_squared(centroid);
        let better = match best {
            None => true,
            Some((bt, bs, bd)) => {
                shared > bs || (shared == bs && (distance < bd || (distance == bd && t < bt)))
            }
        };
        if better {
            best = Some((t, shared, distance));
        }
    }
    best.map(|(t, _, _)| t)
}

fn flush_cluster(
    out: &mut Meshlets,
    cluster: &mut ClusterState,
    used: &mut [u32],
    positions: &[Vec3],
) {
    if cluster.triangles.is_empty() {
        return;
    }
    for &vertex in &cluster.vertices {
        used[vertex as usize] = u32::MAX;
    }

    // Locality pass, applied independently per cluster: order triangles by
    // their highest local slot, then remap vertices in first-use order.
    cluster
        .triangles
        .sort_by_key(|t| (*t.iter().max().unwrap_or(&0), *t));
    let mut remap = vec![u8::MAX; cluster.vertices.len()];
    let mut ordered_vertices = Vec::with_capacity(cluster.vertices.len());
    for triangle in &mut cluster.triangles {
        for corner in triangle.iter_mut() {
            if remap[*corner as usize] == u8::MAX {
                remap[*corner as usize] = ordered_vertices.len() as u8;
                ordered_vertices.push(cluster.vertices[*corner as usize]);
            }
            *corner = remap[*corner as usize];
        }
    }

    let bounds = compute_cluster_bounds(&ordered_vertices, &cluster.triangles, positions);
    out.meshlets.push(Meshlet {
        center: bounds.center.to_array(),
        radius: bounds.radius,
        cone_apex: bounds.cone_apex.to_array(),
        cone_cutoff: bounds.cone_cutoff,
        cone_axis: bounds.cone_axis.to_array(),
        vertex_offset: 0,
        meshlet_vertices_offset: out.vertices.len() as u32,
        meshlet_vertices_count: ordered_vertices.len() as u32,
        meshlet_triangles_offset: out.triangles.len() as u32,
        meshlet_triangles_count: cluster.triangles.len() as u32,
    });
    out.vertices.extend_from_slice(&ordered_vertices);
    for triangle in &cluster.triangles {
        out.triangles.extend_from_slice(triangle);
    }

    cluster.vertices.clear();
    cluster.triangles.clear();
    cluster.centroid_sum = Vec3::ZERO;
}

pub(crate) struct ClusterBounds {
    pub center: Vec3,
    pub radius: f32,
    pub cone_apex: Vec3,
    pub cone_axis: Vec3,
    pub cone_cutoff: f32,
}

/// Bounding sphere (mean center, conservative radius) and normal cone over
/// one cluster. A degenerate normal spread yields cutoff 1, which the
/// backface test treats as never-cull.
pub(crate) fn compute_cluster_bounds(
    cluster_vertices: &[u32],
    triangles: &[[u8; 3]],
    positions: &[Vec3],
) -> ClusterBounds {
    let mut center = Vec3::ZERO;
    for &vertex in cluster_vertices {
        center += positions[vertex as usize];
    }
    if !cluster_vertices.is_empty() {
        center /= cluster_vertices.len() as f32;
    }
    let mut radius_sq = 0.0f32;
    for &vertex in cluster_vertices {
        radius_sq = radius_sq.max(positions[vertex as usize].distance_squared(center));
    }
    let radius = round_up(radius_sq.sqrt());

    let mut normals = Vec::with_capacity(triangles.len());
    let mut planes = Vec::with_capacity(triangles.len());
    for triangle in triangles {
        let a = positions[cluster_vertices[triangle[0] as usize] as usize];
        let b = positions[cluster_vertices[triangle[1] as usize] as usize];
        let c = positions[cluster_vertices[triangle[2] as usize] as usize];
        let cross = (b - a).cross(c - a);
        let length = cross.length();
        if length > 0.0 {
            normals.push(cross / length);
            planes.push(a);
        }
    }

    let axis_sum: Vec3 = normals.iter().copied().sum();
    let axis = if axis_sum.length() > 0.0 {
        axis_sum.normalize()
    } else {
        Vec3::Z
    };

    let mut min_dot = 1.0f32;
    for normal in &normals {
        min_dot = min_dot.min(normal.dot(axis));
    }
    if normals.is_empty() || min_dot <= 0.0 {
        return ClusterBounds {
            center,
            radius,
            cone_apex: center,
            cone_axis: axis,
            cone_cutoff: 1.0,
        };
    }

    // Push the apex back along the axis until it sits behind every triangle
    // plane, so the perspective backface test stays conservative.
    let mut max_t = 0.0f32;
    for (normal, anchor) in normals.iter().zip(&planes) {
        let distance = (center - *anchor).dot(*normal);
        max_t = max_t.max(distance / normal.dot(axis));
    }

    ClusterBounds {
        center,
        radius,
        cone_apex: center - axis * max_t,
        cone_axis: axis,
        cone_cutoff: (1.0 - min_dot * min_dot).max(0.0).sqrt(),
    }
}

/// Next representable float above `x`; keeps the sphere radius conservative
/// after the sqrt truncation.
fn round_up(x: f32) -> f32 {
    if x == 0.0 {
        return f32::from_bits(1);
    }
    f32::from_bits(x.to_bits() + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_mesh(n: usize) -> (Vec<Vertex>, Vec<u32>) {
        let mut vertices = Vec::new();
        for y in 0..=n {
            for x in 0..=n {
                vertices.push(Vertex::new(Vec3::new(x as f32, y as f32, 0.0)));
            }
        }
        let stride = (n + 1) as u32;
        let mut indices = Vec::new();
        for y in 0..n as u32 {
            for x in 0..n as u32 {
                let i = y * stride + x;
                indices.extend_from_slice(&[i, i + 1, i + stride]);
                indices.extend_from_slice(&[i + 1, i + stride + 1, i + stride]);
            }
        }
        (vertices, indices)
    }

    fn cube_mesh() -> (Vec<Vertex>, Vec<u32>) {
        let vertices = (0..8)
            .map(|i| {
                Vertex::new(Vec3::new(
                    (i & 1) as f32,
                    ((i >> 1) & 1) as f32,
                    ((i >> 2) & 1) as f32,
                ))
            })
            .collect();
        let indices = vec![
            0, 2, 1, 1, 2, 3, // -z
            4, 5, 6, 5, 7, 6, // +z
            0, 1, 4, 1, 5, 4, // -y
            2, 6, 3, 3, 6, 7, // +y
            0, 4, 2, 2, 4, 6, // -x
            1, 3, 5, 3, 7, 5, // +x
        ];
        (vertices, indices)
    }

    #[test]
    fn empty_input_yields_no_meshlets() {
        let meshlets = build_meshlets(&[], &[]).unwrap();
        assert!(meshlets.is_empty());
        assert!(meshlets.vertices.is_empty());
        assert!(meshlets.triangles.is_empty());
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let vertices = vec![Vertex::new(Vec3::ZERO); 2];
        assert!(build_meshlets(&vertices, &[0, 1, 2]).is_err());
    }

    #[test]
    fn every_meshlet_respects_cluster_caps() {
        let (vertices, indices) = grid_mesh(24);
        let meshlets = build_meshlets(&vertices, &indices).unwrap();
        assert!(meshlets.len() > 1);
        for m in &meshlets.meshlets {
            assert!(m.meshlet_vertices_count <= MAX_MESHLET_VERTICES as u32);
            assert!(m.meshlet_triangles_count <= MAX_MESHLET_TRIANGLES as u32);
            assert!(m.meshlet_triangles_count > 0);
        }
    }

    #[test]
    fn shared_arrays_are_trimmed_exactly() {
        let (vertices, indices) = grid_mesh(16);
        let meshlets = build_meshlets(&vertices, &indices).unwrap();
        let last = meshlets.meshlets.last().unwrap();
        assert_eq!(
            meshlets.vertices.len(),
            (last.meshlet_vertices_offset + last.meshlet_vertices_count) as usize
        );
        assert_eq!(
            meshlets.triangles.len(),
            (last.meshlet_triangles_offset + last.meshlet_triangles_count * 3) as usize
        );
        let total_triangles: u32 = meshlets
            .meshlets
            .iter()
            .map(|m| m.meshlet_triangles_count)
            .sum();
        assert_eq!(total_triangles as usize * 3, indices.len());
    }

    #[test]
    fn local_indices_stay_inside_the_cluster() {
        let (vertices, indices) = grid_mesh(12);
        let meshlets = build_meshlets(&vertices, &indices).unwrap();
        for i in 0..meshlets.len() {
            let (cluster_vertices, cluster_triangles) = meshlets.get(i);
            for &corner in cluster_triangles {
                assert!((corner as usize) < cluster_vertices.len());
            }
            for &vertex in cluster_vertices {
                assert!((vertex as usize) < vertices.len());
            }
        }
    }

    #[test]
    fn bounding_spheres_contain_their_vertices() {
        let (vertices, indices) = grid_mesh(16);
        let meshlets = build_meshlets(&vertices, &indices).unwrap();
        for (i, m) in meshlets.meshlets.iter().enumerate() {
            let center = Vec3::from_array(m.center);
            let (cluster_vertices, _) = meshlets.get(i);
            for &vertex in cluster_vertices {
                let distance = vertices[vertex as usize].position().distance(center);
                assert!(
                    distance <= m.radius,
                    "vertex {distance} outside radius {} of meshlet {i}",
                    m.radius
                );
            }
        }
    }

    #[test]
    fn cone_cutoff_is_in_valid_range() {
        let (vertices, indices) = grid_mesh(8);
        let meshlets = build_meshlets(&vertices, &indices).unwrap();
        for m in &meshlets.meshlets {
            assert!(m.cone_cutoff >= 0.0 && m.cone_cutoff <= 1.0);
            let axis = Vec3::from_array(m.cone_axis);
            assert!((axis.length() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn flat_grid_cone_is_tight() {
        // Every triangle of the planar grid faces +z (CCW winding above),
        // so the cone must collapse around that axis.
        let (vertices, indices) = grid_mesh(4);
        let meshlets = build_meshlets(&vertices, &indices).unwrap();
        assert_eq!(meshlets.len(), 1);
        let m = &meshlets.meshlets[0];
        let axis = Vec3::from_array(m.cone_axis);
        assert!(axis.z.abs() > 0.999);
        assert!(m.cone_cutoff < 1e-3);
    }

    #[test]
    fn builder_is_deterministic() {
        let (vertices, indices) = grid_mesh(16);
        let first = build_meshlets(&vertices, &indices).unwrap();
        let second = build_meshlets(&vertices, &indices).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn cube_fits_in_a_single_meshlet() {
        let (vertices, indices) = cube_mesh();
        let meshlets = build_meshlets(&vertices, &indices).unwrap();
        assert_eq!(meshlets.len(), 1);
        let m = &meshlets.meshlets[0];
        assert_eq!(m.vertex_offset, 0);
        assert_eq!(m.meshlet_vertices_count, 8);
        assert_eq!(m.meshlet_triangles_count, 12);
    }

    #[test]
    fn disjoint_triangles_overflow_the_vertex_cap() {
        // 65 triangles with all-unique vertices: 195 vertices total, so a
        // single 64-vertex cluster cannot hold them.
        let mut vertices = Vec::new();
        let mut indices = Vec::new();
        for t in 0..65u32 {
            let base = Vec3::new(t as f32 * 4.0, 0.0, 0.0);
            vertices.push(Vertex::new(base));
            vertices.push(Vertex::new(base + Vec3::X));
            vertices.push(Vertex::new(base + Vec3::Y));
            indices.extend_from_slice(&[t * 3, t * 3 + 1, t * 3 + 2]);
        }
        let meshlets = build_meshlets(&vertices, &indices).unwrap();
        assert!(meshlets.len() >= 2);
        let total: u32 = meshlets
            .meshlets
            .iter()
            .map(|m| m.meshlet_triangles_count)
            .sum();
        assert_eq!(total, 65);
    }
}
