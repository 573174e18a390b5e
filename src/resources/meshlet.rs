//! Meshlet clustering
//!
//! Splits a primitive's triangle list into bounded clusters sized for
//! mesh-shading draw submission and per-cluster culling. Clustering is a single
//! greedy pass that keeps the source triangle order; each finished meshlet gets a
//! conservative bounding sphere centred on its axis-aligned box.

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};
use thiserror::Error;

use crate::backend::types::Vertex;
use crate::scene::Frustum;

/// Maximum number of distinct vertices referenced by one meshlet.
pub const MAX_MESHLET_VERTICES: usize = 64;

/// Maximum number of triangles in one meshlet.
pub const MAX_MESHLET_TRIANGLES: usize = 126;

/// Remap sentinel for a vertex not present in the current meshlet.
const UNASSIGNED: u8 = 0xff;

/// Errors raised while clustering a primitive.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum MeshletError {
    #[error("triangle {triangle} references vertex {index}, but the primitive has {vertex_count} vertices")]
    IndexOutOfRange {
        triangle: usize,
        index: u32,
        vertex_count: usize,
    },
}

/// A bounded cluster of triangles, laid out for direct upload as a storage buffer.
///
/// `vertices` holds global indices into the primitive's vertex buffer, `indices`
/// holds three local indices (into `vertices`) per triangle.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Meshlet {
    pub vertex_count: u32,
    pub triangle_count: u32,
    /// xyz = centre, w = radius
    pub sphere: [f32; 4],
    pub vertices: [u32; MAX_MESHLET_VERTICES],
    pub indices: [u8; MAX_MESHLET_TRIANGLES * 3],
    _pad: [u8; 2],
}

impl Default for Meshlet {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl Meshlet {
    /// Global vertex indices referenced by this meshlet
    pub fn vertex_indices(&self) -> &[u32] {
        &self.vertices[..self.vertex_count as usize]
    }

    /// Local triangle indices, three per triangle
    pub fn local_indices(&self) -> &[u8] {
        &self.indices[..self.triangle_count as usize * 3]
    }

    /// Triangles expressed as global vertex indices
    pub fn triangles(&self) -> impl Iterator<Item = [u32; 3]> + '_ {
        self.local_indices().chunks_exact(3).map(|t| {
            [
                self.vertices[t[0] as usize],
                self.vertices[t[1] as usize],
                self.vertices[t[2] as usize],
            ]
        })
    }

    pub fn center(&self) -> Vec3 {
        Vec4::from_array(self.sphere).truncate()
    }

    pub fn radius(&self) -> f32 {
        self.sphere[3]
    }

    /// Whether the bounding sphere, moved by `transform`, touches the frustum
    pub fn is_visible(&self, frustum: &Frustum, transform: &glam::Mat4) -> bool {
        let center = transform.transform_point3(self.center());
        let (scale, _, _) = transform.to_scale_rotation_translation();
        let radius = self.radius() * scale.abs().max_element();
        frustum.intersects_sphere(center, radius)
    }

    fn is_full_for(&self, new_vertices: usize) -> bool {
        self.vertex_count as usize + new_vertices > MAX_MESHLET_VERTICES
            || self.triangle_count as usize == MAX_MESHLET_TRIANGLES
    }

    fn add_vertex(&mut self, global: u32) -> u8 {
        let local = self.vertex_count as u8;
        self.vertices[self.vertex_count as usize] = global;
        self.vertex_count += 1;
        local
    }

    fn add_triangle(&mut self, local: [u8; 3]) {
        let base = self.triangle_count as usize * 3;
        self.indices[base..base + 3].copy_from_slice(&local);
        self.triangle_count += 1;
    }
}

/// Transient box used to centre a meshlet's bounding sphere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::MAX),
            max: Vec3::splat(f32::MIN),
        }
    }

    pub fn grow(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn center(&self) -> Vec3 {
        self.min + (self.max - self.min) * 0.5
    }
}

/// Greedy streaming meshlet builder.
///
/// The remap table is kept between calls so a loader can reuse one builder for
/// every primitive of a mesh.
#[derive(Debug, Default)]
pub struct MeshletBuilder {
    remap: Vec<u8>,
}

impl MeshletBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cluster `indices` (a triangle list over `vertices`) and compute bounding spheres.
    ///
    /// A trailing partial triangle is ignored.
    pub fn build(&mut self, vertices: &[Vertex], indices: &[u32]) -> Result<Vec<Meshlet>, MeshletError> {
        let mut meshlets = self.cluster(vertices.len(), indices)?;
        for meshlet in &mut meshlets {
            compute_bounding_sphere(meshlet, vertices);
        }
        Ok(meshlets)
    }

    fn cluster(&mut self, vertex_count: usize, indices: &[u32]) -> Result<Vec<Meshlet>, MeshletError> {
        self.remap.clear();
        self.remap.resize(vertex_count, UNASSIGNED);

        let mut meshlets = Vec::with_capacity(indices.len() / (MAX_MESHLET_TRIANGLES * 3) + 1);
        let mut current = Meshlet::default();

        for (triangle, tri) in indices.chunks_exact(3).enumerate() {
            for &index in tri {
                if index as usize >= vertex_count {
                    return Err(MeshletError::IndexOutOfRange {
                        triangle,
                        index,
                        vertex_count,
                    });
                }
            }

            let new_vertices = tri
                .iter()
                .filter(|&&v| self.remap[v as usize] == UNASSIGNED)
                .count();

            if current.is_full_for(new_vertices) {
                self.release(&current);
                meshlets.push(current);
                current = Meshlet::default();
            }

            let mut local = [0u8; 3];
            for (slot, &global) in local.iter_mut().zip(tri) {
                let entry = &mut self.remap[global as usize];
                if *entry == UNASSIGNED {
                    *entry = current.add_vertex(global);
                }
                *slot = *entry;
            }
            current.add_triangle(local);
        }

        if current.triangle_count > 0 {
            self.release(&current);
            meshlets.push(current);
        }

        Ok(meshlets)
    }

    fn release(&mut self, meshlet: &Meshlet) {
        for &global in meshlet.vertex_indices() {
            self.remap[global as usize] = UNASSIGNED;
        }
    }
}

/// Centre the sphere on the box of the member vertices, radius = farthest member.
fn compute_bounding_sphere(meshlet: &mut Meshlet, vertices: &[Vertex]) {
    let mut aabb = Aabb::empty();
    for &global in meshlet.vertex_indices() {
        aabb.grow(vertices[global as usize].position);
    }

    let center = aabb.center();
    let radius = meshlet
        .vertex_indices()
        .iter()
        .map(|&global| center.distance(vertices[global as usize].position))
        .fold(0.0f32, f32::max);

    meshlet.sphere = center.extend(radius).to_array();
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec2;

    fn vertex(x: f32, y: f32, z: f32) -> Vertex {
        Vertex::new(Vec3::new(x, y, z), Vec2::ZERO, Vec3::Y)
    }

    /// `count` triangles that share no vertices.
    fn disjoint_triangles(count: usize) -> (Vec<Vertex>, Vec<u32>) {
        let mut vertices = Vec::with_capacity(count * 3);
        for t in 0..count {
            let x = t as f32;
            vertices.push(vertex(x, 0.0, 0.0));
            vertices.push(vertex(x + 1.0, 0.0, 0.0));
            vertices.push(vertex(x, 1.0, 0.0));
        }
        let indices = (0..(count * 3) as u32).collect();
        (vertices, indices)
    }

    /// A `n` x `n` quad grid, two triangles per quad, shared vertices.
    fn grid(n: u32) -> (Vec<Vertex>, Vec<u32>) {
        let mut vertices = Vec::new();
        for z in 0..=n {
            for x in 0..=n {
                vertices.push(vertex(x as f32, 0.0, z as f32));
            }
        }
        let mut indices = Vec::new();
        for z in 0..n {
            for x in 0..n {
                let i = z * (n + 1) + x;
                let below = i + n + 1;
                indices.extend_from_slice(&[i, below, i + 1, i + 1, below, below + 1]);
            }
        }
        (vertices, indices)
    }

    #[test]
    fn test_meshlet_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<Meshlet>(), 8 + 16 + 256 + 378 + 2);
    }

    #[test]
    fn test_single_triangle() {
        let vertices = vec![
            vertex(0.0, 0.0, 0.0),
            vertex(2.0, 0.0, 0.0),
            vertex(0.0, 4.0, 0.0),
        ];
        let meshlets = MeshletBuilder::new().build(&vertices, &[0, 1, 2]).unwrap();

        assert_eq!(meshlets.len(), 1);
        let m = &meshlets[0];
        assert_eq!(m.vertex_count, 3);
        assert_eq!(m.triangle_count, 1);
        assert_eq!(m.local_indices(), &[0, 1, 2]);
        assert_eq!(m.center(), Vec3::new(1.0, 2.0, 0.0));

        let expected = vertices
            .iter()
            .map(|v| v.position.distance(Vec3::new(1.0, 2.0, 0.0)))
            .fold(0.0f32, f32::max);
        assert_eq!(m.radius(), expected);
    }

    #[test]
    fn test_disjoint_triangles_close_on_vertex_limit() {
        let (vertices, indices) = disjoint_triangles(130);
        let meshlets = MeshletBuilder::new().build(&vertices, &indices).unwrap();

        assert_eq!(meshlets.len(), 7);
        for m in &meshlets[..6] {
            assert_eq!(m.triangle_count, 21);
            assert_eq!(m.vertex_count, 63);
        }
        assert_eq!(meshlets[6].triangle_count, 4);
        assert_eq!(meshlets[6].vertex_count, 12);
    }

    #[test]
    fn test_shared_vertices_close_on_triangle_limit() {
        let vertices = vec![
            vertex(0.0, 0.0, 0.0),
            vertex(1.0, 0.0, 0.0),
            vertex(0.0, 1.0, 0.0),
        ];
        let indices: Vec<u32> = std::iter::repeat([0, 1, 2]).take(200).flatten().collect();

        let meshlets = MeshletBuilder::new().build(&vertices, &indices).unwrap();
        assert_eq!(meshlets.len(), 2);
        assert_eq!(meshlets[0].triangle_count as usize, MAX_MESHLET_TRIANGLES);
        assert_eq!(meshlets[0].vertex_count, 3);
        assert_eq!(meshlets[1].triangle_count, 200 - MAX_MESHLET_TRIANGLES as u32);
        assert_eq!(meshlets[1].vertex_count, 3);
    }

    #[test]
    fn test_fan_closes_on_vertex_limit() {
        let mut vertices = vec![vertex(0.0, 0.0, 0.0)];
        for i in 0..=100 {
            let a = i as f32 * 0.05;
            vertices.push(vertex(a.cos(), a.sin(), 0.0));
        }
        let indices: Vec<u32> = (1..=100u32).flat_map(|i| [0, i, i + 1]).collect();

        let meshlets = MeshletBuilder::new().build(&vertices, &indices).unwrap();
        assert_eq!(meshlets[0].vertex_count as usize, MAX_MESHLET_VERTICES);
        assert_eq!(meshlets[0].triangle_count, 62);
        let total: u32 = meshlets.iter().map(|m| m.triangle_count).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn test_limits_hold_and_order_is_preserved() {
        let (vertices, indices) = grid(40);
        let meshlets = MeshletBuilder::new().build(&vertices, &indices).unwrap();

        for m in &meshlets {
            assert!(m.vertex_count as usize <= MAX_MESHLET_VERTICES);
            assert!(m.triangle_count as usize <= MAX_MESHLET_TRIANGLES);
            assert!(m.triangle_count > 0);
        }

        let rebuilt: Vec<u32> = meshlets.iter().flat_map(|m| m.triangles()).flatten().collect();
        assert_eq!(rebuilt, indices);
    }

    #[test]
    fn test_members_lie_inside_sphere() {
        let (vertices, indices) = grid(25);
        let meshlets = MeshletBuilder::new().build(&vertices, &indices).unwrap();

        for m in &meshlets {
            for &v in m.vertex_indices() {
                let d = vertices[v as usize].position.distance(m.center());
                assert!(d <= m.radius() + 1e-5, "vertex {v} at {d} outside {}", m.radius());
            }
        }
    }

    #[test]
    fn test_member_vertices_are_distinct() {
        let (vertices, indices) = grid(16);
        let meshlets = MeshletBuilder::new().build(&vertices, &indices).unwrap();

        for m in &meshlets {
            let mut seen = m.vertex_indices().to_vec();
            seen.sort_unstable();
            seen.dedup();
            assert_eq!(seen.len(), m.vertex_count as usize);
        }
    }

    #[test]
    fn test_no_triangles_no_meshlets() {
        let vertices = vec![vertex(0.0, 0.0, 0.0); 4];
        assert!(MeshletBuilder::new().build(&vertices, &[]).unwrap().is_empty());
        assert!(MeshletBuilder::new().build(&vertices, &[0, 1]).unwrap().is_empty());
    }

    #[test]
    fn test_out_of_range_index() {
        let vertices = vec![vertex(0.0, 0.0, 0.0); 3];
        let err = MeshletBuilder::new()
            .build(&vertices, &[0, 1, 2, 0, 1, 7])
            .unwrap_err();
        assert_eq!(
            err,
            MeshletError::IndexOutOfRange {
                triangle: 1,
                index: 7,
                vertex_count: 3
            }
        );
    }

    #[test]
    fn test_builder_reuse_between_primitives() {
        let mut builder = MeshletBuilder::new();
        let (big_vertices, big_indices) = grid(12);
        let first = builder.build(&big_vertices, &big_indices).unwrap();
        assert!(!first.is_empty());

        let (small_vertices, small_indices) = disjoint_triangles(2);
        let second = builder.build(&small_vertices, &small_indices).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].vertex_count, 6);
    }

    #[test]
    fn test_aabb_center() {
        let mut aabb = Aabb::empty();
        aabb.grow(Vec3::new(-1.0, -2.0, 3.0));
        aabb.grow(Vec3::new(3.0, 2.0, 5.0));
        assert_eq!(aabb.center(), Vec3::new(1.0, 0.0, 4.0));
    }
}
