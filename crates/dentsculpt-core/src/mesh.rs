//! Mesh Buffer Model
//!
//! Indexed triangle mesh with parallel position and normal arrays, mutated in
//! place by the editing kernel. Positions live in mesh-local space.

use bitflags::bitflags;
use glam::Vec3;
use smallvec::SmallVec;

use crate::math::{Aabb, Triangle};
use crate::{CoreError, CoreResult};

bitflags! {
    /// Buffers changed since the renderer last uploaded them
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MeshDirty: u8 {
        const POSITIONS = 0b0001;
        const NORMALS = 0b0010;
        const TOPOLOGY = 0b0100;
    }
}

/// Indexed triangle mesh
#[derive(Debug, Clone)]
pub struct Mesh {
    positions: Vec<Vec3>,
    normals: Vec<Vec3>,
    triangles: Vec<[u32; 3]>,
    dirty: MeshDirty,
    topology_revision: u64,
}

impl Mesh {
    /// Build a mesh and derive its vertex normals from the faces
    pub fn new(positions: Vec<Vec3>, triangles: Vec<[u32; 3]>) -> CoreResult<Self> {
        let normals = vec![Vec3::ZERO; positions.len()];
        let mut mesh = Self::with_normals(positions, normals, triangles)?;
        mesh.compute_vertex_normals();
        Ok(mesh)
    }

    /// Build a mesh from complete buffers
    pub fn with_normals(
        positions: Vec<Vec3>,
        normals: Vec<Vec3>,
        triangles: Vec<[u32; 3]>,
    ) -> CoreResult<Self> {
        validate(&positions, &normals, &triangles)?;
        Ok(Self {
            positions,
            normals,
            triangles,
            dirty: MeshDirty::all(),
            topology_revision: 0,
        })
    }

    /// Swap in new buffers, e.g. after a topology-changing rebuild.
    ///
    /// Bumps the topology revision; anything cached against the old index
    /// buffer must be discarded.
    pub fn replace(
        &mut self,
        positions: Vec<Vec3>,
        normals: Vec<Vec3>,
        triangles: Vec<[u32; 3]>,
    ) -> CoreResult<()> {
        validate(&positions, &normals, &triangles)?;
        self.positions = positions;
        self.normals = normals;
        self.triangles = triangles;
        self.topology_revision += 1;
        self.dirty = MeshDirty::all();
        Ok(())
    }

    /// Number of vertices
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Number of triangles
    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Whether the mesh has no triangles
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    /// Vertex positions
    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    /// Vertex positions, writable. Callers mark [`MeshDirty::POSITIONS`].
    pub fn positions_mut(&mut self) -> &mut [Vec3] {
        &mut self.positions
    }

    /// Vertex normals
    pub fn normals(&self) -> &[Vec3] {
        &self.normals
    }

    /// Vertex normals, writable. Callers mark [`MeshDirty::NORMALS`].
    pub fn normals_mut(&mut self) -> &mut [Vec3] {
        &mut self.normals
    }

    /// Triangle index triples
    pub fn triangles(&self) -> &[[u32; 3]] {
        &self.triangles
    }

    /// Vertex indices of triangle `index`
    pub fn triangle_indices(&self, index: usize) -> [u32; 3] {
        self.triangles[index]
    }

    /// Corner positions of triangle `index`
    pub fn triangle(&self, index: usize) -> Triangle {
        let [a, b, c] = self.triangles[index];
        Triangle::new(
            self.positions[a as usize],
            self.positions[b as usize],
            self.positions[c as usize],
        )
    }

    /// Unit face normal of triangle `index`, zero if degenerate
    pub fn face_normal(&self, index: usize) -> Vec3 {
        self.triangle(index).normal()
    }

    /// Bounds of all vertex positions
    pub fn bounds(&self) -> Aabb {
        Aabb::from_points(self.positions.iter().copied())
    }

    /// Revision of the index buffer, bumped by [`Mesh::replace`]
    pub fn topology_revision(&self) -> u64 {
        self.topology_revision
    }

    /// Flag buffers as changed
    pub fn mark_dirty(&mut self, flags: MeshDirty) {
        self.dirty |= flags;
    }

    /// Check dirty state without clearing it
    pub fn dirty(&self) -> MeshDirty {
        self.dirty
    }

    /// Return and clear the dirty flags (renderer upload)
    pub fn take_dirty(&mut self) -> MeshDirty {
        std::mem::take(&mut self.dirty)
    }

    /// Recompute every vertex normal from the unit normals of its faces
    pub fn compute_vertex_normals(&mut self) {
        self.normals.iter_mut().for_each(|n| *n = Vec3::ZERO);

        for index in 0..self.triangles.len() {
            let face = self.face_normal(index);
            for v in self.triangles[index] {
                self.normals[v as usize] += face;
            }
        }

        for normal in &mut self.normals {
            *normal = normal.normalize_or(Vec3::Z);
        }
        self.dirty |= MeshDirty::NORMALS;
    }

    /// Build the vertex → incident triangle map
    pub fn vertex_triangles(&self) -> VertexTriangleMap {
        let mut incident = vec![SmallVec::new(); self.positions.len()];
        for (tri, indices) in self.triangles.iter().enumerate() {
            for &v in indices {
                incident[v as usize].push(tri as u32);
            }
        }
        VertexTriangleMap { incident }
    }
}

fn validate(positions: &[Vec3], normals: &[Vec3], triangles: &[[u32; 3]]) -> CoreResult<()> {
    if normals.len() != positions.len() {
        return Err(CoreError::AttributeLength {
            expected: positions.len(),
            found: normals.len(),
        });
    }

    let vertex_count = positions.len();
    for (triangle, indices) in triangles.iter().enumerate() {
        if let Some(&index) = indices.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(CoreError::IndexOutOfBounds {
                triangle,
                index,
                vertex_count,
            });
        }
    }
    Ok(())
}

/// Triangles incident to each vertex
#[derive(Debug, Clone, Default)]
pub struct VertexTriangleMap {
    incident: Vec<SmallVec<[u32; 8]>>,
}

impl VertexTriangleMap {
    /// Triangles using vertex `vertex`
    pub fn incident(&self, vertex: u32) -> &[u32] {
        self.incident
            .get(vertex as usize)
            .map(|list| list.as_slice())
            .unwrap_or(&[])
    }

    /// Whether `triangle` uses `vertex`
    pub fn is_incident(&self, vertex: u32, triangle: u32) -> bool {
        self.incident(vertex).contains(&triangle)
    }

    /// Number of vertices covered
    pub fn len(&self) -> usize {
        self.incident.len()
    }

    pub fn is_empty(&self) -> bool {
        self.incident.is_empty()
    }
}

/// Regular grid of `cells × cells` quads in the XY plane spanning
/// `[0, size]²`, facing +Z. Handy for tests and benches.
pub fn grid_mesh(cells: u32, size: f32) -> Mesh {
    let cells = cells.max(1);
    let row = cells + 1;
    let step = size / cells as f32;

    let mut positions = Vec::with_capacity((row * row) as usize);
    for y in 0..row {
        for x in 0..row {
            positions.push(Vec3::new(x as f32 * step, y as f32 * step, 0.0));
        }
    }

    let mut triangles = Vec::with_capacity((cells * cells * 2) as usize);
    for y in 0..cells {
        for x in 0..cells {
            let i = y * row + x;
            triangles.push([i, i + 1, i + row + 1]);
            triangles.push([i, i + row + 1, i + row]);
        }
    }

    let normals = vec![Vec3::Z; positions.len()];
    Mesh {
        positions,
        normals,
        triangles,
        dirty: MeshDirty::all(),
        topology_revision: 0,
    }
}

/// UV sphere of the given radius centered at the origin, outward facing
pub fn uv_sphere_mesh(radius: f32, segments: u32, rings: u32) -> Mesh {
    let segments = segments.max(3);
    let rings = rings.max(2);

    let mut positions = Vec::new();
    positions.push(Vec3::new(0.0, 0.0, radius));
    for ring in 1..rings {
        let theta = std::f32::consts::PI * ring as f32 / rings as f32;
        for seg in 0..segments {
            let phi = std::f32::consts::TAU * seg as f32 / segments as f32;
            positions.push(Vec3::new(
                radius * theta.sin() * phi.cos(),
                radius * theta.sin() * phi.sin(),
                radius * theta.cos(),
            ));
        }
    }
    positions.push(Vec3::new(0.0, 0.0, -radius));
    let south = (positions.len() - 1) as u32;

    let ring_start = |ring: u32| 1 + (ring - 1) * segments;
    let mut triangles = Vec::new();
    for seg in 0..segments {
        let next = (seg + 1) % segments;
        triangles.push([0, ring_start(1) + seg, ring_start(1) + next]);
    }
    for ring in 1..rings - 1 {
        for seg in 0..segments {
            let next = (seg + 1) % segments;
            let a = ring_start(ring) + seg;
            let b = ring_start(ring) + next;
            let c = ring_start(ring + 1) + seg;
            let d = ring_start(ring + 1) + next;
            triangles.push([a, c, d]);
            triangles.push([a, d, b]);
        }
    }
    for seg in 0..segments {
        let next = (seg + 1) % segments;
        triangles.push([south, ring_start(rings - 1) + next, ring_start(rings - 1) + seg]);
    }

    let normals = positions.iter().map(|p| p.normalize_or(Vec3::Z)).collect();
    Mesh {
        positions,
        normals,
        triangles,
        dirty: MeshDirty::all(),
        topology_revision: 0,
    }
}
