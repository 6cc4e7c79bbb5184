//! Stroke Engine
//!
//! One localized brush application:
//! 1. Map the brush center into mesh-local space and build a sphere
//! 2. Shapecast the BVH; nodes whose box lies inside the sphere contribute
//!    every vertex without per-vertex tests
//! 3. Average the affected vertex normals into a stroke normal and orient
//!    the brush indicator with it
//! 4. Unless previewing, displace every affected vertex along the stroke
//!    normal according to the brush kind and zero its normal for recompute

use dentsculpt_core::{
    Aabb, BoundingSphere, BoundsRelation, Mesh, MeshBvh, MeshDirty, Plane, Shapecast, Transform,
    Triangle,
};
use glam::Vec3;

use crate::brush::{BrushConfig, BrushIndicator};
use crate::change_set::ChangeSet;

/// Per-call stroke parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrokeInput {
    /// Brush center in world space
    pub center: Vec3,
    /// Secondary pointer button held; flips the displacement sign
    pub secondary: bool,
    /// Only place and orient the indicator, leave the mesh untouched
    pub brush_only: bool,
}

impl StrokeInput {
    /// A deforming stroke at `center`
    pub fn at(center: Vec3) -> Self {
        Self {
            center,
            secondary: false,
            brush_only: false,
        }
    }

    /// A preview stroke at `center`
    pub fn preview(center: Vec3) -> Self {
        Self {
            brush_only: true,
            ..Self::at(center)
        }
    }
}

/// Summary of one stroke application
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StrokeOutcome {
    /// Triangles visited
    pub triangles: usize,
    /// Vertices inside the brush
    pub vertices: usize,
    /// Stroke normal in mesh-local space, zero if none could be derived
    pub normal: Vec3,
    /// Whether vertex positions were changed
    pub displaced: bool,
}

/// Shapecast collecting the vertices inside a sphere
struct BrushQuery<'a> {
    sphere: BoundingSphere,
    triangles: &'a [[u32; 3]],
    changes: ChangeSet,
}

impl Shapecast for BrushQuery<'_> {
    fn intersects_bounds(&mut self, bounds: &Aabb, node: u32) -> BoundsRelation {
        self.changes.nodes.insert(node);
        if !self.sphere.intersects_aabb(bounds) {
            BoundsRelation::Disjoint
        } else if self.sphere.contains_aabb(bounds) {
            BoundsRelation::Contained
        } else {
            BoundsRelation::Intersected
        }
    }

    fn intersects_triangle(&mut self, triangle: &Triangle, index: u32, contained: bool) -> bool {
        self.changes.triangles.insert(index);

        let indices = self.triangles[index as usize];
        let corners = [triangle.a, triangle.b, triangle.c];
        for (vertex, corner) in indices.into_iter().zip(corners) {
            if contained || self.sphere.contains_point(corner) {
                self.changes.vertices.insert(vertex);
            }
        }
        false
    }
}

/// Apply one stroke to `mesh`.
///
/// Touched triangles, vertices and BVH nodes are folded into `accumulator`
/// when given. The BVH is only read; callers refit it with the accumulated
/// node set once the path is done. A brush that fails
/// [`BrushConfig::validate`] leaves everything untouched.
pub fn apply_stroke(
    mesh: &mut Mesh,
    bvh: &MeshBvh,
    transform: &Transform,
    brush: &BrushConfig,
    input: &StrokeInput,
    indicator: &mut BrushIndicator,
    accumulator: Option<&mut ChangeSet>,
) -> StrokeOutcome {
    if let Err(err) = brush.validate() {
        log::warn!("Skipping stroke: {err}");
        return StrokeOutcome::default();
    }

    let local_center = transform.to_local_point(input.center);
    let mut query = BrushQuery {
        sphere: BoundingSphere::new(local_center, brush.radius),
        triangles: mesh.triangles(),
        changes: ChangeSet::new(),
    };
    bvh.shapecast(mesh, &mut query);
    let changes = query.changes;

    if let Some(accumulator) = accumulator {
        accumulator.extend(&changes);
    }

    let mut normal_sum = Vec3::ZERO;
    let mut point_sum = Vec3::ZERO;
    for &v in &changes.vertices {
        normal_sum += mesh.normals()[v as usize];
        point_sum += mesh.positions()[v as usize];
    }

    // Vertices displaced earlier in the same frame carry zero normals; when
    // nothing else is left, keep the previous stroke direction.
    let normal = match normal_sum.try_normalize() {
        Some(normal) => normal,
        None => indicator
            .normal()
            .map(|n| transform.to_local_vector(n).normalize_or_zero())
            .unwrap_or(Vec3::ZERO),
    };

    let mut outcome = StrokeOutcome {
        triangles: changes.triangles.len(),
        vertices: changes.vertices.len(),
        normal,
        displaced: false,
    };

    if normal != Vec3::ZERO {
        indicator.orient((transform.rotation * normal).normalize_or(Vec3::Z));
    }

    if input.brush_only || changes.vertices.is_empty() || normal == Vec3::ZERO {
        return outcome;
    }

    let centroid = point_sum / changes.vertices.len() as f32;
    let plane = Plane::from_point_normal(centroid, normal);
    let sign = brush.sign(input.secondary);

    for &v in &changes.vertices {
        let position = mesh.positions()[v as usize];
        let falloff = 1.0 - position.distance(local_center) / brush.radius;
        let offset = brush.displacement(falloff, plane.distance_to_point(position), sign);

        mesh.positions_mut()[v as usize] = position + normal * offset;
        mesh.normals_mut()[v as usize] = Vec3::ZERO;
    }

    mesh.mark_dirty(MeshDirty::POSITIONS | MeshDirty::NORMALS);
    outcome.displaced = true;

    log::trace!(
        "Stroke at {:?}: {} vertices, {} triangles",
        input.center,
        outcome.vertices,
        outcome.triangles
    );
    outcome
}
