//! Blockout Generator
//!
//! Fills undercut regions so the surface can be released along an insertion
//! direction. Every undercut triangle pushes its vertices along its face
//! normal with the component along the insertion direction removed.
//! - **Shell** moves the existing vertices by their averaged offset; the index
//!   buffer is untouched.
//! - **Prism** leaves the original surface in place, adds a displaced top cap
//!   over the undercut region and stitches its boundary with side walls.

use ahash::RandomState;
use dentsculpt_core::math::LENGTH_EPSILON;
use dentsculpt_core::{Mesh, MeshBvh, MeshDirty, Transform};
use glam::Vec3;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::classify::UndercutClassification;
use crate::{UndercutError, UndercutResult};

/// Default blockout offset in world units
pub const DEFAULT_OFFSET: f32 = 0.2;

/// How corrective geometry is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockoutStrategy {
    /// Offset existing vertices
    #[default]
    Shell,
    /// Add a top cap and side walls
    Prism,
}

/// Blockout configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockoutSettings {
    pub strategy: BlockoutStrategy,
    /// Offset distance in world units
    pub offset: f32,
    /// Flip the winding of the prism top cap
    pub reverse_top_winding: bool,
}

impl Default for BlockoutSettings {
    fn default() -> Self {
        Self {
            strategy: BlockoutStrategy::Shell,
            offset: DEFAULT_OFFSET,
            reverse_top_winding: true,
        }
    }
}

/// What a blockout changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BlockoutReport {
    pub strategy: BlockoutStrategy,
    /// Undercut triangles that contributed an offset
    pub undercut_triangles: usize,
    /// Existing vertices moved (shell)
    pub moved_vertices: usize,
    /// Vertices appended (prism)
    pub added_vertices: usize,
    /// Net growth of the triangle count (prism)
    pub added_triangles: usize,
    /// Region boundary edges stitched with side walls (prism)
    pub boundary_edges: usize,
}

impl BlockoutReport {
    pub fn is_noop(&self) -> bool {
        self.undercut_triangles == 0
    }
}

/// Face normal with its component along `direction` removed, normalized.
///
/// Falls back to the face normal when the normal is parallel to the
/// direction.
pub fn rejection(normal: Vec3, direction: Vec3) -> Vec3 {
    let rejected = normal - direction * normal.dot(direction);
    if rejected.length_squared() > LENGTH_EPSILON {
        rejected.normalize()
    } else {
        normal
    }
}

type VertexOffsets = IndexMap<u32, Vec3, RandomState>;

/// Apply a blockout over the undercut triangles of `classification`.
///
/// `direction` is the world-space insertion direction, usually the
/// classification's view direction. The BVH is refit (shell) or rebuilt
/// (prism) before returning.
pub fn apply_blockout(
    mesh: &mut Mesh,
    bvh: &mut MeshBvh,
    transform: &Transform,
    classification: &UndercutClassification,
    direction: Vec3,
    settings: &BlockoutSettings,
) -> UndercutResult<BlockoutReport> {
    if !settings.offset.is_finite() {
        return Err(UndercutError::InvalidSettings(format!(
            "offset must be finite, got {}",
            settings.offset
        )));
    }
    if !classification.is_valid_for(mesh) {
        return Err(UndercutError::StaleClassification {
            computed: classification.revision,
            current: mesh.topology_revision(),
            triangles: classification.triangles.len(),
        });
    }

    let (region, offsets) = collect_offsets(
        mesh,
        transform,
        classification,
        direction.normalize_or_zero(),
        settings.offset,
    );

    let mut report = BlockoutReport {
        strategy: settings.strategy,
        undercut_triangles: region.len(),
        ..Default::default()
    };
    if region.is_empty() {
        log::debug!("Blockout skipped: no undercut triangles");
        return Ok(report);
    }

    match settings.strategy {
        BlockoutStrategy::Shell => {
            let positions = mesh.positions_mut();
            for (&v, &offset) in &offsets {
                positions[v as usize] += offset;
            }
            mesh.compute_vertex_normals();
            mesh.mark_dirty(MeshDirty::POSITIONS);
            bvh.refit(mesh, None);
            report.moved_vertices = offsets.len();
        }
        BlockoutStrategy::Prism => {
            let before = (mesh.vertex_count(), mesh.triangle_count());
            report.boundary_edges = build_prism(mesh, &region, &offsets, settings.reverse_top_winding)?;
            *bvh = MeshBvh::build(mesh, bvh.config());
            report.added_vertices = mesh.vertex_count() - before.0;
            report.added_triangles = mesh.triangle_count() - before.1;
        }
    }

    log::info!(
        "Blockout ({:?}): {} undercut triangles, {} moved, {} added vertices, {} boundary edges",
        report.strategy,
        report.undercut_triangles,
        report.moved_vertices,
        report.added_vertices,
        report.boundary_edges
    );
    Ok(report)
}

/// Undercut triangles that contribute, and the averaged mesh-local offset of
/// every vertex they touch in first-touch order
fn collect_offsets(
    mesh: &Mesh,
    transform: &Transform,
    classification: &UndercutClassification,
    direction: Vec3,
    offset: f32,
) -> (Vec<u32>, VertexOffsets) {
    let matrix = transform.matrix();
    let vertex_count = mesh.vertex_count();

    let mut region = Vec::new();
    let mut sums: IndexMap<u32, (Vec3, u32), RandomState> = IndexMap::default();
    for t in classification.undercut_triangles() {
        let Some(&indices) = mesh.triangles().get(t as usize) else {
            log::warn!("Skipping undercut triangle {t}: out of range");
            continue;
        };
        if indices.iter().any(|&v| v as usize >= vertex_count) {
            log::warn!("Skipping undercut triangle {t}: vertex index out of range");
            continue;
        }

        let normal = mesh.triangle(t as usize).transformed(&matrix).normal();
        if normal == Vec3::ZERO {
            continue;
        }
        let push = rejection(normal, direction) * offset;

        region.push(t);
        for v in indices {
            let entry = sums.entry(v).or_insert((Vec3::ZERO, 0));
            entry.0 += push;
            entry.1 += 1;
        }
    }

    let offsets = sums
        .into_iter()
        .map(|(v, (sum, count))| (v, transform.to_local_vector(sum / count as f32)))
        .collect();
    (region, offsets)
}

/// Replace the mesh buffers with bottom + top cap + side walls. Returns the
/// number of boundary edges stitched.
fn build_prism(
    mesh: &mut Mesh,
    region: &[u32],
    offsets: &VertexOffsets,
    reverse_top_winding: bool,
) -> UndercutResult<usize> {
    let base = mesh.vertex_count() as u32;
    let top = |v: u32| offsets.get_index_of(&v).map(|i| base + i as u32);

    let mut positions = mesh.positions().to_vec();
    positions.extend(
        offsets
            .iter()
            .map(|(&v, &offset)| mesh.positions()[v as usize] + offset),
    );

    let in_region: ahash::AHashSet<u32> = region.iter().copied().collect();
    let mut triangles: Vec<[u32; 3]> = mesh
        .triangles()
        .iter()
        .enumerate()
        .filter(|(t, _)| !in_region.contains(&(*t as u32)))
        .map(|(_, tri)| *tri)
        .collect();

    // Edges keyed without direction; the first winding seen is kept
    let mut edges: IndexMap<(u32, u32), (u32, u32, u32), RandomState> = IndexMap::default();
    for &t in region {
        let [a, b, c] = mesh.triangle_indices(t as usize);
        let (Some(ta), Some(tb), Some(tc)) = (top(a), top(b), top(c)) else {
            log::warn!("Skipping undercut triangle {t}: missing top vertex");
            continue;
        };
        triangles.push(if reverse_top_winding {
            [ta, tc, tb]
        } else {
            [ta, tb, tc]
        });

        for (from, to) in [(a, b), (b, c), (c, a)] {
            edges
                .entry((from.min(to), from.max(to)))
                .and_modify(|edge| edge.2 += 1)
                .or_insert((from, to, 1));
        }
    }

    let mut boundary = 0;
    for &(a, b, uses) in edges.values() {
        if uses != 1 {
            continue;
        }
        let (Some(ta), Some(tb)) = (top(a), top(b)) else {
            log::warn!("Skipping boundary edge ({a}, {b}): vertex index out of range");
            continue;
        };
        triangles.push([a, b, tb]);
        triangles.push([a, tb, ta]);
        boundary += 1;
    }

    let normals = vec![Vec3::ZERO; positions.len()];
    mesh.replace(positions, normals, triangles)?;
    mesh.compute_vertex_normals();
    Ok(boundary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::UndercutPolicy;
    use dentsculpt_core::BvhConfig;
    use dentsculpt_core::mesh::grid_mesh;
    use glam::Quat;

    /// 4×4 grid with the center 2×2 cells flagged
    fn flagged_grid() -> (Mesh, MeshBvh, UndercutClassification) {
        let mesh = grid_mesh(4, 1.0);
        let bvh = MeshBvh::build(&mesh, BvhConfig::default());
        let mut triangles = vec![false; mesh.triangle_count()];
        for t in [10, 11, 12, 13, 18, 19, 20, 21] {
            triangles[t] = true;
        }
        let classification = UndercutClassification {
            triangles,
            vertices: None,
            eye: Vec3::new(0.5, 0.5, 5.0),
            view_direction: Vec3::Z,
            policy: UndercutPolicy::analytic(),
            revision: mesh.topology_revision(),
        };
        (mesh, bvh, classification)
    }

    fn prism() -> BlockoutSettings {
        BlockoutSettings {
            strategy: BlockoutStrategy::Prism,
            ..Default::default()
        }
    }

    #[test]
    fn test_rejection() {
        let tilted = Vec3::new(1.0, 0.0, 1.0).normalize();
        assert!((rejection(tilted, Vec3::Z) - Vec3::X).length() < 1e-5);
        // Parallel to the direction: fall back to the face normal
        assert_eq!(rejection(Vec3::Z, Vec3::Z), Vec3::Z);
        assert_eq!(rejection(Vec3::Y, Vec3::ZERO), Vec3::Y);
    }

    #[test]
    fn test_shell_moves_region_vertices() {
        let (mut mesh, mut bvh, classification) = flagged_grid();
        let topology = mesh.triangles().to_vec();

        let report = apply_blockout(
            &mut mesh,
            &mut bvh,
            &Transform::IDENTITY,
            &classification,
            classification.view_direction,
            &BlockoutSettings::default(),
        )
        .unwrap();

        assert_eq!(report.undercut_triangles, 8);
        assert_eq!(report.moved_vertices, 9);
        assert_eq!(report.added_vertices, 0);
        assert_eq!(mesh.triangles(), topology.as_slice());
        let raised = mesh.positions().iter().filter(|p| (p.z - DEFAULT_OFFSET).abs() < 1e-5).count();
        assert_eq!(raised, 9);
        assert!(bvh.bounds_are_valid(&mesh));
        assert!(mesh.normals().iter().all(|n| (n.length() - 1.0).abs() < 1e-5));
        // Shell keeps the index buffer, the classification stays usable
        assert!(classification.is_valid_for(&mesh));
    }

    #[test]
    fn test_shell_offset_is_world_space() {
        let (mut mesh, mut bvh, classification) = flagged_grid();
        let scaled = Transform::new(Vec3::ZERO, Quat::IDENTITY, Vec3::splat(2.0));

        apply_blockout(
            &mut mesh,
            &mut bvh,
            &scaled,
            &classification,
            Vec3::X,
            &BlockoutSettings::default(),
        )
        .unwrap();

        // Face normal +Z is already orthogonal to X; 0.2 world is 0.1 local
        assert!(mesh.positions().iter().any(|p| (p.z - 0.1).abs() < 1e-5));
        assert!(mesh.positions().iter().all(|p| p.z < 0.1 + 1e-5));
    }

    #[test]
    fn test_prism_closure() {
        let (mut mesh, mut bvh, classification) = flagged_grid();
        let revision = mesh.topology_revision();

        let report = apply_blockout(
            &mut mesh,
            &mut bvh,
            &Transform::IDENTITY,
            &classification,
            classification.view_direction,
            &prism(),
        )
        .unwrap();

        assert_eq!(report.boundary_edges, 8);
        assert_eq!(report.added_triangles, 2 * report.boundary_edges);
        assert_eq!(report.added_vertices, 9);
        assert_eq!(mesh.vertex_count(), 25 + 9);
        assert_eq!(mesh.triangle_count(), 32 + 16);
        assert!(mesh.topology_revision() > revision);

        let vertex_count = mesh.vertex_count() as u32;
        assert!(mesh.triangles().iter().flatten().all(|&v| v < vertex_count));
        assert!(bvh.bounds_are_valid(&mesh));
        assert_eq!(bvh.root_bounds(), mesh.bounds());
    }

    #[test]
    fn test_prism_top_winding() {
        for (reverse, expected) in [(true, -Vec3::Z), (false, Vec3::Z)] {
            let (mut mesh, mut bvh, classification) = flagged_grid();
            let settings = BlockoutSettings {
                reverse_top_winding: reverse,
                ..prism()
            };
            apply_blockout(&mut mesh, &mut bvh, &Transform::IDENTITY, &classification, Vec3::Z, &settings)
                .unwrap();

            // Bottom keeps 24 triangles, the top cap follows
            let cap = mesh.face_normal(24);
            assert!((cap - expected).length() < 1e-5);
            assert!(mesh.triangle(24).centroid().z > 0.1);
        }
    }

    #[test]
    fn test_prism_is_deterministic() {
        let (mut first, mut first_bvh, classification) = flagged_grid();
        let (mut second, mut second_bvh, _) = flagged_grid();

        for (mesh, bvh) in [(&mut first, &mut first_bvh), (&mut second, &mut second_bvh)] {
            apply_blockout(mesh, bvh, &Transform::IDENTITY, &classification, Vec3::Z, &prism()).unwrap();
        }
        assert_eq!(first.triangles(), second.triangles());
        assert_eq!(first.positions(), second.positions());
    }

    #[test]
    fn test_stale_classification_rejected() {
        let (mut mesh, mut bvh, classification) = flagged_grid();
        apply_blockout(&mut mesh, &mut bvh, &Transform::IDENTITY, &classification, Vec3::Z, &prism()).unwrap();

        let err = apply_blockout(&mut mesh, &mut bvh, &Transform::IDENTITY, &classification, Vec3::Z, &prism())
            .unwrap_err();
        assert!(matches!(err, UndercutError::StaleClassification { computed: 0, current: 1, .. }));
    }

    #[test]
    fn test_no_undercuts_is_noop() {
        let (mut mesh, mut bvh, mut classification) = flagged_grid();
        classification.triangles.iter_mut().for_each(|flag| *flag = false);
        let positions = mesh.positions().to_vec();

        for settings in [BlockoutSettings::default(), prism()] {
            let report =
                apply_blockout(&mut mesh, &mut bvh, &Transform::IDENTITY, &classification, Vec3::Z, &settings)
                    .unwrap();
            assert!(report.is_noop());
        }
        assert_eq!(mesh.positions(), positions.as_slice());
        assert_eq!(mesh.topology_revision(), 0);
    }

    #[test]
    fn test_degenerate_triangles_contribute_nothing() {
        let mut mesh = Mesh::new(
            vec![Vec3::ZERO, Vec3::X, Vec3::new(2.0, 0.0, 0.0)],
            vec![[0, 1, 2]],
        )
        .unwrap();
        let mut bvh = MeshBvh::build(&mesh, BvhConfig::default());
        let classification = UndercutClassification {
            triangles: vec![true],
            vertices: None,
            eye: Vec3::Z,
            view_direction: Vec3::Z,
            policy: UndercutPolicy::analytic(),
            revision: 0,
        };
        let report = apply_blockout(
            &mut mesh,
            &mut bvh,
            &Transform::IDENTITY,
            &classification,
            Vec3::Z,
            &BlockoutSettings::default(),
        )
        .unwrap();
        assert!(report.is_noop());
        assert!(mesh.positions().iter().all(|p| p.is_finite()));
    }

    #[test]
    fn test_invalid_offset() {
        let (mut mesh, mut bvh, classification) = flagged_grid();
        let settings = BlockoutSettings {
            offset: f32::NAN,
            ..Default::default()
        };
        let err = apply_blockout(&mut mesh, &mut bvh, &Transform::IDENTITY, &classification, Vec3::Z, &settings)
            .unwrap_err();
        assert!(matches!(err, UndercutError::InvalidSettings(_)));
    }

    #[test]
    fn test_settings_from_json() {
        let settings: BlockoutSettings = serde_json::from_str(r#"{"strategy":"prism"}"#).unwrap();
        assert_eq!(settings.strategy, BlockoutStrategy::Prism);
        assert_eq!(settings.offset, DEFAULT_OFFSET);
        assert!(settings.reverse_top_winding);
    }
}
