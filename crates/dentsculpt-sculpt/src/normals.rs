//! Normal Recompute
//!
//! Rebuilds vertex normals for exactly the vertices of a change set. Vertices
//! outside the set keep their normals even when they share a triangle with a
//! moved vertex; nothing about their incident faces changed.

use dentsculpt_core::{Mesh, MeshDirty};
use glam::Vec3;

use crate::change_set::ChangeSet;

/// Recompute normals for `changes.vertices` from `changes.triangles`.
///
/// Each affected vertex ends up with the normalized sum of the unit face
/// normals of its affected triangles. Out-of-range indices are ignored.
pub fn recompute_normals(mesh: &mut Mesh, changes: &ChangeSet) {
    if changes.vertices.is_empty() {
        return;
    }

    let vertex_count = mesh.vertex_count();
    for &v in &changes.vertices {
        if let Some(normal) = mesh.normals_mut().get_mut(v as usize) {
            *normal = Vec3::ZERO;
        }
    }

    for &t in &changes.triangles {
        if t as usize >= mesh.triangle_count() {
            continue;
        }
        let face = mesh.face_normal(t as usize);
        let indices = mesh.triangle_indices(t as usize);
        let normals = mesh.normals_mut();
        for v in indices {
            if changes.vertices.contains(&v) {
                normals[v as usize] += face;
            }
        }
    }

    let normals = mesh.normals_mut();
    for &v in &changes.vertices {
        if (v as usize) < vertex_count {
            normals[v as usize] = normals[v as usize].normalize_or(Vec3::Z);
        }
    }

    mesh.mark_dirty(MeshDirty::NORMALS);
    log::trace!(
        "Recomputed {} normals from {} triangles",
        changes.vertices.len(),
        changes.triangles.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use dentsculpt_core::mesh::grid_mesh;

    fn bumped_grid() -> (Mesh, ChangeSet) {
        let mut mesh = grid_mesh(4, 1.0);
        // Raise the center vertex and zero its normal, as a stroke would
        let center = 12u32;
        mesh.positions_mut()[center as usize].z = 0.2;
        mesh.normals_mut()[center as usize] = Vec3::ZERO;

        let mut changes = ChangeSet::new();
        changes.vertices.insert(center);
        for (t, tri) in mesh.triangles().iter().enumerate() {
            if tri.contains(&center) {
                changes.triangles.insert(t as u32);
            }
        }
        (mesh, changes)
    }

    #[test]
    fn test_affected_normals_are_unit_length() {
        let (mut mesh, changes) = bumped_grid();
        recompute_normals(&mut mesh, &changes);

        for &v in &changes.vertices {
            let n = mesh.normals()[v as usize];
            assert!((n.length() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_unaffected_normals_untouched() {
        let (mut mesh, changes) = bumped_grid();
        let before = mesh.normals().to_vec();
        recompute_normals(&mut mesh, &changes);

        for (v, (old, new)) in before.iter().zip(mesh.normals()).enumerate() {
            if !changes.vertices.contains(&(v as u32)) {
                assert_eq!(old, new, "vertex {v} changed");
            }
        }
    }

    #[test]
    fn test_matches_full_recompute_for_complete_ring() {
        let (mut partial, changes) = bumped_grid();
        recompute_normals(&mut partial, &changes);

        let mut full = partial.clone();
        full.compute_vertex_normals();

        let v = 12usize;
        assert!((partial.normals()[v] - full.normals()[v]).length() < 1e-5);
    }

    #[test]
    fn test_empty_change_set_is_noop() {
        let mut mesh = grid_mesh(2, 1.0);
        mesh.take_dirty();
        recompute_normals(&mut mesh, &ChangeSet::new());
        assert!(mesh.dirty().is_empty());
    }

    #[test]
    fn test_out_of_range_indices_ignored() {
        let mut mesh = grid_mesh(2, 1.0);
        let mut changes = ChangeSet::new();
        changes.vertices.extend([0, 999]);
        changes.triangles.extend([0, 999]);
        recompute_normals(&mut mesh, &changes);
        assert!((mesh.normals()[0] - Vec3::Z).length() < 1e-5);
    }
}
