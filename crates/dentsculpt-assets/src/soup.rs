//! Triangle Soup Import
//!
//! A triangle soup is a flat position channel, three vertices per triangle,
//! with an optional matching normal channel. Indices are synthesized in
//! order; welding then merges coincident corners so neighboring triangles
//! share vertices.

use ahash::AHashMap;
use dentsculpt_core::Mesh;
use glam::{IVec3, Vec3};
use serde::{Deserialize, Serialize};

use crate::{AssetError, AssetResult, MeshImportSettings};

/// Floats per soup triangle
const FLOATS_PER_TRIANGLE: usize = 9;

/// Unindexed triangle data as it comes from a file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriangleSoup {
    /// xyz per vertex, three vertices per triangle
    pub position: Option<Vec<f32>>,
    /// xyz per vertex, same layout as `position`
    pub normal: Option<Vec<f32>>,
}

impl TriangleSoup {
    /// Soup without normals
    pub fn from_positions(position: Vec<f32>) -> Self {
        Self {
            position: Some(position),
            normal: None,
        }
    }

    /// Number of complete triangles in the position channel
    pub fn triangle_count(&self) -> usize {
        self.position
            .as_ref()
            .map_or(0, |p| p.len() / FLOATS_PER_TRIANGLE)
    }
}

/// Build a mesh from a triangle soup
pub fn import_soup(soup: &TriangleSoup, settings: &MeshImportSettings) -> AssetResult<Mesh> {
    let position = soup.position.as_ref().ok_or(AssetError::MissingPosition)?;
    if position.is_empty() || position.len() % FLOATS_PER_TRIANGLE != 0 {
        return Err(AssetError::MalformedSoup(format!(
            "position channel has {} floats, expected a non-zero multiple of {}",
            position.len(),
            FLOATS_PER_TRIANGLE
        )));
    }
    if position.iter().any(|v| !v.is_finite()) {
        return Err(AssetError::MalformedSoup(
            "position channel contains non-finite values".into(),
        ));
    }

    let mut positions: Vec<Vec3> = to_vectors(position)
        .map(|p| p * settings.scale)
        .collect();
    let mut normals = match &soup.normal {
        Some(normal) if normal.len() == position.len() => {
            Some(to_vectors(normal).map(|n| n.normalize_or(Vec3::Z)).collect::<Vec<_>>())
        }
        Some(normal) => {
            log::warn!(
                "Ignoring normal channel: {} floats for {} position floats",
                normal.len(),
                position.len()
            );
            None
        }
        None => None,
    };
    let mut triangles: Vec<[u32; 3]> = (0..positions.len() as u32 / 3)
        .map(|t| [t * 3, t * 3 + 1, t * 3 + 2])
        .collect();

    if let Some(tolerance) = settings.weld_tolerance.filter(|t| *t > 0.0) {
        let (welded, remap) = weld_vertices(&positions, tolerance);
        if let Some(soup_normals) = normals.as_mut() {
            let mut merged = vec![Vec3::ZERO; welded.len()];
            for (old, &new) in remap.iter().enumerate().rev() {
                merged[new as usize] = soup_normals[old];
            }
            *soup_normals = merged;
        }

        let before = triangles.len();
        triangles = triangles
            .iter()
            .map(|tri| tri.map(|v| remap[v as usize]))
            .filter(|[a, b, c]| a != b && b != c && a != c)
            .collect();
        if triangles.len() < before {
            log::warn!(
                "Welding collapsed {} degenerate triangles",
                before - triangles.len()
            );
        }
        positions = welded;
    }

    let mesh = match normals {
        Some(normals) if !settings.compute_normals => Mesh::with_normals(positions, normals, triangles)?,
        _ => Mesh::new(positions, triangles)?,
    };

    log::info!(
        "Imported triangle soup: {} triangles, {} vertices",
        mesh.triangle_count(),
        mesh.vertex_count()
    );
    Ok(mesh)
}

/// Merge vertices closer than `tolerance`.
///
/// Points are bucketed into a `tolerance`-sized grid; each one is matched
/// against the welded vertices in its own cell and the 26 around it, and
/// joins the earliest one within reach. Returns the welded positions, first
/// occurrence wins, and the new index of every input vertex.
pub fn weld_vertices(positions: &[Vec3], tolerance: f32) -> (Vec<Vec3>, Vec<u32>) {
    let mut cells: AHashMap<IVec3, Vec<u32>> = AHashMap::with_capacity(positions.len());
    let mut welded: Vec<Vec3> = Vec::new();
    let tolerance_sq = tolerance * tolerance;

    let remap = positions
        .iter()
        .map(|&p| {
            let cell = (p / tolerance).floor().as_ivec3();
            let nearby = NEIGHBOR_OFFSETS
                .iter()
                .filter_map(|offset| cells.get(&(cell + *offset)))
                .flatten()
                .copied()
                .filter(|&index| welded[index as usize].distance_squared(p) < tolerance_sq)
                .min();

            nearby.unwrap_or_else(|| {
                let index = welded.len() as u32;
                welded.push(p);
                cells.entry(cell).or_default().push(index);
                index
            })
        })
        .collect();

    log::debug!("Welded {} vertices into {}", positions.len(), welded.len());
    (welded, remap)
}

/// A cell and its 26 neighbors
const NEIGHBOR_OFFSETS: [IVec3; 27] = {
    let mut offsets = [IVec3::ZERO; 27];
    let mut i = 0;
    while i < 27 {
        offsets[i] = IVec3::new(i as i32 % 3 - 1, (i as i32 / 3) % 3 - 1, i as i32 / 9 - 1);
        i += 1;
    }
    offsets
};

fn to_vectors(values: &[f32]) -> impl Iterator<Item = Vec3> + '_ {
    values.chunks_exact(3).map(|c| Vec3::new(c[0], c[1], c[2]))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Unit quad as two unshared triangles
    fn quad_soup() -> TriangleSoup {
        TriangleSoup::from_positions(vec![
            0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0,
        ])
    }

    #[test]
    fn test_import_welds_shared_corners() {
        let mesh = import_soup(&quad_soup(), &MeshImportSettings::default()).unwrap();
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.triangle_count(), 2);
        assert_eq!(mesh.triangles(), &[[0, 1, 2], [0, 2, 3]]);
        assert!(mesh.normals().iter().all(|n| (*n - Vec3::Z).length() < 1e-5));
    }

    #[test]
    fn test_import_without_welding() {
        let settings = MeshImportSettings {
            weld_tolerance: None,
            scale: 2.0,
            ..Default::default()
        };
        let mesh = import_soup(&quad_soup(), &settings).unwrap();
        assert_eq!(mesh.vertex_count(), 6);
        assert_eq!(mesh.triangles(), &[[0, 1, 2], [3, 4, 5]]);
        assert_eq!(mesh.bounds().max, Vec3::new(2.0, 2.0, 0.0));
    }

    #[test]
    fn test_missing_position_fails() {
        let soup: TriangleSoup = serde_json::from_str(r#"{"normal":[0,0,1]}"#).unwrap();
        let err = import_soup(&soup, &MeshImportSettings::default()).unwrap_err();
        assert!(matches!(err, AssetError::MissingPosition));
    }

    #[test]
    fn test_malformed_soup_fails() {
        let short = TriangleSoup::from_positions(vec![0.0; 10]);
        assert!(matches!(
            import_soup(&short, &MeshImportSettings::default()),
            Err(AssetError::MalformedSoup(_))
        ));

        let empty = TriangleSoup::from_positions(Vec::new());
        assert!(import_soup(&empty, &MeshImportSettings::default()).is_err());

        let mut nan = quad_soup();
        if let Some(p) = nan.position.as_mut() {
            p[4] = f32::NAN;
        }
        assert!(import_soup(&nan, &MeshImportSettings::default()).is_err());
    }

    #[test]
    fn test_file_normals_kept_when_requested() {
        let mut soup = quad_soup();
        soup.normal = Some([0.0, 0.0, 2.0].repeat(6));
        let settings = MeshImportSettings {
            compute_normals: false,
            ..Default::default()
        };
        let mesh = import_soup(&soup, &settings).unwrap();
        assert!(mesh.normals().iter().all(|n| *n == Vec3::Z));
    }

    #[test]
    fn test_mismatched_normals_ignored() {
        let mut soup = quad_soup();
        soup.normal = Some(vec![0.0, 0.0, 1.0]);
        let settings = MeshImportSettings {
            compute_normals: false,
            ..Default::default()
        };
        let mesh = import_soup(&soup, &settings).unwrap();
        assert_eq!(mesh.normals().len(), mesh.vertex_count());
    }

    #[test]
    fn test_collapsed_triangles_dropped() {
        let soup = TriangleSoup::from_positions(vec![
            0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 0.001, 0.0, 0.0, 0.0, 1.0, 0.0,
        ]);
        let settings = MeshImportSettings {
            weld_tolerance: Some(0.01),
            ..Default::default()
        };
        let mesh = import_soup(&soup, &settings).unwrap();
        assert_eq!(mesh.triangle_count(), 1);
        assert_eq!(mesh.vertex_count(), 3);
    }

    #[test]
    fn test_weld_across_cell_boundary() {
        let points = [Vec3::new(0.00099, 0.0, 0.0), Vec3::new(0.00101, 0.0, 0.0)];
        let (welded, remap) = weld_vertices(&points, 1e-3);
        assert_eq!(welded, vec![points[0]]);
        assert_eq!(remap, vec![0, 0]);

        let noisy = [Vec3::new(0.00049, 0.0, 0.0), Vec3::new(0.00051, 0.0, 0.0)];
        assert_eq!(weld_vertices(&noisy, 1e-3).0.len(), 1);

        // Diagonal neighbor cell, still within reach
        let corner = [Vec3::splat(0.0999), Vec3::splat(0.1001)];
        let (welded, _) = weld_vertices(&corner, 0.01);
        assert_eq!(welded.len(), 1);
    }

    #[test]
    fn test_weld_keeps_points_beyond_tolerance() {
        // Same cell is not enough, the distance decides
        let points = [Vec3::new(0.0001, 0.0001, 0.0), Vec3::new(0.0009, 0.0009, 0.0)];
        let (welded, remap) = weld_vertices(&points, 1e-3);
        assert_eq!(welded.len(), 2);
        assert_eq!(remap, vec![0, 1]);
    }

    #[test]
    fn test_weld_first_occurrence_wins() {
        let points = [Vec3::ZERO, Vec3::X, Vec3::new(0.000_001, 0.0, 0.0)];
        let (welded, remap) = weld_vertices(&points, 1e-4);
        assert_eq!(welded, vec![Vec3::ZERO, Vec3::X]);
        assert_eq!(remap, vec![0, 1, 0]);
    }
}
