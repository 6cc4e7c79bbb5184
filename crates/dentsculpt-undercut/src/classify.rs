//! Undercut Classifier
//!
//! Decides, per triangle, whether the surface is hidden from an insertion
//! viewpoint. Two strategies are available as policies:
//! - **Analytic**: back-face style test of the world-space face normal against
//!   the direction to the eye. Cheap and local.
//! - **Raycast**: cast from the eye to each vertex or centroid and compare the
//!   nearest hit with the direct distance. Catches real self-occlusion.

use std::fmt;

use dentsculpt_core::{Mesh, MeshBvh, Ray, Transform};
use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Default analytic threshold on `normal · view`
pub const DEFAULT_THRESHOLD: f32 = 0.01;

/// Default distance tolerance of the raycast test
pub const DEFAULT_EPSILON: f32 = 0.001;

/// Staged threshold for the first pass after a load
pub const STAGED_FIRST_PASS: f32 = 0.1;

/// Staged threshold once blockouts have been applied
pub const STAGED_LATER_PASSES: f32 = 0.0;

/// Points tested by the raycast policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaycastTarget {
    /// Every vertex; a triangle is undercut if any of its vertices is hidden
    #[default]
    Vertices,
    /// One ray per triangle centroid
    Centroids,
}

/// Visibility strategy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UndercutPolicy {
    /// Undercut when `normal · view <= threshold`
    Analytic { threshold: f32 },
    /// Undercut when the eye ray hits other geometry before the point
    Raycast {
        epsilon: f32,
        #[serde(default)]
        target: RaycastTarget,
    },
    /// Analytic with a stricter threshold on the first pass than on later ones
    Staged { first_pass: f32, later_passes: f32 },
}

impl Default for UndercutPolicy {
    fn default() -> Self {
        Self::analytic()
    }
}

impl UndercutPolicy {
    pub fn analytic() -> Self {
        Self::Analytic {
            threshold: DEFAULT_THRESHOLD,
        }
    }

    pub fn raycast() -> Self {
        Self::Raycast {
            epsilon: DEFAULT_EPSILON,
            target: RaycastTarget::Vertices,
        }
    }

    pub fn staged() -> Self {
        Self::Staged {
            first_pass: STAGED_FIRST_PASS,
            later_passes: STAGED_LATER_PASSES,
        }
    }

    /// Analytic threshold used on classification pass `pass` (0 = first)
    pub fn threshold_for_pass(&self, pass: u32) -> Option<f32> {
        match *self {
            Self::Analytic { threshold } => Some(threshold),
            Self::Staged {
                first_pass,
                later_passes,
            } => Some(if pass == 0 { first_pass } else { later_passes }),
            Self::Raycast { .. } => None,
        }
    }
}

/// Classifier configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UndercutSettings {
    pub policy: UndercutPolicy,
}

/// Result of one classification pass
#[derive(Debug, Clone, PartialEq)]
pub struct UndercutClassification {
    /// Per-triangle undercut flags
    pub triangles: Vec<bool>,
    /// Per-vertex occlusion flags, raycast with vertex targets only
    pub vertices: Option<Vec<bool>>,
    /// World-space viewpoint
    pub eye: Vec3,
    /// Unit world-space direction from the mesh bounds center toward the eye,
    /// zero when the eye sits on the center
    pub view_direction: Vec3,
    /// Policy the flags were computed with
    pub policy: UndercutPolicy,
    /// Topology revision of the classified mesh
    pub revision: u64,
}

impl UndercutClassification {
    /// Whether the flags still line up with the mesh's index buffer
    pub fn is_valid_for(&self, mesh: &Mesh) -> bool {
        self.revision == mesh.topology_revision() && self.triangles.len() == mesh.triangle_count()
    }

    pub fn is_undercut(&self, triangle: u32) -> bool {
        self.triangles.get(triangle as usize).copied().unwrap_or(false)
    }

    /// Indices of undercut triangles in ascending order
    pub fn undercut_triangles(&self) -> impl Iterator<Item = u32> + '_ {
        self.triangles
            .iter()
            .enumerate()
            .filter(|(_, undercut)| **undercut)
            .map(|(index, _)| index as u32)
    }

    pub fn undercut_count(&self) -> usize {
        self.triangles.iter().filter(|undercut| **undercut).count()
    }

    pub fn has_undercuts(&self) -> bool {
        self.triangles.iter().any(|undercut| *undercut)
    }

    pub fn stats(&self) -> UndercutStats {
        let undercut = self.undercut_count();
        let triangles = self.triangles.len();
        UndercutStats {
            triangles,
            undercut,
            fraction: if triangles == 0 {
                0.0
            } else {
                undercut as f32 / triangles as f32
            },
        }
    }
}

/// Summary counts of a classification
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct UndercutStats {
    pub triangles: usize,
    pub undercut: usize,
    pub fraction: f32,
}

impl fmt::Display for UndercutStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} triangles undercut ({:.1}%)",
            self.undercut,
            self.triangles,
            self.fraction * 100.0
        )
    }
}

/// Classify every triangle of `mesh` as seen from the world-space `eye`.
///
/// `pass` counts previous classifications of the same load and only matters
/// for staged policies. The BVH must be current for raycast policies.
pub fn classify_undercuts(
    mesh: &Mesh,
    bvh: &MeshBvh,
    transform: &Transform,
    eye: Vec3,
    policy: UndercutPolicy,
    pass: u32,
) -> UndercutClassification {
    let (triangles, vertices) = match policy {
        UndercutPolicy::Raycast { epsilon, target } => {
            raycast_flags(mesh, bvh, transform, eye, epsilon, target)
        }
        UndercutPolicy::Analytic { .. } | UndercutPolicy::Staged { .. } => {
            let threshold = policy.threshold_for_pass(pass).unwrap_or(DEFAULT_THRESHOLD);
            (analytic_flags(mesh, transform, eye, threshold), None)
        }
    };

    let bounds = mesh.bounds();
    let center = if bounds.is_empty() {
        transform.position
    } else {
        transform.to_world_point(bounds.center())
    };

    let classification = UndercutClassification {
        triangles,
        vertices,
        eye,
        view_direction: (eye - center).normalize_or_zero(),
        policy,
        revision: mesh.topology_revision(),
    };

    log::info!(
        "Undercut pass {} with {:?}: {}",
        pass,
        policy,
        classification.stats()
    );
    classification
}

fn analytic_flags(mesh: &Mesh, transform: &Transform, eye: Vec3, threshold: f32) -> Vec<bool> {
    let matrix = transform.matrix();
    (0..mesh.triangle_count())
        .map(|index| {
            let triangle = mesh.triangle(index).transformed(&matrix);
            let view = (eye - triangle.centroid()).normalize_or_zero();
            triangle.normal().dot(view) <= threshold
        })
        .collect()
}

fn raycast_flags(
    mesh: &Mesh,
    bvh: &MeshBvh,
    transform: &Transform,
    eye: Vec3,
    epsilon: f32,
    target: RaycastTarget,
) -> (Vec<bool>, Option<Vec<bool>>) {
    // Rays run in mesh-local space against the local BVH
    let eye = transform.to_local_point(eye);

    match target {
        RaycastTarget::Vertices => {
            let incident = mesh.vertex_triangles();
            let vertices: Vec<bool> = mesh
                .positions()
                .iter()
                .enumerate()
                .map(|(v, &point)| {
                    is_occluded(mesh, bvh, eye, point, epsilon, |t| {
                        incident.is_incident(v as u32, t)
                    })
                })
                .collect();
            let triangles = mesh
                .triangles()
                .iter()
                .map(|tri| tri.iter().any(|&v| vertices[v as usize]))
                .collect();
            (triangles, Some(vertices))
        }
        RaycastTarget::Centroids => {
            let triangles = (0..mesh.triangle_count())
                .map(|index| {
                    let centroid = mesh.triangle(index).centroid();
                    is_occluded(mesh, bvh, eye, centroid, epsilon, |t| t as usize == index)
                })
                .collect();
            (triangles, None)
        }
    }
}

/// Nearest hit on the eye → point ray lies in front of the point and is not
/// one of the point's own faces
fn is_occluded(
    mesh: &Mesh,
    bvh: &MeshBvh,
    eye: Vec3,
    point: Vec3,
    epsilon: f32,
    is_own: impl Fn(u32) -> bool,
) -> bool {
    let direct = eye.distance(point);
    if direct <= epsilon {
        return false;
    }
    let ray = Ray::towards(eye, point);
    bvh.raycast(mesh, &ray)
        .is_some_and(|hit| hit.distance < direct - epsilon && !is_own(hit.triangle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dentsculpt_core::BvhConfig;
    use dentsculpt_core::mesh::{grid_mesh, uv_sphere_mesh};
    use glam::Quat;

    /// Half of a unit sphere, dome toward +X, so it has both top- and
    /// bottom-facing triangles when seen from +Z
    fn hemisphere() -> Mesh {
        let sphere = uv_sphere_mesh(1.0, 24, 16);
        let positions = sphere.positions().to_vec();
        let triangles = sphere
            .triangles()
            .iter()
            .copied()
            .filter(|tri| tri.iter().all(|&v| positions[v as usize].x >= -1e-5))
            .collect();
        Mesh::new(positions, triangles).unwrap()
    }

    fn classify(mesh: &Mesh, eye: Vec3, policy: UndercutPolicy) -> UndercutClassification {
        let bvh = MeshBvh::build(mesh, BvhConfig::default());
        classify_undercuts(mesh, &bvh, &Transform::IDENTITY, eye, policy, 0)
    }

    #[test]
    fn test_hemisphere_back_faces_are_undercut() {
        let mesh = hemisphere();
        let eye = Vec3::new(0.0, 0.0, 5.0);
        let result = classify(&mesh, eye, UndercutPolicy::analytic());

        assert_eq!(result.triangles.len(), mesh.triangle_count());
        for index in 0..mesh.triangle_count() {
            let tri = mesh.triangle(index);
            let centroid = tri.centroid();
            let expected = tri.normal().dot((eye - centroid).normalize()) <= DEFAULT_THRESHOLD;
            assert_eq!(result.triangles[index], expected);
            if centroid.z > 0.3 {
                assert!(!result.triangles[index], "front face {index} flagged");
            }
            if centroid.z < -0.1 {
                assert!(result.triangles[index], "back face {index} not flagged");
            }
        }
        assert!(result.has_undercuts());
        assert!(result.vertices.is_none());
        assert!((result.view_direction.length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_analytic_is_deterministic() {
        let mesh = hemisphere();
        let eye = Vec3::new(0.3, -1.0, 4.0);
        let first = classify(&mesh, eye, UndercutPolicy::analytic());
        let second = classify(&mesh, eye, UndercutPolicy::analytic());
        assert_eq!(first, second);
    }

    #[test]
    fn test_threshold_is_configurable() {
        // Single triangle whose normal leans 0.05 toward the eye
        let mesh = Mesh::new(
            vec![Vec3::ZERO, Vec3::Y, Vec3::new(-0.05, 0.0, 0.99875)],
            vec![[0, 1, 2]],
        )
        .unwrap();
        let eye = Vec3::new(0.0, 0.0, 1000.0);

        let strict = classify(&mesh, eye, UndercutPolicy::Analytic { threshold: 0.1 });
        let loose = classify(&mesh, eye, UndercutPolicy::Analytic { threshold: 0.01 });
        assert!(strict.triangles[0]);
        assert!(!loose.triangles[0]);

        let bvh = MeshBvh::build(&mesh, BvhConfig::default());
        let staged = UndercutPolicy::staged();
        let first = classify_undercuts(&mesh, &bvh, &Transform::IDENTITY, eye, staged, 0);
        let later = classify_undercuts(&mesh, &bvh, &Transform::IDENTITY, eye, staged, 3);
        assert!(first.triangles[0]);
        assert!(!later.triangles[0]);
    }

    #[test]
    fn test_analytic_uses_world_transform() {
        let mesh = grid_mesh(4, 1.0);
        let bvh = MeshBvh::build(&mesh, BvhConfig::default());
        let eye = Vec3::new(0.5, 0.5, 5.0);

        let upright = classify_undercuts(&mesh, &bvh, &Transform::IDENTITY, eye, UndercutPolicy::analytic(), 0);
        assert!(!upright.has_undercuts());

        let flipped = Transform::new(Vec3::ZERO, Quat::from_rotation_x(std::f32::consts::PI), Vec3::ONE);
        let upside_down = classify_undercuts(&mesh, &bvh, &flipped, eye, UndercutPolicy::analytic(), 0);
        assert_eq!(upside_down.undercut_count(), mesh.triangle_count());
    }

    /// A 4×4 floor grid at z = 0 with a small roof quad hovering over its
    /// center vertex. The roof diagonal stays clear of the center ray.
    fn floor_with_roof() -> Mesh {
        let floor = grid_mesh(4, 1.0);
        let mut positions = floor.positions().to_vec();
        let mut triangles = floor.triangles().to_vec();
        let base = positions.len() as u32;
        positions.extend([
            Vec3::new(0.4, 0.35, 1.0),
            Vec3::new(0.62, 0.35, 1.0),
            Vec3::new(0.62, 0.65, 1.0),
            Vec3::new(0.4, 0.65, 1.0),
        ]);
        triangles.push([base, base + 1, base + 2]);
        triangles.push([base, base + 2, base + 3]);
        Mesh::new(positions, triangles).unwrap()
    }

    #[test]
    fn test_raycast_vertices_finds_occlusion() {
        let mesh = floor_with_roof();
        let eye = Vec3::new(0.5, 0.5, 5.0);
        let result = classify(&mesh, eye, UndercutPolicy::raycast());

        let vertices = result.vertices.as_ref().unwrap();
        let hidden: Vec<usize> = (0..vertices.len()).filter(|&v| vertices[v]).collect();
        assert_eq!(hidden, vec![12]);

        for (index, tri) in mesh.triangles().iter().enumerate() {
            assert_eq!(result.triangles[index], tri.contains(&12), "triangle {index}");
        }

        // Every face points up, so the analytic test sees nothing
        let analytic = classify(&mesh, eye, UndercutPolicy::analytic());
        assert!(!analytic.has_undercuts());
    }

    #[test]
    fn test_raycast_closed_sphere() {
        // Rays to the far side cross the near surface on shared edges and at
        // the pole vertex
        let mesh = uv_sphere_mesh(1.0, 24, 16);
        let result = classify(&mesh, Vec3::new(0.0, 0.0, 5.0), UndercutPolicy::raycast());
        let vertices = result.vertices.as_ref().unwrap();

        for (index, p) in mesh.positions().iter().enumerate() {
            if p.z < -0.3 {
                assert!(vertices[index], "vertex {index} at {p:?} should be hidden");
            } else if p.z > 0.3 {
                assert!(!vertices[index], "vertex {index} at {p:?} should be visible");
            }
        }
        for (index, tri) in mesh.triangles().iter().enumerate() {
            if tri.iter().all(|&v| mesh.positions()[v as usize].z < -0.3) {
                assert!(result.triangles[index], "triangle {index}");
            }
        }
    }

    #[test]
    fn test_raycast_centroids() {
        let mesh = floor_with_roof();
        let result = classify(
            &mesh,
            Vec3::new(0.5, 0.5, 5.0),
            UndercutPolicy::Raycast {
                epsilon: DEFAULT_EPSILON,
                target: RaycastTarget::Centroids,
            },
        );
        let roof = mesh.triangle_count() - 2;
        assert!(result.has_undercuts());
        assert!(!result.triangles[0]);
        assert!(!result.triangles[roof] && !result.triangles[roof + 1]);
        assert!(result.vertices.is_none());
    }

    #[test]
    fn test_raycast_ignores_own_faces() {
        let mesh = grid_mesh(6, 1.0);
        let result = classify(&mesh, Vec3::new(0.2, 0.7, 3.0), UndercutPolicy::raycast());
        assert!(!result.has_undercuts());
        assert!(result.vertices.unwrap().iter().all(|hidden| !hidden));
    }

    #[test]
    fn test_stale_after_topology_change() {
        let mut mesh = grid_mesh(2, 1.0);
        let result = classify(&mesh, Vec3::Z * 5.0, UndercutPolicy::analytic());
        assert!(result.is_valid_for(&mesh));

        let positions = mesh.positions().to_vec();
        let normals = mesh.normals().to_vec();
        mesh.replace(positions, normals, vec![[0, 1, 4]]).unwrap();
        assert!(!result.is_valid_for(&mesh));
    }

    #[test]
    fn test_stats() {
        let result = UndercutClassification {
            triangles: vec![true, false, false, true],
            vertices: None,
            eye: Vec3::Z,
            view_direction: Vec3::Z,
            policy: UndercutPolicy::default(),
            revision: 0,
        };
        let stats = result.stats();
        assert_eq!(stats.undercut, 2);
        assert_eq!(stats.fraction, 0.5);
        assert_eq!(stats.to_string(), "2/4 triangles undercut (50.0%)");
        assert_eq!(result.undercut_triangles().collect::<Vec<_>>(), vec![0, 3]);
        assert!(result.is_undercut(3));
        assert!(!result.is_undercut(99));
    }

    #[test]
    fn test_policy_from_json() {
        let policy: UndercutPolicy =
            serde_json::from_str(r#"{"kind":"raycast","epsilon":0.002,"target":"centroids"}"#).unwrap();
        assert_eq!(
            policy,
            UndercutPolicy::Raycast {
                epsilon: 0.002,
                target: RaycastTarget::Centroids
            }
        );

        let settings: UndercutSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.policy, UndercutPolicy::analytic());
    }
}
