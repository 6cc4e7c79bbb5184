//! Bounding Volume Hierarchy
//!
//! Binary AABB tree over the triangles of a [`Mesh`], stored as a flat node
//! array so that node indices are stable and can be collected by callers.
//!
//! Three queries are supported:
//! - **Shapecast**: walk the tree with caller-supplied bounds and triangle
//!   tests ([`Shapecast`])
//! - **Refit**: recompute bounds after vertices move, optionally restricted to
//!   the nodes a previous shapecast reported
//! - **Raycast**: nearest triangle hit along a ray
//!
//! The tree never notices vertex motion on its own. After moving vertices the
//! caller must refit at least the nodes visited by the query that found them,
//! otherwise later queries prune against stale boxes.

use glam::Vec3;

use crate::IdSet;
use crate::math::{Aabb, BARYCENTRIC_EPSILON, Ray, Triangle};
use crate::mesh::Mesh;

/// Build parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BvhConfig {
    /// Split nodes holding more triangles than this
    pub max_leaf_triangles: usize,
}

impl Default for BvhConfig {
    fn default() -> Self {
        Self {
            max_leaf_triangles: 10,
        }
    }
}

/// Node payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BvhNodeKind {
    /// Range into the tree's triangle order
    Leaf { start: u32, count: u32 },
    /// Child node indices
    Internal { left: u32, right: u32 },
}

/// A node of the hierarchy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BvhNode {
    /// Box around every triangle in the subtree (as of the last build/refit)
    pub bounds: Aabb,
    pub kind: BvhNodeKind,
}

impl BvhNode {
    /// Whether this node stores triangles directly
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, BvhNodeKind::Leaf { .. })
    }
}

/// How a query volume relates to a node's box
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundsRelation {
    /// The box lies entirely inside the query volume
    Contained,
    /// The box overlaps the query volume partially
    Intersected,
    /// No overlap, prune the subtree
    Disjoint,
}

/// Callbacks driving [`MeshBvh::shapecast`]
pub trait Shapecast {
    /// Classify a node's box. Called once per visited node, with its index.
    fn intersects_bounds(&mut self, bounds: &Aabb, node: u32) -> BoundsRelation;

    /// Visit one candidate triangle. `contained` is true when an ancestor
    /// was classified [`BoundsRelation::Contained`]. Return `true` to stop
    /// the whole traversal.
    fn intersects_triangle(&mut self, triangle: &Triangle, index: u32, contained: bool) -> bool;
}

/// Nearest ray intersection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    /// Hit position in mesh-local space
    pub point: Vec3,
    /// Distance along the ray
    pub distance: f32,
    /// Index of the triangle hit
    pub triangle: u32,
    /// Face normal of the triangle hit
    pub normal: Vec3,
}

/// Bounding volume hierarchy over mesh triangles
#[derive(Debug, Clone)]
pub struct MeshBvh {
    nodes: Vec<BvhNode>,
    triangle_order: Vec<u32>,
    config: BvhConfig,
}

impl MeshBvh {
    /// Build a hierarchy by recursive median split along the longest axis
    pub fn build(mesh: &Mesh, config: BvhConfig) -> Self {
        let config = BvhConfig {
            max_leaf_triangles: config.max_leaf_triangles.max(1),
        };
        let mut bvh = Self {
            nodes: Vec::with_capacity(mesh.triangle_count() * 2 / config.max_leaf_triangles + 1),
            triangle_order: (0..mesh.triangle_count() as u32).collect(),
            config,
        };

        if !mesh.is_empty() {
            let centroids: Vec<Vec3> = (0..mesh.triangle_count())
                .map(|i| mesh.triangle(i).centroid())
                .collect();
            let count = bvh.triangle_order.len();
            bvh.build_node(mesh, &centroids, 0, count);
        }

        log::debug!(
            "Built BVH: {} triangles, {} nodes, depth {}",
            mesh.triangle_count(),
            bvh.nodes.len(),
            bvh.depth()
        );
        bvh
    }

    fn build_node(&mut self, mesh: &Mesh, centroids: &[Vec3], start: usize, count: usize) -> u32 {
        let order = &mut self.triangle_order[start..start + count];
        let bounds = order
            .iter()
            .fold(Aabb::EMPTY, |acc, &t| acc.merge(&mesh.triangle(t as usize).bounds()));

        let index = self.nodes.len() as u32;
        self.nodes.push(BvhNode {
            bounds,
            kind: BvhNodeKind::Leaf {
                start: start as u32,
                count: count as u32,
            },
        });

        if count <= self.config.max_leaf_triangles {
            return index;
        }

        let split = Aabb::from_points(order.iter().map(|&t| centroids[t as usize]));
        let axis = split.longest_axis();
        let mid = count / 2;
        order.select_nth_unstable_by(mid, |&a, &b| {
            centroids[a as usize][axis].total_cmp(&centroids[b as usize][axis])
        });

        let left = self.build_node(mesh, centroids, start, mid);
        let right = self.build_node(mesh, centroids, start + mid, count - mid);
        self.nodes[index as usize].kind = BvhNodeKind::Internal { left, right };
        index
    }

    /// Build parameters used
    pub fn config(&self) -> BvhConfig {
        self.config
    }

    /// All nodes; index 0 is the root
    pub fn nodes(&self) -> &[BvhNode] {
        &self.nodes
    }

    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree holds no triangles
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Bounds of the whole tree
    pub fn root_bounds(&self) -> Aabb {
        self.nodes.first().map(|n| n.bounds).unwrap_or(Aabb::EMPTY)
    }

    /// Triangle indices stored in a leaf, empty for internal nodes
    pub fn leaf_triangles(&self, node: u32) -> &[u32] {
        match self.nodes.get(node as usize).map(|n| n.kind) {
            Some(BvhNodeKind::Leaf { start, count }) => {
                &self.triangle_order[start as usize..(start + count) as usize]
            }
            _ => &[],
        }
    }

    /// Length of the longest root-to-leaf path, counted in nodes
    pub fn depth(&self) -> usize {
        fn walk(nodes: &[BvhNode], index: u32) -> usize {
            match nodes[index as usize].kind {
                BvhNodeKind::Leaf { .. } => 1,
                BvhNodeKind::Internal { left, right } => 1 + walk(nodes, left).max(walk(nodes, right)),
            }
        }
        if self.nodes.is_empty() { 0 } else { walk(&self.nodes, 0) }
    }

    /// Walk the tree with `query`. Returns `true` if the query stopped early.
    pub fn shapecast(&self, mesh: &Mesh, query: &mut impl Shapecast) -> bool {
        !self.nodes.is_empty() && self.shapecast_node(mesh, 0, query)
    }

    fn shapecast_node(&self, mesh: &Mesh, index: u32, query: &mut impl Shapecast) -> bool {
        let node = &self.nodes[index as usize];
        match query.intersects_bounds(&node.bounds, index) {
            BoundsRelation::Disjoint => false,
            BoundsRelation::Contained => self.visit_subtree(mesh, index, query),
            BoundsRelation::Intersected => match node.kind {
                BvhNodeKind::Leaf { .. } => self.visit_leaf(mesh, index, false, query),
                BvhNodeKind::Internal { left, right } => {
                    self.shapecast_node(mesh, left, query) || self.shapecast_node(mesh, right, query)
                }
            },
        }
    }

    fn visit_subtree(&self, mesh: &Mesh, index: u32, query: &mut impl Shapecast) -> bool {
        match self.nodes[index as usize].kind {
            BvhNodeKind::Leaf { .. } => self.visit_leaf(mesh, index, true, query),
            BvhNodeKind::Internal { left, right } => {
                self.visit_subtree(mesh, left, query) || self.visit_subtree(mesh, right, query)
            }
        }
    }

    fn visit_leaf(&self, mesh: &Mesh, index: u32, contained: bool, query: &mut impl Shapecast) -> bool {
        self.leaf_triangles(index)
            .iter()
            .any(|&t| query.intersects_triangle(&mesh.triangle(t as usize), t, contained))
    }

    /// Recompute node bounds after vertices moved.
    ///
    /// With `None` every node is refit. With a node set, traversal starts at
    /// the root and descends only into children that are in the set; when
    /// neither child of an internal node is in the set, its entire subtree is
    /// refit (subtrees under a contained node are never reported node by node).
    pub fn refit(&mut self, mesh: &Mesh, nodes: Option<&IdSet>) {
        if self.nodes.is_empty() {
            return;
        }
        self.refit_node(mesh, 0, nodes, nodes.is_none());
    }

    fn refit_node(&mut self, mesh: &Mesh, index: u32, set: Option<&IdSet>, force: bool) -> Aabb {
        let bounds = match self.nodes[index as usize].kind {
            BvhNodeKind::Leaf { .. } => self
                .leaf_triangles(index)
                .iter()
                .fold(Aabb::EMPTY, |acc, &t| acc.merge(&mesh.triangle(t as usize).bounds())),
            BvhNodeKind::Internal { left, right } => {
                let (include_left, include_right) = match set {
                    Some(set) if !force => (set.contains(&left), set.contains(&right)),
                    _ => (true, true),
                };
                let force_children = force || (!include_left && !include_right);

                let left_bounds = if force_children || include_left {
                    self.refit_node(mesh, left, set, force_children)
                } else {
                    self.nodes[left as usize].bounds
                };
                let right_bounds = if force_children || include_right {
                    self.refit_node(mesh, right, set, force_children)
                } else {
                    self.nodes[right as usize].bounds
                };
                left_bounds.merge(&right_bounds)
            }
        };
        self.nodes[index as usize].bounds = bounds;
        bounds
    }

    /// Nearest double-sided intersection of `ray` (mesh-local space)
    pub fn raycast(&self, mesh: &Mesh, ray: &Ray) -> Option<RayHit> {
        if self.nodes.is_empty() || ray.direction == Vec3::ZERO {
            return None;
        }
        let mut best: Option<(f32, u32)> = None;
        self.raycast_node(mesh, 0, ray, &mut best);

        best.map(|(distance, triangle)| RayHit {
            point: ray.at(distance),
            distance,
            triangle,
            normal: mesh.face_normal(triangle as usize),
        })
    }

    fn raycast_node(&self, mesh: &Mesh, index: u32, ray: &Ray, best: &mut Option<(f32, u32)>) {
        let node = &self.nodes[index as usize];
        // Widened like the triangle test so hits on shared edges are not culled
        let margin = node.bounds.size().max_element() * BARYCENTRIC_EPSILON;
        let Some((t_enter, _)) = ray.intersect_aabb(&node.bounds.expanded(margin)) else {
            return;
        };
        if best.is_some_and(|(t, _)| t_enter > t) {
            return;
        }

        match node.kind {
            BvhNodeKind::Leaf { .. } => {
                for &t in self.leaf_triangles(index) {
                    if let Some(distance) = ray.intersect_triangle(&mesh.triangle(t as usize)) {
                        if best.is_none_or(|(d, _)| distance < d) {
                            *best = Some((distance, t));
                        }
                    }
                }
            }
            BvhNodeKind::Internal { left, right } => {
                self.raycast_node(mesh, left, ray, best);
                self.raycast_node(mesh, right, ray, best);
            }
        }
    }

    /// Check that every node's box encloses its subtree against the current
    /// vertex positions.
    pub fn bounds_are_valid(&self, mesh: &Mesh) -> bool {
        self.nodes.iter().enumerate().all(|(index, node)| match node.kind {
            BvhNodeKind::Leaf { .. } => self.leaf_triangles(index as u32).iter().all(|&t| {
                let tri = mesh.triangle(t as usize);
                [tri.a, tri.b, tri.c].iter().all(|p| node.bounds.contains_point(*p))
            }),
            BvhNodeKind::Internal { left, right } => [left, right].iter().all(|&child| {
                let child = self.nodes[child as usize].bounds;
                node.bounds.contains_point(child.min) && node.bounds.contains_point(child.max)
            }),
        })
    }
}
