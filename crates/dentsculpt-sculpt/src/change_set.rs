//! Change Sets
//!
//! What one or more strokes touched: the input to normal recompute and BVH
//! refit. Built fresh per stroke path frame and dropped once consumed.

use dentsculpt_core::IdSet;

/// Triangles, vertices and BVH nodes touched by strokes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    /// Triangles visited by the brush query
    pub triangles: IdSet,
    /// Vertices inside the brush
    pub vertices: IdSet,
    /// BVH nodes classified by the brush query
    pub nodes: IdSet,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether nothing was touched
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty() && self.vertices.is_empty() && self.nodes.is_empty()
    }

    /// Fold another change set into this one
    pub fn extend(&mut self, other: &ChangeSet) {
        self.triangles.extend(other.triangles.iter().copied());
        self.vertices.extend(other.vertices.iter().copied());
        self.nodes.extend(other.nodes.iter().copied());
    }

    pub fn clear(&mut self) {
        self.triangles.clear();
        self.vertices.clear();
        self.nodes.clear();
    }
}
