//! # Dentsculpt Core
//!
//! Foundations of the dentsculpt mesh-editing kernel.
//!
//! This crate provides the data every editing operation works against:
//! - **Math**: boxes, spheres, planes, rays and triangles on top of glam
//! - **Transform**: placement of a mesh in the world
//! - **Mesh**: indexed triangle buffers with dirty tracking and topology revisions
//! - **BVH**: bounding-volume hierarchy with shapecast, refit and raycast queries

pub mod bvh;
pub mod math;
pub mod mesh;
pub mod transform;

pub use bvh::{BoundsRelation, BvhConfig, BvhNode, MeshBvh, RayHit, Shapecast};
pub use math::{Aabb, BoundingSphere, Plane, Ray, Triangle};
pub use mesh::{Mesh, MeshDirty, VertexTriangleMap};
pub use transform::Transform;

use thiserror::Error;

/// Core errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Triangle {triangle} references vertex {index}, but the mesh has {vertex_count} vertices")]
    IndexOutOfBounds {
        triangle: usize,
        index: u32,
        vertex_count: usize,
    },

    #[error("Attribute length mismatch: expected {expected} entries, found {found}")]
    AttributeLength { expected: usize, found: usize },
}

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Insertion-ordered set of triangle, vertex or BVH node indices
pub type IdSet = indexmap::IndexSet<u32, ahash::RandomState>;
