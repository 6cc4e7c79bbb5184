//! Mesh Placement
//!
//! World placement of a mesh. Vertex buffers are stored in mesh-local space;
//! brush centers, viewpoints and extrusion offsets arrive in world space and
//! are converted through the transform below.

use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Position, rotation and scale of a mesh in the world
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// World position
    pub position: Vec3,
    /// World rotation
    pub rotation: Quat,
    /// Per-axis scale
    pub scale: Vec3,
}

impl Transform {
    /// Identity transform
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    /// Create a new transform with the given position
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::IDENTITY
        }
    }

    /// Create a new transform from all components
    pub fn new(position: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self {
            position,
            rotation,
            scale,
        }
    }

    /// Local-to-world matrix
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    /// World-to-local matrix
    pub fn inverse_matrix(&self) -> Mat4 {
        self.matrix().inverse()
    }

    /// Map a world-space point into mesh-local space
    pub fn to_local_point(&self, point: Vec3) -> Vec3 {
        self.inverse_matrix().transform_point3(point)
    }

    /// Map a mesh-local point into world space
    pub fn to_world_point(&self, point: Vec3) -> Vec3 {
        self.matrix().transform_point3(point)
    }

    /// Map a world-space displacement into mesh-local space
    pub fn to_local_vector(&self, vector: Vec3) -> Vec3 {
        self.inverse_matrix().transform_vector3(vector)
    }

    /// Whether this is the identity placement
    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}
