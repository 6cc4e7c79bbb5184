//! Math utilities
//!
//! Re-exports from glam and the geometric primitives the editing kernel
//! queries against: boxes, spheres, planes, rays and triangles.

pub use glam::{Mat3, Mat4, Quat, Vec2, Vec3, Vec4};

/// Lengths below this are treated as zero when normalizing.
pub const LENGTH_EPSILON: f32 = 1e-8;

/// Slack on ray/triangle barycentric bounds
pub const BARYCENTRIC_EPSILON: f32 = 1e-5;

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    /// Minimum corner
    pub min: Vec3,
    /// Maximum corner
    pub max: Vec3,
}

impl Aabb {
    /// Create an empty AABB
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    /// Create an AABB from min and max corners
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Smallest AABB containing all `points`
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        let mut result = Self::EMPTY;
        for point in points {
            result.expand_to_include(point);
        }
        result
    }

    /// Get the center of the AABB
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get the full size of the AABB
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Check if the AABB is empty
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Check if a point is inside the AABB
    pub fn contains_point(&self, point: Vec3) -> bool {
        point.x >= self.min.x && point.x <= self.max.x &&
        point.y >= self.min.y && point.y <= self.max.y &&
        point.z >= self.min.z && point.z <= self.max.z
    }

    /// Check if this AABB intersects another
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x && self.max.x >= other.min.x &&
        self.min.y <= other.max.y && self.max.y >= other.min.y &&
        self.min.z <= other.max.z && self.max.z >= other.min.z
    }

    /// Expand the AABB to include a point
    pub fn expand_to_include(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Grow by `margin` on every side
    pub fn expanded(&self, margin: f32) -> Aabb {
        Aabb::new(self.min - Vec3::splat(margin), self.max + Vec3::splat(margin))
    }

    /// Merge with another AABB
    pub fn merge(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// The eight corners of the box
    pub fn corners(&self) -> [Vec3; 8] {
        [
            Vec3::new(self.min.x, self.min.y, self.min.z),
            Vec3::new(self.max.x, self.min.y, self.min.z),
            Vec3::new(self.min.x, self.max.y, self.min.z),
            Vec3::new(self.max.x, self.max.y, self.min.z),
            Vec3::new(self.min.x, self.min.y, self.max.z),
            Vec3::new(self.max.x, self.min.y, self.max.z),
            Vec3::new(self.min.x, self.max.y, self.max.z),
            Vec3::new(self.max.x, self.max.y, self.max.z),
        ]
    }

    /// Index of the axis with the largest extent (0 = x, 1 = y, 2 = z)
    pub fn longest_axis(&self) -> usize {
        let size = self.size();
        if size.x >= size.y && size.x >= size.z {
            0
        } else if size.y >= size.z {
            1
        } else {
            2
        }
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Bounding sphere
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingSphere {
    /// Center of the sphere
    pub center: Vec3,
    /// Radius of the sphere
    pub radius: f32,
}

impl BoundingSphere {
    /// Create a new bounding sphere
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }

    /// Check if a point is inside the sphere
    pub fn contains_point(&self, point: Vec3) -> bool {
        (point - self.center).length_squared() <= self.radius * self.radius
    }

    /// Check if this sphere intersects an AABB
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        if aabb.is_empty() {
            return false;
        }
        // Closest point on the box to the sphere center
        let closest = self.center.clamp(aabb.min, aabb.max);
        self.contains_point(closest)
    }

    /// Check if every corner of `aabb` lies inside the sphere.
    ///
    /// The sphere is convex, so this implies the whole box is inside.
    pub fn contains_aabb(&self, aabb: &Aabb) -> bool {
        !aabb.is_empty() && aabb.corners().iter().all(|c| self.contains_point(*c))
    }
}

/// A plane in 3D space (n·p + d = 0)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    /// Normal vector
    pub normal: Vec3,
    /// Distance from origin
    pub distance: f32,
}

impl Plane {
    /// Create a new plane
    pub fn new(normal: Vec3, distance: f32) -> Self {
        Self { normal, distance }
    }

    /// Create a plane from a point and normal.
    ///
    /// A zero normal yields a degenerate plane whose distance is zero everywhere.
    pub fn from_point_normal(point: Vec3, normal: Vec3) -> Self {
        let normal = normal.normalize_or_zero();
        Self {
            normal,
            distance: -normal.dot(point),
        }
    }

    /// Get the signed distance from a point to the plane
    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.distance
    }
}

/// Ray for raycasting
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    /// Ray origin
    pub origin: Vec3,
    /// Ray direction (normalized)
    pub direction: Vec3,
}

impl Ray {
    /// Create a new ray
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction: direction.normalize_or_zero(),
        }
    }

    /// Ray from `origin` through `target`
    pub fn towards(origin: Vec3, target: Vec3) -> Self {
        Self::new(origin, target - origin)
    }

    /// Get a point along the ray at distance t
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    /// Intersect with an AABB, returns (t_min, t_max) if hit
    pub fn intersect_aabb(&self, aabb: &Aabb) -> Option<(f32, f32)> {
        let mut t_enter = f32::NEG_INFINITY;
        let mut t_exit = f32::INFINITY;

        for axis in 0..3 {
            let origin = self.origin[axis];
            let (min, max) = (aabb.min[axis], aabb.max[axis]);
            let direction = self.direction[axis];

            // Parallel to the slab: inside it or never
            if direction == 0.0 {
                if origin < min || origin > max {
                    return None;
                }
                continue;
            }

            let inv = 1.0 / direction;
            let t1 = (min - origin) * inv;
            let t2 = (max - origin) * inv;
            t_enter = t_enter.max(t1.min(t2));
            t_exit = t_exit.min(t1.max(t2));
        }

        if t_enter <= t_exit && t_exit >= 0.0 {
            Some((t_enter.max(0.0), t_exit))
        } else {
            None
        }
    }

    /// Double-sided Möller–Trumbore test, returns the hit distance.
    ///
    /// Barycentric bounds are widened by [`BARYCENTRIC_EPSILON`] so a ray
    /// through a shared edge or vertex hits at least one of its triangles.
    pub fn intersect_triangle(&self, triangle: &Triangle) -> Option<f32> {
        let edge1 = triangle.b - triangle.a;
        let edge2 = triangle.c - triangle.a;
        let p = self.direction.cross(edge2);
        let det = edge1.dot(p);
        if det.abs() < 1e-12 {
            return None;
        }

        let inv_det = 1.0 / det;
        let s = self.origin - triangle.a;
        let u = s.dot(p) * inv_det;
        if !(-BARYCENTRIC_EPSILON..=1.0 + BARYCENTRIC_EPSILON).contains(&u) {
            return None;
        }

        let q = s.cross(edge1);
        let v = self.direction.dot(q) * inv_det;
        if v < -BARYCENTRIC_EPSILON || u + v > 1.0 + BARYCENTRIC_EPSILON {
            return None;
        }

        let t = edge2.dot(q) * inv_det;
        (t >= 0.0).then_some(t)
    }
}

/// A triangle by value, as handed to query callbacks
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    pub a: Vec3,
    pub b: Vec3,
    pub c: Vec3,
}

impl Triangle {
    /// Create a triangle from its corners
    pub fn new(a: Vec3, b: Vec3, c: Vec3) -> Self {
        Self { a, b, c }
    }

    /// Unit face normal following counter-clockwise winding, zero if degenerate
    pub fn normal(&self) -> Vec3 {
        (self.b - self.a).cross(self.c - self.a).normalize_or_zero()
    }

    /// Centroid of the three corners
    pub fn centroid(&self) -> Vec3 {
        (self.a + self.b + self.c) / 3.0
    }

    /// Surface area
    pub fn area(&self) -> f32 {
        (self.b - self.a).cross(self.c - self.a).length() * 0.5
    }

    /// Bounding box of the three corners
    pub fn bounds(&self) -> Aabb {
        Aabb::from_points([self.a, self.b, self.c])
    }

    /// Apply an affine matrix to every corner
    pub fn transformed(&self, matrix: &Mat4) -> Triangle {
        Triangle {
            a: matrix.transform_point3(self.a),
            b: matrix.transform_point3(self.b),
            c: matrix.transform_point3(self.c),
        }
    }
}
