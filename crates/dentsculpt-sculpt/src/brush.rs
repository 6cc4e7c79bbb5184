//! Brush Configuration
//!
//! The recognized brush parameters and the visual brush indicator that
//! follows the surface under the pointer.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::{SculptError, SculptResult};

/// Per-stroke height step as a fraction of intensity
pub const HEIGHT_STEP_SCALE: f32 = 0.0001;

/// Plane-pull scale of the flatten brush as a fraction of intensity
pub const FLATTEN_SCALE: f32 = 0.01 * 0.5;

/// Spacing between path steps as a fraction of the radius
pub const STEP_FRACTION: f32 = 0.15;

/// Clay falloff is amplified by this factor, then clamped to 1
pub const CLAY_CLAMP_FACTOR: f32 = 4.0;

/// Weight of the clay plane-pull term
pub const CLAY_PLANE_WEIGHT: f32 = 0.3;

/// Deformation applied by a stroke
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrushKind {
    /// Push along the stroke normal
    #[serde(rename = "normal")]
    AdditiveNormal,
    /// Build up toward a plane, clamped
    #[default]
    Clay,
    /// Pull toward the plane through the affected vertices
    Flatten,
}

/// Brush parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrushConfig {
    /// Sphere radius in mesh-local units
    pub radius: f32,
    /// Strength; scales the height step and the flatten pull
    pub intensity: f32,
    /// Deformation kind
    pub kind: BrushKind,
    /// Carve instead of build
    pub invert: bool,
    /// Upper bound on stroke applications per frame
    pub max_steps: u32,
}

impl Default for BrushConfig {
    fn default() -> Self {
        Self {
            radius: 0.1,
            intensity: 50.0,
            kind: BrushKind::Clay,
            invert: false,
            max_steps: 10,
        }
    }
}

impl BrushConfig {
    /// Reject parameters the stroke engine cannot work with
    pub fn validate(&self) -> SculptResult<()> {
        if !(self.radius.is_finite() && self.radius > 0.0) {
            return Err(SculptError::InvalidBrush(format!(
                "radius must be positive, got {}",
                self.radius
            )));
        }
        if !self.intensity.is_finite() {
            return Err(SculptError::InvalidBrush(format!(
                "intensity must be finite, got {}",
                self.intensity
            )));
        }
        if self.max_steps == 0 {
            return Err(SculptError::InvalidBrush("max_steps must be at least 1".into()));
        }
        Ok(())
    }

    /// Fixed displacement step of one stroke
    pub fn height_step(&self) -> f32 {
        self.intensity * HEIGHT_STEP_SCALE
    }

    /// World distance between consecutive path steps
    pub fn step_length(&self) -> f32 {
        self.radius * STEP_FRACTION
    }

    /// Sign of the displacement: inverted brushes and secondary clicks carve,
    /// both together build again
    pub fn sign(&self, secondary: bool) -> f32 {
        if self.invert != secondary { -1.0 } else { 1.0 }
    }

    /// Displacement along the stroke normal for one vertex.
    ///
    /// `falloff` is `1 - dist / radius`, `plane_distance` the signed distance
    /// of the vertex from the stroke's reference plane.
    pub fn displacement(&self, falloff: f32, plane_distance: f32, sign: f32) -> f32 {
        match self.kind {
            BrushKind::Clay => {
                let clamped = sign * clay_weight(falloff);
                clamped * self.height_step() - sign * plane_distance * clamped * CLAY_PLANE_WEIGHT
            }
            BrushKind::AdditiveNormal => sign * falloff.powi(2) * self.height_step(),
            BrushKind::Flatten => -plane_distance * falloff.powi(2) * self.intensity * FLATTEN_SCALE,
        }
    }
}

/// Clamped clay falloff: `min(falloff³ × 4, 1)`
pub fn clay_weight(falloff: f32) -> f32 {
    (falloff.powi(3) * CLAY_CLAMP_FACTOR).min(1.0)
}

/// Visual brush marker. Mirrors stroke state for the renderer; never feeds
/// back into the mesh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BrushIndicator {
    /// World position of the marker
    pub position: Vec3,
    /// Rotation taking +Z onto the stroke normal
    pub orientation: Quat,
    /// Marker scale: radius in-plane, thin along the normal
    pub scale: Vec3,
    /// Whether the marker is drawn
    pub visible: bool,
    normal: Option<Vec3>,
}

impl BrushIndicator {
    pub fn new() -> Self {
        Self {
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            scale: Vec3::ONE,
            visible: false,
            normal: None,
        }
    }

    /// Show the marker at a surface point
    pub fn place(&mut self, position: Vec3, radius: f32) {
        self.position = position;
        self.scale = Vec3::new(radius, radius, 0.1);
        self.visible = true;
    }

    /// Align the marker with a unit world-space normal
    pub fn orient(&mut self, normal: Vec3) {
        self.orientation = Quat::from_rotation_arc(Vec3::Z, normal);
        self.normal = Some(normal);
    }

    /// Last normal the marker was aligned with, in world space
    pub fn normal(&self) -> Option<Vec3> {
        self.normal
    }

    /// Hide the marker, e.g. when the pointer leaves the surface
    pub fn hide(&mut self) {
        self.visible = false;
    }
}

impl Default for BrushIndicator {
    fn default() -> Self {
        Self::new()
    }
}
