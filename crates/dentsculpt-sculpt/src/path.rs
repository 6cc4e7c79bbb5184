//! Stroke Path Driver
//!
//! Turns one frame of pointer drag into evenly spaced stroke applications
//! between the previous and the current surface hit. Steps run strictly in
//! path order, each against the mesh left by the one before, and share one
//! change set. Normals and the BVH are brought up to date once at the end of
//! the frame.

use dentsculpt_core::{Mesh, MeshBvh, Transform};
use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::brush::{BrushConfig, BrushIndicator};
use crate::change_set::ChangeSet;
use crate::normals::recompute_normals;
use crate::stroke::{StrokeInput, apply_stroke};

/// Screen-space motion threshold factor; scaled by radius over hit distance
pub const SPEED_THRESHOLD_SCALE: f32 = 200.0;

/// Where the pointer ray met the surface
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurfaceHit {
    /// World-space hit point
    pub point: Vec3,
    /// Distance from the camera to the hit point
    pub distance: f32,
}

/// Pointer state for one frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointerSample {
    /// Pointer position in pixels
    pub screen: Vec2,
    /// Surface hit under the pointer, if any
    #[serde(default)]
    pub hit: Option<SurfaceHit>,
    /// Primary or secondary button held
    #[serde(default)]
    pub pressed: bool,
    /// Secondary button held
    #[serde(default)]
    pub secondary: bool,
}

/// What one frame of input did
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameReport {
    /// The pointer was over the surface
    pub hit: bool,
    /// Deforming stroke applications this frame
    pub steps: u32,
    /// The frame only updated the brush indicator
    pub brush_only: bool,
    /// Triangles touched across all steps
    pub triangles: usize,
    /// Vertices touched across all steps
    pub vertices: usize,
    /// BVH nodes visited across all steps
    pub nodes: usize,
    /// Normals were recomputed for the touched vertices
    pub normals_recomputed: bool,
    /// The BVH was refit over the visited nodes
    pub refit: bool,
}

/// Per-drag state carried between frames
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrokePath {
    last_screen: Option<Vec2>,
    last_cast: Option<Vec3>,
    was_pressed: bool,
}

impl StrokePath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the previous frame, e.g. after the target mesh changed
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Last interpolated surface point, world space
    pub fn last_cast(&self) -> Option<Vec3> {
        self.last_cast
    }

    /// Process one frame of pointer input.
    pub fn advance(
        &mut self,
        mesh: &mut Mesh,
        bvh: &mut MeshBvh,
        transform: &Transform,
        brush: &BrushConfig,
        indicator: &mut BrushIndicator,
        sample: &PointerSample,
    ) -> FrameReport {
        let mut report = FrameReport::default();
        if let Err(err) = brush.validate() {
            log::warn!("Ignoring pointer frame: {err}");
            return report;
        }
        let pressed_before = std::mem::replace(&mut self.was_pressed, sample.pressed);

        let Some(hit) = sample.hit else {
            indicator.hide();
            self.last_cast = None;
            return report;
        };
        report.hit = true;
        indicator.place(hit.point, brush.radius);

        let last_cast = *self.last_cast.get_or_insert(hit.point);
        let last_screen = *self.last_screen.get_or_insert(sample.screen);

        if !(sample.pressed || pressed_before) {
            apply_stroke(
                mesh,
                bvh,
                transform,
                brush,
                &StrokeInput::preview(hit.point),
                indicator,
                None,
            );
            self.last_screen = Some(sample.screen);
            self.last_cast = Some(hit.point);
            report.brush_only = true;
            return report;
        }

        let mut screen = last_screen;
        let mut cast = last_cast;
        let mut mdist = screen.distance(sample.screen);
        let mut cast_dist = cast.distance(hit.point);
        let speed_threshold = brush.radius * SPEED_THRESHOLD_SCALE / hit.distance.max(f32::EPSILON);

        let step = brush.step_length();
        let max_steps = brush.max_steps.max(1);
        let percent = if cast_dist > 0.0 {
            (step / cast_dist).max(1.0 / max_steps as f32)
        } else {
            1.0
        };
        let mstep = mdist * percent;

        let mut changes = ChangeSet::new();
        while report.steps < max_steps && cast_dist > step && mdist > speed_threshold {
            screen = screen.lerp(sample.screen, percent);
            cast = cast.lerp(hit.point, percent);
            cast_dist -= step;
            mdist -= mstep;

            let input = StrokeInput {
                center: cast,
                secondary: sample.secondary,
                brush_only: false,
            };
            apply_stroke(mesh, bvh, transform, brush, &input, indicator, Some(&mut changes));
            report.steps += 1;
        }

        if report.steps > 0 {
            self.last_screen = Some(screen);
            self.last_cast = Some(cast);

            recompute_normals(mesh, &changes);
            bvh.refit(mesh, Some(&changes.nodes));
            report.triangles = changes.triangles.len();
            report.vertices = changes.vertices.len();
            report.nodes = changes.nodes.len();
            report.normals_recomputed = !changes.vertices.is_empty();
            report.refit = true;

            log::debug!(
                "Stroke path: {} steps, {} vertices, {} nodes refit",
                report.steps,
                report.vertices,
                report.nodes
            );
        } else {
            apply_stroke(
                mesh,
                bvh,
                transform,
                brush,
                &StrokeInput::preview(hit.point),
                indicator,
                None,
            );
            report.brush_only = true;
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dentsculpt_core::BvhConfig;
    use dentsculpt_core::mesh::grid_mesh;

    struct Rig {
        mesh: Mesh,
        bvh: MeshBvh,
        brush: BrushConfig,
        indicator: BrushIndicator,
        path: StrokePath,
    }

    impl Rig {
        fn new(brush: BrushConfig) -> Self {
            let mesh = grid_mesh(32, 1.0);
            let bvh = MeshBvh::build(&mesh, BvhConfig::default());
            Self {
                mesh,
                bvh,
                brush,
                indicator: BrushIndicator::new(),
                path: StrokePath::new(),
            }
        }

        fn frame(&mut self, screen: Vec2, point: Option<Vec3>, pressed: bool) -> FrameReport {
            let sample = PointerSample {
                screen,
                hit: point.map(|point| SurfaceHit { point, distance: 1.0 }),
                pressed,
                secondary: false,
            };
            self.path.advance(
                &mut self.mesh,
                &mut self.bvh,
                &Transform::IDENTITY,
                &self.brush,
                &mut self.indicator,
                &sample,
            )
        }
    }

    fn drag_brush(max_steps: u32) -> BrushConfig {
        BrushConfig {
            radius: 0.05,
            max_steps,
            ..Default::default()
        }
    }

    #[test]
    fn test_step_count_is_capped() {
        for max_steps in [1, 3, 10] {
            let mut rig = Rig::new(drag_brush(max_steps));
            let first = rig.frame(Vec2::ZERO, Some(Vec3::new(0.1, 0.5, 0.0)), true);
            assert_eq!(first.steps, 0);
            assert!(first.brush_only);

            let report = rig.frame(Vec2::new(1000.0, 0.0), Some(Vec3::new(0.9, 0.5, 0.0)), true);
            assert_eq!(report.steps, max_steps);
            assert!(report.refit);
        }
    }

    #[test]
    fn test_steps_never_exceed_cap_along_trajectory() {
        let mut rig = Rig::new(drag_brush(4));
        let points = [
            Vec3::new(0.2, 0.2, 0.0),
            Vec3::new(0.8, 0.3, 0.0),
            Vec3::new(0.5, 0.9, 0.0),
            Vec3::new(0.52, 0.88, 0.0),
            Vec3::new(0.1, 0.1, 0.0),
        ];
        for (i, point) in points.into_iter().enumerate() {
            let report = rig.frame(Vec2::new(i as f32 * 400.0, 0.0), Some(point), true);
            assert!(report.steps <= 4);
        }
    }

    #[test]
    fn test_invalid_brush_ignores_frames() {
        let mut rig = Rig::new(BrushConfig {
            radius: 0.0,
            ..drag_brush(4)
        });
        let before = rig.mesh.positions().to_vec();

        rig.frame(Vec2::ZERO, Some(Vec3::new(0.2, 0.5, 0.0)), true);
        let report = rig.frame(Vec2::new(400.0, 0.0), Some(Vec3::new(0.8, 0.5, 0.0)), true);

        assert_eq!(report, FrameReport::default());
        assert_eq!(rig.mesh.positions(), before.as_slice());
        assert!(rig.bvh.bounds_are_valid(&rig.mesh));
    }

    #[test]
    fn test_small_motion_is_brush_only() {
        let mut rig = Rig::new(drag_brush(10));
        rig.frame(Vec2::ZERO, Some(Vec3::new(0.5, 0.5, 0.0)), true);
        let before = rig.mesh.positions().to_vec();

        // Moves less than one step in the world
        let report = rig.frame(Vec2::new(1.0, 0.0), Some(Vec3::new(0.501, 0.5, 0.0)), true);
        assert_eq!(report.steps, 0);
        assert!(report.brush_only);
        assert!(!report.refit);
        assert_eq!(rig.mesh.positions(), before.as_slice());
        assert!(rig.indicator.visible);
    }

    #[test]
    fn test_slow_screen_motion_is_brush_only() {
        let mut rig = Rig::new(drag_brush(10));
        rig.frame(Vec2::ZERO, Some(Vec3::new(0.2, 0.5, 0.0)), true);

        // Far in the world but below radius × 200 / distance = 10 pixels
        let report = rig.frame(Vec2::new(5.0, 0.0), Some(Vec3::new(0.8, 0.5, 0.0)), true);
        assert_eq!(report.steps, 0);
        assert!(report.brush_only);
    }

    #[test]
    fn test_miss_hides_indicator_and_resets_cast() {
        let mut rig = Rig::new(drag_brush(10));
        rig.frame(Vec2::ZERO, Some(Vec3::new(0.5, 0.5, 0.0)), false);
        assert!(rig.indicator.visible);
        assert!(rig.path.last_cast().is_some());

        let report = rig.frame(Vec2::new(50.0, 0.0), None, true);
        assert!(!report.hit);
        assert!(!rig.indicator.visible);
        assert!(rig.path.last_cast().is_none());
    }

    #[test]
    fn test_hover_tracks_pointer_without_deforming() {
        let mut rig = Rig::new(drag_brush(10));
        let before = rig.mesh.positions().to_vec();

        rig.frame(Vec2::ZERO, Some(Vec3::new(0.2, 0.5, 0.0)), false);
        let report = rig.frame(Vec2::new(800.0, 0.0), Some(Vec3::new(0.8, 0.5, 0.0)), false);

        assert!(report.brush_only);
        assert_eq!(report.steps, 0);
        assert_eq!(rig.path.last_cast(), Some(Vec3::new(0.8, 0.5, 0.0)));
        assert_eq!(rig.mesh.positions(), before.as_slice());
    }

    #[test]
    fn test_bvh_and_normals_valid_after_drag() {
        let mut rig = Rig::new(BrushConfig {
            radius: 0.08,
            intensity: 400.0,
            max_steps: 10,
            ..Default::default()
        });
        rig.frame(Vec2::ZERO, Some(Vec3::new(0.2, 0.5, 0.0)), true);
        let report = rig.frame(Vec2::new(600.0, 0.0), Some(Vec3::new(0.8, 0.5, 0.0)), true);

        assert!(report.steps > 0);
        assert!(report.normals_recomputed);
        assert!(rig.mesh.positions().iter().any(|p| p.z > 0.0));
        assert!(rig.bvh.bounds_are_valid(&rig.mesh));
        for n in rig.mesh.normals() {
            assert!((n.length() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_reset_forgets_previous_frame() {
        let mut rig = Rig::new(drag_brush(10));
        rig.frame(Vec2::ZERO, Some(Vec3::new(0.2, 0.5, 0.0)), true);
        rig.path.reset();
        assert_eq!(rig.path, StrokePath::new());
    }
}
