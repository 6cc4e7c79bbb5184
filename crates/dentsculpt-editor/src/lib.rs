//! # Dentsculpt Editor
//!
//! The editing session that hosts call once per frame.
//!
//! ## Features
//! - Owns the loaded mesh, its BVH and world placement
//! - Brush configuration, indicator and drag state
//! - Camera used as fallback insertion viewpoint
//! - Cached undercut classification, dropped whenever topology changes

use std::path::Path;

use dentsculpt_assets::{AssetError, MeshImportSettings};
use dentsculpt_core::{BvhConfig, Mesh, MeshBvh, MeshDirty, Transform};
use dentsculpt_sculpt::{
    BrushConfig, BrushIndicator, FrameReport, PointerSample, SculptError, StrokePath,
};
use dentsculpt_undercut::{
    BlockoutReport, BlockoutSettings, UndercutClassification, UndercutError, UndercutSettings,
    apply_blockout, classify_undercuts,
};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Editor errors
#[derive(Error, Debug)]
pub enum EditorError {
    #[error(transparent)]
    Sculpt(#[from] SculptError),

    #[error(transparent)]
    Undercut(#[from] UndercutError),

    #[error(transparent)]
    Asset(#[from] AssetError),
}

/// Result type for editor operations
pub type EditorResult<T> = Result<T, EditorError>;

/// Viewport configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewportConfig {
    /// Camera position
    pub camera_position: Vec3,
    /// Camera target
    pub camera_target: Vec3,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            camera_position: Vec3::new(0.0, 0.0, 5.0),
            camera_target: Vec3::ZERO,
        }
    }
}

impl ViewportConfig {
    /// Unit direction from the camera target toward the camera
    pub fn view_direction(&self) -> Vec3 {
        (self.camera_position - self.camera_target).normalize_or(Vec3::Z)
    }
}

/// Mesh being edited, with its BVH and placement
#[derive(Debug, Clone)]
pub struct EditTarget {
    pub mesh: Mesh,
    pub bvh: MeshBvh,
    pub transform: Transform,
}

/// Editing session
#[derive(Debug, Clone, Default)]
pub struct EditorSession {
    target: Option<EditTarget>,
    brush: BrushConfig,
    indicator: BrushIndicator,
    path: StrokePath,
    viewport: ViewportConfig,
    undercut: UndercutSettings,
    blockout: BlockoutSettings,
    bvh_config: BvhConfig,
    classification: Option<UndercutClassification>,
    passes: u32,
}

impl EditorSession {
    pub fn new(viewport: ViewportConfig) -> Self {
        Self {
            viewport,
            ..Default::default()
        }
    }

    /// Make `mesh` the edit target, replacing any previous one
    pub fn load_mesh(&mut self, mesh: Mesh, transform: Transform) {
        let bvh = MeshBvh::build(&mesh, self.bvh_config);
        log::info!(
            "Session target: {} vertices, {} triangles, {} BVH nodes",
            mesh.vertex_count(),
            mesh.triangle_count(),
            bvh.node_count()
        );
        self.target = Some(EditTarget {
            mesh,
            bvh,
            transform,
        });
        self.reset_edit_state();
    }

    /// Load a mesh file and make it the edit target
    pub fn open(&mut self, path: &Path, settings: &MeshImportSettings) -> EditorResult<()> {
        let mesh = dentsculpt_assets::load_mesh(path, settings)?;
        self.load_mesh(mesh, Transform::IDENTITY);
        Ok(())
    }

    /// Drop the edit target
    pub fn unload(&mut self) -> Option<EditTarget> {
        self.reset_edit_state();
        self.target.take()
    }

    fn reset_edit_state(&mut self) {
        self.path.reset();
        self.indicator.hide();
        self.classification = None;
        self.passes = 0;
    }

    pub fn set_brush(&mut self, brush: BrushConfig) -> EditorResult<()> {
        brush.validate()?;
        self.brush = brush;
        Ok(())
    }

    pub fn set_viewport(&mut self, viewport: ViewportConfig) {
        self.viewport = viewport;
    }

    pub fn set_undercut_settings(&mut self, settings: UndercutSettings) {
        self.undercut = settings;
    }

    pub fn set_blockout_settings(&mut self, settings: BlockoutSettings) {
        self.blockout = settings;
    }

    /// Move the edit target in the world
    pub fn set_transform(&mut self, transform: Transform) {
        if let Some(target) = self.target.as_mut() {
            target.transform = transform;
            self.classification = None;
        }
    }

    /// Feed one frame of pointer input
    pub fn pointer_frame(&mut self, sample: &PointerSample) -> FrameReport {
        let Some(target) = self.target.as_mut() else {
            return FrameReport::default();
        };
        let report = self.path.advance(
            &mut target.mesh,
            &mut target.bvh,
            &target.transform,
            &self.brush,
            &mut self.indicator,
            sample,
        );
        if report.steps > 0 {
            log::debug!("Frame: {} steps, {} vertices", report.steps, report.vertices);
        }
        report
    }

    /// Pointer released; the next frame starts a new drag
    pub fn end_stroke(&mut self) {
        self.path.reset();
    }

    /// Classify undercuts from `eye`, or from the camera when `None`, and
    /// cache the result
    pub fn classify_undercuts(&mut self, eye: Option<Vec3>) -> Option<&UndercutClassification> {
        let target = self.target.as_ref()?;
        let eye = eye.unwrap_or(self.viewport.camera_position);
        let classification = classify_undercuts(
            &target.mesh,
            &target.bvh,
            &target.transform,
            eye,
            self.undercut.policy,
            self.passes,
        );
        self.passes += 1;
        self.classification = Some(classification);
        self.classification.as_ref()
    }

    /// Apply a blockout over the cached classification.
    ///
    /// Classifies from the camera first when nothing valid is cached. The
    /// cache is dropped afterwards either way.
    pub fn blockout(&mut self) -> EditorResult<BlockoutReport> {
        if self.target.is_none() {
            return Ok(BlockoutReport::default());
        }

        let cached = self
            .classification
            .take()
            .filter(|c| self.target.as_ref().is_some_and(|t| c.is_valid_for(&t.mesh)));
        let classification = match cached {
            Some(classification) => classification,
            None => {
                self.classify_undercuts(None);
                match self.classification.take() {
                    Some(classification) => classification,
                    None => return Ok(BlockoutReport::default()),
                }
            }
        };

        let direction = self.insertion_direction_for(&classification);
        let Some(target) = self.target.as_mut() else {
            return Ok(BlockoutReport::default());
        };
        let report = apply_blockout(
            &mut target.mesh,
            &mut target.bvh,
            &target.transform,
            &classification,
            direction,
            &self.blockout,
        )?;
        Ok(report)
    }

    /// Insertion direction a blockout would use right now
    pub fn insertion_direction(&self) -> Vec3 {
        match &self.classification {
            Some(classification) => self.insertion_direction_for(classification),
            None => self.viewport.view_direction(),
        }
    }

    fn insertion_direction_for(&self, classification: &UndercutClassification) -> Vec3 {
        if classification.view_direction == Vec3::ZERO {
            self.viewport.view_direction()
        } else {
            classification.view_direction
        }
    }

    pub fn target(&self) -> Option<&EditTarget> {
        self.target.as_ref()
    }

    pub fn mesh(&self) -> Option<&Mesh> {
        self.target.as_ref().map(|t| &t.mesh)
    }

    pub fn has_target(&self) -> bool {
        self.target.is_some()
    }

    pub fn brush(&self) -> &BrushConfig {
        &self.brush
    }

    pub fn indicator(&self) -> &BrushIndicator {
        &self.indicator
    }

    pub fn viewport(&self) -> &ViewportConfig {
        &self.viewport
    }

    pub fn classification(&self) -> Option<&UndercutClassification> {
        self.classification.as_ref()
    }

    /// Classification passes run since the target was loaded
    pub fn passes(&self) -> u32 {
        self.passes
    }

    /// Buffers changed since the last call (renderer upload)
    pub fn take_dirty(&mut self) -> MeshDirty {
        self.target
            .as_mut()
            .map_or(MeshDirty::empty(), |t| t.mesh.take_dirty())
    }
}
