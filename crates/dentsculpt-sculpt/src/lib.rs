//! # Dentsculpt Sculpt
//!
//! Interactive brush deformation for dentsculpt meshes.
//!
//! ## Features
//! - Clay, additive-normal and flatten brushes with a linear falloff
//! - Sphere queries through the BVH with a containment fast path
//! - Adaptive stroke spacing along a pointer drag
//! - Incremental vertex normal recompute over the touched region

pub mod brush;
pub mod change_set;
pub mod normals;
pub mod path;
pub mod stroke;

pub use brush::{BrushConfig, BrushIndicator, BrushKind};
pub use change_set::ChangeSet;
pub use normals::recompute_normals;
pub use path::{FrameReport, PointerSample, StrokePath, SurfaceHit};
pub use stroke::{StrokeInput, StrokeOutcome, apply_stroke};

use thiserror::Error;

/// Sculpt errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SculptError {
    #[error("Invalid brush: {0}")]
    InvalidBrush(String),
}

/// Result type for sculpt operations
pub type SculptResult<T> = Result<T, SculptError>;
