//! # Dentsculpt Assets
//!
//! Getting meshes into and out of the editing kernel.
//!
//! ## Features
//! - Triangle soup import with sequential index synthesis
//! - Vertex welding on a quantized grid
//! - JSON mesh documents
//! - Binary snapshots (`.dsm`)

pub mod document;
pub mod soup;

pub use document::{MeshDocument, load_mesh, save_mesh};
pub use soup::{TriangleSoup, import_soup, weld_vertices};

use dentsculpt_core::CoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Asset errors
#[derive(Error, Debug)]
pub enum AssetError {
    #[error("Triangle soup has no position channel")]
    MissingPosition,

    #[error("Malformed triangle soup: {0}")]
    MalformedSoup(String),

    #[error("Invalid mesh: {0}")]
    InvalidMesh(#[from] CoreError),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Snapshot error: {0}")]
    SnapshotError(#[from] bincode::Error),
}

/// Result type for asset operations
pub type AssetResult<T> = Result<T, AssetError>;

/// Import settings for meshes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshImportSettings {
    /// Uniform scale applied to imported positions
    pub scale: f32,
    /// Merge vertices closer than this; `None` keeps the soup unshared
    pub weld_tolerance: Option<f32>,
    /// Recompute vertex normals instead of trusting the file
    pub compute_normals: bool,
}

impl Default for MeshImportSettings {
    fn default() -> Self {
        Self {
            scale: 1.0,
            weld_tolerance: Some(1e-5),
            compute_normals: true,
        }
    }
}
