//! # Dentsculpt Undercut
//!
//! Undercut detection and corrective blockout geometry.
//!
//! ## Features
//! - Analytic normal-vs-view classification with a configurable threshold
//! - Raycast occlusion classification with self-face exclusion
//! - Staged thresholds across repeated classification passes
//! - Shell blockout (vertex offsets on the existing topology)
//! - Prism blockout (new top cap and side walls around the undercut region)

pub mod blockout;
pub mod classify;

pub use blockout::{BlockoutReport, BlockoutSettings, BlockoutStrategy, apply_blockout, rejection};
pub use classify::{
    RaycastTarget, UndercutClassification, UndercutPolicy, UndercutSettings, UndercutStats,
    classify_undercuts,
};

use dentsculpt_core::CoreError;
use thiserror::Error;

/// Undercut and blockout errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UndercutError {
    #[error(
        "Classification is stale: computed for topology revision {computed} with {triangles} triangles, mesh is at revision {current}"
    )]
    StaleClassification {
        computed: u64,
        current: u64,
        triangles: usize,
    },

    #[error("Invalid blockout settings: {0}")]
    InvalidSettings(String),

    #[error("Mesh rebuild failed: {0}")]
    Mesh(#[from] CoreError),
}

/// Result type for undercut operations
pub type UndercutResult<T> = Result<T, UndercutError>;
