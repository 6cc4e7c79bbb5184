//! Mesh Documents
//!
//! Indexed mesh files. JSON documents are meant to be inspected and edited by
//! hand; `.dsm` snapshots are compact bincode dumps of the same data with a
//! format version in front.

use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use dentsculpt_core::Mesh;
use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::soup::{TriangleSoup, import_soup};
use crate::{AssetError, AssetResult, MeshImportSettings};

/// Extension of binary snapshots
pub const SNAPSHOT_EXTENSION: &str = "dsm";

/// Current snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Serializable indexed mesh
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshDocument {
    pub positions: Vec<Vec3>,
    #[serde(default)]
    pub normals: Vec<Vec3>,
    pub indices: Vec<[u32; 3]>,
}

impl MeshDocument {
    pub fn from_mesh(mesh: &Mesh) -> Self {
        Self {
            positions: mesh.positions().to_vec(),
            normals: mesh.normals().to_vec(),
            indices: mesh.triangles().to_vec(),
        }
    }

    /// Validate into a mesh; missing normals are recomputed and stored ones
    /// are renormalized
    pub fn into_mesh(self) -> AssetResult<Mesh> {
        let mesh = if self.normals.is_empty() {
            Mesh::new(self.positions, self.indices)?
        } else {
            let normals = self
                .normals
                .into_iter()
                .map(|n| n.normalize_or(Vec3::Z))
                .collect();
            Mesh::with_normals(self.positions, normals, self.indices)?
        };
        Ok(mesh)
    }
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    document: MeshDocument,
}

/// JSON inputs: a mesh document or a triangle soup
#[derive(Deserialize)]
#[serde(untagged)]
enum JsonMesh {
    Document(MeshDocument),
    Soup(TriangleSoup),
}

/// Load a mesh from `.json` (document or triangle soup) or `.dsm`
pub fn load_mesh(path: &Path, settings: &MeshImportSettings) -> AssetResult<Mesh> {
    let reader = BufReader::new(fs::File::open(path)?);

    let mesh = match extension(path).as_deref() {
        Some(SNAPSHOT_EXTENSION) => {
            let snapshot: Snapshot = bincode::deserialize_from(reader)?;
            if snapshot.version != SNAPSHOT_VERSION {
                return Err(AssetError::UnsupportedFormat(format!(
                    "snapshot version {} (expected {})",
                    snapshot.version, SNAPSHOT_VERSION
                )));
            }
            snapshot.document.into_mesh()?
        }
        Some("json") => match serde_json::from_reader(reader)? {
            JsonMesh::Document(document) => document.into_mesh()?,
            JsonMesh::Soup(soup) => import_soup(&soup, settings)?,
        },
        other => {
            return Err(AssetError::UnsupportedFormat(format!(
                "{} ({})",
                path.display(),
                other.unwrap_or("no extension")
            )));
        }
    };

    log::info!(
        "Loaded {}: {} vertices, {} triangles",
        path.display(),
        mesh.vertex_count(),
        mesh.triangle_count()
    );
    Ok(mesh)
}

/// Save a mesh as a JSON document or, for `.dsm`, a snapshot
pub fn save_mesh(path: &Path, mesh: &Mesh) -> AssetResult<()> {
    let document = MeshDocument::from_mesh(mesh);

    match extension(path).as_deref() {
        Some(SNAPSHOT_EXTENSION) => {
            let writer = BufWriter::new(fs::File::create(path)?);
            let snapshot = Snapshot {
                version: SNAPSHOT_VERSION,
                document,
            };
            bincode::serialize_into(writer, &snapshot)?;
        }
        Some("json") => {
            let writer = BufWriter::new(fs::File::create(path)?);
            serde_json::to_writer(writer, &document)?;
        }
        other => {
            return Err(AssetError::UnsupportedFormat(format!(
                "{} ({})",
                path.display(),
                other.unwrap_or("no extension")
            )));
        }
    }

    log::info!("Saved {}", path.display());
    Ok(())
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}
