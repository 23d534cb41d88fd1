//! Object library: identifiers mapped to mesh files and metadata.
//!
//! ```json
//! {
//!   "mug": { "name": "Red mug", "class": "mug", "mesh": "meshes/mug.ply", "scale": 0.001 }
//! }
//! ```

use crate::{read_triangle_mesh, resource_error};
use scan_3d::TriangleMesh;
use scan_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

fn unit_scale() -> f32 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub class: String,
    #[serde(default)]
    pub description: String,
    /// Display color, RGB bytes.
    #[serde(default)]
    pub color: [u8; 3],
    /// Mesh path, relative to the library file.
    pub mesh: PathBuf,
    /// Factor applied to mesh vertices on load, e.g. 0.001 for millimetre models.
    #[serde(default = "unit_scale")]
    pub scale: f32,
}

#[derive(Debug, Clone)]
pub struct ObjectLibrary {
    root: PathBuf,
    objects: BTreeMap<String, ObjectEntry>,
}

impl ObjectLibrary {
    /// Parses a library document; mesh paths resolve against `root`.
    pub fn from_json(text: &str, root: impl Into<PathBuf>) -> Result<Self> {
        let objects: BTreeMap<String, ObjectEntry> =
            serde_json::from_str(text).map_err(|e| Error::ParseError(e.to_string()))?;
        if let Some((id, entry)) = objects
            .iter()
            .find(|(_, e)| !(e.scale.is_finite() && e.scale > 0.0))
        {
            return Err(Error::InvalidConfig(format!(
                "object '{id}' has non-positive scale {}",
                entry.scale
            )));
        }
        Ok(Self {
            root: root.into(),
            objects,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| resource_error(path, e))?;
        let root = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::from_json(&text, root).map_err(|e| Error::resource(path, e.to_string()))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.objects.keys().map(String::as_str)
    }

    pub fn get(&self, id: &str) -> Result<&ObjectEntry> {
        self.objects
            .get(id)
            .ok_or_else(|| Error::resource(id, "unknown object id"))
    }

    pub fn mesh_path(&self, id: &str) -> Result<PathBuf> {
        Ok(self.root.join(&self.get(id)?.mesh))
    }

    /// Loads the object's mesh with its scale applied.
    pub fn load_mesh(&self, id: &str) -> Result<TriangleMesh> {
        let entry = self.get(id)?;
        let path = self.root.join(&entry.mesh);
        let mut mesh = read_triangle_mesh(&path)?;
        if entry.scale != 1.0 {
            mesh.scale(entry.scale);
        }
        tracing::debug!(id, path = %path.display(), faces = mesh.num_faces(), "loaded object mesh");
        Ok(mesh)
    }
}
