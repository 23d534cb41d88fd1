//! Per-object pose annotations.

use crate::resource_error;
use scan_core::{Error, Pose, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Annotated pose of one object instance in a scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectPoseRecord {
    /// Object library identifier.
    pub id: String,
    /// Row-major object-to-scene transform.
    pub pose: [f64; 16],
}

impl ObjectPoseRecord {
    pub fn new(id: impl Into<String>, pose: &Pose) -> Self {
        Self {
            id: id.into(),
            pose: pose.to_flat(),
        }
    }

    pub fn pose(&self) -> Result<Pose> {
        Pose::from_flat(&self.pose)
    }
}

/// Parses records, rejecting any pose that is not a rigid transform.
pub fn parse_pose_records(text: &str) -> Result<Vec<ObjectPoseRecord>> {
    let records: Vec<ObjectPoseRecord> =
        serde_json::from_str(text).map_err(|e| Error::ParseError(e.to_string()))?;
    for record in &records {
        record
            .pose()
            .map_err(|e| Error::InvalidPose(format!("object '{}': {e}", record.id)))?;
    }
    Ok(records)
}

pub fn load_pose_records(path: impl AsRef<Path>) -> Result<Vec<ObjectPoseRecord>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| resource_error(path, e))?;
    parse_pose_records(&text).map_err(|e| Error::resource(path, e.to_string()))
}

pub fn save_pose_records(path: impl AsRef<Path>, records: &[ObjectPoseRecord]) -> Result<()> {
    let path = path.as_ref();
    let text =
        serde_json::to_string_pretty(records).map_err(|e| Error::ParseError(e.to_string()))?;
    fs::write(path, text).map_err(|e| resource_error(path, e))?;
    tracing::debug!(path = %path.display(), objects = records.len(), "wrote object poses");
    Ok(())
}
