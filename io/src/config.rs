//! Configuration and camera files.

use crate::resource_error;
use scan_3d::ReconstructionConfig;
use scan_core::{CameraIntrinsics, Error, Result};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).map_err(|e| resource_error(path, e))?;
    serde_json::from_str(&text).map_err(|e| Error::resource(path, e.to_string()))
}

/// Reads reconstruction settings; missing keys take their defaults.
///
/// The registration method name is not checked here; it is parsed when the
/// reconstruction runs.
pub fn load_reconstruction_config(path: impl AsRef<Path>) -> Result<ReconstructionConfig> {
    let path = path.as_ref();
    let config: ReconstructionConfig = load_json(path)?;
    config
        .validate()
        .map_err(|e| Error::resource(path, e.to_string()))?;
    Ok(config)
}

/// Reads and validates camera intrinsics
/// (`fx`, `fy`, `cx`, `cy`, `width`, `height`, optional `sensor_width_mm`).
pub fn load_camera_intrinsics(path: impl AsRef<Path>) -> Result<CameraIntrinsics> {
    let path = path.as_ref();
    let intrinsics: CameraIntrinsics = load_json(path)?;
    intrinsics.validate()?;
    Ok(intrinsics)
}
