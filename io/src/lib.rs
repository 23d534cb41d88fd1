//! File I/O for the scan toolkit.
//!
//! - `ply` / `obj`: triangle meshes and point clouds
//! - `trajectory`: camera pose text files
//! - `annotation`: per-object pose records
//! - `library`: object library documents
//! - `rgbd`: color + depth image pairs
//! - `config`: reconstruction settings and camera intrinsics
//!
//! Path-based functions report missing or unreadable files as
//! [`Error::Resource`] naming the path.

pub mod annotation;
pub mod config;
pub mod library;
pub mod obj;
pub mod ply;
pub mod rgbd;
pub mod trajectory;

pub use annotation::{load_pose_records, save_pose_records, ObjectPoseRecord};
pub use config::{load_camera_intrinsics, load_reconstruction_config};
pub use library::{ObjectEntry, ObjectLibrary};
pub use obj::{read_obj_mesh, write_obj_mesh, ObjMesh};
pub use ply::{read_ply_mesh, read_ply_point_cloud, write_ply_mesh, write_ply_point_cloud};
pub use rgbd::read_rgbd_image;
pub use trajectory::{load_trajectory, read_trajectory, save_trajectory, write_trajectory};

use scan_3d::{Reconstruction, TriangleMesh};
use scan_core::{Error, PointCloud, Result};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

pub const MESH_FILE: &str = "reconstruction.ply";
pub const VISUAL_MESH_FILE: &str = "reconstruction_visual.ply";
pub const ALIGNMENT_CLOUD_FILE: &str = "reconstruction_align.ply";
pub const REFINED_TRAJECTORY_FILE: &str = "trajectory_refined.txt";

pub(crate) fn resource_error(path: &Path, err: std::io::Error) -> Error {
    Error::resource(path, err.to_string())
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

fn open(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| resource_error(path, e))
}

/// Reads a `.ply` or `.obj` mesh.
pub fn read_triangle_mesh(path: impl AsRef<Path>) -> Result<TriangleMesh> {
    let path = path.as_ref();
    let mesh = match extension(path).as_str() {
        "ply" => read_ply_mesh(open(path)?),
        "obj" => read_obj_mesh(open(path)?),
        other => {
            return Err(Error::resource(
                path,
                format!("unsupported mesh format '{other}'"),
            ))
        }
    }
    .map_err(|e| match e {
        Error::Resource { .. } => e,
        other => Error::resource(path, other.to_string()),
    })?;
    mesh.validate()
        .map_err(|e| Error::resource(path, e.to_string()))?;
    Ok(mesh)
}

/// Writes a `.ply` (ASCII, with normals and colors) or `.obj` mesh.
pub fn write_triangle_mesh(path: impl AsRef<Path>, mesh: &TriangleMesh) -> Result<()> {
    let path = path.as_ref();
    let format = extension(path);
    if format != "ply" && format != "obj" {
        return Err(Error::resource(
            path,
            format!("unsupported mesh format '{format}'"),
        ));
    }
    let file = File::create(path).map_err(|e| resource_error(path, e))?;
    let mut writer = BufWriter::new(file);
    if format == "ply" {
        write_ply_mesh(&mut writer, mesh)?;
    } else {
        write_obj_mesh(&mut writer, mesh)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_point_cloud(path: impl AsRef<Path>) -> Result<PointCloud> {
    let path = path.as_ref();
    if extension(path) != "ply" {
        return Err(Error::resource(path, "point clouds are read from PLY files"));
    }
    read_ply_point_cloud(open(path)?).map_err(|e| Error::resource(path, e.to_string()))
}

pub fn write_point_cloud(path: impl AsRef<Path>, cloud: &PointCloud) -> Result<()> {
    let path = path.as_ref();
    if extension(path) != "ply" {
        return Err(Error::resource(path, "point clouds are written as PLY files"));
    }
    let file = File::create(path).map_err(|e| resource_error(path, e))?;
    let mut writer = BufWriter::new(file);
    write_ply_point_cloud(&mut writer, cloud)?;
    writer.flush()?;
    Ok(())
}

/// Persists the artifacts of a reconstruction into `dir`: the full mesh, the
/// visual mesh, the alignment cloud and, when `save_refined` is set and a
/// refinement ran, the refined camera trajectory.
pub fn write_reconstruction(
    dir: impl AsRef<Path>,
    reconstruction: &Reconstruction,
    save_refined: bool,
) -> Result<()> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).map_err(|e| resource_error(dir, e))?;

    write_triangle_mesh(dir.join(MESH_FILE), &reconstruction.mesh)?;
    write_triangle_mesh(dir.join(VISUAL_MESH_FILE), &reconstruction.visual_mesh)?;
    write_point_cloud(dir.join(ALIGNMENT_CLOUD_FILE), &reconstruction.alignment_cloud)?;
    if save_refined && reconstruction.refinement.is_some() {
        save_trajectory(dir.join(REFINED_TRAJECTORY_FILE), &reconstruction.camera_poses)?;
    }
    tracing::info!(dir = %dir.display(), "reconstruction written");
    Ok(())
}
