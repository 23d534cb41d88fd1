//! Scene reconstruction: refinement, fusion and mesh post-processing.

use crate::mesh::processing::{keep_largest_cluster, simplify_quadric_decimation};
use crate::mesh::sampling::sample_points_uniform_and_poisson;
use crate::rgbd::PosedFrame;
use crate::trajectory::{refine_trajectory, TrajectoryRefinement};
use crate::tsdf::{TsdfConfig, TsdfVolume};
use crate::TriangleMesh;
use nalgebra::{Point3, Vector3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use scan_core::{CameraIntrinsics, Error, PointCloud, Pose, Result};
use scan_registration::RegistrationMethod;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Flat reconstruction settings, as stored in scene config files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionConfig {
    /// Depth beyond this range (metres) is discarded.
    pub max_depth: f32,
    /// Base voxel size of trajectory refinement.
    pub voxel_size: f32,
    /// Edge of the fusion cube; voxel size is `tsdf_cubic_size / tsdf_resolution`.
    pub tsdf_cubic_size: f32,
    pub tsdf_resolution: usize,
    /// Center of the fusion cube. When absent it is placed where the cameras look.
    pub tsdf_center: Option<[f32; 3]>,
    pub sdf_trunc: f32,
    /// Registration method name, parsed when the pipeline runs.
    pub icp_method: String,
    pub icp_refinement: bool,
    pub save_refined: bool,
    /// Triangle budget of the visual mesh.
    pub triangles: usize,
    /// Decimate the visual mesh down to `triangles`. Off by default, in which
    /// case the visual mesh is a copy of the full fused mesh.
    pub simplify: bool,
    /// Keep only the largest connected component.
    pub cluster: bool,
    /// Samples of the alignment cloud, split evenly between uniform and
    /// Poisson-disk sampling.
    pub alignment_points: usize,
    /// Depth image units per metre.
    pub depth_scale: f32,
    pub seed: u64,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            max_depth: 1.3,
            voxel_size: 0.004,
            tsdf_cubic_size: 1.5,
            tsdf_resolution: 512,
            tsdf_center: None,
            sdf_trunc: 0.018,
            icp_method: "color".to_string(),
            icp_refinement: false,
            save_refined: true,
            triangles: 1_000_000,
            simplify: false,
            cluster: false,
            alignment_points: 500_000,
            depth_scale: 1000.0,
            seed: 0,
        }
    }
}

impl ReconstructionConfig {
    pub fn method(&self) -> Result<RegistrationMethod> {
        self.icp_method.parse()
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.max_depth > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "max_depth must be positive, got {}",
                self.max_depth
            )));
        }
        if !(self.voxel_size > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "voxel_size must be positive, got {}",
                self.voxel_size
            )));
        }
        if !(self.depth_scale > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "depth_scale must be positive, got {}",
                self.depth_scale
            )));
        }
        if self.simplify && self.triangles == 0 {
            return Err(Error::InvalidConfig(
                "simplification needs a positive triangle budget".into(),
            ));
        }
        self.tsdf_config(Point3::origin()).validate()
    }

    pub fn tsdf_config(&self, center: Point3<f32>) -> TsdfConfig {
        TsdfConfig::centered(
            self.tsdf_cubic_size,
            self.tsdf_resolution,
            self.sdf_trunc,
            center,
        )
    }
}

/// Everything a reconstruction run produces.
#[derive(Debug, Clone)]
pub struct Reconstruction {
    /// Full-resolution fused mesh.
    pub mesh: TriangleMesh,
    /// Decimated mesh for interactive use.
    pub visual_mesh: TriangleMesh,
    /// Dense samples of the raw fused mesh, for object alignment.
    pub alignment_cloud: PointCloud,
    /// Camera-to-world pose of every frame after refinement.
    pub camera_poses: Vec<Pose>,
    pub refinement: Option<TrajectoryRefinement>,
}

/// Reconstruction context for one camera.
///
/// Holds the settings and shared intrinsics that would otherwise live in
/// global "current scene" state.
#[derive(Debug, Clone)]
pub struct Reconstructor {
    config: ReconstructionConfig,
    intrinsics: Arc<CameraIntrinsics>,
}

impl Reconstructor {
    pub fn new(config: ReconstructionConfig, intrinsics: Arc<CameraIntrinsics>) -> Result<Self> {
        config.validate()?;
        intrinsics.validate()?;
        Ok(Self { config, intrinsics })
    }

    pub fn config(&self) -> &ReconstructionConfig {
        &self.config
    }

    pub fn intrinsics(&self) -> &Arc<CameraIntrinsics> {
        &self.intrinsics
    }

    /// Runs every stage over `frames`, in order: optional refinement, fusion,
    /// alignment-cloud sampling, optional decimation, optional largest-cluster
    /// filter.
    ///
    /// # Errors
    ///
    /// An unknown `icp_method`, frames whose intrinsics differ from this
    /// reconstructor's, or an empty frame list.
    pub fn run(&self, frames: &[PosedFrame]) -> Result<Reconstruction> {
        let method = self.config.method()?;
        if frames.is_empty() {
            return Err(Error::InvalidInput("no frames to reconstruct".into()));
        }
        if let Some(i) = frames.iter().position(|f| *f.intrinsics != *self.intrinsics) {
            return Err(Error::InvalidIntrinsics(format!(
                "frame {i} was captured with different intrinsics"
            )));
        }

        let refinement = if self.config.icp_refinement {
            tracing::info!(frames = frames.len(), method = %method, "refining trajectory");
            Some(refine_trajectory(frames, method, self.config.voxel_size)?)
        } else {
            None
        };
        let frames = refinement.as_ref().map_or(frames, |r| r.frames.as_slice());

        let center = match self.config.tsdf_center {
            Some(c) => Point3::from(c),
            None => viewed_center(frames, self.config.max_depth),
        };
        let mut volume = TsdfVolume::new(self.config.tsdf_config(center))?;
        tracing::info!(
            frames = frames.len(),
            voxel_size = volume.voxel_size(),
            "integrating frames"
        );
        for frame in frames {
            volume.integrate(frame);
        }
        let mesh = volume.extract_mesh();
        drop(volume);
        tracing::info!(
            vertices = mesh.num_vertices(),
            triangles = mesh.num_faces(),
            "fused mesh extracted"
        );

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let uniform = self.config.alignment_points / 2;
        let alignment_cloud = sample_points_uniform_and_poisson(
            &mesh,
            uniform,
            self.config.alignment_points - uniform,
            &mut rng,
        );
        tracing::info!(points = alignment_cloud.len(), "alignment cloud sampled");

        let mut mesh = mesh;
        let mut visual_mesh = if self.config.simplify {
            let simplified = simplify_quadric_decimation(&mesh, self.config.triangles);
            tracing::info!(
                before = mesh.num_faces(),
                after = simplified.num_faces(),
                "mesh simplified"
            );
            simplified
        } else {
            mesh.clone()
        };

        if self.config.cluster {
            let dropped = keep_largest_cluster(&mut mesh);
            let dropped_visual = keep_largest_cluster(&mut visual_mesh);
            tracing::info!(dropped, dropped_visual, "kept largest cluster");
        }

        let camera_poses = frames.iter().map(PosedFrame::camera_to_world).collect();
        Ok(Reconstruction {
            mesh,
            visual_mesh,
            alignment_cloud,
            camera_poses,
            refinement,
        })
    }
}

/// Mean over frames of the point on the optical axis at the frame's mean
/// valid depth.
fn viewed_center(frames: &[PosedFrame], max_depth: f32) -> Point3<f32> {
    let sum: Vector3<f32> = frames
        .iter()
        .map(|frame| {
            let depth = frame.image.depth();
            let valid = frame.image.valid_depth_count();
            let mean = if valid > 0 {
                depth.iter().sum::<f32>() / valid as f32
            } else {
                0.5 * max_depth
            };
            let on_axis = Point3::new(0.0, 0.0, mean);
            frame.camera_to_world().transform_point_f32(&on_axis).coords
        })
        .sum();
    Point3::from(sum / frames.len() as f32)
}
