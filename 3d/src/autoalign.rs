//! Snapping library objects onto a reconstructed scene.

use crate::mesh::sampling::{sample_points_uniform_and_poisson, sample_points_uniformly};
use crate::TriangleMesh;
use nalgebra::Matrix6;
use rand::rngs::StdRng;
use rand::SeedableRng;
use scan_core::{PointCloud, Pose, Result};
use scan_registration::{
    registration_multi_scale_icp, RegistrationConfig, RegistrationMethod, RegistrationResult,
};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Tunables of the two-pass alignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoAlignConfig {
    /// Base voxel size: the point-to-plane pass runs at this scale and the
    /// point-to-point cascade at `{2v, v, v/2, v/4}`.
    pub voxel_size: f32,
    pub coarse_iterations: usize,
    pub fine_iterations: usize,
    /// Area-uniform samples drawn on the object mesh.
    pub uniform_points: usize,
    /// Poisson-disk samples drawn on the object mesh.
    pub poisson_points: usize,
    /// Samples drawn when the scene is given as a mesh.
    pub scene_points: usize,
    pub seed: u64,
}

impl Default for AutoAlignConfig {
    fn default() -> Self {
        Self {
            voxel_size: 0.004,
            coarse_iterations: 300,
            fine_iterations: 300,
            uniform_points: 10_000,
            poisson_points: 10_000,
            scene_points: 100_000,
            seed: 0,
        }
    }
}

/// The surface an object is aligned against.
#[derive(Debug, Clone, Copy)]
pub enum SceneSurface<'a> {
    /// Used as is, typically the alignment cloud of a reconstruction.
    Cloud(&'a PointCloud),
    /// Sampled uniformly before registration.
    Mesh(&'a TriangleMesh),
}

#[derive(Debug, Clone)]
pub struct AlignmentResult {
    /// Object-to-scene pose, in the same convention as the seed.
    pub pose: Pose,
    /// Information matrix of the final pass.
    pub information: Matrix6<f64>,
    pub fitness: f64,
    pub inlier_rmse: f64,
    /// Point-to-plane pass.
    pub coarse: RegistrationResult,
    /// Point-to-point cascade.
    pub fine: RegistrationResult,
}

/// Refines `seed_pose` so that `object_mesh` lies on `scene`.
///
/// The object mesh is sampled in its own frame (uniform ∪ Poisson-disk) and
/// registered as the source against the scene as the target, first with
/// point-to-plane at a single scale, then with point-to-point over the
/// four-level cascade, each pass seeded from the previous one. The result is
/// object-to-scene directly.
///
/// # Errors
///
/// Configuration errors only. A seed too far from the surface comes back
/// with low fitness.
pub fn auto_align(
    object_mesh: &TriangleMesh,
    scene: SceneSurface<'_>,
    seed_pose: &Pose,
    config: &AutoAlignConfig,
) -> Result<AlignmentResult> {
    let coarse_config = RegistrationConfig::single_scale(
        RegistrationMethod::PointToPlane,
        config.voxel_size,
        config.coarse_iterations,
    );
    let fine_config = RegistrationConfig::cascade(
        RegistrationMethod::PointToPoint,
        config.voxel_size,
        config.fine_iterations,
    );
    coarse_config.validate()?;
    fine_config.validate()?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let object = sample_points_uniform_and_poisson(
        object_mesh,
        config.uniform_points,
        config.poisson_points,
        &mut rng,
    );
    let target: Cow<'_, PointCloud> = match scene {
        SceneSurface::Cloud(cloud) => Cow::Borrowed(cloud),
        SceneSurface::Mesh(mesh) => {
            Cow::Owned(sample_points_uniformly(mesh, config.scene_points, &mut rng))
        }
    };
    tracing::debug!(
        object_points = object.len(),
        scene_points = target.len(),
        "sampled alignment clouds"
    );

    let coarse = registration_multi_scale_icp(&object, &target, seed_pose, &coarse_config)?;
    let fine =
        registration_multi_scale_icp(&object, &target, &coarse.transformation, &fine_config)?;

    if fine.is_low_confidence(0.0) {
        tracing::warn!(fitness = fine.fitness, "object did not register against the scene");
    }
    tracing::info!(
        fitness = fine.fitness,
        inlier_rmse = fine.inlier_rmse,
        "object aligned"
    );

    Ok(AlignmentResult {
        pose: fine.transformation,
        information: fine.information,
        fitness: fine.fitness,
        inlier_rmse: fine.inlier_rmse,
        coarse,
        fine,
    })
}
