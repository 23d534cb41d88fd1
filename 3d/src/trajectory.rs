//! Pairwise frame-to-frame trajectory refinement.

use crate::rgbd::{frames_to_point_clouds, PosedFrame};
use scan_core::{Pose, Result};
use scan_registration::{
    registration_multi_scale_icp, RegistrationConfig, RegistrationMethod, RegistrationResult,
};

/// Fitness under which a pair is logged as poorly registered.
pub const LOW_CONFIDENCE_FITNESS: f64 = 0.3;

/// Registration outcome for the pair `(index - 1, index)`.
#[derive(Debug, Clone)]
pub struct PairRefinement {
    pub index: usize,
    /// Increment mapping frame `index`'s cloud onto frame `index - 1`'s.
    pub result: RegistrationResult,
}

/// Corrected frames plus the per-pair diagnostics that produced them.
#[derive(Debug, Clone)]
pub struct TrajectoryRefinement {
    pub frames: Vec<PosedFrame>,
    pub pairs: Vec<PairRefinement>,
}

impl TrajectoryRefinement {
    /// Corrected camera-to-world poses, one per frame.
    pub fn camera_poses(&self) -> Vec<Pose> {
        self.frames.iter().map(PosedFrame::camera_to_world).collect()
    }
}

/// Refines every frame after the first against its predecessor.
///
/// Clouds are back-projected once, in parallel, from the input extrinsics.
/// Each pair is registered independently with source = frame `i`, target =
/// frame `i - 1`, identity as the initial guess and the
/// `{2v, v, v/2, v/4}` × `{100, 50, 30, 14}` schedule. With world-to-camera
/// extrinsic `E_i` and increment `T` the corrected extrinsic is `E_i · T⁻¹`.
/// Corrections are not chained: drift along a long sequence is not removed.
///
/// # Errors
///
/// Only configuration errors (bad voxel size, color ICP on frames without
/// color) abort the call. Poorly registered pairs are kept and logged.
pub fn refine_trajectory(
    frames: &[PosedFrame],
    method: RegistrationMethod,
    voxel_size: f32,
) -> Result<TrajectoryRefinement> {
    let config = RegistrationConfig::trajectory_schedule(method, voxel_size);
    config.validate()?;

    let clouds = frames_to_point_clouds(frames);
    let mut refined = Vec::with_capacity(frames.len());
    let mut pairs = Vec::with_capacity(frames.len().saturating_sub(1));
    if let Some(first) = frames.first() {
        refined.push(first.clone());
    }

    for i in 1..frames.len() {
        let result =
            registration_multi_scale_icp(&clouds[i], &clouds[i - 1], &Pose::identity(), &config)?;
        if result.is_low_confidence(LOW_CONFIDENCE_FITNESS) {
            tracing::warn!(
                frame = i,
                fitness = result.fitness,
                "frame registered with low confidence"
            );
        }
        tracing::debug!(
            frame = i,
            fitness = result.fitness,
            inlier_rmse = result.inlier_rmse,
            iterations = result.num_iterations,
            "refined frame pair"
        );

        let corrected = frames[i].extrinsic * result.transformation.inverse();
        refined.push(frames[i].with_extrinsic(corrected));
        pairs.push(PairRefinement { index: i, result });
    }

    tracing::info!(frames = frames.len(), method = %method, "trajectory refined");
    Ok(TrajectoryRefinement {
        frames: refined,
        pairs,
    })
}
