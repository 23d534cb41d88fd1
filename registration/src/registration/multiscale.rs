//! Coarse-to-fine registration driver.

use super::{
    compute_color_gradients, get_information_matrix_from_point_clouds, icp_loop,
    ConvergenceCriteria, Estimator, RegistrationConfig, RegistrationMethod,
};
use nalgebra::Matrix6;
use scan_core::{Error, PointCloud, Pose, Result};
use scan_point_cloud::{estimate_normals, voxel_down_sample, SearchParam};

/// Fitness below which a result is treated as "did not register at all".
pub const MIN_USABLE_FITNESS: f64 = 1e-6;

/// Outcome of a multi-scale registration.
///
/// Numerical degeneracy (empty clouds, unusable normals, no correspondences)
/// does not raise: it shows up as zero `fitness`, a zero `information`
/// matrix and `transformation` equal to the initial pose.
#[derive(Debug, Clone)]
pub struct RegistrationResult {
    /// Transform mapping the source onto the target.
    pub transformation: Pose,
    /// 6×6 information matrix over `[ω; v]` at the finest level.
    pub information: Matrix6<f64>,
    /// Voxel size of the level `information` was computed at. Matrices from
    /// calls with different values here are not comparable.
    pub information_voxel_size: f32,
    /// Fraction of finest-level source points with a correspondence.
    pub fitness: f64,
    pub inlier_rmse: f64,
    /// Iterations summed over all levels.
    pub num_iterations: usize,
    /// Whether the finest level stopped on the convergence criteria rather
    /// than its iteration budget.
    pub converged: bool,
}

impl RegistrationResult {
    fn degenerate(init: &Pose, information_voxel_size: f32) -> Self {
        Self {
            transformation: *init,
            information: Matrix6::zeros(),
            information_voxel_size,
            fitness: 0.0,
            inlier_rmse: 0.0,
            num_iterations: 0,
            converged: false,
        }
    }

    /// True when fitness falls under `min_fitness` (or is effectively zero).
    pub fn is_low_confidence(&self, min_fitness: f64) -> bool {
        self.fitness < min_fitness.max(MIN_USABLE_FITNESS)
    }
}

/// Multi-scale ICP
///
/// Processes `config.scales` from coarsest to finest. At each level both
/// clouds are voxel down-sampled, normals are estimated when the method needs
/// them (hybrid search, radius = 2 × level voxel), and the ICP loop runs from
/// the previous level's transform. The information matrix is computed once,
/// after the finest level, with threshold `distance_factor × finest voxel`.
///
/// # Errors
///
/// Configuration errors and missing colors for color ICP are returned as
/// `Err`. Degenerate geometry is reported through the result's diagnostics.
pub fn registration_multi_scale_icp(
    source: &PointCloud,
    target: &PointCloud,
    init: &Pose,
    config: &RegistrationConfig,
) -> Result<RegistrationResult> {
    config.validate()?;
    // Normals are re-estimated per level; colors cannot be.
    if config.method.requires_colors() && !(source.has_colors() && target.has_colors()) {
        return Err(Error::InvalidInput(format!(
            "{} registration requires colors on both clouds",
            config.method
        )));
    }

    let information_voxel = config.finest_voxel_size();
    if source.is_empty() || target.is_empty() {
        tracing::warn!(
            source = source.len(),
            target = target.len(),
            "registration on an empty cloud"
        );
        return Ok(RegistrationResult::degenerate(init, information_voxel));
    }

    let mut transformation = *init;
    let mut num_iterations = 0;
    let mut last = None;
    let mut finest = None;

    for (level, scale) in config.scales.iter().enumerate() {
        let mut src = voxel_down_sample(source, scale.voxel_size);
        let mut tgt = voxel_down_sample(target, scale.voxel_size);
        if config.method.requires_normals() {
            let param = SearchParam::Hybrid {
                radius: 2.0 * scale.voxel_size,
                max_nn: config.normal_max_nn,
            };
            estimate_normals(&mut src, param);
            estimate_normals(&mut tgt, param);
        }

        let max_distance = config.max_correspondence_distance(scale);
        let gradients = if config.method == RegistrationMethod::Color {
            compute_color_gradients(
                &tgt,
                SearchParam::Hybrid {
                    radius: 2.0 * max_distance,
                    max_nn: config.normal_max_nn,
                },
            )
        } else {
            Vec::new()
        };
        let estimator = match config.method {
            RegistrationMethod::PointToPoint => Estimator::PointToPoint,
            RegistrationMethod::PointToPlane => Estimator::PointToPlane,
            RegistrationMethod::Color => Estimator::Colored {
                gradients: &gradients,
                lambda_geometric: config.lambda_geometric,
            },
            RegistrationMethod::Generalized => Estimator::Generalized,
        };
        let criteria = ConvergenceCriteria {
            relative_fitness: config.relative_fitness,
            relative_rmse: config.relative_rmse,
            max_iterations: scale.max_iterations,
        };

        let result = icp_loop(
            &src,
            &tgt,
            max_distance,
            &transformation,
            &estimator,
            &config.kernel(max_distance),
            &criteria,
        );
        tracing::debug!(
            level,
            voxel_size = scale.voxel_size,
            max_distance,
            source_points = src.len(),
            target_points = tgt.len(),
            fitness = result.fitness,
            inlier_rmse = result.inlier_rmse,
            iterations = result.num_iterations,
            "registration level finished"
        );

        transformation = result.transformation;
        num_iterations += result.num_iterations;
        last = Some(result);
        finest = Some((src, tgt));
    }

    let (Some(last), Some((src, tgt))) = (last, finest) else {
        return Ok(RegistrationResult::degenerate(init, information_voxel));
    };

    let information = get_information_matrix_from_point_clouds(
        &src,
        &tgt,
        config.distance_factor * information_voxel,
        &transformation,
    );
    if last.fitness < MIN_USABLE_FITNESS {
        tracing::warn!(method = %config.method, "registration found no correspondences");
    }

    Ok(RegistrationResult {
        transformation,
        information,
        information_voxel_size: information_voxel,
        fitness: last.fitness,
        inlier_rmse: last.inlier_rmse,
        num_iterations,
        converged: last.converged,
    })
}
