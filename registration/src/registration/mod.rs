//! 3D Registration Module
//!
//! Iterative closest point registration with four error metrics sharing one
//! correspondence loop:
//! - point-to-point (closed-form Kabsch update)
//! - point-to-plane (Gauss-Newton)
//! - colored ICP (geometric + photometric Gauss-Newton)
//! - generalized ICP (plane-to-plane with a robust kernel)
//!
//! [`registration_multi_scale_icp`] drives the loop coarse-to-fine and
//! attaches the information matrix of the finest level.

pub mod colored;
pub mod config;
pub mod generalized;
pub mod information;
pub mod multiscale;
mod point_to_plane;
mod point_to_point;

#[cfg(test)]
mod mod_test;

pub use colored::compute_color_gradients;
pub use config::{RegistrationConfig, RegistrationMethod, ScaleLevel};
pub use information::get_information_matrix_from_point_clouds;
pub use multiscale::{registration_multi_scale_icp, RegistrationResult};
pub use scan_core::{Error, Result};

use nalgebra::{Matrix6, Vector3, Vector6};
use rayon::prelude::*;
use scan_core::{PointCloud, Pose, RobustLoss};
use scan_point_cloud::{PointIndex, SearchParam};

/// A matched pair between the (transformed) source and the target.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Correspondence {
    pub source: usize,
    pub target: usize,
    /// Euclidean distance between the pair.
    pub distance: f64,
}

/// Stopping rule of a single-scale ICP loop.
///
/// The loop stops once both fitness and inlier RMSE change by less than their
/// thresholds between consecutive iterations, or after `max_iterations`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergenceCriteria {
    pub relative_fitness: f64,
    pub relative_rmse: f64,
    pub max_iterations: usize,
}

impl Default for ConvergenceCriteria {
    fn default() -> Self {
        Self {
            relative_fitness: 1e-6,
            relative_rmse: 1e-6,
            max_iterations: 30,
        }
    }
}

/// ICP (Iterative Closest Point) registration result
///
/// Contains the optimized rigid transformation and quality metrics
/// of one single-scale run.
///
/// # Fields
///
/// * `transformation` - Rigid transform mapping source onto target
/// * `fitness` - Fraction of source points with a valid correspondence (0-1 range)
/// * `inlier_rmse` - Root mean square distance of those correspondences
/// * `num_iterations` - Iterations performed
/// * `converged` - Whether the relative-change criteria stopped the loop
#[derive(Debug, Clone)]
pub struct ICPResult {
    pub transformation: Pose,
    pub fitness: f64,
    pub inlier_rmse: f64,
    pub num_iterations: usize,
    pub converged: bool,
}

/// Metric-specific update rule.
pub(crate) enum Estimator<'a> {
    PointToPoint,
    PointToPlane,
    Colored {
        gradients: &'a [Vector3<f64>],
        lambda_geometric: f64,
    },
    Generalized,
}

impl Estimator<'_> {
    fn method(&self) -> RegistrationMethod {
        match self {
            Estimator::PointToPoint => RegistrationMethod::PointToPoint,
            Estimator::PointToPlane => RegistrationMethod::PointToPlane,
            Estimator::Colored { .. } => RegistrationMethod::Color,
            Estimator::Generalized => RegistrationMethod::Generalized,
        }
    }

    /// Incremental transform bringing `source` closer to `target`.
    ///
    /// `source` is already expressed in the current estimate's frame.
    fn estimate(
        &self,
        source: &PointCloud,
        target: &PointCloud,
        correspondences: &[Correspondence],
        kernel: &RobustLoss,
    ) -> Option<Pose> {
        match self {
            Estimator::PointToPoint => {
                point_to_point::estimate(source, target, correspondences, kernel)
            }
            Estimator::PointToPlane => {
                point_to_plane::estimate(source, target, correspondences, kernel)
            }
            Estimator::Colored {
                gradients,
                lambda_geometric,
            } => colored::estimate(
                source,
                target,
                correspondences,
                gradients,
                *lambda_geometric,
                kernel,
            ),
            Estimator::Generalized => {
                generalized::estimate(source, target, correspondences, kernel)
            }
        }
    }
}

/// Nearest target point for every source point within `max_distance`.
///
/// With `require_target_normal`, pairs whose target normal is all-zero are
/// dropped: they carry no plane constraint.
pub(crate) fn find_correspondences(
    source: &PointCloud,
    target: &PointCloud,
    index: &PointIndex,
    max_distance: f32,
    require_target_normal: bool,
) -> Vec<Correspondence> {
    let max_d2 = max_distance * max_distance;
    let normals = if require_target_normal {
        target.normals.as_ref()
    } else {
        None
    };

    source
        .points
        .par_iter()
        .enumerate()
        .filter_map(|(i, p)| {
            let (j, d2) = index.nearest(p)?;
            if d2 > max_d2 {
                return None;
            }
            if let Some(normals) = normals {
                if normals[j].norm_squared() < 1e-12 {
                    return None;
                }
            }
            Some(Correspondence {
                source: i,
                target: j,
                distance: (d2 as f64).sqrt(),
            })
        })
        .collect()
}

/// `(fitness, inlier_rmse)` of a correspondence set.
pub(crate) fn score(correspondences: &[Correspondence], source_len: usize) -> (f64, f64) {
    if correspondences.is_empty() || source_len == 0 {
        return (0.0, 0.0);
    }
    let sum_sq: f64 = correspondences.iter().map(|c| c.distance * c.distance).sum();
    let fitness = correspondences.len() as f64 / source_len as f64;
    let rmse = (sum_sq / correspondences.len() as f64).sqrt();
    (fitness, rmse)
}

/// Sums per-correspondence normal-equation terms in parallel.
pub(crate) fn accumulate_normal_equations<F>(
    correspondences: &[Correspondence],
    term: F,
) -> (Matrix6<f64>, Vector6<f64>)
where
    F: Fn(&Correspondence) -> (Matrix6<f64>, Vector6<f64>) + Sync,
{
    correspondences
        .par_iter()
        .map(&term)
        .reduce(
            || (Matrix6::zeros(), Vector6::zeros()),
            |a, b| (a.0 + b.0, a.1 + b.1),
        )
}

/// Weighted contribution `(w JᵀJ, w Jᵀr)` of a scalar residual.
pub(crate) fn row_term(jacobian: &Vector6<f64>, residual: f64, weight: f64) -> (Matrix6<f64>, Vector6<f64>) {
    (
        jacobian * jacobian.transpose() * weight,
        jacobian * (residual * weight),
    )
}

/// Solves `JᵀJ x = -Jᵀr` and maps the twist `x = [ω; v]` onto SE(3).
pub(crate) fn solve_twist(jtj: &Matrix6<f64>, jtr: &Vector6<f64>) -> Option<Pose> {
    let delta = -(jtj.try_inverse()? * jtr);
    if !delta.iter().all(|v| v.is_finite()) {
        return None;
    }
    Some(Pose::from_twist(&delta))
}

/// Runs the correspondence/update loop at a single scale.
pub(crate) fn icp_loop(
    source: &PointCloud,
    target: &PointCloud,
    max_correspondence_distance: f32,
    init: &Pose,
    estimator: &Estimator<'_>,
    kernel: &RobustLoss,
    criteria: &ConvergenceCriteria,
) -> ICPResult {
    let index = PointIndex::new(&target.points);
    let require_normal = estimator.method().requires_target_normal();

    let mut transformation = *init;
    let mut moved = source.transformed(&transformation);
    let mut correspondences =
        find_correspondences(&moved, target, &index, max_correspondence_distance, require_normal);
    let (mut fitness, mut inlier_rmse) = score(&correspondences, source.len());
    let mut num_iterations = 0;
    let mut converged = false;

    for iteration in 0..criteria.max_iterations {
        let Some(update) = estimator.estimate(&moved, target, &correspondences, kernel) else {
            break;
        };
        transformation = update.compose(&transformation);
        moved = source.transformed(&transformation);
        correspondences = find_correspondences(
            &moved,
            target,
            &index,
            max_correspondence_distance,
            require_normal,
        );
        num_iterations = iteration + 1;

        let (new_fitness, new_rmse) = score(&correspondences, source.len());
        let settled = (new_fitness - fitness).abs() < criteria.relative_fitness
            && (new_rmse - inlier_rmse).abs() < criteria.relative_rmse;
        fitness = new_fitness;
        inlier_rmse = new_rmse;
        if settled {
            converged = true;
            break;
        }
    }

    ICPResult {
        transformation,
        fitness,
        inlier_rmse,
        num_iterations,
        converged,
    }
}

/// Single-scale ICP registration
///
/// Registers `source` onto `target` without down-sampling.
///
/// # Arguments
///
/// * `source` - Source point cloud
/// * `target` - Target point cloud; needs normals for every method but point-to-point
/// * `max_correspondence_distance` - Maximum distance for valid correspondences
/// * `init` - Initial guess for the transformation (often identity)
/// * `method` - Error metric to minimize
/// * `criteria` - Stopping rule
///
/// # Returns
///
/// * `Ok(ICPResult)` - Always, for well-formed input; inspect `fitness` for quality
/// * `Err(Error::InvalidInput)` - The clouds lack normals or colors the method needs
///
/// # Example
///
/// ```no_run
/// # use scan_registration::{registration_icp, ConvergenceCriteria, RegistrationMethod};
/// # use scan_core::{PointCloud, Pose};
/// # let source = PointCloud::new(vec![]);
/// # let target = PointCloud::new(vec![]);
/// let result = registration_icp(
///     &source,
///     &target,
///     0.05,
///     &Pose::identity(),
///     RegistrationMethod::PointToPoint,
///     &ConvergenceCriteria::default(),
/// )
/// .unwrap();
/// println!("fitness {:.3}", result.fitness);
/// ```
pub fn registration_icp(
    source: &PointCloud,
    target: &PointCloud,
    max_correspondence_distance: f32,
    init: &Pose,
    method: RegistrationMethod,
    criteria: &ConvergenceCriteria,
) -> Result<ICPResult> {
    check_attributes(source, target, method)?;

    let gradients = match method {
        RegistrationMethod::Color => compute_color_gradients(
            target,
            SearchParam::Hybrid {
                radius: 2.0 * max_correspondence_distance,
                max_nn: 30,
            },
        ),
        _ => Vec::new(),
    };
    let estimator = match method {
        RegistrationMethod::PointToPoint => Estimator::PointToPoint,
        RegistrationMethod::PointToPlane => Estimator::PointToPlane,
        RegistrationMethod::Color => Estimator::Colored {
            gradients: &gradients,
            lambda_geometric: RegistrationConfig::default().lambda_geometric,
        },
        RegistrationMethod::Generalized => Estimator::Generalized,
    };
    let kernel = match method {
        RegistrationMethod::Generalized => RobustLoss::Tukey {
            k: max_correspondence_distance as f64,
        },
        _ => RobustLoss::L2,
    };

    Ok(icp_loop(
        source,
        target,
        max_correspondence_distance,
        init,
        &estimator,
        &kernel,
        criteria,
    ))
}

pub(crate) fn check_attributes(
    source: &PointCloud,
    target: &PointCloud,
    method: RegistrationMethod,
) -> Result<()> {
    if method.requires_normals() && !target.has_normals() {
        return Err(Error::InvalidInput(format!(
            "{method} registration requires target normals"
        )));
    }
    if method == RegistrationMethod::Generalized && !source.has_normals() {
        return Err(Error::InvalidInput(format!(
            "{method} registration requires source normals"
        )));
    }
    if method.requires_colors() && !(source.has_colors() && target.has_colors()) {
        return Err(Error::InvalidInput(format!(
            "{method} registration requires colors on both clouds"
        )));
    }
    Ok(())
}

/// Fitness and inlier RMSE of `source` mapped through `transformation`.
pub fn evaluate_registration(
    source: &PointCloud,
    target: &PointCloud,
    max_correspondence_distance: f32,
    transformation: &Pose,
) -> (f64, f64) {
    let index = PointIndex::new(&target.points);
    let moved = source.transformed(transformation);
    let correspondences =
        find_correspondences(&moved, target, &index, max_correspondence_distance, false);
    score(&correspondences, source.len())
}
