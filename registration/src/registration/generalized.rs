//! Generalized ICP (Segal, Haehnel and Thrun 2009).
//!
//! Both clouds are modelled as locally planar: each point gets a covariance
//! that is flat along its normal. The residual `d = p - q` is weighted by
//! `(C_p + C_q)⁻¹`, which behaves like point-to-plane on both surfaces at once
//! and stays well-posed where either normal is noisy.

use super::{accumulate_normal_equations, solve_twist, Correspondence};
use nalgebra::{Matrix3, Matrix3x6, Vector3};
use scan_core::{skew_symmetric, PointCloud, Pose, RobustLoss};
use scan_point_cloud::covariance_from_normal;

/// Variance along the normal relative to the tangent plane.
pub const GICP_EPSILON: f64 = 1e-3;

pub(crate) fn estimate(
    source: &PointCloud,
    target: &PointCloud,
    correspondences: &[Correspondence],
    kernel: &RobustLoss,
) -> Option<Pose> {
    let source_normals = source.normals.as_ref()?;
    let target_normals = target.normals.as_ref()?;

    let (jtj, jtr) = accumulate_normal_equations(correspondences, |c| {
        let p = source.points[c.source].coords.cast::<f64>();
        let q = target.points[c.target].coords.cast::<f64>();
        let combined = covariance_from_normal(&source_normals[c.source], GICP_EPSILON)
            + covariance_from_normal(&target_normals[c.target], GICP_EPSILON);
        let information = combined.try_inverse().unwrap_or_else(Matrix3::identity);

        let d: Vector3<f64> = p - q;
        // d(p + ω × p + v) / d[ω; v] = [-[p]×, I]
        let mut jacobian = Matrix3x6::<f64>::zeros();
        jacobian
            .fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&(-skew_symmetric(&p)));
        jacobian
            .fixed_view_mut::<3, 3>(0, 3)
            .copy_from(&Matrix3::identity());

        let w = kernel.weight(d.norm());
        let jt_info = jacobian.transpose() * information;
        (jt_info * jacobian * w, jt_info * d * w)
    });

    solve_twist(&jtj, &jtr)
}
