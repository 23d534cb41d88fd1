use super::{accumulate_normal_equations, row_term, solve_twist, Correspondence};
use nalgebra::Vector6;
use scan_core::{PointCloud, Pose, RobustLoss};

/// Gauss-Newton step on the point-to-plane residual `(p - q) · n_q`.
///
/// The Jacobian with respect to the twist `[ω; v]` is `[p × n; n]`.
pub(crate) fn estimate(
    source: &PointCloud,
    target: &PointCloud,
    correspondences: &[Correspondence],
    kernel: &RobustLoss,
) -> Option<Pose> {
    let normals = target.normals.as_ref()?;

    let (jtj, jtr) = accumulate_normal_equations(correspondences, |c| {
        let p = source.points[c.source].coords.cast::<f64>();
        let q = target.points[c.target].coords.cast::<f64>();
        let n = normals[c.target].cast::<f64>();

        let residual = (p - q).dot(&n);
        let cross = p.cross(&n);
        let jacobian = Vector6::new(cross.x, cross.y, cross.z, n.x, n.y, n.z);
        row_term(&jacobian, residual, kernel.weight(residual))
    });

    solve_twist(&jtj, &jtr)
}
