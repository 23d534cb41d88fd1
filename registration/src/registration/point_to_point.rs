use super::Correspondence;
use nalgebra::{Matrix3, UnitQuaternion, Vector3};
use scan_core::{PointCloud, Pose, RobustLoss};

/// Closed-form rigid update minimizing weighted point-to-point distances
/// (Kabsch/Umeyama without scale).
pub(crate) fn estimate(
    source: &PointCloud,
    target: &PointCloud,
    correspondences: &[Correspondence],
    kernel: &RobustLoss,
) -> Option<Pose> {
    if correspondences.len() < 3 {
        return None;
    }

    // Compute weighted centroids
    let mut source_centroid = Vector3::<f64>::zeros();
    let mut target_centroid = Vector3::<f64>::zeros();
    let mut total_weight = 0.0;
    let weights: Vec<f64> = correspondences
        .iter()
        .map(|c| kernel.weight(c.distance))
        .collect();

    for (c, &w) in correspondences.iter().zip(&weights) {
        source_centroid += source.points[c.source].coords.cast::<f64>() * w;
        target_centroid += target.points[c.target].coords.cast::<f64>() * w;
        total_weight += w;
    }
    if total_weight < 1e-12 {
        return None;
    }
    source_centroid /= total_weight;
    target_centroid /= total_weight;

    let mut covariance = Matrix3::<f64>::zeros();
    for (c, &w) in correspondences.iter().zip(&weights) {
        let s = source.points[c.source].coords.cast::<f64>() - source_centroid;
        let t = target.points[c.target].coords.cast::<f64>() - target_centroid;
        covariance += t * s.transpose() * w;
    }

    let svd = covariance.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let mut rotation = u * v_t;

    // Ensure proper rotation (det = 1)
    if rotation.determinant() < 0.0 {
        let mut u_corrected = u;
        u_corrected.set_column(2, &(-u.column(2)));
        rotation = u_corrected * v_t;
    }

    let translation = target_centroid - rotation * source_centroid;
    if !translation.iter().all(|v| v.is_finite()) {
        return None;
    }
    Some(Pose::new(UnitQuaternion::from_matrix(&rotation), translation))
}
