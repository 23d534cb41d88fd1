use super::find_correspondences;
use nalgebra::{Matrix6, Vector6};
use rayon::prelude::*;
use scan_core::{PointCloud, Pose};
use scan_point_cloud::PointIndex;

/// Information matrix of an alignment
///
/// Sums `JᵀJ` over every correspondence of the aligned source within
/// `max_correspondence_distance`, where `J` is the 3×6 Jacobian of the target
/// point `(x, y, z)` with respect to a twist `[ω; v]`:
///
/// ```text
/// | 0   z  -y  1  0  0 |
/// | -z  0   x  0  1  0 |
/// | y  -x   0  0  0  1 |
/// ```
///
/// The result is symmetric positive semidefinite and grows with the number of
/// matched points, so it is only comparable between calls that used the same
/// voxel size.
pub fn get_information_matrix_from_point_clouds(
    source: &PointCloud,
    target: &PointCloud,
    max_correspondence_distance: f32,
    transformation: &Pose,
) -> Matrix6<f64> {
    if source.is_empty() || target.is_empty() {
        return Matrix6::zeros();
    }
    let index = PointIndex::new(&target.points);
    let moved = source.transformed(transformation);
    let correspondences =
        find_correspondences(&moved, target, &index, max_correspondence_distance, false);

    correspondences
        .par_iter()
        .map(|c| {
            let q = target.points[c.target].coords.cast::<f64>();
            let (x, y, z) = (q.x, q.y, q.z);
            let rows = [
                Vector6::new(0.0, z, -y, 1.0, 0.0, 0.0),
                Vector6::new(-z, 0.0, x, 0.0, 1.0, 0.0),
                Vector6::new(y, -x, 0.0, 0.0, 0.0, 1.0),
            ];
            rows.iter()
                .fold(Matrix6::zeros(), |acc, g| acc + g * g.transpose())
        })
        .reduce(Matrix6::zeros, |a, b| a + b)
}
