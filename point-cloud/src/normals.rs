//! Normal estimation by local PCA.

use crate::{PointIndex, SearchParam};
use nalgebra::{Matrix3, Point3, SymmetricEigen, Vector3};
use rayon::prelude::*;
use scan_core::PointCloud;

/// Estimate normals from the covariance of each point's neighborhood.
///
/// A point with fewer than three neighbors, or whose neighborhood has no
/// spread, gets an all-zero normal; registration treats those as unusable.
/// If the cloud already carried normals, the new ones are flipped to agree
/// with them.
pub fn estimate_normals(pc: &mut PointCloud, param: SearchParam) {
    if pc.is_empty() {
        pc.normals = Some(Vec::new());
        return;
    }

    let index = PointIndex::new(&pc.points);
    let points = &pc.points;
    let previous = pc.normals.as_ref();

    let normals: Vec<Vector3<f32>> = points
        .par_iter()
        .enumerate()
        .map(|(i, p)| {
            let neighbors = index.search(p, &param);
            let Some(normal) = pca_normal(points, &neighbors) else {
                return Vector3::zeros();
            };
            match previous.map(|prev| prev[i]) {
                Some(prev) if prev.dot(&normal) < 0.0 => -normal,
                _ => normal,
            }
        })
        .collect();

    let degenerate = normals.iter().filter(|n| n.norm_squared() == 0.0).count();
    if degenerate > 0 {
        tracing::debug!(degenerate, total = normals.len(), "degenerate normal neighborhoods");
    }
    pc.normals = Some(normals);
}

fn pca_normal(points: &[Point3<f32>], neighbors: &[(usize, f32)]) -> Option<Vector3<f32>> {
    if neighbors.len() < 3 {
        return None;
    }

    let mut centroid = Vector3::<f64>::zeros();
    for &(j, _) in neighbors {
        centroid += points[j].coords.cast::<f64>();
    }
    centroid /= neighbors.len() as f64;

    let mut cov = Matrix3::<f64>::zeros();
    for &(j, _) in neighbors {
        let d = points[j].coords.cast::<f64>() - centroid;
        cov += d * d.transpose();
    }
    cov /= neighbors.len() as f64;
    if cov.trace() <= f64::EPSILON {
        return None;
    }

    let eigen = SymmetricEigen::new(cov);
    let min_idx = eigen.eigenvalues.imin();
    let n = eigen.eigenvectors.column(min_idx).into_owned();
    let norm = n.norm();
    if !norm.is_finite() || norm < 1e-12 {
        return None;
    }
    Some((n / norm).cast::<f32>())
}

/// Flip every normal so it points towards `location` (e.g. the camera center).
pub fn orient_normals_towards(pc: &mut PointCloud, location: &Point3<f32>) {
    let Some(normals) = pc.normals.as_mut() else {
        return;
    };
    for (n, p) in normals.iter_mut().zip(pc.points.iter()) {
        if n.dot(&(location - p)) < 0.0 {
            *n = -*n;
        }
    }
}

/// Plane-like covariance for a surface element with unit normal `n`:
/// variance 1 in the tangent plane and `epsilon` along the normal.
///
/// A zero normal yields the identity, which degrades to point-to-point.
pub fn covariance_from_normal(n: &Vector3<f32>, epsilon: f64) -> Matrix3<f64> {
    let n = n.cast::<f64>();
    if n.norm_squared() < 1e-12 {
        return Matrix3::identity();
    }
    let n = n.normalize();
    Matrix3::identity() - (1.0 - epsilon) * n * n.transpose()
}
