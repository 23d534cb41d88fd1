//! Colored ICP (Park, Zhou and Koltun 2017).
//!
//! Joint geometric and photometric objective. Each target point carries a
//! color gradient in its tangent plane, so the intensity of a source point can
//! be predicted from where it lands on the target surface.

use super::{accumulate_normal_equations, row_term, solve_twist, Correspondence};
use nalgebra::{Matrix3, Matrix6, Point3, Vector3, Vector6};
use rayon::prelude::*;
use scan_core::{PointCloud, Pose, RobustLoss};
use scan_point_cloud::{PointIndex, SearchParam};

fn intensity(color: &Point3<f32>) -> f64 {
    (0.299 * color.x + 0.587 * color.y + 0.114 * color.z) as f64
}

/// Per-point intensity gradient of `target`, constrained to the tangent plane.
///
/// Points with fewer than four neighbors, without a usable normal, or whose
/// system is singular get a zero gradient. Requires normals and colors.
pub fn compute_color_gradients(target: &PointCloud, param: SearchParam) -> Vec<Vector3<f64>> {
    let (Some(normals), Some(colors)) = (target.normals.as_ref(), target.colors.as_ref()) else {
        return vec![Vector3::zeros(); target.len()];
    };
    let index = PointIndex::new(&target.points);

    target
        .points
        .par_iter()
        .enumerate()
        .map(|(i, p)| {
            let n = normals[i].cast::<f64>();
            if n.norm_squared() < 1e-12 {
                return Vector3::zeros();
            }
            let neighbors: Vec<usize> = index
                .search(p, &param)
                .into_iter()
                .map(|(j, _)| j)
                .filter(|&j| j != i)
                .collect();
            if neighbors.len() < 3 {
                return Vector3::zeros();
            }

            let vt = p.coords.cast::<f64>();
            let it = intensity(&colors[i]);
            let mut ata = Matrix3::<f64>::zeros();
            let mut atb = Vector3::<f64>::zeros();
            for &j in &neighbors {
                let vj = target.points[j].coords.cast::<f64>();
                let projected = vj - (vj - vt).dot(&n) * n;
                let a = projected - vt;
                let b = intensity(&colors[j]) - it;
                ata += a * a.transpose();
                atb += a * b;
            }
            // Keeps the gradient orthogonal to the normal.
            let a = n * neighbors.len() as f64;
            ata += a * a.transpose();

            match ata.try_inverse() {
                Some(inv) => {
                    let g = inv * atb;
                    if g.iter().all(|v| v.is_finite()) {
                        g
                    } else {
                        Vector3::zeros()
                    }
                }
                None => Vector3::zeros(),
            }
        })
        .collect()
}

/// Gauss-Newton step on the combined residual
///
/// ```text
/// r_G = sqrt(λ)     · (p - q) · n
/// r_C = sqrt(1 - λ) · (I(p) - (I(q) + dᵀ (p' - q)))
/// ```
///
/// where `p'` is `p` projected onto the tangent plane at `q` and `d` is the
/// target color gradient.
pub(crate) fn estimate(
    source: &PointCloud,
    target: &PointCloud,
    correspondences: &[Correspondence],
    gradients: &[Vector3<f64>],
    lambda_geometric: f64,
    kernel: &RobustLoss,
) -> Option<Pose> {
    let normals = target.normals.as_ref()?;
    let source_colors = source.colors.as_ref()?;
    let target_colors = target.colors.as_ref()?;
    let sqrt_geo = lambda_geometric.sqrt();
    let sqrt_photo = (1.0 - lambda_geometric).sqrt();

    let (jtj, jtr) = accumulate_normal_equations(correspondences, |c| {
        let vs = source.points[c.source].coords.cast::<f64>();
        let vt = target.points[c.target].coords.cast::<f64>();
        let n = normals[c.target].cast::<f64>();
        let d = gradients[c.target];

        let r_geo = (vs - vt).dot(&n);
        let cross = vs.cross(&n);
        let j_geo = Vector6::new(cross.x, cross.y, cross.z, n.x, n.y, n.z) * sqrt_geo;

        let projected = vs - (vs - vt).dot(&n) * n;
        let predicted = intensity(&target_colors[c.target]) + d.dot(&(projected - vt));
        let r_photo = intensity(&source_colors[c.source]) - predicted;
        let d_tangent = -(d - n * d.dot(&n));
        let cross = vs.cross(&d_tangent);
        let j_photo = Vector6::new(
            cross.x,
            cross.y,
            cross.z,
            d_tangent.x,
            d_tangent.y,
            d_tangent.z,
        ) * sqrt_photo;

        let (a_geo, b_geo) = row_term(&j_geo, r_geo * sqrt_geo, kernel.weight(r_geo));
        let (a_photo, b_photo) = row_term(&j_photo, r_photo * sqrt_photo, kernel.weight(r_photo));
        (a_geo + a_photo, b_geo + b_photo)
    });

    if jtj == Matrix6::zeros() {
        return None;
    }
    solve_twist(&jtj, &jtr)
}
