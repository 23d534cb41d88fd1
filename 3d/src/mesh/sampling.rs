//! Point sampling on triangle meshes.

use super::TriangleMesh;
use nalgebra::{Point3, Vector3};
use rand::Rng;
use scan_core::PointCloud;
use scan_point_cloud::poisson_disk_eliminate;

/// Number of uniform candidates drawn per requested Poisson-disk sample.
pub const POISSON_CANDIDATE_FACTOR: usize = 5;

/// Area-uniform samples
///
/// Triangles are picked with probability proportional to their area and
/// points are drawn uniformly inside them. Normals are interpolated from
/// vertex normals when present (face normals otherwise); colors are
/// interpolated when present.
pub fn sample_points_uniformly<R: Rng + ?Sized>(
    mesh: &TriangleMesh,
    count: usize,
    rng: &mut R,
) -> PointCloud {
    let mut cumulative = Vec::with_capacity(mesh.faces.len());
    let mut total = 0.0f64;
    for i in 0..mesh.faces.len() {
        total += mesh.triangle_area(i);
        cumulative.push(total);
    }
    if count == 0 || total <= 0.0 {
        return PointCloud::new(Vec::new());
    }

    let face_normals = if mesh.normals.is_none() {
        Some(mesh.compute_face_normals())
    } else {
        None
    };

    let mut points = Vec::with_capacity(count);
    let mut normals = Vec::with_capacity(count);
    let mut colors = mesh.colors.as_ref().map(|_| Vec::with_capacity(count));
    for _ in 0..count {
        let r = rng.gen::<f64>() * total;
        let t = cumulative
            .partition_point(|&c| c <= r)
            .min(mesh.faces.len() - 1);
        let face = mesh.faces[t];

        let (r1, r2) = (rng.gen::<f32>().sqrt(), rng.gen::<f32>());
        let w = [1.0 - r1, r1 * (1.0 - r2), r1 * r2];
        let blend_point = |values: &[Point3<f32>]| {
            Point3::from(
                values[face[0]].coords * w[0]
                    + values[face[1]].coords * w[1]
                    + values[face[2]].coords * w[2],
            )
        };

        points.push(blend_point(&mesh.vertices));
        let normal: Vector3<f32> = match (&mesh.normals, &face_normals) {
            (Some(vn), _) => vn[face[0]] * w[0] + vn[face[1]] * w[1] + vn[face[2]] * w[2],
            (None, Some(fnormals)) => fnormals[t],
            (None, None) => Vector3::zeros(),
        };
        normals.push(normal.try_normalize(f32::EPSILON).unwrap_or(normal));
        if let (Some(out), Some(vc)) = (colors.as_mut(), mesh.colors.as_ref()) {
            out.push(blend_point(vc));
        }
    }

    PointCloud {
        points,
        colors,
        normals: Some(normals),
    }
}

/// Blue-noise samples: `POISSON_CANDIDATE_FACTOR × count` uniform candidates
/// thinned by weighted sample elimination.
pub fn sample_points_poisson_disk<R: Rng + ?Sized>(
    mesh: &TriangleMesh,
    count: usize,
    rng: &mut R,
) -> PointCloud {
    let candidates = sample_points_uniformly(mesh, count * POISSON_CANDIDATE_FACTOR, rng);
    poisson_disk_eliminate(&candidates, count, mesh.surface_area())
}

/// Union of an area-uniform set and a separately drawn Poisson-disk set.
///
/// The uniform set keeps density proportional to area; the Poisson-disk set
/// fills gaps the random draw leaves behind.
pub fn sample_points_uniform_and_poisson<R: Rng + ?Sized>(
    mesh: &TriangleMesh,
    uniform: usize,
    poisson: usize,
    rng: &mut R,
) -> PointCloud {
    let mut cloud = sample_points_uniformly(mesh, uniform, rng);
    let blue = sample_points_poisson_disk(mesh, poisson, rng);
    cloud.append(&blue);
    cloud
}
