//! Voxel-grid down-sampling and basic cleanup.

use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use scan_core::PointCloud;

type VoxelKey = (i32, i32, i32);

#[derive(Default)]
struct VoxelAccumulator {
    point: Vector3<f64>,
    color: Vector3<f64>,
    normal: Vector3<f64>,
    count: usize,
}

impl VoxelAccumulator {
    fn finish(&self, out: &mut PointCloud) {
        let factor = 1.0 / self.count as f64;
        out.points
            .push(Point3::from((self.point * factor).cast::<f32>()));
        if let Some(colors) = out.colors.as_mut() {
            colors.push(Point3::from((self.color * factor).cast::<f32>()));
        }
        if let Some(normals) = out.normals.as_mut() {
            let mut n = (self.normal * factor).cast::<f32>();
            if n.norm_squared() > 1e-12 {
                n.normalize_mut();
            }
            normals.push(n);
        }
    }
}

/// Down-sample a point cloud with a voxel grid.
///
/// Every occupied voxel yields one point at the centroid of its members;
/// colors are averaged and normals averaged then renormalised. Output order
/// follows the voxel keys, so the result is deterministic. A non-positive
/// voxel size returns the cloud unchanged; callers validate it first.
pub fn voxel_down_sample(pc: &PointCloud, voxel_size: f32) -> PointCloud {
    if voxel_size <= 0.0 || pc.is_empty() {
        return pc.clone();
    }

    let inv = 1.0 / voxel_size as f64;
    let key = |p: &Point3<f32>| -> VoxelKey {
        (
            (p.x as f64 * inv).floor() as i32,
            (p.y as f64 * inv).floor() as i32,
            (p.z as f64 * inv).floor() as i32,
        )
    };

    let mut indices: Vec<(VoxelKey, usize)> = pc
        .points
        .iter()
        .enumerate()
        .map(|(i, p)| (key(p), i))
        .collect();

    // Parallel sort if large enough, otherwise sequential
    if indices.len() > 10000 {
        indices.par_sort_unstable();
    } else {
        indices.sort_unstable();
    }

    let mut out = PointCloud {
        points: Vec::new(),
        colors: pc.colors.as_ref().map(|_| Vec::new()),
        normals: pc.normals.as_ref().map(|_| Vec::new()),
    };

    let mut current = indices[0].0;
    let mut acc = VoxelAccumulator::default();
    for &(voxel, idx) in &indices {
        if voxel != current {
            acc.finish(&mut out);
            acc = VoxelAccumulator::default();
            current = voxel;
        }
        acc.point += pc.points[idx].coords.cast::<f64>();
        if let Some(colors) = &pc.colors {
            acc.color += colors[idx].coords.cast::<f64>();
        }
        if let Some(normals) = &pc.normals {
            acc.normal += normals[idx].cast::<f64>();
        }
        acc.count += 1;
    }
    acc.finish(&mut out);

    out
}

/// Drops points whose coordinates contain NaN or infinity.
pub fn remove_non_finite_points(pc: &PointCloud) -> PointCloud {
    let keep: Vec<usize> = pc
        .points
        .iter()
        .enumerate()
        .filter(|(_, p)| p.coords.iter().all(|v| v.is_finite()))
        .map(|(i, _)| i)
        .collect();
    if keep.len() == pc.len() {
        return pc.clone();
    }
    pc.select(&keep)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_points_in_one_voxel_collapse_to_centroid() {
        let pc = PointCloud::new(vec![
            Point3::new(0.01, 0.01, 0.01),
            Point3::new(0.03, 0.03, 0.03),
            Point3::new(0.51, 0.01, 0.01),
        ])
        .with_colors(vec![
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(0.0, 1.0, 0.0),
        ])
        .unwrap();

        let down = voxel_down_sample(&pc, 0.1);
        assert_eq!(down.len(), 2);
        assert!((down.points[0] - Point3::new(0.02, 0.02, 0.02)).norm() < 1e-6);
        let c = down.colors.as_ref().unwrap()[0];
        assert!((c - Point3::new(0.5, 0.0, 0.5)).norm() < 1e-6);
    }

    #[test]
    fn test_non_positive_voxel_is_identity() {
        let pc = PointCloud::new(vec![Point3::new(0.0, 0.0, 0.0), Point3::new(0.0, 0.0, 1e-4)]);
        assert_eq!(voxel_down_sample(&pc, 0.0).len(), 2);
        assert!(voxel_down_sample(&PointCloud::default(), 0.1).is_empty());
    }

    #[test]
    fn test_normals_are_renormalized() {
        let pc = PointCloud::new(vec![Point3::new(0.0, 0.0, 0.0), Point3::new(0.01, 0.0, 0.0)])
            .with_normals(vec![Vector3::new(1.0, 0.0, 0.0), Vector3::new(0.0, 1.0, 0.0)])
            .unwrap();
        let down = voxel_down_sample(&pc, 1.0);
        let n = down.normals.as_ref().unwrap()[0];
        assert!((n.norm() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_remove_non_finite() {
        let pc = PointCloud::new(vec![Point3::new(0.0, 0.0, 0.0), Point3::new(f32::NAN, 0.0, 0.0)]);
        assert_eq!(remove_non_finite_points(&pc).len(), 1);
    }
}
