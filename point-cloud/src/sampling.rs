//! Blue-noise thinning by weighted sample elimination (Yuksel 2015).

use crate::PointIndex;
use rayon::prelude::*;
use scan_core::PointCloud;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

const ALPHA: f64 = 8.0;
const BETA: f64 = 0.65;
const GAMMA: f64 = 1.5;

#[derive(Debug, Clone, Copy)]
struct HeapEntry {
    weight: f64,
    index: usize,
    stamp: u32,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.weight
            .total_cmp(&other.weight)
            .then_with(|| other.index.cmp(&self.index))
    }
}

/// Thin `candidates` down to `target` points with an even spacing.
///
/// `surface_area` is the area of the surface the candidates were drawn from;
/// it sets the expected disk radius. Candidates are repeatedly removed in
/// order of how crowded their neighborhood is. If there are no more
/// candidates than `target`, the input is returned unchanged.
pub fn poisson_disk_eliminate(candidates: &PointCloud, target: usize, surface_area: f64) -> PointCloud {
    let n = candidates.len();
    if target >= n {
        return candidates.clone();
    }
    if target == 0 || surface_area <= 0.0 {
        return candidates.select(&[]);
    }

    let ratio = target as f64 / n as f64;
    let r_max = 2.0 * ((surface_area / target as f64) / (2.0 * 3f64.sqrt())).sqrt();
    let r_min = r_max * BETA * (1.0 - ratio.powf(GAMMA));
    let weight_fn = |d2: f32| -> f64 {
        let d = (d2 as f64).sqrt().max(r_min);
        (1.0 - d / r_max).max(0.0).powf(ALPHA)
    };

    let index = PointIndex::new(&candidates.points);
    let points = &candidates.points;
    let radius = r_max as f32;

    let mut weights: Vec<f64> = points
        .par_iter()
        .enumerate()
        .map(|(i, p)| {
            index
                .radius(p, radius)
                .into_iter()
                .filter(|&(j, _)| j != i)
                .map(|(_, d2)| weight_fn(d2))
                .sum()
        })
        .collect();

    let mut stamps = vec![0u32; n];
    let mut removed = vec![false; n];
    let mut heap: BinaryHeap<HeapEntry> = weights
        .iter()
        .enumerate()
        .map(|(index, &weight)| HeapEntry {
            weight,
            index,
            stamp: 0,
        })
        .collect();

    let mut remaining = n;
    while remaining > target {
        let Some(top) = heap.pop() else {
            break;
        };
        if removed[top.index] || stamps[top.index] != top.stamp {
            continue;
        }
        removed[top.index] = true;
        remaining -= 1;

        for (j, d2) in index.radius(&points[top.index], radius) {
            if j == top.index || removed[j] {
                continue;
            }
            weights[j] -= weight_fn(d2);
            stamps[j] += 1;
            heap.push(HeapEntry {
                weight: weights[j],
                index: j,
                stamp: stamps[j],
            });
        }
    }

    let keep: Vec<usize> = (0..n).filter(|&i| !removed[i]).collect();
    candidates.select(&keep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn min_spacing(pc: &PointCloud) -> f32 {
        let index = PointIndex::new(&pc.points);
        pc.points
            .iter()
            .map(|p| index.knn(p, 2)[1].1.sqrt())
            .fold(f32::MAX, f32::min)
    }

    #[test]
    fn test_elimination_hits_target_and_spreads_points() {
        let mut rng = StdRng::seed_from_u64(3);
        let points: Vec<Point3<f32>> = (0..5000)
            .map(|_| Point3::new(rng.gen_range(0.0..1.0), rng.gen_range(0.0..1.0), 0.0))
            .collect();
        let candidates = PointCloud::new(points);
        let thinned = poisson_disk_eliminate(&candidates, 1000, 1.0);

        assert_eq!(thinned.len(), 1000);
        let random_subset = candidates.select(&(0..1000).collect::<Vec<_>>());
        assert!(min_spacing(&thinned) > 2.0 * min_spacing(&random_subset));
    }

    #[test]
    fn test_small_candidate_set_is_returned_unchanged() {
        let candidates = PointCloud::new(vec![Point3::new(0.0, 0.0, 0.0); 10]);
        assert_eq!(poisson_disk_eliminate(&candidates, 20, 1.0).len(), 10);
        assert!(poisson_disk_eliminate(&candidates, 0, 1.0).is_empty());
    }
}
