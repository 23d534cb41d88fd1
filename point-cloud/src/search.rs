use crate::SearchParam;
use nalgebra::Point3;
use rstar::{PointDistance, RTree, RTreeObject, AABB};

// Wrapper for RTree
struct PointWrapper(usize, Point3<f32>);

impl RTreeObject for PointWrapper {
    type Envelope = AABB<[f32; 3]>;
    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.1.x, self.1.y, self.1.z])
    }
}

impl PointDistance for PointWrapper {
    fn distance_2(&self, point: &[f32; 3]) -> f32 {
        let dx = self.1.x - point[0];
        let dy = self.1.y - point[1];
        let dz = self.1.z - point[2];
        dx * dx + dy * dy + dz * dz
    }
}

/// Static spatial index over a point slice.
///
/// Every query returns `(index, squared_distance)` pairs sorted by distance.
pub struct PointIndex {
    tree: RTree<PointWrapper>,
}

impl PointIndex {
    pub fn new(points: &[Point3<f32>]) -> Self {
        let wrappers: Vec<PointWrapper> = points
            .iter()
            .enumerate()
            .map(|(i, p)| PointWrapper(i, *p))
            .collect();
        Self {
            tree: RTree::bulk_load(wrappers),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    pub fn nearest(&self, query: &Point3<f32>) -> Option<(usize, f32)> {
        let q = [query.x, query.y, query.z];
        self.tree
            .nearest_neighbor(&q)
            .map(|w| (w.0, w.distance_2(&q)))
    }

    pub fn knn(&self, query: &Point3<f32>, k: usize) -> Vec<(usize, f32)> {
        let q = [query.x, query.y, query.z];
        self.tree
            .nearest_neighbor_iter(&q)
            .take(k)
            .map(|w| (w.0, w.distance_2(&q)))
            .collect()
    }

    pub fn radius(&self, query: &Point3<f32>, radius: f32) -> Vec<(usize, f32)> {
        let q = [query.x, query.y, query.z];
        // locate_within_distance uses squared distance
        let mut found: Vec<(usize, f32)> = self
            .tree
            .locate_within_distance(q, radius * radius)
            .map(|w| (w.0, w.distance_2(&q)))
            .collect();
        found.sort_unstable_by(|a, b| a.1.total_cmp(&b.1));
        found
    }

    pub fn hybrid(&self, query: &Point3<f32>, radius: f32, max_nn: usize) -> Vec<(usize, f32)> {
        let q = [query.x, query.y, query.z];
        let r2 = radius * radius;
        self.tree
            .nearest_neighbor_iter(&q)
            .take(max_nn)
            .map(|w| (w.0, w.distance_2(&q)))
            .take_while(|(_, d2)| *d2 <= r2)
            .collect()
    }

    pub fn search(&self, query: &Point3<f32>, param: &SearchParam) -> Vec<(usize, f32)> {
        match *param {
            SearchParam::Knn { k } => self.knn(query, k),
            SearchParam::Radius { radius } => self.radius(query, radius),
            SearchParam::Hybrid { radius, max_nn } => self.hybrid(query, radius, max_nn),
        }
    }
}
