use crate::geometry::Pose;
use nalgebra::{Point3, Scalar, Vector3};

/// Unordered set of 3D points with optional per-point colors and normals.
///
/// Colors are RGB in `[0, 1]`.
#[derive(Debug, Clone, Default)]
pub struct PointCloud<T: Scalar = f32> {
    pub points: Vec<Point3<T>>,
    pub colors: Option<Vec<Point3<T>>>,
    pub normals: Option<Vec<Vector3<T>>>,
}

impl<T: Scalar> PointCloud<T> {
    pub fn new(points: Vec<Point3<T>>) -> Self {
        Self {
            points,
            colors: None,
            normals: None,
        }
    }

    pub fn with_colors(mut self, colors: Vec<Point3<T>>) -> crate::Result<Self> {
        if colors.len() == self.points.len() {
            self.colors = Some(colors);
            Ok(self)
        } else {
            Err(crate::Error::InvalidInput(format!(
                "Color count {} does not match point count {}",
                colors.len(),
                self.points.len()
            )))
        }
    }

    pub fn with_normals(mut self, normals: Vec<Vector3<T>>) -> crate::Result<Self> {
        if normals.len() == self.points.len() {
            self.normals = Some(normals);
            Ok(self)
        } else {
            Err(crate::Error::InvalidInput(format!(
                "Normal count {} does not match point count {}",
                normals.len(),
                self.points.len()
            )))
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn has_colors(&self) -> bool {
        self.colors.is_some()
    }

    pub fn has_normals(&self) -> bool {
        self.normals.is_some()
    }

    /// Keeps the points at `indices`, carrying their attributes along.
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            points: indices.iter().map(|&i| self.points[i].clone()).collect(),
            colors: self
                .colors
                .as_ref()
                .map(|c| indices.iter().map(|&i| c[i].clone()).collect()),
            normals: self
                .normals
                .as_ref()
                .map(|n| indices.iter().map(|&i| n[i].clone()).collect()),
        }
    }

    /// Appends `other`. An attribute survives only if both clouds carry it.
    pub fn append(&mut self, other: &PointCloud<T>) {
        let keep_colors = (self.colors.is_some() || self.points.is_empty()) && other.colors.is_some();
        let keep_normals =
            (self.normals.is_some() || self.points.is_empty()) && other.normals.is_some();

        self.colors = match (keep_colors, self.colors.take(), other.colors.as_ref()) {
            (true, mine, Some(theirs)) => {
                let mut c = mine.unwrap_or_default();
                c.extend(theirs.iter().cloned());
                Some(c)
            }
            _ => None,
        };
        self.normals = match (keep_normals, self.normals.take(), other.normals.as_ref()) {
            (true, mine, Some(theirs)) => {
                let mut n = mine.unwrap_or_default();
                n.extend(theirs.iter().cloned());
                Some(n)
            }
            _ => None,
        };
        self.points.extend(other.points.iter().cloned());
    }
}

impl PointCloud<f32> {
    /// Returns a copy with points and normals mapped through `pose`.
    pub fn transformed(&self, pose: &Pose) -> Self {
        Self {
            points: self
                .points
                .iter()
                .map(|p| pose.transform_point_f32(p))
                .collect(),
            colors: self.colors.clone(),
            normals: self
                .normals
                .as_ref()
                .map(|n| n.iter().map(|v| pose.transform_vector_f32(v)).collect()),
        }
    }

    /// Axis-aligned bounds, `None` for an empty cloud.
    pub fn bounds(&self) -> Option<(Point3<f32>, Point3<f32>)> {
        let first = *self.points.first()?;
        Some(self.points.iter().fold((first, first), |(lo, hi), p| {
            (lo.inf(p), hi.sup(p))
        }))
    }

    pub fn centroid(&self) -> Option<Point3<f32>> {
        if self.points.is_empty() {
            return None;
        }
        let sum = self
            .points
            .iter()
            .fold(Vector3::zeros(), |acc, p| acc + p.coords);
        Some(Point3::from(sum / self.points.len() as f32))
    }
}

pub type PointCloudf32 = PointCloud<f32>;
pub type PointCloudf64 = PointCloud<f64>;
