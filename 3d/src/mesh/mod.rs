//! Triangle Mesh Data Structure and Processing
//!
//! Vertex positions with index triples, optional per-vertex normals and
//! colors. Colors are RGB in `[0, 1]`.

use nalgebra::{Point3, Vector3};
use scan_core::{Error, PointCloud, Pose, Result};
use std::collections::HashMap;

pub mod processing;
pub mod sampling;

/// Triangle mesh with vertices and face indices
#[derive(Debug, Clone, Default)]
pub struct TriangleMesh {
    pub vertices: Vec<Point3<f32>>,
    pub faces: Vec<[usize; 3]>,
    pub normals: Option<Vec<Vector3<f32>>>,
    pub colors: Option<Vec<Point3<f32>>>,
}

impl TriangleMesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vertices_and_faces(vertices: Vec<Point3<f32>>, faces: Vec<[usize; 3]>) -> Self {
        Self {
            vertices,
            faces,
            normals: None,
            colors: None,
        }
    }

    pub fn with_colors(mut self, colors: Vec<Point3<f32>>) -> Result<Self> {
        if colors.len() != self.vertices.len() {
            return Err(Error::InvalidInput(format!(
                "Color count {} does not match vertex count {}",
                colors.len(),
                self.vertices.len()
            )));
        }
        self.colors = Some(colors);
        Ok(self)
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn num_faces(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn has_normals(&self) -> bool {
        self.normals.is_some()
    }

    pub fn has_colors(&self) -> bool {
        self.colors.is_some()
    }

    /// Checks that every face references an existing vertex and that the
    /// attribute arrays match the vertex count.
    pub fn validate(&self) -> Result<()> {
        let n = self.vertices.len();
        if let Some(face) = self.faces.iter().find(|f| f.iter().any(|&i| i >= n)) {
            return Err(Error::InvalidInput(format!(
                "face {face:?} references a vertex beyond {n}"
            )));
        }
        if self.normals.as_ref().is_some_and(|v| v.len() != n) {
            return Err(Error::InvalidInput("normal count does not match vertex count".into()));
        }
        if self.colors.as_ref().is_some_and(|v| v.len() != n) {
            return Err(Error::InvalidInput("color count does not match vertex count".into()));
        }
        Ok(())
    }

    /// Twice-area vector of face `i` (cross product of two edges).
    fn face_cross(&self, face: &[usize; 3]) -> Vector3<f32> {
        let v0 = self.vertices[face[0]];
        let e1 = self.vertices[face[1]] - v0;
        let e2 = self.vertices[face[2]] - v0;
        e1.cross(&e2)
    }

    /// Compute face normals. Degenerate faces get a zero normal.
    pub fn compute_face_normals(&self) -> Vec<Vector3<f32>> {
        self.faces
            .iter()
            .map(|face| {
                self.face_cross(face)
                    .try_normalize(f32::EPSILON)
                    .unwrap_or_else(Vector3::zeros)
            })
            .collect()
    }

    /// Compute vertex normals by averaging adjacent face normals
    pub fn compute_vertex_normals(&mut self) {
        let mut vertex_normals: Vec<Vector3<f32>> = vec![Vector3::zeros(); self.vertices.len()];
        let face_normals = self.compute_face_normals();

        for (face, normal) in self.faces.iter().zip(&face_normals) {
            for &vertex_idx in face.iter() {
                vertex_normals[vertex_idx] += normal;
            }
        }

        for normal in vertex_normals.iter_mut() {
            *normal = normal.try_normalize(f32::EPSILON).unwrap_or_else(Vector3::zeros);
        }

        self.normals = Some(vertex_normals);
    }

    /// Axis-aligned bounds, `None` for a mesh without vertices.
    pub fn bounds(&self) -> Option<(Point3<f32>, Point3<f32>)> {
        let first = *self.vertices.first()?;
        Some(
            self.vertices
                .iter()
                .fold((first, first), |(lo, hi), v| (lo.inf(v), hi.sup(v))),
        )
    }

    /// Length of the bounding-box diagonal, 0 for an empty mesh.
    pub fn extent(&self) -> f32 {
        self.bounds().map(|(lo, hi)| (hi - lo).norm()).unwrap_or(0.0)
    }

    pub fn triangle_area(&self, face: usize) -> f64 {
        self.face_cross(&self.faces[face]).norm() as f64 * 0.5
    }

    /// Calculate surface area
    pub fn surface_area(&self) -> f64 {
        (0..self.faces.len()).map(|i| self.triangle_area(i)).sum()
    }

    /// Maps vertices and normals through `pose` in place.
    pub fn transform(&mut self, pose: &Pose) {
        for v in &mut self.vertices {
            *v = pose.transform_point_f32(v);
        }
        if let Some(normals) = &mut self.normals {
            for n in normals.iter_mut() {
                *n = pose.transform_vector_f32(n);
            }
        }
    }

    pub fn transformed(&self, pose: &Pose) -> Self {
        let mut mesh = self.clone();
        mesh.transform(pose);
        mesh
    }

    /// Uniform scaling about the origin.
    pub fn scale(&mut self, factor: f32) {
        for v in &mut self.vertices {
            v.coords *= factor;
        }
    }

    /// Appends `other`, offsetting its indices. An attribute survives only if
    /// both meshes carry it (or `self` is empty).
    pub fn merge(&mut self, other: &TriangleMesh) {
        let offset = self.vertices.len();
        let fresh = self.vertices.is_empty();
        self.normals = match (self.normals.take(), &other.normals) {
            (Some(mut mine), Some(theirs)) => {
                mine.extend_from_slice(theirs);
                Some(mine)
            }
            (None, Some(theirs)) if fresh => Some(theirs.clone()),
            _ => None,
        };
        self.colors = match (self.colors.take(), &other.colors) {
            (Some(mut mine), Some(theirs)) => {
                mine.extend_from_slice(theirs);
                Some(mine)
            }
            (None, Some(theirs)) if fresh => Some(theirs.clone()),
            _ => None,
        };
        self.vertices.extend_from_slice(&other.vertices);
        self.faces.extend(
            other
                .faces
                .iter()
                .map(|f| [f[0] + offset, f[1] + offset, f[2] + offset]),
        );
    }

    /// Convert to point cloud (vertex positions with normals and colors)
    pub fn to_point_cloud(&self) -> PointCloud {
        PointCloud {
            points: self.vertices.clone(),
            colors: self.colors.clone(),
            normals: self.normals.clone(),
        }
    }

    /// UV sphere centered at the origin with `resolution` rings and
    /// `2 * resolution` segments.
    pub fn create_sphere(radius: f32, resolution: usize) -> Self {
        let rings = resolution.max(2);
        let segments = 2 * rings;
        let mut vertices = vec![Point3::new(0.0, 0.0, radius)];
        for k in 1..rings {
            let theta = std::f32::consts::PI * k as f32 / rings as f32;
            for j in 0..segments {
                let phi = 2.0 * std::f32::consts::PI * j as f32 / segments as f32;
                vertices.push(Point3::new(
                    radius * theta.sin() * phi.cos(),
                    radius * theta.sin() * phi.sin(),
                    radius * theta.cos(),
                ));
            }
        }
        let south = vertices.len();
        vertices.push(Point3::new(0.0, 0.0, -radius));

        let ring = |k: usize, j: usize| 1 + (k - 1) * segments + j % segments;
        let mut faces = Vec::with_capacity(2 * segments * (rings - 1));
        for j in 0..segments {
            faces.push([0, ring(1, j), ring(1, j + 1)]);
        }
        for k in 1..rings - 1 {
            for j in 0..segments {
                faces.push([ring(k, j), ring(k + 1, j), ring(k + 1, j + 1)]);
                faces.push([ring(k, j), ring(k + 1, j + 1), ring(k, j + 1)]);
            }
        }
        for j in 0..segments {
            faces.push([ring(rings - 1, j), south, ring(rings - 1, j + 1)]);
        }

        let mut mesh = Self::with_vertices_and_faces(vertices, faces);
        mesh.compute_vertex_normals();
        mesh
    }

    /// Closed box spanning `[0, width] × [0, height] × [0, depth]`; each side
    /// is split into `subdivisions²` quads. Shared edges are welded.
    pub fn create_box(width: f32, height: f32, depth: f32, subdivisions: usize) -> Self {
        let s = subdivisions.max(1) as i64;
        let size = [width, height, depth];
        let mut index: HashMap<[i64; 3], usize> = HashMap::new();
        let mut vertices = Vec::new();
        let mut faces = Vec::with_capacity(12 * (s * s) as usize);

        let mut vertex = |grid: [i64; 3], vertices: &mut Vec<Point3<f32>>| -> usize {
            *index.entry(grid).or_insert_with(|| {
                vertices.push(Point3::new(
                    size[0] * grid[0] as f32 / s as f32,
                    size[1] * grid[1] as f32 / s as f32,
                    size[2] * grid[2] as f32 / s as f32,
                ));
                vertices.len() - 1
            })
        };

        for axis in 0..3 {
            for high in [false, true] {
                // (u, v, axis) is right-handed on the high side.
                let (u, v) = if high {
                    ((axis + 1) % 3, (axis + 2) % 3)
                } else {
                    ((axis + 2) % 3, (axis + 1) % 3)
                };
                let at = |i: i64, j: i64| {
                    let mut g = [0i64; 3];
                    g[axis] = if high { s } else { 0 };
                    g[u] = i;
                    g[v] = j;
                    g
                };
                for i in 0..s {
                    for j in 0..s {
                        let p00 = vertex(at(i, j), &mut vertices);
                        let p10 = vertex(at(i + 1, j), &mut vertices);
                        let p11 = vertex(at(i + 1, j + 1), &mut vertices);
                        let p01 = vertex(at(i, j + 1), &mut vertices);
                        faces.push([p00, p10, p11]);
                        faces.push([p00, p11, p01]);
                    }
                }
            }
        }

        let mut mesh = Self::with_vertices_and_faces(vertices, faces);
        mesh.compute_vertex_normals();
        mesh
    }

    /// Flat `width × height` rectangle centered at the origin in the z = 0
    /// plane, facing +z.
    pub fn create_plane(width: f32, height: f32, subdivisions: usize) -> Self {
        let s = subdivisions.max(1);
        let mut vertices = Vec::with_capacity((s + 1) * (s + 1));
        for j in 0..=s {
            for i in 0..=s {
                vertices.push(Point3::new(
                    width * (i as f32 / s as f32 - 0.5),
                    height * (j as f32 / s as f32 - 0.5),
                    0.0,
                ));
            }
        }
        let at = |i: usize, j: usize| j * (s + 1) + i;
        let mut faces = Vec::with_capacity(2 * s * s);
        for j in 0..s {
            for i in 0..s {
                faces.push([at(i, j), at(i + 1, j), at(i + 1, j + 1)]);
                faces.push([at(i, j), at(i + 1, j + 1), at(i, j + 1)]);
            }
        }
        let mut mesh = Self::with_vertices_and_faces(vertices, faces);
        mesh.compute_vertex_normals();
        mesh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_is_closed_and_outward() {
        let mesh = TriangleMesh::create_box(1.0, 2.0, 3.0, 3);
        assert_eq!(mesh.num_faces(), 12 * 9);
        assert!((mesh.surface_area() - 22.0).abs() < 1e-4);

        let mut edges: HashMap<(usize, usize), i32> = HashMap::new();
        for f in &mesh.faces {
            for k in 0..3 {
                *edges.entry((f[k], f[(k + 1) % 3])).or_default() += 1;
            }
        }
        for (&(a, b), &count) in &edges {
            assert_eq!(count, 1);
            assert_eq!(edges.get(&(b, a)), Some(&1));
        }

        let center = Vector3::new(0.5, 1.0, 1.5);
        for (face, n) in mesh.faces.iter().zip(mesh.compute_face_normals()) {
            let c = (mesh.vertices[face[0]].coords
                + mesh.vertices[face[1]].coords
                + mesh.vertices[face[2]].coords)
                / 3.0;
            assert!((c - center).dot(&n) > 0.0);
        }
    }

    #[test]
    fn test_sphere_normals_point_outward() {
        let mesh = TriangleMesh::create_sphere(0.5, 10);
        let area = 4.0 * std::f64::consts::PI * 0.25;
        assert!((mesh.surface_area() - area).abs() / area < 0.05);
        let normals = mesh.normals.as_ref().unwrap();
        for (v, n) in mesh.vertices.iter().zip(normals) {
            assert!(v.coords.dot(n) > 0.0);
        }
    }

    #[test]
    fn test_merge_offsets_indices() {
        let mut a = TriangleMesh::create_plane(1.0, 1.0, 1);
        let b = TriangleMesh::create_plane(1.0, 1.0, 1);
        a.merge(&b);
        assert_eq!(a.num_vertices(), 8);
        assert_eq!(a.num_faces(), 4);
        assert_eq!(a.faces[2], [4, 5, 7]);
        assert_eq!(a.normals.as_ref().map(Vec::len), Some(8));
        a.validate().unwrap();
    }

    #[test]
    fn test_transform_moves_bounds() {
        let mut mesh = TriangleMesh::create_box(1.0, 1.0, 1.0, 1);
        mesh.transform(&Pose::from_translation(Vector3::new(1.0, 2.0, 3.0)));
        let (lo, hi) = mesh.bounds().unwrap();
        assert!((lo - Point3::new(1.0, 2.0, 3.0)).norm() < 1e-6);
        assert!((hi - Point3::new(2.0, 3.0, 4.0)).norm() < 1e-6);
    }
}
