//! Mesh Processing Operations
//!
//! Implements:
//! - Quadric error decimation (Garland and Heckbert 1997)
//! - Connected-component clustering and largest-cluster filtering
//! - Cleanup helpers (masks, unreferenced vertices, degenerate and duplicated faces)

use super::TriangleMesh;
use nalgebra::{Matrix3, Matrix4, Point3, Vector3, Vector4};
use scan_core::{Error, Result};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Drops every face whose mask entry is `true`. Vertices are left in place.
pub fn remove_triangles_by_mask(mesh: &mut TriangleMesh, mask: &[bool]) -> Result<()> {
    if mask.len() != mesh.faces.len() {
        return Err(Error::InvalidInput(format!(
            "mask has {} entries for {} triangles",
            mask.len(),
            mesh.faces.len()
        )));
    }
    let mut keep = mask.iter().map(|&remove| !remove);
    mesh.faces.retain(|_| keep.next().unwrap_or(true));
    Ok(())
}

/// Removes vertices no face refers to, re-indexing faces and attributes.
/// Returns the number of removed vertices.
pub fn remove_unreferenced_vertices(mesh: &mut TriangleMesh) -> usize {
    let mut used = vec![false; mesh.vertices.len()];
    for face in &mesh.faces {
        for &v in face {
            used[v] = true;
        }
    }
    let mut remap = vec![usize::MAX; mesh.vertices.len()];
    let mut next = 0;
    for (i, &u) in used.iter().enumerate() {
        if u {
            remap[i] = next;
            next += 1;
        }
    }
    let removed = mesh.vertices.len() - next;
    if removed == 0 {
        return 0;
    }

    fn compact<T: Clone>(values: &[T], used: &[bool]) -> Vec<T> {
        values
            .iter()
            .zip(used)
            .filter(|(_, &u)| u)
            .map(|(v, _)| v.clone())
            .collect()
    }
    mesh.vertices = compact(&mesh.vertices, &used);
    mesh.normals = mesh.normals.as_deref().map(|n| compact(n, &used));
    mesh.colors = mesh.colors.as_deref().map(|c| compact(c, &used));
    for face in &mut mesh.faces {
        for v in face.iter_mut() {
            *v = remap[*v];
        }
    }
    removed
}

/// Removes faces that reference the same vertex twice.
pub fn remove_degenerate_triangles(mesh: &mut TriangleMesh) -> usize {
    let before = mesh.faces.len();
    mesh.faces
        .retain(|f| f[0] != f[1] && f[1] != f[2] && f[2] != f[0]);
    before - mesh.faces.len()
}

/// Removes faces over the same vertex set as an earlier face, regardless of
/// winding.
pub fn remove_duplicated_triangles(mesh: &mut TriangleMesh) -> usize {
    let before = mesh.faces.len();
    let mut seen: HashSet<[usize; 3]> = HashSet::with_capacity(before);
    mesh.faces.retain(|f| {
        let mut key = *f;
        key.sort_unstable();
        seen.insert(key)
    });
    before - mesh.faces.len()
}

/// Connected components of a mesh, where two triangles are connected when
/// they share an edge.
#[derive(Debug, Clone, Default)]
pub struct TriangleClusters {
    /// Cluster id of every triangle. Ids are assigned in order of first
    /// appearance in the face list.
    pub triangle_clusters: Vec<usize>,
    /// Triangle count per cluster.
    pub cluster_n_triangles: Vec<usize>,
    /// Surface area per cluster.
    pub cluster_area: Vec<f64>,
}

struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            Ordering::Less => self.parent[ra] = rb,
            Ordering::Greater => self.parent[rb] = ra,
            Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

pub fn cluster_connected_triangles(mesh: &TriangleMesh) -> TriangleClusters {
    let n = mesh.faces.len();
    let mut sets = DisjointSet::new(n);
    let mut edge_owner: HashMap<(usize, usize), usize> = HashMap::with_capacity(3 * n);
    for (t, face) in mesh.faces.iter().enumerate() {
        for k in 0..3 {
            let (a, b) = (face[k], face[(k + 1) % 3]);
            let key = (a.min(b), a.max(b));
            match edge_owner.get(&key) {
                Some(&other) => sets.union(t, other),
                None => {
                    edge_owner.insert(key, t);
                }
            }
        }
    }

    let mut ids: HashMap<usize, usize> = HashMap::new();
    let mut clusters = TriangleClusters {
        triangle_clusters: Vec::with_capacity(n),
        ..Default::default()
    };
    for t in 0..n {
        let root = sets.find(t);
        let next = ids.len();
        let id = *ids.entry(root).or_insert(next);
        if id == clusters.cluster_n_triangles.len() {
            clusters.cluster_n_triangles.push(0);
            clusters.cluster_area.push(0.0);
        }
        clusters.triangle_clusters.push(id);
        clusters.cluster_n_triangles[id] += 1;
        clusters.cluster_area[id] += mesh.triangle_area(t);
    }
    clusters
}

/// Keeps only the cluster with the most triangles (the first one on ties) and
/// drops the vertices that no longer belong to any face. Returns the number
/// of removed triangles.
pub fn keep_largest_cluster(mesh: &mut TriangleMesh) -> usize {
    let clusters = cluster_connected_triangles(mesh);
    let Some(largest) = clusters
        .cluster_n_triangles
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, usize)>, (id, &count)| match best {
            Some((_, c)) if c >= count => best,
            _ => Some((id, count)),
        })
        .map(|(id, _)| id)
    else {
        return 0;
    };

    let before = mesh.faces.len();
    let mut ids = clusters.triangle_clusters.iter();
    mesh.faces
        .retain(|_| ids.next().is_some_and(|&id| id == largest));
    remove_unreferenced_vertices(mesh);
    tracing::debug!(
        clusters = clusters.cluster_n_triangles.len(),
        kept = mesh.faces.len(),
        "kept largest triangle cluster"
    );
    before - mesh.faces.len()
}

/// Extra quadric weight of the planes that pin boundary edges in place.
const BOUNDARY_WEIGHT: f64 = 1000.0;
const MAX_FLIP_CHECKED_ROUNDS: usize = 8;

#[derive(Debug, Clone, Copy)]
struct Collapse {
    cost: f64,
    a: usize,
    b: usize,
    stamp_a: u32,
    stamp_b: u32,
    target: Vector3<f64>,
}

impl PartialEq for Collapse {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Collapse {}

impl PartialOrd for Collapse {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Collapse {
    // Reversed so the max-heap pops the cheapest collapse first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| (other.a, other.b).cmp(&(self.a, self.b)))
    }
}

fn plane_quadric(normal: &Vector3<f64>, point: &Vector3<f64>, weight: f64) -> Matrix4<f64> {
    let plane = Vector4::new(normal.x, normal.y, normal.z, -normal.dot(point));
    plane * plane.transpose() * weight
}

fn quadric_cost(q: &Matrix4<f64>, v: &Vector3<f64>) -> f64 {
    let h = Vector4::new(v.x, v.y, v.z, 1.0);
    (h.transpose() * q * h)[(0, 0)].max(0.0)
}

struct Decimator {
    positions: Vec<Vector3<f64>>,
    colors: Option<Vec<Point3<f32>>>,
    quadrics: Vec<Matrix4<f64>>,
    faces: Vec<[usize; 3]>,
    face_alive: Vec<bool>,
    vertex_faces: Vec<Vec<usize>>,
    stamps: Vec<u32>,
    vertex_alive: Vec<bool>,
    live_faces: usize,
}

impl Decimator {
    fn new(mesh: &TriangleMesh) -> Self {
        let positions: Vec<Vector3<f64>> =
            mesh.vertices.iter().map(|v| v.coords.cast::<f64>()).collect();
        let n = positions.len();
        let mut quadrics = vec![Matrix4::zeros(); n];
        let mut vertex_faces = vec![Vec::new(); n];
        let mut edge_faces: HashMap<(usize, usize), (usize, u32)> = HashMap::new();

        for (t, face) in mesh.faces.iter().enumerate() {
            let [p0, p1, p2] = face.map(|i| positions[i]);
            let cross = (p1 - p0).cross(&(p2 - p0));
            let area = cross.norm() * 0.5;
            if let Some(normal) = cross.try_normalize(1e-300) {
                let q = plane_quadric(&normal, &p0, area);
                for &v in face {
                    quadrics[v] += q;
                }
            }
            for &v in face {
                vertex_faces[v].push(t);
            }
            for k in 0..3 {
                let (a, b) = (face[k], face[(k + 1) % 3]);
                edge_faces
                    .entry((a.min(b), a.max(b)))
                    .and_modify(|e| e.1 += 1)
                    .or_insert((t, 1));
            }
        }

        for (&(a, b), &(t, count)) in &edge_faces {
            if count != 1 {
                continue;
            }
            let face = mesh.faces[t];
            let [p0, p1, p2] = face.map(|i| positions[i]);
            let Some(face_normal) = (p1 - p0).cross(&(p2 - p0)).try_normalize(1e-300) else {
                continue;
            };
            let edge = positions[b] - positions[a];
            if let Some(normal) = edge.cross(&face_normal).try_normalize(1e-300) {
                let q = plane_quadric(&normal, &positions[a], BOUNDARY_WEIGHT * edge.norm_squared());
                quadrics[a] += q;
                quadrics[b] += q;
            }
        }

        Self {
            positions,
            colors: mesh.colors.clone(),
            quadrics,
            faces: mesh.faces.clone(),
            face_alive: vec![true; mesh.faces.len()],
            vertex_faces,
            stamps: vec![0; n],
            vertex_alive: vec![true; n],
            live_faces: mesh.faces.len(),
        }
    }

    fn candidate(&self, a: usize, b: usize) -> Collapse {
        let q = self.quadrics[a] + self.quadrics[b];
        let pa = self.positions[a];
        let pb = self.positions[b];
        let mid = (pa + pb) * 0.5;

        let system: Matrix3<f64> = q.fixed_view::<3, 3>(0, 0).into_owned();
        let rhs = -q.fixed_view::<3, 1>(0, 3).into_owned();
        let scale = system.trace() / 3.0;
        let optimal = if scale > 0.0 && system.determinant().abs() > 1e-6 * scale.powi(3) {
            system
                .try_inverse()
                .map(|inv| inv * rhs)
                .filter(|v| (v - mid).norm() <= 2.0 * (pb - pa).norm())
        } else {
            None
        };

        let (target, cost) = optimal
            .into_iter()
            .chain([pa, pb, mid])
            .map(|v| (v, quadric_cost(&q, &v)))
            .fold((mid, f64::INFINITY), |best, c| if c.1 < best.1 { c } else { best });

        Collapse {
            cost,
            a,
            b,
            stamp_a: self.stamps[a],
            stamp_b: self.stamps[b],
            target,
        }
    }

    fn neighbors(&self, v: usize) -> Vec<usize> {
        let mut out: Vec<usize> = self.vertex_faces[v]
            .iter()
            .filter(|&&t| self.face_alive[t])
            .flat_map(|&t| self.faces[t])
            .filter(|&u| u != v)
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    fn initial_heap(&self) -> BinaryHeap<Collapse> {
        let mut heap = BinaryHeap::new();
        for v in 0..self.positions.len() {
            if !self.vertex_alive[v] {
                continue;
            }
            for u in self.neighbors(v) {
                if v < u {
                    heap.push(self.candidate(v, u));
                }
            }
        }
        heap
    }

    /// Whether moving `a` and `b` to `target` turns any surviving face over.
    fn flips(&self, a: usize, b: usize, target: &Vector3<f64>) -> bool {
        for &moving in &[a, b] {
            for &t in &self.vertex_faces[moving] {
                if !self.face_alive[t] {
                    continue;
                }
                let face = self.faces[t];
                if face.contains(&a) && face.contains(&b) {
                    continue;
                }
                let old = face.map(|i| self.positions[i]);
                let new = face.map(|i| if i == moving { *target } else { self.positions[i] });
                let n_old = (old[1] - old[0]).cross(&(old[2] - old[0]));
                let n_new = (new[1] - new[0]).cross(&(new[2] - new[0]));
                if n_old.dot(&n_new) <= 0.0 {
                    return true;
                }
            }
        }
        false
    }

    fn collapse(&mut self, c: &Collapse) {
        let (a, b) = (c.a, c.b);
        self.positions[a] = c.target;
        self.quadrics[a] = self.quadrics[a] + self.quadrics[b];
        if let Some(colors) = &mut self.colors {
            colors[a] = Point3::from((colors[a].coords + colors[b].coords) * 0.5);
        }

        let moved = std::mem::take(&mut self.vertex_faces[b]);
        for t in moved {
            if !self.face_alive[t] {
                continue;
            }
            if self.faces[t].contains(&a) {
                self.face_alive[t] = false;
                self.live_faces -= 1;
            } else {
                for v in self.faces[t].iter_mut() {
                    if *v == b {
                        *v = a;
                    }
                }
                self.vertex_faces[a].push(t);
            }
        }
        self.vertex_faces[a].retain(|&t| self.face_alive[t]);
        self.vertex_alive[b] = false;
        self.stamps[a] += 1;
        self.stamps[b] += 1;
    }

    /// Returns the number of collapses performed.
    fn run(&mut self, target_faces: usize, check_flips: bool) -> usize {
        let mut heap = self.initial_heap();
        let mut collapses = 0;
        while self.live_faces > target_faces {
            let Some(c) = heap.pop() else {
                break;
            };
            if !self.vertex_alive[c.a]
                || !self.vertex_alive[c.b]
                || self.stamps[c.a] != c.stamp_a
                || self.stamps[c.b] != c.stamp_b
            {
                continue;
            }
            if check_flips && self.flips(c.a, c.b, &c.target) {
                continue;
            }
            self.collapse(&c);
            collapses += 1;
            for u in self.neighbors(c.a) {
                heap.push(self.candidate(c.a, u));
            }
        }
        collapses
    }

    fn into_mesh(self) -> TriangleMesh {
        let faces = self
            .faces
            .iter()
            .zip(&self.face_alive)
            .filter(|(_, &alive)| alive)
            .map(|(f, _)| *f)
            .collect();
        let vertices = self
            .positions
            .iter()
            .map(|p| Point3::from(p.cast::<f32>()))
            .collect();
        let mut mesh = TriangleMesh::with_vertices_and_faces(vertices, faces);
        mesh.colors = self.colors;
        mesh
    }
}

/// Quadric error decimation
///
/// Collapses edges in order of increasing quadric error until at most
/// `target_triangles` faces remain. Collapses that would flip a face are
/// skipped; if that leaves the mesh above the target, a second pass runs
/// without the flip check. Boundary edges are pinned with extra penalty
/// planes so open borders keep their outline.
///
/// The result never has more than `target_triangles` faces, carries
/// recomputed vertex normals, and has no unreferenced vertices.
pub fn simplify_quadric_decimation(mesh: &TriangleMesh, target_triangles: usize) -> TriangleMesh {
    if mesh.faces.len() <= target_triangles {
        let mut out = mesh.clone();
        out.compute_vertex_normals();
        return out;
    }

    let mut decimator = Decimator::new(mesh);
    // Rejected collapses are only retried once their endpoints change, so
    // restart from a fresh heap while that still makes progress.
    for _ in 0..MAX_FLIP_CHECKED_ROUNDS {
        if decimator.live_faces <= target_triangles || decimator.run(target_triangles, true) == 0 {
            break;
        }
    }
    if decimator.live_faces > target_triangles {
        tracing::debug!(
            remaining = decimator.live_faces,
            target = target_triangles,
            "decimation stalled on face flips, relaxing"
        );
        decimator.run(target_triangles, false);
    }

    let mut out = decimator.into_mesh();
    remove_degenerate_triangles(&mut out);
    remove_duplicated_triangles(&mut out);
    remove_unreferenced_vertices(&mut out);
    out.compute_vertex_normals();
    tracing::debug!(
        before = mesh.faces.len(),
        after = out.faces.len(),
        vertices = out.vertices.len(),
        "quadric decimation finished"
    );
    out
}
