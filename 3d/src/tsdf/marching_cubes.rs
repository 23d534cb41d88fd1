//! Marching cubes over the allocated blocks of a TSDF volume.

use super::tables::{CORNERS, EDGES, EDGE_TABLE, TRI_TABLE};
use super::{TsdfVolume, VoxelBlock};
use crate::mesh::processing::remove_degenerate_triangles;
use crate::TriangleMesh;
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use std::collections::HashMap;

/// A cell edge, identified by its lower endpoint on the global grid and its axis.
type EdgeKey = ((i32, i32, i32), u8);

struct BlockSurface {
    keys: Vec<EdgeKey>,
    vertices: Vec<Point3<f32>>,
    colors: Vec<Point3<f32>>,
    faces: Vec<[usize; 3]>,
}

fn edge_key(g: (i32, i32, i32), edge: usize) -> (EdgeKey, usize, usize) {
    let (a, b) = EDGES[edge];
    let (ca, cb) = (CORNERS[a], CORNERS[b]);
    let lo = (ca.0.min(cb.0), ca.1.min(cb.1), ca.2.min(cb.2));
    let axis = if ca.0 != cb.0 {
        0
    } else if ca.1 != cb.1 {
        1
    } else {
        2
    };
    // Endpoints ordered lower first so both cells sharing the edge
    // interpolate identically.
    let (from, to) = if ca == lo { (a, b) } else { (b, a) };
    (((g.0 + lo.0, g.1 + lo.1, g.2 + lo.2), axis), from, to)
}

fn extract_block(volume: &TsdfVolume, block: &VoxelBlock) -> BlockSurface {
    const B: i32 = VoxelBlock::BLOCK_SIZE as i32;
    let last = volume.config.resolution as i32 - 1;
    let base = (block.coords.0 * B, block.coords.1 * B, block.coords.2 * B);

    let mut surface = BlockSurface {
        keys: Vec::new(),
        vertices: Vec::new(),
        colors: Vec::new(),
        faces: Vec::new(),
    };
    let mut local: HashMap<EdgeKey, usize> = HashMap::new();

    for z in 0..B {
        for y in 0..B {
            for x in 0..B {
                let g = (base.0 + x, base.1 + y, base.2 + z);
                if g.0 >= last || g.1 >= last || g.2 >= last {
                    continue;
                }

                let mut values = [0.0f32; 8];
                let mut colors = [Vector3::zeros(); 8];
                let mut observed = true;
                for (i, c) in CORNERS.iter().enumerate() {
                    match volume.voxel((g.0 + c.0, g.1 + c.1, g.2 + c.2)) {
                        Some((tsdf, weight, color)) if weight > 0.0 => {
                            values[i] = tsdf;
                            colors[i] = color;
                        }
                        _ => {
                            observed = false;
                            break;
                        }
                    }
                }
                if !observed {
                    continue;
                }

                let cube = values
                    .iter()
                    .enumerate()
                    .filter(|(_, &v)| v < 0.0)
                    .fold(0usize, |acc, (i, _)| acc | (1 << i));
                let edges = EDGE_TABLE[cube];
                if edges == 0 {
                    continue;
                }

                let mut edge_vertex = [usize::MAX; 12];
                for (e, slot) in edge_vertex.iter_mut().enumerate() {
                    if edges & (1 << e) == 0 {
                        continue;
                    }
                    let (key, from, to) = edge_key(g, e);
                    *slot = *local.entry(key).or_insert_with(|| {
                        let (va, vb) = (values[from], values[to]);
                        let t = va / (va - vb);
                        let ca = CORNERS[from];
                        let pa = volume.voxel_position((g.0 + ca.0, g.1 + ca.1, g.2 + ca.2));
                        let cb = CORNERS[to];
                        let pb = volume.voxel_position((g.0 + cb.0, g.1 + cb.1, g.2 + cb.2));
                        let color = colors[from] + (colors[to] - colors[from]) * t;
                        surface.keys.push(key);
                        surface.vertices.push(pa + (pb - pa) * t);
                        surface.colors.push(Point3::from(color));
                        surface.vertices.len() - 1
                    });
                }

                for tri in TRI_TABLE[cube].chunks(3) {
                    if tri[0] < 0 {
                        break;
                    }
                    surface.faces.push([
                        edge_vertex[tri[0] as usize],
                        edge_vertex[tri[1] as usize],
                        edge_vertex[tri[2] as usize],
                    ]);
                }
            }
        }
    }
    surface
}

pub(super) fn extract(volume: &TsdfVolume) -> TriangleMesh {
    let mut order: Vec<usize> = (0..volume.blocks.len()).collect();
    order.sort_unstable_by_key(|&i| volume.blocks[i].coords);

    let surfaces: Vec<BlockSurface> = order
        .par_iter()
        .map(|&i| extract_block(volume, &volume.blocks[i]))
        .collect();

    let mut mesh = TriangleMesh::new();
    let mut colors = Vec::new();
    let mut global: HashMap<EdgeKey, usize> = HashMap::new();
    for surface in surfaces {
        let remap: Vec<usize> = surface
            .keys
            .iter()
            .enumerate()
            .map(|(i, key)| {
                *global.entry(*key).or_insert_with(|| {
                    mesh.vertices.push(surface.vertices[i]);
                    colors.push(surface.colors[i]);
                    mesh.vertices.len() - 1
                })
            })
            .collect();
        mesh.faces.extend(
            surface
                .faces
                .iter()
                .map(|f| [remap[f[0]], remap[f[1]], remap[f[2]]]),
        );
    }
    mesh.colors = Some(colors);

    let degenerate = remove_degenerate_triangles(&mut mesh);
    mesh.compute_vertex_normals();
    tracing::debug!(
        vertices = mesh.num_vertices(),
        triangles = mesh.num_faces(),
        degenerate,
        "extracted TSDF surface"
    );
    mesh
}

#[cfg(test)]
mod tests {
    use super::super::TsdfConfig;
    use super::*;
    use crate::mesh::processing::cluster_connected_triangles;

    /// Fills every voxel of the volume with a sphere's signed distance.
    fn sphere_volume(radius: f32) -> TsdfVolume {
        let config = TsdfConfig::centered(1.0, 32, 0.1, Point3::origin());
        let mut volume = TsdfVolume::new(config).unwrap();
        let n = 4;
        for bz in 0..n {
            for by in 0..n {
                for bx in 0..n {
                    let mut block = VoxelBlock::new((bx, by, bz));
                    for z in 0..8 {
                        for y in 0..8 {
                            for x in 0..8 {
                                let g = (bx * 8 + x as i32, by * 8 + y as i32, bz * 8 + z as i32);
                                let p = volume.voxel_position(g);
                                let i = VoxelBlock::voxel_index((x, y, z));
                                block.tsdf[i] = ((p.coords.norm() - radius) / 0.1).clamp(-1.0, 1.0);
                                block.weights[i] = 1.0;
                                block.colors[i] = Vector3::new(0.2, 0.4, 0.6);
                            }
                        }
                    }
                    volume.index.insert((bx, by, bz), volume.blocks.len());
                    volume.blocks.push(block);
                }
            }
        }
        volume
    }

    #[test]
    fn test_sphere_surface_is_closed_and_outward() {
        let volume = sphere_volume(0.3);
        let mesh = volume.extract_mesh();
        assert!(!mesh.is_empty());

        let mut directed: HashMap<(usize, usize), usize> = HashMap::new();
        for f in &mesh.faces {
            for k in 0..3 {
                *directed.entry((f[k], f[(k + 1) % 3])).or_default() += 1;
            }
        }
        for (&(a, b), &count) in &directed {
            assert_eq!(count, 1);
            assert_eq!(directed.get(&(b, a)), Some(&1));
        }

        let normals = mesh.normals.as_ref().unwrap();
        for (v, n) in mesh.vertices.iter().zip(normals) {
            assert!((v.coords.norm() - 0.3).abs() < 0.01);
            assert!(v.coords.normalize().dot(n) > 0.8);
        }
        let colors = mesh.colors.as_ref().unwrap();
        assert!((colors[0].y - 0.4).abs() < 1e-5);

        let clusters = cluster_connected_triangles(&mesh);
        assert_eq!(clusters.cluster_n_triangles.len(), 1);
    }

    #[test]
    fn test_unobserved_cells_are_skipped() {
        let mut volume = sphere_volume(0.3);
        for block in &mut volume.blocks {
            if block.coords.0 >= 2 {
                block.weights.iter_mut().for_each(|w| *w = 0.0);
            }
        }
        let mesh = volume.extract_mesh();
        assert!(!mesh.is_empty());
        // Cells need all corners observed, so nothing reaches past x = 0.
        for v in &mesh.vertices {
            assert!(v.x <= 1e-6);
        }
    }
}
