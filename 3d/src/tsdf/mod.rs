//! TSDF (Truncated Signed Distance Function) Integration
//!
//! Core algorithm for fusing multiple RGBD images into a 3D volume.
//! Based on "KinectFusion: Real-Time Dense Surface Mapping and Tracking" by Newcombe et al.
//!
//! The volume covers a bounded cube split into `resolution³` voxels. Voxels
//! live in 8×8×8 blocks that are allocated on first touch and kept in an
//! arena indexed by integer block coordinates.

mod marching_cubes;
mod tables;

use crate::rgbd::PosedFrame;
use crate::TriangleMesh;
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use scan_core::{Error, Result};
use std::collections::{HashMap, HashSet};

pub type BlockCoord = (i32, i32, i32);

/// Truncation-to-voxel ratio above which the surface gets visibly smoothed.
const LARGE_TRUNCATION_RATIO: f32 = 16.0;

/// Geometry of a fusion volume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TsdfConfig {
    /// Edge length of the cube in metres.
    pub cubic_size: f32,
    /// Voxels along each edge.
    pub resolution: usize,
    /// Truncation distance of the signed distance, in metres.
    pub sdf_trunc: f32,
    /// Minimum corner of the cube.
    pub origin: Point3<f32>,
}

impl Default for TsdfConfig {
    fn default() -> Self {
        Self::centered(1.5, 512, 0.018, Point3::origin())
    }
}

impl TsdfConfig {
    /// A cube of edge `cubic_size` centered on `center`.
    pub fn centered(cubic_size: f32, resolution: usize, sdf_trunc: f32, center: Point3<f32>) -> Self {
        let half = Vector3::repeat(cubic_size * 0.5);
        Self {
            cubic_size,
            resolution,
            sdf_trunc,
            origin: center - half,
        }
    }

    pub fn voxel_size(&self) -> f32 {
        self.cubic_size / self.resolution as f32
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.cubic_size.is_finite() && self.cubic_size > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "TSDF cube size must be positive, got {}",
                self.cubic_size
            )));
        }
        if self.resolution == 0 {
            return Err(Error::InvalidConfig("TSDF resolution must be positive".into()));
        }
        let voxel = self.voxel_size();
        if !(self.sdf_trunc.is_finite() && self.sdf_trunc >= voxel) {
            return Err(Error::InvalidConfig(format!(
                "truncation distance {} is shorter than one voxel ({voxel})",
                self.sdf_trunc
            )));
        }
        if !self.origin.iter().all(|v| v.is_finite()) {
            return Err(Error::InvalidConfig("TSDF origin must be finite".into()));
        }
        Ok(())
    }
}

/// Voxel block for TSDF volume
#[derive(Debug, Clone)]
pub struct VoxelBlock {
    pub coords: BlockCoord,
    /// Normalized signed distance in `[-1, 1]`, positive in front of the surface.
    pub tsdf: Vec<f32>,
    /// Accumulated integration weight; 0 means never observed.
    pub weights: Vec<f32>,
    /// Weighted mean color, RGB in `[0, 1]`.
    pub colors: Vec<Vector3<f32>>,
}

impl VoxelBlock {
    pub const BLOCK_SIZE: usize = 8;
    pub const VOXELS_PER_BLOCK: usize = 512; // 8^3

    pub fn new(coords: BlockCoord) -> Self {
        Self {
            coords,
            tsdf: vec![1.0; Self::VOXELS_PER_BLOCK],
            weights: vec![0.0; Self::VOXELS_PER_BLOCK],
            colors: vec![Vector3::zeros(); Self::VOXELS_PER_BLOCK],
        }
    }

    /// Get linear index from local voxel coordinates
    pub fn voxel_index(local: (usize, usize, usize)) -> usize {
        local.0 + local.1 * Self::BLOCK_SIZE + local.2 * Self::BLOCK_SIZE * Self::BLOCK_SIZE
    }

    pub fn observed_voxels(&self) -> usize {
        self.weights.iter().filter(|&&w| w > 0.0).count()
    }
}

/// Sparse TSDF volume over a bounded cube.
///
/// Frames are integrated one at a time; within a frame every voxel is
/// updated at most once, from the depth sample it projects onto.
pub struct TsdfVolume {
    config: TsdfConfig,
    voxel_size: f32,
    blocks: Vec<VoxelBlock>,
    index: HashMap<BlockCoord, usize>,
    frames: usize,
}

impl TsdfVolume {
    pub fn new(config: TsdfConfig) -> Result<Self> {
        config.validate()?;
        let voxel_size = config.voxel_size();
        if config.sdf_trunc > LARGE_TRUNCATION_RATIO * voxel_size {
            tracing::warn!(
                sdf_trunc = config.sdf_trunc,
                voxel_size,
                "truncation spans many voxels; the surface will be over-smoothed"
            );
        }
        Ok(Self {
            config,
            voxel_size,
            blocks: Vec::new(),
            index: HashMap::new(),
            frames: 0,
        })
    }

    pub fn config(&self) -> &TsdfConfig {
        &self.config
    }

    pub fn voxel_size(&self) -> f32 {
        self.voxel_size
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn num_frames(&self) -> usize {
        self.frames
    }

    pub fn blocks(&self) -> &[VoxelBlock] {
        &self.blocks
    }

    fn blocks_per_axis(&self) -> i32 {
        self.config.resolution.div_ceil(VoxelBlock::BLOCK_SIZE) as i32
    }

    fn block_edge(&self) -> f32 {
        self.voxel_size * VoxelBlock::BLOCK_SIZE as f32
    }

    /// World position of the voxel at global grid coordinate `g`.
    fn voxel_position(&self, g: (i32, i32, i32)) -> Point3<f32> {
        self.config.origin
            + Vector3::new(g.0 as f32, g.1 as f32, g.2 as f32) * self.voxel_size
    }

    fn block_of(&self, p: &Point3<f32>) -> Option<BlockCoord> {
        let rel = (p - self.config.origin) / self.block_edge();
        let b = (rel.x.floor() as i32, rel.y.floor() as i32, rel.z.floor() as i32);
        let n = self.blocks_per_axis();
        let inside = |c: i32| (0..n).contains(&c);
        (inside(b.0) && inside(b.1) && inside(b.2)).then_some(b)
    }

    /// Blocks intersected by the truncation band `[d - trunc, d + trunc]` of
    /// every valid depth sample.
    fn touched_blocks(&self, frame: &PosedFrame) -> Vec<BlockCoord> {
        let image = &frame.image;
        let intrinsics = &frame.intrinsics;
        let to_world = frame.camera_to_world();
        let trunc = self.config.sdf_trunc;
        let step = 0.5 * self.block_edge();

        let touched: HashSet<BlockCoord> = (0..image.height())
            .into_par_iter()
            .fold(HashSet::new, |mut set, v| {
                for u in 0..image.width() {
                    let Some(d) = image.depth_at(u, v) else {
                        continue;
                    };
                    let ray = Vector3::new(
                        ((u as f64 - intrinsics.cx) / intrinsics.fx) as f32,
                        ((v as f64 - intrinsics.cy) / intrinsics.fy) as f32,
                        1.0,
                    );
                    let near = (d - trunc).max(0.0);
                    let far = d + trunc;
                    let samples = ((far - near) * ray.norm() / step).ceil().max(1.0) as usize;
                    for k in 0..=samples {
                        let z = near + (far - near) * k as f32 / samples as f32;
                        let camera = Point3::from(ray * z);
                        let world = to_world.transform_point_f32(&camera);
                        if let Some(b) = self.block_of(&world) {
                            set.insert(b);
                        }
                    }
                }
                set
            })
            .reduce(HashSet::new, |mut a, b| {
                a.extend(b);
                a
            });

        let mut touched: Vec<BlockCoord> = touched.into_iter().collect();
        touched.sort_unstable();
        touched
    }

    /// Integrates one frame.
    ///
    /// Every voxel of a touched block is projected into the depth image. With
    /// `sdf = depth - z` the voxel receives `tsdf = min(1, sdf / trunc)` and
    /// weight 1 in front of the surface, falling linearly to 0 at `-trunc`
    /// behind it. Returns the number of blocks touched.
    pub fn integrate(&mut self, frame: &PosedFrame) -> usize {
        let touched = self.touched_blocks(frame);
        let mut active = vec![false; self.blocks.len()];
        for coords in &touched {
            let slot = match self.index.get(coords) {
                Some(&slot) => slot,
                None => {
                    self.blocks.push(VoxelBlock::new(*coords));
                    self.index.insert(*coords, self.blocks.len() - 1);
                    active.push(false);
                    self.blocks.len() - 1
                }
            };
            active[slot] = true;
        }

        let image = &frame.image;
        let intrinsics = &frame.intrinsics;
        let extrinsic = &frame.extrinsic;
        let trunc = self.config.sdf_trunc;
        let resolution = self.config.resolution as i32;
        let origin = self.config.origin;
        let voxel_size = self.voxel_size;
        let (width, height) = (image.width() as f64, image.height() as f64);
        const B: usize = VoxelBlock::BLOCK_SIZE;

        self.blocks
            .par_iter_mut()
            .zip(active.par_iter())
            .filter(|(_, active)| **active)
            .for_each(|(block, _)| {
                let base = (
                    block.coords.0 * B as i32,
                    block.coords.1 * B as i32,
                    block.coords.2 * B as i32,
                );
                for z in 0..B {
                    for y in 0..B {
                        for x in 0..B {
                            let g = (base.0 + x as i32, base.1 + y as i32, base.2 + z as i32);
                            if g.0 >= resolution || g.1 >= resolution || g.2 >= resolution {
                                continue;
                            }
                            let world = origin
                                + Vector3::new(g.0 as f32, g.1 as f32, g.2 as f32) * voxel_size;
                            let camera = extrinsic.transform_point_f32(&world);
                            if camera.z <= 0.0 {
                                continue;
                            }
                            let pixel = intrinsics.project(&camera.cast::<f64>());
                            let (pu, pv) = (pixel.x.round(), pixel.y.round());
                            if pu < 0.0 || pv < 0.0 || pu >= width || pv >= height {
                                continue;
                            }
                            let (pu, pv) = (pu as u32, pv as u32);
                            let Some(depth) = image.depth_at(pu, pv) else {
                                continue;
                            };

                            let sdf = depth - camera.z;
                            if sdf <= -trunc {
                                continue;
                            }
                            let tsdf = (sdf / trunc).min(1.0);
                            let weight = if sdf >= 0.0 { 1.0 } else { 1.0 + sdf / trunc };
                            let c = image.color_at(pu, pv);
                            let color = Vector3::new(c.x as f32, c.y as f32, c.z as f32) / 255.0;

                            let i = VoxelBlock::voxel_index((x, y, z));
                            let w_old = block.weights[i];
                            let w_new = w_old + weight;
                            block.tsdf[i] = (block.tsdf[i] * w_old + tsdf * weight) / w_new;
                            block.colors[i] = (block.colors[i] * w_old + color * weight) / w_new;
                            block.weights[i] = w_new;
                        }
                    }
                }
            });

        self.frames += 1;
        tracing::debug!(
            frame = self.frames,
            touched_blocks = touched.len(),
            allocated_blocks = self.blocks.len(),
            "integrated frame"
        );
        touched.len()
    }

    /// `(tsdf, weight, color)` of the voxel at global coordinate `g`, if its
    /// block exists.
    fn voxel(&self, g: (i32, i32, i32)) -> Option<(f32, f32, Vector3<f32>)> {
        if g.0 < 0 || g.1 < 0 || g.2 < 0 {
            return None;
        }
        let b = VoxelBlock::BLOCK_SIZE as i32;
        let coords = (g.0 / b, g.1 / b, g.2 / b);
        let block = &self.blocks[*self.index.get(&coords)?];
        let local = (
            (g.0 % b) as usize,
            (g.1 % b) as usize,
            (g.2 % b) as usize,
        );
        let i = VoxelBlock::voxel_index(local);
        Some((block.tsdf[i], block.weights[i], block.colors[i]))
    }

    /// Extract surface mesh using Marching Cubes
    ///
    /// Vertices on shared cell edges are welded, carry the interpolated voxel
    /// color, and the mesh gets vertex normals. Cells with an unobserved
    /// corner are skipped.
    pub fn extract_mesh(&self) -> TriangleMesh {
        marching_cubes::extract(self)
    }
}
