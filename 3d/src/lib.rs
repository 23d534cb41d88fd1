//! Scene reconstruction and object alignment.
//!
//! - `rgbd`: posed RGB-D frames and back-projection
//! - `tsdf`: volumetric fusion and marching cubes
//! - `mesh`: triangle meshes, decimation, clustering and sampling
//! - `trajectory`: pairwise frame-to-frame pose refinement
//! - `autoalign`: two-pass object-to-scene registration
//! - `pipeline`: the refinement → fusion → post-processing chain

pub mod autoalign;
pub mod mesh;
pub mod pipeline;
pub mod rgbd;
pub mod trajectory;
pub mod tsdf;

pub use autoalign::{auto_align, AlignmentResult, AutoAlignConfig, SceneSurface};
pub use mesh::processing::{
    cluster_connected_triangles, keep_largest_cluster, remove_degenerate_triangles,
    remove_duplicated_triangles, remove_triangles_by_mask, remove_unreferenced_vertices,
    simplify_quadric_decimation, TriangleClusters,
};
pub use mesh::sampling::{
    sample_points_poisson_disk, sample_points_uniform_and_poisson, sample_points_uniformly,
};
pub use mesh::TriangleMesh;
pub use pipeline::{Reconstruction, ReconstructionConfig, Reconstructor};
pub use rgbd::{frames_to_point_clouds, PosedFrame, RgbdImage};
pub use scan_core::PointCloud;
pub use trajectory::{refine_trajectory, PairRefinement, TrajectoryRefinement};
pub use tsdf::{TsdfConfig, TsdfVolume, VoxelBlock};
