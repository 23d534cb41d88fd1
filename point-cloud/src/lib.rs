//! Point cloud operations used by registration and mesh sampling.
//!
//! - `search`: R*-tree nearest-neighbor, radius and hybrid queries
//! - `filtering`: voxel-grid down-sampling
//! - `normals`: PCA normal estimation and plane-like covariances
//! - `sampling`: Poisson-disk (weighted sample elimination) thinning

pub mod filtering;
pub mod normals;
pub mod sampling;
pub mod search;

pub use filtering::{remove_non_finite_points, voxel_down_sample};
pub use normals::{covariance_from_normal, estimate_normals, orient_normals_towards};
pub use sampling::poisson_disk_eliminate;
pub use search::PointIndex;

/// Neighborhood used for normal estimation and other local statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SearchParam {
    /// The `k` nearest points.
    Knn { k: usize },
    /// Every point within `radius`.
    Radius { radius: f32 },
    /// At most `max_nn` nearest points, all within `radius`.
    Hybrid { radius: f32, max_nn: usize },
}

impl SearchParam {
    /// Hybrid neighborhood used before matching at a registration scale.
    pub fn for_voxel_size(voxel_size: f32) -> Self {
        SearchParam::Hybrid {
            radius: 2.0 * voxel_size,
            max_nn: 30,
        }
    }
}

impl Default for SearchParam {
    fn default() -> Self {
        SearchParam::Knn { k: 30 }
    }
}
