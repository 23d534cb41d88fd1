//! Registration method selection and per-call configuration.

use scan_core::{Error, Result, RobustLoss};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error metric minimized by the ICP loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationMethod {
    /// Euclidean distance between corresponding points.
    PointToPoint,
    /// Distance along the target normal.
    PointToPlane,
    /// Point-to-plane residual plus a photometric residual along the target
    /// color gradient (Park et al. 2017).
    Color,
    /// Plane-to-plane Mahalanobis residual with a robust kernel (Segal et al. 2009).
    Generalized,
}

impl RegistrationMethod {
    /// Whether both clouds need normals before matching.
    pub fn requires_normals(&self) -> bool {
        !matches!(self, RegistrationMethod::PointToPoint)
    }

    /// Whether correspondences are only usable when the target normal is valid.
    pub(crate) fn requires_target_normal(&self) -> bool {
        matches!(
            self,
            RegistrationMethod::PointToPlane | RegistrationMethod::Color
        )
    }

    pub fn requires_colors(&self) -> bool {
        matches!(self, RegistrationMethod::Color)
    }

    pub fn name(&self) -> &'static str {
        match self {
            RegistrationMethod::PointToPoint => "point_to_point",
            RegistrationMethod::PointToPlane => "point_to_plane",
            RegistrationMethod::Color => "color",
            RegistrationMethod::Generalized => "generalized",
        }
    }
}

impl fmt::Display for RegistrationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RegistrationMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "point_to_point" | "p2p" => Ok(RegistrationMethod::PointToPoint),
            "point_to_plane" | "p2l" => Ok(RegistrationMethod::PointToPlane),
            "color" | "colored" => Ok(RegistrationMethod::Color),
            "generalized" | "gicp" | "robust" | "robust_icp" => Ok(RegistrationMethod::Generalized),
            _ => Err(Error::UnsupportedMethod(format!(
                "'{s}' (expected one of point_to_point, point_to_plane, color, generalized)"
            ))),
        }
    }
}

/// One level of the coarse-to-fine cascade.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleLevel {
    /// Voxel size used to down-sample both clouds at this level.
    pub voxel_size: f32,
    /// Iteration budget of the ICP loop at this level.
    pub max_iterations: usize,
}

impl ScaleLevel {
    pub fn new(voxel_size: f32, max_iterations: usize) -> Self {
        Self {
            voxel_size,
            max_iterations,
        }
    }
}

/// Parameters of one multi-scale registration call.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationConfig {
    pub method: RegistrationMethod,
    /// Base voxel size. The correspondence threshold of the generic methods is
    /// `distance_factor * voxel_size` at every level.
    pub voxel_size: f32,
    /// Levels ordered from coarsest to finest.
    pub scales: Vec<ScaleLevel>,
    /// Stop a level once fitness changes by less than this between iterations.
    pub relative_fitness: f64,
    /// Stop a level once inlier RMSE changes by less than this between iterations.
    pub relative_rmse: f64,
    /// Multiplier turning a voxel size into a correspondence distance.
    pub distance_factor: f32,
    /// Neighbor cap of the hybrid normal-estimation search.
    pub normal_max_nn: usize,
    /// Weight of the geometric term in color ICP, in `[0, 1]`.
    pub lambda_geometric: f64,
    /// Kernel applied to residuals. `None` selects the method default:
    /// least squares, or Tukey at the correspondence distance for `Generalized`.
    pub robust_loss: Option<RobustLoss>,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            method: RegistrationMethod::PointToPlane,
            voxel_size: 0.004,
            scales: vec![ScaleLevel::new(0.004, 30)],
            relative_fitness: 1e-6,
            relative_rmse: 1e-6,
            distance_factor: 1.4,
            normal_max_nn: 30,
            lambda_geometric: 0.968,
            robust_loss: None,
        }
    }
}

impl RegistrationConfig {
    pub fn new(method: RegistrationMethod, voxel_size: f32, scales: Vec<ScaleLevel>) -> Self {
        Self {
            method,
            voxel_size,
            scales,
            ..Self::default()
        }
    }

    /// Zips parallel voxel-size and iteration lists into levels.
    pub fn from_lists(
        method: RegistrationMethod,
        voxel_size: f32,
        voxel_sizes: &[f32],
        max_iterations: &[usize],
    ) -> Result<Self> {
        if voxel_sizes.len() != max_iterations.len() {
            return Err(Error::InvalidConfig(format!(
                "{} voxel sizes but {} iteration counts",
                voxel_sizes.len(),
                max_iterations.len()
            )));
        }
        let scales = voxel_sizes
            .iter()
            .zip(max_iterations)
            .map(|(&v, &n)| ScaleLevel::new(v, n))
            .collect();
        let config = Self::new(method, voxel_size, scales);
        config.validate()?;
        Ok(config)
    }

    /// A single level at the base voxel size.
    pub fn single_scale(method: RegistrationMethod, voxel_size: f32, max_iterations: usize) -> Self {
        Self::new(method, voxel_size, vec![ScaleLevel::new(voxel_size, max_iterations)])
    }

    /// Levels `{2v, v, v/2, v/4}` sharing one iteration budget.
    pub fn cascade(method: RegistrationMethod, voxel_size: f32, max_iterations: usize) -> Self {
        let v = voxel_size;
        let scales = [2.0 * v, v, v / 2.0, v / 4.0]
            .into_iter()
            .map(|s| ScaleLevel::new(s, max_iterations))
            .collect();
        Self::new(method, voxel_size, scales)
    }

    /// Schedule used for frame-to-frame trajectory refinement:
    /// `{2v, v, v/2, v/4}` with `{100, 50, 30, 14}` iterations.
    pub fn trajectory_schedule(method: RegistrationMethod, voxel_size: f32) -> Self {
        let v = voxel_size;
        let scales = [(2.0 * v, 100), (v, 50), (v / 2.0, 30), (v / 4.0, 14)]
            .into_iter()
            .map(|(s, n)| ScaleLevel::new(s, n))
            .collect();
        Self::new(method, voxel_size, scales)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.voxel_size.is_finite() && self.voxel_size > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "voxel size must be positive, got {}",
                self.voxel_size
            )));
        }
        if self.scales.is_empty() {
            return Err(Error::InvalidConfig("at least one scale level is required".into()));
        }
        for (i, level) in self.scales.iter().enumerate() {
            if !(level.voxel_size.is_finite() && level.voxel_size > 0.0) {
                return Err(Error::InvalidConfig(format!(
                    "scale {i}: voxel size must be positive, got {}",
                    level.voxel_size
                )));
            }
            if level.max_iterations == 0 {
                return Err(Error::InvalidConfig(format!(
                    "scale {i}: iteration budget must be at least 1"
                )));
            }
        }
        if self
            .scales
            .windows(2)
            .any(|w| w[1].voxel_size > w[0].voxel_size)
        {
            return Err(Error::InvalidConfig(
                "scale levels must be ordered from coarsest to finest voxel size".into(),
            ));
        }
        if !(self.distance_factor > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "distance factor must be positive, got {}",
                self.distance_factor
            )));
        }
        if !(0.0..=1.0).contains(&self.lambda_geometric) {
            return Err(Error::InvalidConfig(format!(
                "lambda_geometric must lie in [0, 1], got {}",
                self.lambda_geometric
            )));
        }
        if !(self.relative_fitness >= 0.0 && self.relative_rmse >= 0.0) {
            return Err(Error::InvalidConfig(
                "convergence thresholds must be non-negative".into(),
            ));
        }
        Ok(())
    }

    /// Correspondence threshold at a given level.
    ///
    /// Color ICP matches within the level's own voxel size; every other method
    /// uses `distance_factor` times the base voxel size.
    pub fn max_correspondence_distance(&self, level: &ScaleLevel) -> f32 {
        match self.method {
            RegistrationMethod::Color => level.voxel_size,
            _ => self.distance_factor * self.voxel_size,
        }
    }

    /// Voxel size of the finest level, where the information matrix is computed.
    pub fn finest_voxel_size(&self) -> f32 {
        self.scales
            .last()
            .map(|l| l.voxel_size)
            .unwrap_or(self.voxel_size)
    }

    pub(crate) fn kernel(&self, max_correspondence_distance: f32) -> RobustLoss {
        match (self.robust_loss, self.method) {
            (Some(loss), _) => loss,
            (None, RegistrationMethod::Generalized) => RobustLoss::Tukey {
                k: max_correspondence_distance as f64,
            },
            (None, _) => RobustLoss::L2,
        }
    }
}
