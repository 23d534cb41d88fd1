//! Point cloud registration algorithms
//!
//! This crate provides rigid 3D point cloud registration:
//! - ICP (Iterative Closest Point), point-to-point and point-to-plane
//! - Colored ICP
//! - Generalized ICP with a robust kernel
//! - Multi-scale ICP with an information matrix for pose-graph style consumers

pub mod registration;

pub use registration::{
    compute_color_gradients, evaluate_registration, get_information_matrix_from_point_clouds,
    registration_icp, registration_multi_scale_icp, ConvergenceCriteria, ICPResult,
    RegistrationConfig, RegistrationMethod, RegistrationResult, ScaleLevel,
};
pub use registration::multiscale::MIN_USABLE_FITNESS;
