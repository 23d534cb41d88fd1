//! Core types for the scan toolkit.
//!
//! Rigid poses, camera intrinsics, point clouds and the error type every other
//! crate in the workspace builds on.

pub mod error;
pub mod geometry;
pub mod point_cloud;
pub mod robust_loss;
pub mod runtime;

pub use error::{Error, Result};
pub use geometry::*;
pub use point_cloud::*;
pub use robust_loss::RobustLoss;
pub use runtime::{current_cpu_threads, init_global_thread_pool};
