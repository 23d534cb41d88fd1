pub use scan_3d as reconstruction;
pub use scan_core as core;
pub use scan_io as io;
pub use scan_point_cloud as point_cloud;
pub use scan_registration as registration;

/// Initialize a single global Rayon thread pool for all CPU-parallel routines.
///
/// Call this once at application startup before fusing or registering scans.
/// Repeated calls are idempotent and return the first initialization result.
///
/// Priority order:
/// 1. explicit `num_threads`
/// 2. `SCAN_CPU_THREADS` env var
/// 3. Rayon default
pub fn init_thread_pool(num_threads: Option<usize>) -> scan_core::Result<usize> {
    scan_core::init_global_thread_pool(num_threads)
}
