//! Shared configuration for PSR dataset fields and the batch launcher.

use std::time::Duration;

/// Padding of the canonical cube used when normalising mesh-space points.
pub const PSR_PADDING: f32 = 1.2;

/// Default padding parameter of the point cloud field.
pub const POINT_CLOUD_PADDING: f32 = 0.1;

/// Default rescale divisor applied to PSR-style point inputs.
pub const POINT_CLOUD_SCALE: f32 = 1.2;

/// Surface samples drawn from a ground-truth mesh when regenerating a grid.
pub const SURFACE_SAMPLE_COUNT: usize = 100_000;

/// Read attempts on a cached grid before it is declared corrupt.
pub const LOAD_ATTEMPTS: u32 = 3;

/// Backoff between read attempts on a cached grid.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(3);

/// Poll interval while another worker holds a regeneration lock.
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Longest wait on a held regeneration lock before it is treated as stale.
pub const LOCK_WAIT_BUDGET: Duration = Duration::from_secs(600);

/// Default grid resolution for regenerated PSR grids.
pub const DEFAULT_GRID_RES: usize = 128;

/// Dataset layout directory and file names.
pub const MESH_DIR: &str = "03_meshes";
pub const SCAN_DIR: &str = "04_pts";
pub const PSR_DIR: &str = "psr";
pub const PSR_FILE: &str = "psr.npz";
pub const PSR_KEY: &str = "psr";
pub const POINTS_KEY: &str = "points";
pub const NORMALS_KEY: &str = "normals";
pub const POINTS_SCAN_KEY: &str = "points_scan";
pub const DEFAULT_POINT_CLOUD_FILE: &str = "pointcloud.npz";

/// Root of the regenerated grid cache, relative to the process working directory.
pub const PSR_CACHE_ROOT: &str = "data/p2s";

/// Number of objects the launcher iterates over.
pub const LAUNCH_ITEM_COUNT: usize = 100;

/// Concurrent worker processes in the launcher pool.
pub const LAUNCH_WORKERS: usize = 25;

/// Poll interval while a launched child process runs.
pub const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Placeholder replaced by the object id in launcher argument templates.
pub const OBJECT_ID_PLACEHOLDER: &str = "{object_id}";
