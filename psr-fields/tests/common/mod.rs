//! Shared fixtures: on-disk dataset layouts and a counting grid solver.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use ndarray::{Array3, ArrayD, ArrayView2};
use tempfile::TempDir;

use psr_fields::cache::ModelLayout;
use psr_fields::constants::PSR_KEY;
use psr_fields::npz::{write_npy, write_npz, Precision};
use psr_fields::{PsrSolver, Result};

/// Octahedron with vertices on the unit axes.
pub const OCTAHEDRON_PLY: &str = "ply
format ascii 1.0
element vertex 6
property float x
property float y
property float z
element face 8
property list uchar int vertex_indices
end_header
1 0 0
-1 0 0
0 1 0
0 -1 0
0 0 1
0 0 -1
3 0 2 4
3 2 1 4
3 1 3 4
3 3 0 4
3 2 0 5
3 1 2 5
3 3 1 5
3 0 3 5
";

/// Dataset directory `<tmp>/<name>` with a cache root at `<tmp>/cache`.
pub struct Dataset {
    _root: TempDir,
    pub dir: PathBuf,
    pub cache_root: PathBuf,
}

impl Dataset {
    pub fn new(name: &str) -> Self {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join(name);
        let cache_root = root.path().join("cache");
        fs::create_dir_all(&dir).unwrap();
        Self {
            _root: root,
            dir,
            cache_root,
        }
    }

    pub fn model_path(&self, model: &str) -> PathBuf {
        self.dir.join(model)
    }

    pub fn layout(&self, model: &str) -> ModelLayout {
        ModelLayout::from_model_path(&self.model_path(model)).unwrap()
    }

    /// Canonical cache location of the model's grid.
    pub fn artifact(&self, model: &str) -> PathBuf {
        self.layout(model).psr_cache_path(&self.cache_root)
    }

    pub fn add_mesh(&self, model: &str) -> PathBuf {
        let path = self.layout(model).mesh_path();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, OCTAHEDRON_PLY).unwrap();
        path
    }

    pub fn add_scan(&self, model: &str, points: &ArrayD<f32>) -> PathBuf {
        let path = self.layout(model).scan_path();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        write_npy(&path, points, Precision::Single).unwrap();
        path
    }

    pub fn add_artifact(&self, model: &str, grid: &ArrayD<f32>) -> PathBuf {
        let path = self.artifact(model);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        write_npz(&path, &[(PSR_KEY, grid)], Precision::Single).unwrap();
        path
    }

    pub fn add_garbage_artifact(&self, model: &str) -> PathBuf {
        let path = self.artifact(model);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"PK\x03\x04 truncated").unwrap();
        path
    }
}

/// Grid whose values survive a round trip through f16 unchanged.
pub fn reference_grid(res: usize) -> Array3<f32> {
    Array3::from_shape_fn((res, res, res), |(i, j, k)| {
        ((i * res * res + j * res + k) as f32) * 0.25
    })
}

/// Solver returning [`reference_grid`] and counting its calls.
pub struct CountingSolver {
    calls: AtomicUsize,
    delay: Duration,
}

impl CountingSolver {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PsrSolver for CountingSolver {
    fn solve(
        &self,
        points: ArrayView2<'_, f32>,
        _normals: ArrayView2<'_, f32>,
        resolution: usize,
    ) -> Result<Array3<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(points.iter().all(|&v| (0.0..=1.0).contains(&v)));
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        Ok(reference_grid(resolution))
    }
}

/// Round every value through half precision.
pub fn through_f16(array: &ArrayD<f32>) -> ArrayD<f32> {
    array.mapv(|v| half::f16::from_f32(v).to_f32())
}

pub fn lock_path(artifact: &Path) -> PathBuf {
    psr_fields::cache::ArtifactLock::lock_path(artifact)
}
