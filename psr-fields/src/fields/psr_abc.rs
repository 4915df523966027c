//! Grid field backed by a self-healing on-disk cache.
//!
//! Grids live at `<cache_root>/<dataset>/psr/<model>.npz`. A missing grid is
//! regenerated from the model's ground-truth mesh through the [`PsrSolver`].
//! A grid that still fails to read after the configured attempts is treated
//! as corrupt and regenerated once more. Regeneration of one artifact is
//! serialised across threads and processes by an [`ArtifactLock`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::ArrayD;
use tracing::{debug, info, warn};

use super::{apply_transform, Field, FieldData, FieldValue, Transform};
use crate::cache::{
    remove_stale_temporaries, write_atomic, ArtifactLock, CachePolicy, LockOutcome, ModelLayout,
    Sleeper, ThreadSleeper,
};
use crate::constants::{PSR_CACHE_ROOT, PSR_KEY, SURFACE_SAMPLE_COUNT};
use crate::cube::points_to_array;
use crate::error::Result;
use crate::mesh::sample_ground_truth;
use crate::npz::{read_npz_array, write_npz, Precision};
use crate::solver::{solve_checked, PsrSolver};

/// Ground-truth grid loaded from the regeneration cache.
#[derive(Clone)]
pub struct FullPsrFieldAbc {
    grid_res: usize,
    solver: Arc<dyn PsrSolver>,
    transform: Option<Transform>,
    cache_root: PathBuf,
    surface_samples: usize,
    sample_seed: Option<u64>,
    policy: CachePolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl FullPsrFieldAbc {
    pub fn new(grid_res: usize, solver: Arc<dyn PsrSolver>) -> Self {
        Self {
            grid_res,
            solver,
            transform: None,
            cache_root: PathBuf::from(PSR_CACHE_ROOT),
            surface_samples: SURFACE_SAMPLE_COUNT,
            sample_seed: None,
            policy: CachePolicy::default(),
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn with_cache_root(mut self, cache_root: impl Into<PathBuf>) -> Self {
        self.cache_root = cache_root.into();
        self
    }

    pub fn with_surface_samples(mut self, surface_samples: usize) -> Self {
        self.surface_samples = surface_samples;
        self
    }

    pub fn with_sample_seed(mut self, seed: Option<u64>) -> Self {
        self.sample_seed = seed;
        self
    }

    pub fn with_policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Cache location of the grid for `model_path`.
    pub fn artifact_path(&self, model_path: &Path) -> Result<PathBuf> {
        Ok(ModelLayout::from_model_path(model_path)?.psr_cache_path(&self.cache_root))
    }

    /// Rebuild the grid for `layout` from its mesh and atomically replace
    /// `artifact`. Does not take the lock.
    pub fn regenerate(&self, layout: &ModelLayout, artifact: &Path) -> Result<()> {
        let mesh_path = layout.mesh_path();
        info!(
            mesh = %mesh_path.display(),
            artifact = %artifact.display(),
            grid_res = self.grid_res,
            "regenerating grid"
        );

        let samples = sample_ground_truth(&mesh_path, self.surface_samples, self.sample_seed)?;
        let points = points_to_array(&samples.points);
        let normals = points_to_array(&samples.normals);
        let grid = solve_checked(
            self.solver.as_ref(),
            points.view(),
            normals.view(),
            self.grid_res,
        )?
        .into_dyn();

        write_atomic(artifact, |tmp| {
            write_npz(tmp, &[(PSR_KEY, &grid)], Precision::Half)
        })?;
        debug!(artifact = %artifact.display(), "grid written");
        Ok(())
    }

    /// Make sure a usable artifact exists, regenerating it under the lock.
    ///
    /// With `force`, an existing artifact is only kept if it reads back
    /// cleanly once the lock is held.
    fn ensure_artifact(&self, layout: &ModelLayout, artifact: &Path, force: bool) -> Result<()> {
        loop {
            let outcome = ArtifactLock::acquire_or_wait(
                artifact,
                self.sleeper.as_ref(),
                self.policy.lock_poll,
                self.policy.lock_wait,
            )?;

            match outcome {
                LockOutcome::Acquired(lock) => {
                    if let Err(e) = remove_stale_temporaries(artifact) {
                        warn!(artifact = %artifact.display(), error = %e, "could not clear stale temporaries");
                    }
                    if self.already_healthy(artifact, force) {
                        debug!(artifact = %artifact.display(), "grid produced by another worker");
                        return Ok(());
                    }
                    let result = self.regenerate(layout, artifact);
                    drop(lock);
                    return result;
                }
                LockOutcome::Released => {
                    if artifact.is_file() {
                        return Ok(());
                    }
                    // Holder gave up without writing; compete for the lock again.
                    debug!(artifact = %artifact.display(), "lock released without a grid");
                }
                LockOutcome::TimedOut => {
                    warn!(artifact = %artifact.display(), "regenerating without lock");
                    return self.regenerate(layout, artifact);
                }
            }
        }
    }

    fn already_healthy(&self, artifact: &Path, force: bool) -> bool {
        if force {
            read_npz_array(artifact, PSR_KEY).is_ok()
        } else {
            artifact.is_file()
        }
    }

    /// Read the cached grid, retrying transient failures and regenerating
    /// when it is missing or stays unreadable.
    pub fn load_grid(&self, model_path: &Path) -> Result<ArrayD<f32>> {
        let layout = ModelLayout::from_model_path(model_path)?;
        let artifact = layout.psr_cache_path(&self.cache_root);

        if !artifact.is_file() {
            warn!(artifact = %artifact.display(), "grid missing, creating it");
            self.ensure_artifact(&layout, &artifact, false)?;
        }

        let attempts = self.policy.load_attempts.max(1);
        for attempt in 1..=attempts {
            match read_npz_array(&artifact, PSR_KEY) {
                Ok(grid) => return Ok(grid),
                Err(e) => {
                    warn!(
                        artifact = %artifact.display(),
                        attempt,
                        attempts,
                        corrupt = e.is_corruption(),
                        error = %e,
                        "failed to read grid"
                    );
                    if attempt < attempts {
                        self.sleeper.sleep(self.policy.retry_backoff);
                    }
                }
            }
        }

        warn!(artifact = %artifact.display(), "grid unreadable, regenerating");
        self.ensure_artifact(&layout, &artifact, true)?;
        read_npz_array(&artifact, PSR_KEY)
    }
}

impl Field for FullPsrFieldAbc {
    fn load(&self, model_path: &Path, _idx: usize, _category: &str) -> Result<FieldData> {
        let grid = self.load_grid(model_path)?;
        apply_transform(
            self.transform.as_ref(),
            FieldData::primary(FieldValue::Array(grid)),
        )
    }

    fn check_complete(&self, _files: &HashSet<String>) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FieldError;
    use ndarray::{Array3, ArrayView2};
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    const TRIANGLE_PLY: &str = "ply
format ascii 1.0
element vertex 3
property float x
property float y
property float z
element face 1
property list uchar int vertex_indices
end_header
0 0 0
1 0 0
0 1 0
3 0 1 2
";

    fn counting_solver(calls: Arc<AtomicUsize>) -> Arc<dyn PsrSolver> {
        Arc::new(
            move |points: ArrayView2<'_, f32>,
                  _: ArrayView2<'_, f32>,
                  res: usize|
                  -> Result<Array3<f32>> {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Array3::from_elem((res, res, res), points.nrows() as f32))
            },
        )
    }

    fn field(root: &Path, calls: Arc<AtomicUsize>) -> FullPsrFieldAbc {
        FullPsrFieldAbc::new(4, counting_solver(calls))
            .with_cache_root(root.join("cache"))
            .with_surface_samples(16)
            .with_sample_seed(Some(3))
            .with_sleeper(Arc::new(|_: std::time::Duration| {}))
    }

    #[test]
    fn missing_grid_is_built_once_from_the_mesh() {
        let dir = tempdir().unwrap();
        let dataset = dir.path().join("shapes");
        fs::create_dir_all(dataset.join("03_meshes")).unwrap();
        fs::write(dataset.join("03_meshes").join("m.ply"), TRIANGLE_PLY).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let field = field(dir.path(), calls.clone());
        let model = dataset.join("m");

        let grid = field.load_grid(&model).unwrap();
        assert_eq!(grid.shape(), &[4, 4, 4]);
        assert!(grid.iter().all(|&v| v == 16.0));
        assert!(dir.path().join("cache/shapes/psr/m.npz").is_file());
        assert!(!dir.path().join("cache/shapes/psr/m.npz.lock").exists());

        field.load_grid(&model).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_mesh_propagates() {
        let dir = tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let err = field(dir.path(), calls.clone())
            .load_grid(&dir.path().join("shapes").join("m"))
            .unwrap_err();

        assert!(err.is_missing_input());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!dir.path().join("cache/shapes/psr/m.npz").exists());
    }

    #[test]
    fn solver_failure_leaves_no_artifact() {
        let dir = tempdir().unwrap();
        let dataset = dir.path().join("shapes");
        fs::create_dir_all(dataset.join("03_meshes")).unwrap();
        fs::write(dataset.join("03_meshes").join("m.ply"), TRIANGLE_PLY).unwrap();

        let failing: Arc<dyn PsrSolver> = Arc::new(
            |_: ArrayView2<'_, f32>, _: ArrayView2<'_, f32>, _: usize| -> Result<Array3<f32>> {
                Err(FieldError::solver("diverged"))
            },
        );
        let field = FullPsrFieldAbc::new(4, failing)
            .with_cache_root(dir.path().join("cache"))
            .with_surface_samples(8);

        let err = field.load_grid(&dataset.join("m")).unwrap_err();
        assert!(matches!(err, FieldError::Solver { .. }));
        let psr_dir = dir.path().join("cache/shapes/psr");
        assert_eq!(fs::read_dir(psr_dir).unwrap().count(), 0);
    }

    #[test]
    fn always_complete() {
        let calls = Arc::new(AtomicUsize::new(0));
        assert!(field(Path::new("/tmp"), calls).check_complete(&HashSet::new()));
    }
}
