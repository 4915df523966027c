//! On-disk layout of dataset models and the regenerated grid cache.
//!
//! A model lives at `<dataset_dir>/<model_name>`. Its ground-truth mesh and
//! scan live in sibling directories of the dataset, and regenerated grids are
//! cached under `<cache_root>/<dataset_name>/psr/<model_name>.npz`.

mod lock;
mod sleep;

pub use lock::{ArtifactLock, LockOutcome};
pub use sleep::{Sleeper, ThreadSleeper};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::debug;

use crate::constants::{
    LOAD_ATTEMPTS, LOCK_POLL_INTERVAL, LOCK_WAIT_BUDGET, MESH_DIR, PSR_DIR, RETRY_BACKOFF,
    SCAN_DIR,
};
use crate::error::{FieldError, Result};

/// Names and paths derived from a model directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelLayout {
    pub model_path: PathBuf,
    pub dataset_dir: PathBuf,
    pub dataset_name: String,
    pub model_name: String,
}

impl ModelLayout {
    /// Split `model_path` into dataset and model names.
    ///
    /// Fails with [`FieldError::InvalidPath`] when either component is
    /// missing or not valid UTF-8.
    pub fn from_model_path(model_path: &Path) -> Result<Self> {
        let invalid = || FieldError::InvalidPath {
            path: model_path.to_path_buf(),
        };

        let model_name = model_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(invalid)?
            .to_string();
        let dataset_dir = model_path.parent().ok_or_else(invalid)?.to_path_buf();
        let dataset_name = dataset_dir
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(invalid)?
            .to_string();

        Ok(Self {
            model_path: model_path.to_path_buf(),
            dataset_dir,
            dataset_name,
            model_name,
        })
    }

    /// Ground-truth mesh: `<dataset_dir>/03_meshes/<model_name>.ply`.
    pub fn mesh_path(&self) -> PathBuf {
        self.dataset_dir
            .join(MESH_DIR)
            .join(format!("{}.ply", self.model_name))
    }

    /// Scanned points: `<dataset_dir>/04_pts/<model_name>.xyz.npy`.
    pub fn scan_path(&self) -> PathBuf {
        self.dataset_dir
            .join(SCAN_DIR)
            .join(format!("{}.xyz.npy", self.model_name))
    }

    /// Cached grid: `<cache_root>/<dataset_name>/psr/<model_name>.npz`.
    pub fn psr_cache_path(&self, cache_root: &Path) -> PathBuf {
        cache_root
            .join(&self.dataset_name)
            .join(PSR_DIR)
            .join(format!("{}.npz", self.model_name))
    }
}

/// Retry and lock timing for cached artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub load_attempts: u32,
    pub retry_backoff: Duration,
    pub lock_poll: Duration,
    pub lock_wait: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            load_attempts: LOAD_ATTEMPTS,
            retry_backoff: RETRY_BACKOFF,
            lock_poll: LOCK_POLL_INTERVAL,
            lock_wait: LOCK_WAIT_BUDGET,
        }
    }
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Write `path` through a temporary sibling and rename it into place.
///
/// Readers either see the previous file or the complete new one. The
/// temporary file is removed if `write` fails.
pub fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| FieldError::io(parent, e))?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| FieldError::InvalidPath {
            path: path.to_path_buf(),
        })?;
    let tmp = parent.join(format!(
        "{}{}.{}.tmp",
        temp_prefix(file_name),
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    if let Err(e) = write(&tmp) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        FieldError::io(path, e)
    })
}

fn temp_prefix(file_name: &str) -> String {
    format!(".{file_name}.")
}

/// Pid of the writer that created temporary `name`, if it is one of ours.
fn temp_owner(name: &str, prefix: &str) -> Option<u32> {
    let (pid, counter) = name
        .strip_prefix(prefix)?
        .strip_suffix(".tmp")?
        .split_once('.')?;
    counter.parse::<u64>().ok()?;
    pid.parse().ok()
}

/// Delete temporaries next to `path` whose writer process has exited.
///
/// Returns how many were removed. Temporaries of live or unknown writers
/// are left alone.
pub fn remove_stale_temporaries(path: &Path) -> Result<usize> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        return Ok(0);
    };
    let entries = match fs::read_dir(parent) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(FieldError::io(parent, e)),
    };

    let prefix = temp_prefix(file_name);
    let mut removed = 0;
    for entry in entries {
        let entry = entry.map_err(|e| FieldError::io(parent, e))?;
        let owner = entry
            .file_name()
            .to_str()
            .and_then(|name| temp_owner(name, &prefix));
        let Some(pid) = owner else {
            continue;
        };
        if lock::process_alive(pid) != Some(false) {
            continue;
        }

        let tmp = entry.path();
        match fs::remove_file(&tmp) {
            Ok(()) => {
                debug!(tmp = %tmp.display(), pid, "removed temporary of exited writer");
                removed += 1;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(FieldError::io(&tmp, e)),
        }
    }
    Ok(removed)
}
