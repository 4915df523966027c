//! Per-artifact regeneration lock.
//!
//! A lock is a sibling file `<artifact>.lock` created with `create_new`, so
//! exactly one worker wins it. Dropping the guard removes the file. Locks on
//! different artifacts are independent.
//!
//! The file holds the owner's pid. A lock whose owner is known to have exited
//! is cleared at once; otherwise it is only taken over after the wait budget.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use super::sleep::Sleeper;
use crate::error::{FieldError, Result};

/// Held regeneration lock. The lock file is removed on drop.
#[derive(Debug)]
pub struct ArtifactLock {
    path: PathBuf,
}

/// Result of waiting for an artifact's lock.
#[derive(Debug)]
pub enum LockOutcome {
    /// This worker holds the lock.
    Acquired(ArtifactLock),
    /// Another worker held the lock and has released it.
    Released,
    /// The wait budget ran out and the lock could not be taken over.
    TimedOut,
}

impl ArtifactLock {
    /// Lock file guarding `artifact`.
    pub fn lock_path(artifact: &Path) -> PathBuf {
        let mut name = artifact
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        artifact.with_file_name(name)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Try to take the lock without waiting. `None` means it is held.
    pub fn try_acquire(artifact: &Path) -> Result<Option<Self>> {
        let path = Self::lock_path(artifact);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| FieldError::io(parent, e))?;
        }

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                // An empty file reads as a live owner until the pid lands.
                let _ = writeln!(file, "{}", std::process::id());
                debug!(lock = %path.display(), "acquired regeneration lock");
                Ok(Some(Self { path }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(FieldError::io(&path, e)),
        }
    }

    /// Take the lock, or wait for its current holder to release it.
    ///
    /// A lock left by an exited process is removed and retried without
    /// waiting. Otherwise polls every `poll` through `sleeper`. Once `budget`
    /// is spent the lock is considered stale: its file is removed and one
    /// more acquisition is tried.
    pub fn acquire_or_wait(
        artifact: &Path,
        sleeper: &dyn Sleeper,
        poll: Duration,
        budget: Duration,
    ) -> Result<LockOutcome> {
        let path = Self::lock_path(artifact);
        let mut waited = Duration::ZERO;

        loop {
            if let Some(lock) = Self::try_acquire(artifact)? {
                return Ok(LockOutcome::Acquired(lock));
            }
            if clear_abandoned(&path)? {
                continue;
            }
            if waited >= budget {
                break;
            }
            if waited.is_zero() {
                debug!(lock = %path.display(), "regeneration lock held, waiting");
            }

            sleeper.sleep(poll);
            waited += poll.max(Duration::from_millis(1));
            if !path.exists() {
                return Ok(LockOutcome::Released);
            }
        }

        warn!(
            lock = %path.display(),
            waited_secs = waited.as_secs_f64(),
            "regeneration lock looks stale, taking it over"
        );
        remove_lock_file(&path)?;
        Ok(match Self::try_acquire(artifact)? {
            Some(lock) => LockOutcome::Acquired(lock),
            None => LockOutcome::TimedOut,
        })
    }
}

/// Pid recorded in a lock file, if it can be read yet.
fn owner_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Whether process `pid` is still running, or `None` where `/proc` is
/// unavailable.
pub(crate) fn process_alive(pid: u32) -> Option<bool> {
    if pid == std::process::id() {
        return Some(true);
    }
    let proc_root = Path::new("/proc");
    if !proc_root.join("self").exists() {
        return None;
    }
    Some(proc_root.join(pid.to_string()).exists())
}

/// Remove the lock at `path` if its owner has exited. Returns whether it did.
fn clear_abandoned(path: &Path) -> Result<bool> {
    let Some(pid) = owner_pid(path) else {
        return Ok(false);
    };
    if process_alive(pid) != Some(false) {
        return Ok(false);
    }
    // A peer may have cleared and re-taken it since the first read.
    if owner_pid(path) != Some(pid) {
        return Ok(false);
    }

    warn!(lock = %path.display(), pid, "regeneration lock owner has exited, clearing it");
    remove_lock_file(path)?;
    Ok(true)
}

fn remove_lock_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(FieldError::io(path, e)),
    }
}

impl Drop for ArtifactLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), error = %e, "failed to release regeneration lock");
        }
    }
}
