//! Batch launcher: one external task per object id, serially or through a
//! bounded pool of workers.
//!
//! Task failures are counted in the [`LaunchReport`], never raised.
//! Cancellation stops dispatch, kills running children, and marks the
//! report as cancelled.

mod cancel;
mod pool;
mod runner;
mod serial;

pub use cancel::CancelToken;
pub use pool::run_pool;
pub use runner::{CommandRunner, LaunchPlan, TaskOutcome, TaskRunner};
pub use serial::run_serial;

use std::sync::atomic::{AtomicUsize, Ordering};

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::error::Result;

/// Counts of what happened to each object id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaunchReport {
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Started but stopped by cancellation.
    pub killed: usize,
    /// Never started because cancellation came first.
    pub skipped: usize,
    pub cancelled: bool,
}

/// Progress bar over `len` tasks, hidden unless `visible`.
pub fn progress_bar(len: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    let style = ProgressStyle::default_bar()
        .template("[{bar:40.cyan/blue}] {pos}/{len} objects ({percent}%) {msg}")
        .map(|style| style.progress_chars("▉▊▋▌▍▎▏ "))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_message("Launching");
    pb
}

/// Thread-safe counters shared by both launch modes.
#[derive(Debug, Default)]
struct Tally {
    dispatched: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    killed: AtomicUsize,
    skipped: AtomicUsize,
}

impl Tally {
    /// Run one task if not cancelled and record its outcome.
    fn run_one(&self, runner: &dyn TaskRunner, object_id: usize, cancel: &CancelToken, pb: &ProgressBar) {
        if cancel.is_cancelled() {
            self.skipped.fetch_add(1, Ordering::SeqCst);
            return;
        }

        self.dispatched.fetch_add(1, Ordering::SeqCst);
        match runner.run(object_id, cancel) {
            Ok(TaskOutcome::Succeeded) => {
                self.succeeded.fetch_add(1, Ordering::SeqCst);
                info!(object_id, "task finished");
            }
            Ok(TaskOutcome::Failed { code }) => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                warn!(object_id, ?code, "task exited unsuccessfully");
            }
            Ok(TaskOutcome::Cancelled) => {
                self.killed.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                warn!(object_id, error = %e, "task could not run");
            }
        }
        pb.inc(1);
    }

    fn report(&self) -> LaunchReport {
        let killed = self.killed.load(Ordering::SeqCst);
        let skipped = self.skipped.load(Ordering::SeqCst);
        LaunchReport {
            dispatched: self.dispatched.load(Ordering::SeqCst),
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            killed,
            skipped,
            cancelled: killed > 0 || skipped > 0,
        }
    }
}

/// Launch mode selected by the binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    Serial,
    Pool { workers: usize },
}

/// Run `object_ids` through `runner` in the given mode and finish the bar.
pub fn launch(
    object_ids: &[usize],
    runner: &dyn TaskRunner,
    mode: LaunchMode,
    cancel: &CancelToken,
    pb: &ProgressBar,
) -> Result<LaunchReport> {
    let report = match mode {
        LaunchMode::Serial => run_serial(object_ids, runner, cancel, pb),
        LaunchMode::Pool { workers } => run_pool(object_ids, runner, workers, cancel, pb)?,
    };

    if report.cancelled {
        pb.abandon_with_message("Cancelled");
    } else {
        pb.finish_with_message("Done");
    }
    info!(
        dispatched = report.dispatched,
        succeeded = report.succeeded,
        failed = report.failed,
        killed = report.killed,
        skipped = report.skipped,
        cancelled = report.cancelled,
        "launch finished"
    );
    Ok(report)
}
