use indicatif::ProgressBar;
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use tracing::debug;

use super::{CancelToken, LaunchReport, Tally, TaskRunner};
use crate::error::{FieldError, Result};

/// Run tasks on a pool of `workers` threads, at most one task per thread at
/// a time. Completion order is unspecified. Cancellation is checked before
/// each task starts.
pub fn run_pool(
    object_ids: &[usize],
    runner: &dyn TaskRunner,
    workers: usize,
    cancel: &CancelToken,
    pb: &ProgressBar,
) -> Result<LaunchReport> {
    let workers = workers.max(1);
    let pool = ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("psr-launch-{i}"))
        .build()
        .map_err(|e| FieldError::Launch {
            message: format!("cannot start {workers} workers: {e}"),
        })?;
    debug!(workers, tasks = object_ids.len(), "starting worker pool");

    let tally = Tally::default();
    pool.install(|| {
        object_ids
            .par_iter()
            .with_max_len(1)
            .for_each(|&object_id| tally.run_one(runner, object_id, cancel, pb));
    });
    Ok(tally.report())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::TaskOutcome;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn every_id_runs_once() {
        let hits: Vec<AtomicUsize> = (0..40).map(|_| AtomicUsize::new(0)).collect();
        let runner = |id: usize, _: &CancelToken| -> Result<TaskOutcome> {
            hits[id].fetch_add(1, Ordering::SeqCst);
            Ok(TaskOutcome::Succeeded)
        };

        let ids: Vec<usize> = (0..40).collect();
        let report = run_pool(&ids, &runner, 4, &CancelToken::new(), &ProgressBar::hidden()).unwrap();

        assert!(hits.iter().all(|h| h.load(Ordering::SeqCst) == 1));
        assert_eq!(report.succeeded, 40);
        assert!(!report.cancelled);
    }

    #[test]
    fn zero_workers_still_runs() {
        let runner = |_: usize, _: &CancelToken| -> Result<TaskOutcome> { Ok(TaskOutcome::Succeeded) };
        let report = run_pool(&[1, 2, 3], &runner, 0, &CancelToken::new(), &ProgressBar::hidden()).unwrap();
        assert_eq!(report.dispatched, 3);
    }
}
