use indicatif::ProgressBar;

use super::{CancelToken, LaunchReport, Tally, TaskRunner};

/// Run tasks one after another in id order. Exit statuses are counted and
/// otherwise ignored.
pub fn run_serial(
    object_ids: &[usize],
    runner: &dyn TaskRunner,
    cancel: &CancelToken,
    pb: &ProgressBar,
) -> LaunchReport {
    let tally = Tally::default();
    for &object_id in object_ids {
        tally.run_one(runner, object_id, cancel, pb);
    }
    tally.report()
}
