//! Batch launcher entry point: runs the optimisation script once per object.
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use psr_fields::constants::{LAUNCH_ITEM_COUNT, LAUNCH_WORKERS};
use psr_fields::launcher::{
    CancelToken, CommandRunner, LaunchMode, LaunchPlan, launch, progress_bar,
};
use psr_fields::logging::init_tracing;

#[derive(Parser, Debug)]
#[command(name = "psr-launch", about = "Run per-object PSR optimisation jobs")]
struct Args {
    /// Number of objects, run with ids `0..count`.
    #[arg(long, default_value_t = LAUNCH_ITEM_COUNT)]
    count: usize,

    /// Concurrent worker processes.
    #[arg(long, default_value_t = LAUNCH_WORKERS)]
    workers: usize,

    /// Run objects one at a time instead of through the pool.
    #[arg(long)]
    serial: bool,

    /// Cancel everything still running after this many seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,

    #[arg(long, default_value = "python")]
    python: String,

    #[arg(long, default_value = "optim_hierarchy.py")]
    script: String,

    #[arg(long, default_value = "configs/optim_based/abc.yaml")]
    config: String,

    /// Show a progress bar.
    #[arg(long)]
    progress: bool,
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let args = Args::parse();
    if let Err(e) = init_tracing("info") {
        eprintln!("tracing already initialised: {e}");
    }

    let mut cancel = CancelToken::new();
    if let Some(secs) = args.timeout_secs {
        cancel = cancel.with_timeout(Duration::from_secs(secs));
    }
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        error!("interrupt received, cancelling launch");
        handler_token.cancel();
    })?;

    let plan = LaunchPlan::optimisation(&args.python, &args.script, &args.config, args.count);
    let mode = if args.serial {
        LaunchMode::Serial
    } else {
        LaunchMode::Pool {
            workers: args.workers,
        }
    };
    info!(?mode, count = args.count, "launching {}", plan.display_for(0));

    let pb = progress_bar(plan.object_ids.len(), args.progress);
    let object_ids = plan.object_ids.clone();
    let runner = CommandRunner::new(plan);
    let report = launch(&object_ids, &runner, mode, &cancel, &pb)?;

    if report.cancelled {
        return Ok(ExitCode::from(130));
    }
    Ok(ExitCode::SUCCESS)
}
