use std::process::{Child, Command};
use std::time::Duration;

use tracing::{info, warn};

use super::cancel::CancelToken;
use crate::constants::{CHILD_POLL_INTERVAL, LAUNCH_ITEM_COUNT, OBJECT_ID_PLACEHOLDER};
use crate::error::{FieldError, Result};

/// How a single task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded,
    /// Exited unsuccessfully. `code` is `None` when killed by a signal.
    Failed { code: Option<i32> },
    /// Stopped because the cancel token fired.
    Cancelled,
}

/// Runs the work for one object id.
pub trait TaskRunner: Send + Sync {
    fn run(&self, object_id: usize, cancel: &CancelToken) -> Result<TaskOutcome>;
}

impl<F> TaskRunner for F
where
    F: Fn(usize, &CancelToken) -> Result<TaskOutcome> + Send + Sync,
{
    fn run(&self, object_id: usize, cancel: &CancelToken) -> Result<TaskOutcome> {
        self(object_id, cancel)
    }
}

/// External command run once per object id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub program: String,
    /// Arguments with [`OBJECT_ID_PLACEHOLDER`] substituted per task.
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub object_ids: Vec<usize>,
}

impl LaunchPlan {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: Vec::new(),
            object_ids: (0..LAUNCH_ITEM_COUNT).collect(),
        }
    }

    /// `<python> <script> <config> --object_id {object_id}` over `0..count`,
    /// with GNU threading for MKL.
    pub fn optimisation(python: &str, script: &str, config: &str, count: usize) -> Self {
        let args = vec![
            script.to_string(),
            config.to_string(),
            "--object_id".to_string(),
            OBJECT_ID_PLACEHOLDER.to_string(),
        ];
        Self::new(python, args)
            .with_env("MKL_THREADING_LAYER", "GNU")
            .with_object_ids((0..count).collect())
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_object_ids(mut self, object_ids: Vec<usize>) -> Self {
        self.object_ids = object_ids;
        self
    }

    /// Arguments for one task.
    pub fn args_for(&self, object_id: usize) -> Vec<String> {
        let id = object_id.to_string();
        self.args
            .iter()
            .map(|arg| arg.replace(OBJECT_ID_PLACEHOLDER, &id))
            .collect()
    }

    pub fn command_for(&self, object_id: usize) -> Command {
        let mut command = Command::new(&self.program);
        command.args(self.args_for(object_id));
        for (key, value) in &self.env {
            command.env(key, value);
        }
        command
    }

    /// Shell-like rendering for logs.
    pub fn display_for(&self, object_id: usize) -> String {
        std::iter::once(self.program.clone())
            .chain(self.args_for(object_id))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Spawns a fresh process per task and kills it on cancellation.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    plan: LaunchPlan,
    poll: Duration,
}

impl CommandRunner {
    pub fn new(plan: LaunchPlan) -> Self {
        Self {
            plan,
            poll: CHILD_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    fn supervise(&self, object_id: usize, child: &mut Child, cancel: &CancelToken) -> Result<TaskOutcome> {
        let launch_err = |e: std::io::Error| FieldError::Launch {
            message: format!("object {object_id}: {e}"),
        };

        loop {
            if cancel.is_cancelled() {
                warn!(object_id, pid = child.id(), "cancelling task");
                // Already exited is fine.
                let _ = child.kill();
                child.wait().map_err(launch_err)?;
                return Ok(TaskOutcome::Cancelled);
            }

            if let Some(status) = child.try_wait().map_err(launch_err)? {
                return Ok(if status.success() {
                    TaskOutcome::Succeeded
                } else {
                    TaskOutcome::Failed {
                        code: status.code(),
                    }
                });
            }
            std::thread::sleep(self.poll);
        }
    }
}

impl TaskRunner for CommandRunner {
    fn run(&self, object_id: usize, cancel: &CancelToken) -> Result<TaskOutcome> {
        info!(object_id, command = %self.plan.display_for(object_id), "spawning task");
        let mut child = self
            .plan
            .command_for(object_id)
            .spawn()
            .map_err(|e| FieldError::Launch {
                message: format!("cannot spawn '{}': {e}", self.plan.program),
            })?;
        self.supervise(object_id, &mut child, cancel)
    }
}
