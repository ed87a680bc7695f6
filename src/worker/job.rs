//! One claimed task, carried from the scheduler loop to a worker.

use tracing::{debug, error, info, warn};

use crate::error::{CommandError, TaskFailure};
use crate::runner::CommandRunner;
use crate::store::TaskStore;

/// Immutable unit of work: a claimed task's id and command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub task_id: i64,
    pub command: String,
}

impl Job {
    pub fn new(task_id: i64, command: impl Into<String>) -> Self {
        Self {
            task_id,
            command: command.into(),
        }
    }
}

/// Terminal outcome of a job, as written to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed(TaskFailure),
}

/// Run a claimed task to a terminal status.
///
/// The cancellation flag is read once before the command starts. Store write
/// failures are logged and absorbed; the task is then left `running`.
pub async fn execute_job(job: Job, store: &dyn TaskStore, runner: &CommandRunner) -> JobOutcome {
    let Job { task_id, command } = job;

    let cancelled = match store.is_cancel_requested(task_id).await {
        Ok(flag) => flag,
        Err(e) => {
            warn!(task_id, error = %e, "Could not read cancel flag, running anyway");
            false
        }
    };

    if cancelled {
        info!(task_id, "Task cancelled before start");
        let failure = TaskFailure::Canceled;
        record_failure(store, task_id, &failure, "").await;
        return JobOutcome::Failed(failure);
    }

    debug!(task_id, command = %command, "Running task");

    match runner.run(&command).await {
        Ok(out) => match out.failure() {
            None => {
                if let Err(e) = store.record_success(task_id, &out.output).await {
                    error!(task_id, error = %e, "Failed to record task success");
                }
                info!(task_id, "Task completed");
                JobOutcome::Completed
            }
            Some(failure) => {
                info!(task_id, reason = %failure, "Task failed");
                record_failure(store, task_id, &failure, &out.output).await;
                JobOutcome::Failed(failure)
            }
        },
        Err(e) => {
            let failure = match e {
                CommandError::Spawn(_) => TaskFailure::SpawnFailed,
                CommandError::Io(_) => TaskFailure::OutputLost,
            };
            warn!(task_id, error = %e, "Task command could not run");
            record_failure(store, task_id, &failure, "").await;
            JobOutcome::Failed(failure)
        }
    }
}

async fn record_failure(store: &dyn TaskStore, task_id: i64, failure: &TaskFailure, output: &str) {
    if let Err(e) = store
        .record_failure(task_id, &failure.to_string(), output)
        .await
    {
        error!(task_id, error = %e, "Failed to record task failure");
    }
}
