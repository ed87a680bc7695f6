//! Scheduler loop — fetch, claim, submit, sleep, repeat.
//!
//! The loop is the only producer for the worker pool. Stop is cooperative:
//! the flag is read at the top of each iteration, never inside a batch, so a
//! stop takes effect after the current batch plus one poll interval.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::runner::CommandRunner;
use crate::store::TaskStore;
use crate::worker::{Job, WorkerPool, execute_job};

/// Process-wide stop flag shared between a signal handler and the loop.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. Idempotent.
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Polls the store and feeds claimed tasks to the worker pool.
pub struct SchedulerLoop {
    store: Arc<dyn TaskStore>,
    runner: Arc<CommandRunner>,
    pool: WorkerPool,
    poll_interval: Duration,
    batch_size: usize,
}

impl SchedulerLoop {
    /// Build a loop with its own worker pool. Must be called inside a tokio
    /// runtime.
    pub fn new(store: Arc<dyn TaskStore>, config: &SchedulerConfig) -> Self {
        Self {
            store,
            runner: Arc::new(CommandRunner::new()),
            pool: WorkerPool::new(config.workers),
            poll_interval: config.poll_interval,
            batch_size: config.batch_size.max(1),
        }
    }

    /// Replace the command runner.
    pub fn with_runner(mut self, runner: CommandRunner) -> Self {
        self.runner = Arc::new(runner);
        self
    }

    pub fn workers(&self) -> usize {
        self.pool.size()
    }

    /// One fetch/claim/submit pass. Returns how many tasks this loop claimed.
    pub async fn run_once(&self) -> usize {
        let batch = match self.store.fetch_pending_batch(self.batch_size).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!(error = %e, "Failed to fetch pending tasks, will retry next poll");
                return 0;
            }
        };

        let mut claimed = 0;
        for task in batch {
            match self.store.try_claim(task.id).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(task_id = task.id, "Task claimed elsewhere, skipping");
                    continue;
                }
                Err(e) => {
                    warn!(task_id = task.id, error = %e, "Claim failed, will retry next poll");
                    continue;
                }
            }

            claimed += 1;
            debug!(task_id = task.id, priority = task.priority, "Task claimed");
            self.submit(Job::new(task.id, task.command));
        }

        claimed
    }

    fn submit(&self, job: Job) {
        let task_id = job.task_id;
        let store = Arc::clone(&self.store);
        let runner = Arc::clone(&self.runner);

        self.pool.submit(async move {
            execute_job(job, store.as_ref(), &runner).await;
        });
        debug!(task_id, "Task queued");
    }

    /// Run until `stop` is set, then drain the pool and wait for the workers.
    pub async fn run(self, stop: StopSignal) {
        info!(
            workers = self.pool.size(),
            poll_ms = self.poll_interval.as_millis() as u64,
            batch_size = self.batch_size,
            "Scheduler started"
        );

        while !stop.is_stopped() {
            let claimed = self.run_once().await;
            if claimed > 0 {
                debug!(claimed, "Submitted batch");
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        info!("Stop requested, waiting for running tasks");
        self.shutdown().await;
        info!("Scheduler stopped");
    }

    /// Drain queued jobs and join the workers.
    pub async fn shutdown(self) {
        self.pool.shutdown().await;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::store::{LibSqlBackend, NewTask, TaskStatus};

    fn config(workers: usize) -> SchedulerConfig {
        SchedulerConfig {
            workers,
            poll_interval: Duration::from_millis(10),
            batch_size: 8,
            ..SchedulerConfig::default()
        }
    }

    async fn store() -> Arc<LibSqlBackend> {
        Arc::new(LibSqlBackend::new_memory().await.unwrap())
    }

    #[test]
    fn stop_signal_is_shared() {
        let stop = StopSignal::new();
        let handle = stop.clone();
        assert!(!stop.is_stopped());
        handle.stop();
        assert!(stop.is_stopped());
    }

    #[tokio::test]
    async fn run_once_claims_and_executes() {
        let store = store().await;
        let ok = store.insert_task(&NewTask::new("echo ok")).await.unwrap();
        let bad = store.insert_task(&NewTask::new("exit 2")).await.unwrap();

        let scheduler = SchedulerLoop::new(store.clone(), &config(2));
        assert_eq!(scheduler.run_once().await, 2);
        // Nothing left to claim.
        assert_eq!(scheduler.run_once().await, 0);
        scheduler.shutdown().await;

        let ok = store.get_task(ok).await.unwrap().unwrap();
        assert_eq!(ok.status, TaskStatus::Completed);
        assert_eq!(ok.output.as_deref(), Some("ok\n"));

        let bad = store.get_task(bad).await.unwrap().unwrap();
        assert_eq!(bad.status, TaskStatus::Failed);
        assert_eq!(bad.error.as_deref(), Some("Exit code 2"));
    }

    #[tokio::test]
    async fn batch_size_limits_claims_per_pass() {
        let store = store().await;
        for i in 0..5 {
            store
                .insert_task(&NewTask::new(format!("echo {i}")))
                .await
                .unwrap();
        }

        let cfg = SchedulerConfig {
            batch_size: 2,
            ..config(1)
        };
        let scheduler = SchedulerLoop::new(store.clone(), &cfg);
        assert_eq!(scheduler.run_once().await, 2);
        assert_eq!(scheduler.run_once().await, 2);
        assert_eq!(scheduler.run_once().await, 1);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn spawn_failures_do_not_stop_the_loop() {
        let store = store().await;
        let first = store.insert_task(&NewTask::new("echo a")).await.unwrap();
        let second = store.insert_task(&NewTask::new("echo b")).await.unwrap();

        let scheduler = SchedulerLoop::new(store.clone(), &config(1))
            .with_runner(CommandRunner::new().with_shell("/nonexistent/shell"));
        assert_eq!(scheduler.run_once().await, 2);
        scheduler.shutdown().await;

        for id in [first, second] {
            let task = store.get_task(id).await.unwrap().unwrap();
            assert_eq!(task.status, TaskStatus::Failed);
            assert_eq!(task.error.as_deref(), Some("Failed to spawn command"));
        }
    }

    #[tokio::test]
    async fn cancelled_pending_task_is_never_claimed() {
        let store = store().await;
        let id = store.insert_task(&NewTask::new("echo nope")).await.unwrap();
        store.request_cancel(id).await.unwrap();

        let scheduler = SchedulerLoop::new(store.clone(), &config(1));
        assert_eq!(scheduler.run_once().await, 0);
        scheduler.shutdown().await;

        // Stays pending with the flag set; it never reaches a terminal status.
        let task = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.cancel_requested);
    }

    #[tokio::test]
    async fn run_exits_immediately_when_already_stopped() {
        let store = store().await;
        let id = store.insert_task(&NewTask::new("echo hi")).await.unwrap();

        let stop = StopSignal::new();
        stop.stop();
        SchedulerLoop::new(store.clone(), &config(1)).run(stop).await;

        let task = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn run_processes_until_stopped() {
        let store = store().await;
        let mut ids = Vec::new();
        for i in 0..4 {
            ids.push(
                store
                    .insert_task(&NewTask::new(format!("echo task{i}")))
                    .await
                    .unwrap(),
            );
        }

        let stop = StopSignal::new();
        let scheduler = SchedulerLoop::new(store.clone(), &config(2));
        let handle = tokio::spawn(scheduler.run(stop.clone()));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let tasks = store.list_tasks(10).await.unwrap();
            if tasks.iter().all(|t| t.status.is_terminal()) {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "tasks did not finish");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        stop.stop();
        handle.await.unwrap();

        for id in ids {
            let task = store.get_task(id).await.unwrap().unwrap();
            assert_eq!(task.status, TaskStatus::Completed);
        }
    }
}
