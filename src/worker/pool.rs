//! Fixed-size worker pool draining a shared job queue.
//!
//! Jobs are futures handed over by value through an unbounded channel. Each
//! idle worker takes the receiver lock, waits for one job, releases the lock
//! and runs the job to completion, so at most `size` jobs run at once.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// A queued unit of work.
type BoxedJob = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

type SharedReceiver = Arc<Mutex<mpsc::UnboundedReceiver<BoxedJob>>>;

/// Bounded set of workers executing submitted jobs.
pub struct WorkerPool {
    tx: mpsc::UnboundedSender<BoxedJob>,
    // Keeps the channel open for as long as the pool exists.
    _rx: SharedReceiver,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers (at least one) on the current tokio runtime.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let rx: SharedReceiver = Arc::new(Mutex::new(rx));

        let workers = (0..size)
            .map(|worker_id| tokio::spawn(worker_loop(worker_id, Arc::clone(&rx))))
            .collect();

        debug!(workers = size, "Worker pool started");
        Self {
            tx,
            _rx: rx,
            workers,
        }
    }

    /// Number of workers.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queue a job. It runs as soon as a worker is free.
    ///
    /// Never refused: the receiver lives as long as the pool, and the sender
    /// only closes in `shutdown`, which consumes the pool.
    pub fn submit<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let _ = self.tx.send(Box::pin(job));
    }

    /// Close the queue, let the workers drain it, and wait for all of them.
    pub async fn shutdown(self) {
        let Self { tx, _rx, workers } = self;
        drop(tx);

        for (worker_id, handle) in workers.into_iter().enumerate() {
            if let Err(e) = handle.await {
                error!(worker_id, error = %e, "Worker exited abnormally");
            }
        }
        debug!("Worker pool stopped");
    }
}

async fn worker_loop(worker_id: usize, rx: SharedReceiver) {
    loop {
        // The lock is released before the job runs.
        let job = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };

        let Some(job) = job else {
            break;
        };

        if AssertUnwindSafe(job).catch_unwind().await.is_err() {
            warn!(worker_id, "Job panicked; worker continues");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn size_is_at_least_one() {
        let pool = WorkerPool::new(0);
        assert_eq!(pool.size(), 1);
        pool.shutdown().await;

        let pool = WorkerPool::new(3);
        assert_eq!(pool.size(), 3);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_drains_queue() {
        let pool = WorkerPool::new(2);
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let done = Arc::clone(&done);
            pool.submit(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        pool.shutdown().await;
        assert_eq!(done.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrency_is_bounded_by_pool_size() {
        let pool = WorkerPool::new(2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..6 {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            let done = Arc::clone(&done);
            pool.submit(async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(40)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        pool.shutdown().await;
        assert_eq!(done.load(Ordering::SeqCst), 6);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn panicking_job_does_not_kill_worker() {
        let pool = WorkerPool::new(1);
        let done = Arc::new(AtomicUsize::new(0));

        let explode = true;
        pool.submit(async move {
            if explode {
                panic!("boom");
            }
        });
        let after = Arc::clone(&done);
        pool.submit(async move {
            after.fetch_add(1, Ordering::SeqCst);
        });

        pool.shutdown().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
