//! Worker system — bounded command execution for claimed tasks.
//!
//! - `pool` — fixed-size worker pool draining a shared job queue
//! - `job` — the job value and its claim follow-through (cancel check, run, record)

pub mod job;
pub mod pool;

pub use job::{Job, JobOutcome, execute_job};
pub use pool::WorkerPool;
