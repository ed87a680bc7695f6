//! Task Scheduler — durable SQLite-backed command queue.
//!
//! A polling loop claims pending tasks with a single conditional update and
//! hands them to a bounded worker pool, which runs each task's shell command
//! and records the outcome back in the store.

pub mod config;
pub mod error;
pub mod runner;
pub mod scheduler;
pub mod store;
pub mod worker;

pub use config::SchedulerConfig;
pub use error::{DatabaseError, TaskFailure};
pub use runner::CommandRunner;
pub use scheduler::{SchedulerLoop, StopSignal};
pub use store::{LibSqlBackend, NewTask, Task, TaskStatus, TaskStore};
pub use worker::WorkerPool;
