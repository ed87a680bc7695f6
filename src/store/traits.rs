//! `TaskStore` trait — the single async interface to the task table.
//!
//! All state transitions are single conditional statements, so any number of
//! schedulers (threads or processes) can share one store without a lock.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DatabaseError;

/// Lowest priority accepted by `insert_task`.
pub const MIN_PRIORITY: i64 = -10;

/// Highest priority accepted by `insert_task`.
pub const MAX_PRIORITY: i64 = 10;

/// Lifecycle of a task: `pending → running → {completed, failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    /// `completed` and `failed` admit no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(DatabaseError::Query(format!("unknown task status {other:?}"))),
        }
    }
}

/// A persisted task row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub command: String,
    pub priority: i64,
    pub status: TaskStatus,
    pub cancel_requested: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub output: Option<String>,
    pub error: Option<String>,
}

/// A task submission, as an external writer would insert it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub command: String,
    pub priority: i64,
}

impl NewTask {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Reject empty commands and out-of-range priorities.
    pub fn validate(&self) -> Result<(), DatabaseError> {
        if self.command.trim().is_empty() {
            return Err(DatabaseError::Validation(
                "command must not be empty".to_string(),
            ));
        }
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&self.priority) {
            return Err(DatabaseError::Validation(format!(
                "priority {} outside [{MIN_PRIORITY}, {MAX_PRIORITY}]",
                self.priority
            )));
        }
        Ok(())
    }
}

/// Backend-agnostic task store.
#[async_trait]
pub trait TaskStore: Send + Sync {
    // ── Scheduling ──────────────────────────────────────────────────

    /// Up to `limit` pending, non-cancelled tasks, highest priority first,
    /// FIFO among equal priorities. Read-only.
    async fn fetch_pending_batch(&self, limit: usize) -> Result<Vec<Task>, DatabaseError>;

    /// Atomically move a task from `pending` to `running`.
    ///
    /// Returns `true` only for the one caller whose update affected the row.
    /// `false` means another claimant won, or the task was cancelled or is
    /// no longer pending.
    async fn try_claim(&self, id: i64) -> Result<bool, DatabaseError>;

    /// `running → completed`.
    async fn record_success(&self, id: i64, output: &str) -> Result<(), DatabaseError>;

    /// `running → failed`.
    async fn record_failure(&self, id: i64, error: &str, output: &str)
    -> Result<(), DatabaseError>;

    /// Current value of the cancellation flag. Unknown ids read as `false`.
    async fn is_cancel_requested(&self, id: i64) -> Result<bool, DatabaseError>;

    // ── External writer / reader ────────────────────────────────────

    /// Insert a new `pending` task and return its id.
    async fn insert_task(&self, task: &NewTask) -> Result<i64, DatabaseError>;

    /// Fetch one task by id.
    async fn get_task(&self, id: i64) -> Result<Option<Task>, DatabaseError>;

    /// Flag a still-pending task for cancellation. Returns whether the flag
    /// was set.
    async fn request_cancel(&self, id: i64) -> Result<bool, DatabaseError>;

    /// Most recently created tasks first.
    async fn list_tasks(&self, limit: usize) -> Result<Vec<Task>, DatabaseError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("queued".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }

    #[test]
    fn new_task_validation() {
        assert!(NewTask::new("echo hi").validate().is_ok());
        assert!(NewTask::new("  ").validate().is_err());
        assert!(NewTask::new("echo").with_priority(11).validate().is_err());
        assert!(NewTask::new("echo").with_priority(-10).validate().is_ok());
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&TaskStatus::Completed).unwrap();
        assert_eq!(json, "\"completed\"");
    }
}
