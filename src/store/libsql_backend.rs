//! libSQL backend — async `TaskStore` implementation.
//!
//! Every state transition is one conditional `UPDATE ... RETURNING id`; the
//! transition happened iff a row comes back. The connection is shared by the
//! scheduler loop and every worker, so the outcome must travel with the
//! statement's own result rather than a later `changes()` read. SQLite
//! serializes writers on the file lock, so claims stay exclusive across
//! connections and processes.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, Row, Value, params};
use tracing::{debug, info, warn};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{NewTask, Task, TaskStatus, TaskStore};

/// How long a connection waits on a locked database before giving up.
const BUSY_TIMEOUT_MS: u64 = 5_000;

/// Column list shared by every query that maps rows with `row_to_task`.
const TASK_COLUMNS: &str = "id, command, priority, status, cancel_requested, \
     created_at, started_at, finished_at, output, error";

/// libSQL database backend.
///
/// Holds a single connection reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DatabaseError::Open(format!("Failed to create database directory: {e}"))
                })?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Open(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Open(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.pragma(&format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS}")).await?;
        backend.pragma("PRAGMA journal_mode = WAL").await?;
        backend.init_schema().await?;
        info!(path = %path.display(), "Task store opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| DatabaseError::Open(format!("Failed to create in-memory database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Open(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    /// Run a PRAGMA that reports its new value as a row.
    async fn pragma(&self, sql: &str) -> Result<(), DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, ())
            .await
            .map_err(|e| DatabaseError::Open(format!("{sql}: {e}")))?;
        while rows
            .next()
            .await
            .map_err(|e| DatabaseError::Open(format!("{sql}: {e}")))?
            .is_some()
        {}
        Ok(())
    }

    /// Collect every row of a task query.
    async fn query_tasks(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
        op: &str,
    ) -> Result<Vec<Task>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut tasks = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
        {
            tasks.push(row_to_task(&row)?);
        }
        Ok(tasks)
    }

    /// Run a guarded `UPDATE ... RETURNING id` and report whether it matched.
    async fn update_returning(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
        op: &str,
    ) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut matched = false;
        while rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
            .is_some()
        {
            matched = true;
        }
        Ok(matched)
    }

    /// Apply a terminal transition guarded on `status = 'running'`.
    async fn finish(
        &self,
        id: i64,
        target: TaskStatus,
        output: &str,
        error: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let op = format!("finish task {id}");
        let updated = self
            .update_returning(
                "UPDATE tasks
                 SET status = ?1, finished_at = datetime('now'), output = ?2, error = ?3
                 WHERE id = ?4 AND status = 'running'
                 RETURNING id",
                params![target.as_str(), output, error, id],
                &op,
            )
            .await?;

        if !updated {
            warn!(task_id = id, target = %target, "Terminal write matched no running task");
            return Err(DatabaseError::InvalidTransition {
                id,
                target: target.to_string(),
            });
        }

        debug!(task_id = id, status = %target, "Task finished");
        Ok(())
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(ndt.and_utc());
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(ndt.and_utc());
    }
    None
}

/// Read a nullable TEXT column.
fn opt_text(row: &Row, idx: i32) -> Result<Option<String>, DatabaseError> {
    match row
        .get_value(idx)
        .map_err(|e| DatabaseError::Query(format!("read column {idx}: {e}")))?
    {
        Value::Null => Ok(None),
        Value::Text(s) => Ok(Some(s)),
        Value::Blob(b) => Ok(Some(String::from_utf8_lossy(&b).into_owned())),
        Value::Integer(i) => Ok(Some(i.to_string())),
        Value::Real(r) => Ok(Some(r.to_string())),
    }
}

/// Map a libsql Row to a Task. Column order matches `TASK_COLUMNS`.
fn row_to_task(row: &Row) -> Result<Task, DatabaseError> {
    let read = |e: libsql::Error| DatabaseError::Query(format!("read task row: {e}"));

    let id: i64 = row.get(0).map_err(read)?;
    let command: String = row.get(1).map_err(read)?;
    let priority: i64 = row.get(2).map_err(read)?;
    let status: String = row.get(3).map_err(read)?;
    let cancel_requested: i64 = row.get(4).map_err(read)?;

    Ok(Task {
        id,
        command,
        priority,
        status: status.parse()?,
        cancel_requested: cancel_requested != 0,
        created_at: opt_text(row, 5)?.as_deref().and_then(parse_datetime),
        started_at: opt_text(row, 6)?.as_deref().and_then(parse_datetime),
        finished_at: opt_text(row, 7)?.as_deref().and_then(parse_datetime),
        output: opt_text(row, 8)?,
        error: opt_text(row, 9)?,
    })
}

#[async_trait]
impl TaskStore for LibSqlBackend {
    // ── Scheduling ──────────────────────────────────────────────────

    async fn fetch_pending_batch(&self, limit: usize) -> Result<Vec<Task>, DatabaseError> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE status = 'pending' AND cancel_requested = 0
             ORDER BY priority DESC, created_at ASC, id ASC
             LIMIT ?1"
        );
        self.query_tasks(&sql, params![limit as i64], "fetch_pending_batch")
            .await
    }

    async fn try_claim(&self, id: i64) -> Result<bool, DatabaseError> {
        self.update_returning(
            "UPDATE tasks SET status = 'running', started_at = datetime('now')
             WHERE id = ?1 AND status = 'pending' AND cancel_requested = 0
             RETURNING id",
            params![id],
            &format!("try_claim {id}"),
        )
        .await
    }

    async fn record_success(&self, id: i64, output: &str) -> Result<(), DatabaseError> {
        self.finish(id, TaskStatus::Completed, output, None).await
    }

    async fn record_failure(
        &self,
        id: i64,
        error: &str,
        output: &str,
    ) -> Result<(), DatabaseError> {
        self.finish(id, TaskStatus::Failed, output, Some(error)).await
    }

    async fn is_cancel_requested(&self, id: i64) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT cancel_requested FROM tasks WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("is_cancel_requested {id}: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("is_cancel_requested {id}: {e}")))?;

        match row {
            Some(row) => {
                let flag: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("is_cancel_requested {id}: {e}")))?;
                Ok(flag != 0)
            }
            None => Ok(false),
        }
    }

    // ── External writer / reader ────────────────────────────────────

    async fn insert_task(&self, task: &NewTask) -> Result<i64, DatabaseError> {
        task.validate()?;

        let mut rows = self
            .conn()
            .query(
                "INSERT INTO tasks (command, priority, status) VALUES (?1, ?2, 'pending')
                 RETURNING id",
                params![task.command.as_str(), task.priority],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_task: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_task: {e}")))?
            .ok_or_else(|| DatabaseError::Query("insert_task: no id returned".to_string()))?;
        let id: i64 = row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("insert_task: {e}")))?;

        debug!(task_id = id, priority = task.priority, "Task inserted");
        Ok(id)
    }

    async fn get_task(&self, id: i64) -> Result<Option<Task>, DatabaseError> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1");
        let mut tasks = self.query_tasks(&sql, params![id], "get_task").await?;
        Ok(tasks.pop())
    }

    async fn request_cancel(&self, id: i64) -> Result<bool, DatabaseError> {
        self.update_returning(
            "UPDATE tasks SET cancel_requested = 1
             WHERE id = ?1 AND status = 'pending'
             RETURNING id",
            params![id],
            &format!("request_cancel {id}"),
        )
        .await
    }

    async fn list_tasks(&self, limit: usize) -> Result<Vec<Task>, DatabaseError> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY id DESC LIMIT ?1");
        self.query_tasks(&sql, params![limit as i64], "list_tasks")
            .await
    }
}
