//! Persistence layer — SQLite-backed task table.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{NewTask, Task, TaskStatus, TaskStore};
