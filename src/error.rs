//! Error types for the task scheduler.

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// The store could not be opened. Fatal at startup.
    #[error("Failed to open store: {0}")]
    Open(String),

    /// A single read or write failed. The row keeps its previous state.
    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Task {id} is not in a state that allows transition to {target}")]
    InvalidTransition { id: i64, target: String },

    #[error("Invalid task: {0}")]
    Validation(String),
}

/// Errors raised while starting or reaping a subordinate process.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Failed to spawn command: {0}")]
    Spawn(std::io::Error),

    #[error("Failed to collect command output: {0}")]
    Io(std::io::Error),
}

/// Why a claimed task ended as `failed`.
///
/// The `Display` text is what gets persisted in the task's `error` column.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskFailure {
    #[error("Canceled before start")]
    Canceled,

    #[error("Exit code {0}")]
    NonZeroExit(i32),

    #[error("Terminated by signal {0}")]
    Signaled(i32),

    #[error("Failed to spawn command")]
    SpawnFailed,

    #[error("Failed to collect command output")]
    OutputLost,
}
