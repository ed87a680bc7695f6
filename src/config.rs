//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

/// Default worker pool size.
pub const DEFAULT_WORKERS: usize = 4;

/// Default delay between polls of the store.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(300);

/// Default maximum number of tasks fetched per poll.
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Path to the SQLite store file.
    pub db_path: PathBuf,
    /// Number of workers executing commands concurrently.
    pub workers: usize,
    /// Sleep between two fetch/claim passes.
    pub poll_interval: Duration,
    /// Maximum number of pending tasks fetched per pass.
    pub batch_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/tasks.db"),
            workers: DEFAULT_WORKERS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl SchedulerConfig {
    /// Load configuration from `TASK_SCHEDULER_*` environment variables.
    ///
    /// Unparsable values fall back to the default with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (environment, tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let db_path = lookup("TASK_SCHEDULER_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let workers = parse_or("TASK_SCHEDULER_WORKERS", &lookup, defaults.workers);
        let poll_ms = parse_or(
            "TASK_SCHEDULER_POLL_MS",
            &lookup,
            defaults.poll_interval.as_millis() as u64,
        );
        let batch_size = parse_or("TASK_SCHEDULER_BATCH_SIZE", &lookup, defaults.batch_size);

        Self {
            db_path,
            workers,
            poll_interval: Duration::from_millis(poll_ms),
            batch_size: batch_size.max(1),
        }
    }
}

fn parse_or<T>(key: &str, lookup: &impl Fn(&str) -> Option<String>, default: T) -> T
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(key, value = %raw, error = %e, "Ignoring invalid config value");
                default
            }
        },
        None => default,
    }
}
