use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "task-scheduler")]
#[command(about = "Durable SQLite task queue: run the scheduler, or submit and inspect tasks.")]
#[command(args_conflicts_with_subcommands = true)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Option<Command>,

    /// Without a subcommand, behaves like `run`.
    #[command(flatten)]
    pub(crate) run: RunArgs,
}

#[derive(Args)]
pub(crate) struct RunArgs {
    /// Path to the task store (default: $TASK_SCHEDULER_DB_PATH or ./data/tasks.db)
    pub(crate) db: Option<PathBuf>,

    /// Number of workers (default: $TASK_SCHEDULER_WORKERS or 4)
    pub(crate) workers: Option<usize>,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Poll the store and execute claimed tasks until interrupted.
    Run(RunArgs),
    /// Insert a pending task and print its id.
    Submit {
        db: PathBuf,
        /// Shell command to execute.
        command: String,
        /// Higher runs first, between -10 and 10.
        #[arg(default_value_t = 0, allow_negative_numbers = true)]
        priority: i64,
    },
    /// Print one task as JSON.
    Status { db: PathBuf, id: i64 },
    /// Flag a pending task so it is never started.
    Cancel { db: PathBuf, id: i64 },
    /// Print the newest tasks as JSON.
    List {
        db: PathBuf,
        #[arg(default_value_t = 50)]
        limit: usize,
    },
}

impl Cli {
    /// The subcommand to execute, with the bare form mapped to `run`.
    pub(crate) fn into_command(self) -> Command {
        self.command.unwrap_or(Command::Run(self.run))
    }
}
