//! Command runner — executes a task's command in a subordinate shell.
//!
//! Standard output and standard error are merged into one pipe before the
//! command starts, so the captured text keeps the order the process wrote it.
//! The captured bytes are decoded lossily as UTF-8, so invalid sequences in
//! binary output are stored as U+FFFD rather than verbatim.
//! There is no timeout: a command that never exits holds its worker.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use tokio::process::Command;

use crate::error::{CommandError, TaskFailure};

/// How the subordinate process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Exited normally with this status code.
    Code(i32),
    /// Killed by this signal (unix only).
    Signal(i32),
}

/// Result of a command that was spawned and reaped.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit: ExitKind,
    /// Combined stdout and stderr.
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit == ExitKind::Code(0)
    }

    /// The failure to record for this outcome, if it is not a success.
    pub fn failure(&self) -> Option<TaskFailure> {
        match self.exit {
            ExitKind::Code(0) => None,
            ExitKind::Code(code) => Some(TaskFailure::NonZeroExit(code)),
            ExitKind::Signal(sig) => Some(TaskFailure::Signaled(sig)),
        }
    }
}

/// Runs shell commands and captures their merged output.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    /// Shell program (`sh` or `cmd`).
    shell: PathBuf,
}

impl CommandRunner {
    /// Create a runner using the platform shell.
    pub fn new() -> Self {
        let shell = if cfg!(target_os = "windows") { "cmd" } else { "sh" };
        Self {
            shell: PathBuf::from(shell),
        }
    }

    /// Use a different shell program.
    pub fn with_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }

    fn build_command(&self, cmd: &str) -> Command {
        let mut command = Command::new(&self.shell);
        if cfg!(target_os = "windows") {
            command.arg("/C").arg(format!("{cmd} 2>&1"));
        } else {
            command.arg("-c").arg(format!("exec 2>&1\n{cmd}"));
        }

        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }

    /// Run `cmd` to completion and capture its output.
    ///
    /// Only a failure to start or reap the process is an `Err`; a non-zero
    /// exit is reported through `CommandOutput::exit`.
    pub async fn run(&self, cmd: &str) -> Result<CommandOutput, CommandError> {
        let child = self.build_command(cmd).spawn().map_err(CommandError::Spawn)?;

        // Reads both pipes while waiting, so large outputs cannot fill a pipe
        // and stall the child.
        let result = child.wait_with_output().await.map_err(CommandError::Io)?;

        let mut output = String::from_utf8_lossy(&result.stdout).into_owned();
        if !result.stderr.is_empty() {
            output.push_str(&String::from_utf8_lossy(&result.stderr));
        }

        Ok(CommandOutput {
            exit: exit_kind(result.status),
            output,
        })
    }
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

fn exit_kind(status: ExitStatus) -> ExitKind {
    if let Some(code) = status.code() {
        return ExitKind::Code(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return ExitKind::Signal(sig);
        }
    }
    ExitKind::Code(-1)
}
