//! Runner module - Execution abstraction layer
//!
//! Every external program the trial pipeline touches (`git`, `make`, the style
//! checker, the per-project `test.sh` / `cleanup.sh` scripts) goes through the
//! single `Runner` trait defined here:
//! - `CommandSpec` describes what to run: program, arguments, working directory, timeout
//! - `RunOutcome` carries the merged stdout/stderr and how the process ended
//! - `HostRunner` executes directly on the host
//!
//! The runner module does NOT:
//! - Decide whether a step passed or failed
//! - Write anything into the trial log

pub mod host;

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command specification for execution
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    /// Program path or name
    pub program: String,
    /// Arguments to the program
    pub args: Vec<String>,
    /// Working directory (inherits the server's when unset)
    pub work_dir: Option<PathBuf>,
    /// Wall-clock limit; the process group is killed when it expires
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            work_dir: None,
            timeout: None,
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(|a| a.into()).collect();
        self
    }

    /// Append a single argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_work_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.work_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Create from a command vector (first element is program, rest are args)
    pub fn from_vec(cmd: &[String]) -> Self {
        let mut iter = cmd.iter();
        let program = iter.next().cloned().unwrap_or_default();
        Self::new(program).with_args(iter.cloned())
    }

    /// Convert to a vector of strings (program + args)
    pub fn to_vec(&self) -> Vec<String> {
        let mut v = vec![self.program.clone()];
        v.extend(self.args.clone());
        v
    }

    /// Shell-like rendering used in log messages
    pub fn display(&self) -> String {
        self.to_vec().join(" ")
    }
}

/// How the process ended (raw, no pass/fail interpretation)
#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    /// Program exited normally with given exit code
    Exited(i32),
    /// Killed by signal
    Signaled(i32),
    /// Wall-clock timeout expired and the process was killed
    TimedOut,
}

impl RunStatus {
    /// Check if execution was successful (exited with code 0)
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Exited(0))
    }
}

/// Outcome of running a program
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Execution status
    pub status: RunStatus,
    /// Merged stdout and stderr, in the order the process wrote them.
    /// On timeout this is whatever was written before the kill.
    pub output: String,
    /// Wall-clock time in milliseconds
    pub wall_time_ms: u64,
}

impl RunOutcome {
    /// Check if execution was successful
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Runner trait for executing programs
#[async_trait]
pub trait Runner: Send + Sync {
    /// Run a command to completion (or timeout).
    ///
    /// Returns `Err` only when the process could not be started or its output
    /// could not be collected; a non-zero exit is an `Ok` outcome.
    async fn run(&self, cmd: &CommandSpec) -> Result<RunOutcome>;
}

// Re-exports
pub use host::HostRunner;
