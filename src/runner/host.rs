//! Host runner implementation
//!
//! Executes commands directly on the host. Each command runs in its own
//! process group so a timeout can take down everything the command spawned.

use anyhow::{Context, Result};
use async_trait::async_trait;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::io::SeekFrom;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::time::Instant;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::process::Command;
use tracing::{debug, warn};

use super::{CommandSpec, RunOutcome, RunStatus, Runner};

/// Runner that executes commands directly on the host
#[derive(Debug, Default, Clone)]
pub struct HostRunner;

impl HostRunner {
    /// Run a command, capturing stdout and stderr into one stream
    pub async fn execute(&self, cmd: &CommandSpec) -> Result<RunOutcome> {
        debug!(
            "Running host command: {:?} in {:?} (timeout: {:?})",
            cmd.to_vec(),
            cmd.work_dir,
            cmd.timeout
        );

        // stdout and stderr share one open file description, so writes land in
        // the order the process made them and survive a kill.
        let capture = tempfile::tempfile().context("Failed to create output capture file")?;
        let stdout = capture
            .try_clone()
            .context("Failed to duplicate output capture file")?;
        let stderr = capture
            .try_clone()
            .context("Failed to duplicate output capture file")?;

        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .process_group(0)
            .kill_on_drop(true);
        if let Some(dir) = &cmd.work_dir {
            command.current_dir(dir);
        }

        let started = Instant::now();
        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to spawn {}", cmd.program))?;
        let pid = child.id();

        let status = match cmd.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => RunStatus::from(status.context("Failed to wait for command")?),
                Err(_) => {
                    warn!(
                        "{} timed out after {}s, killing process group",
                        cmd.display(),
                        limit.as_secs_f64()
                    );
                    if let Some(pid) = pid {
                        kill_process_group(pid);
                    }
                    if let Err(e) = child.kill().await {
                        debug!("Kill after timeout reported: {}", e);
                    }
                    RunStatus::TimedOut
                }
            },
            None => RunStatus::from(child.wait().await.context("Failed to wait for command")?),
        };
        let wall_time_ms = started.elapsed().as_millis() as u64;

        let output = read_capture(capture).await?;

        debug!(
            "Host command finished: status={:?}, wall_time_ms={}, output_bytes={}",
            status,
            wall_time_ms,
            output.len()
        );

        Ok(RunOutcome {
            status,
            output,
            wall_time_ms,
        })
    }
}

#[async_trait]
impl Runner for HostRunner {
    async fn run(&self, cmd: &CommandSpec) -> Result<RunOutcome> {
        self.execute(cmd).await
    }
}

impl From<ExitStatus> for RunStatus {
    fn from(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => RunStatus::Exited(code),
            (None, Some(sig)) => RunStatus::Signaled(sig),
            (None, None) => RunStatus::Exited(-1),
        }
    }
}

async fn read_capture(capture: std::fs::File) -> Result<String> {
    let mut file = File::from_std(capture);
    file.seek(SeekFrom::Start(0))
        .await
        .context("Failed to rewind output capture file")?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)
        .await
        .context("Failed to read captured output")?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn kill_process_group(pid: u32) {
    // ESRCH just means everything already exited
    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        debug!("killpg({}) failed: {}", pid, e);
    }
}
