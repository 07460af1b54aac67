//! Pipeline steps
//!
//! `StepRun` is the one executor every step goes through: it runs commands
//! through the `Runner`, collects their output, and turns any failure
//! (non-zero exit, signal, timeout, spawn error) into an explanatory line in
//! the step's log entry. Once a command fails, later commands in the same
//! step are skipped.

use std::fmt;
use std::path::Path;

use tracing::{debug, info, warn};

use super::context::TrialContext;
use super::journal::{LogEntry, Stage, StepOutcome};
use super::pipeline::TrialConfig;
use crate::runner::{CommandSpec, RunStatus, Runner};

/// Name the credentials file gets inside the application sub-folder
pub const CREDENTIALS_FILE_NAME: &str = "credentials.ini";

/// Appended when test.sh finishes successfully
pub const TESTS_COMPLETE: &str = "*Automated tests complete*";

/// Accumulates the output and outcome of one step
pub struct StepRun<'a> {
    runner: &'a dyn Runner,
    stage: Stage,
    output: String,
    outcome: StepOutcome,
}

impl<'a> StepRun<'a> {
    pub fn new(runner: &'a dyn Runner, stage: Stage) -> Self {
        info!("Entering {}", stage);
        Self {
            runner,
            stage,
            output: String::new(),
            outcome: StepOutcome::Passed,
        }
    }

    /// Append text to the step's output, keeping pieces on separate lines
    pub fn append(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if !self.output.is_empty() && !self.output.ends_with('\n') {
            self.output.push('\n');
        }
        self.output.push_str(text);
    }

    /// Record a failure with an explanation
    pub fn fail(&mut self, message: impl fmt::Display) {
        let message = message.to_string();
        warn!("{} failed: {}", self.stage, message);
        self.append(&message);
        if self.outcome.is_passed() {
            self.outcome = StepOutcome::Failed;
        }
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_passed()
    }

    /// Run one command; returns whether it succeeded
    pub async fn command(&mut self, cmd: &CommandSpec) -> bool {
        if !self.is_ok() {
            return false;
        }

        let outcome = match self.runner.run(cmd).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.fail(format!("Could not run '{}': {:#}", cmd.display(), e));
                return false;
            }
        };

        debug!(
            "{} output ({} ms):\n{}",
            cmd.display(),
            outcome.wall_time_ms,
            outcome.output
        );
        self.append(&outcome.output);
        if outcome.is_success() {
            return true;
        }

        match outcome.status {
            RunStatus::Exited(code) => {
                self.fail(format!("'{}' exited with status {}", cmd.display(), code));
                false
            }
            RunStatus::Signaled(sig) => {
                self.fail(format!("'{}' was killed by signal {}", cmd.display(), sig));
                false
            }
            RunStatus::TimedOut => {
                let limit = cmd.timeout.unwrap_or_default();
                self.fail(format!(
                    "*** {} timed out after {:?} ***",
                    self.stage.banner(),
                    limit
                ));
                self.outcome = StepOutcome::TimedOut;
                false
            }
        }
    }

    pub fn finish(self) -> LogEntry {
        info!("Leaving {}: {}", self.stage, self.outcome);
        LogEntry {
            stage: self.stage,
            output: self.output,
            outcome: self.outcome,
        }
    }
}

/// `git clone` the student's repository, then list what arrived
pub async fn clone_repo(runner: &dyn Runner, config: &TrialConfig, ctx: &TrialContext) -> LogEntry {
    let mut step = StepRun::new(runner, Stage::Clone);

    if let Err(e) = tokio::fs::create_dir_all(&config.clone_root).await {
        step.fail(format!(
            "Could not create clone root {}: {}",
            config.clone_root.display(),
            e
        ));
        return step.finish();
    }
    // create_dir fails on an existing path, so no two trials share a clone
    if let Err(e) = tokio::fs::create_dir(&ctx.clone_path).await {
        step.fail(format!(
            "Could not create clone directory {}: {}",
            ctx.clone_path.display(),
            e
        ));
        return step.finish();
    }

    let cmd = CommandSpec::new("git")
        .with_args(["clone", "--"])
        .arg(&ctx.repo_remote)
        .arg(ctx.clone_path.to_string_lossy())
        .with_timeout(config.timeouts.clone);

    if step.command(&cmd).await {
        append_listing(&mut step, &ctx.clone_path).await;
    }
    step.finish()
}

/// Drop the credentials into the application sub-folder and run `make install`
pub async fn install(runner: &dyn Runner, config: &TrialConfig, ctx: &TrialContext) -> LogEntry {
    let mut step = StepRun::new(runner, Stage::Install);
    let app_dir = ctx.clone_path.join(&ctx.app);
    let dest = app_dir.join(CREDENTIALS_FILE_NAME);

    if let Err(e) = tokio::fs::copy(&ctx.credentials, &dest).await {
        step.fail(format!(
            "Could not copy credentials to {}: {}",
            dest.display(),
            e
        ));
        return step.finish();
    }

    step.append("** Contents of application sub-folder **\n");
    if !append_listing(&mut step, &app_dir).await {
        return step.finish();
    }

    let cmd = CommandSpec::new("make")
        .with_args(["install"])
        .with_work_dir(&ctx.clone_path)
        .with_timeout(config.timeouts.install);
    step.command(&cmd).await;
    step.finish()
}

/// Run the style checker over the clone from the project's test directory
pub async fn stylecheck(runner: &dyn Runner, config: &TrialConfig, ctx: &TrialContext) -> LogEntry {
    let mut step = StepRun::new(runner, Stage::StyleCheck);

    let cmd = CommandSpec::from_vec(&config.style_checker)
        .arg(ctx.clone_path.to_string_lossy())
        .with_work_dir(config.project_dir(&ctx.project))
        .with_timeout(config.timeouts.stylecheck);
    step.command(&cmd).await;
    step.finish()
}

/// Run the project's `test.sh <clone> <port>`
pub async fn test_project(
    runner: &dyn Runner,
    config: &TrialConfig,
    ctx: &TrialContext,
    port: &str,
) -> LogEntry {
    let mut step = StepRun::new(runner, Stage::Test);
    let project_dir = config.project_dir(&ctx.project);

    let cmd = CommandSpec::new(project_dir.join("test.sh").to_string_lossy())
        .arg(ctx.clone_path.to_string_lossy())
        .arg(port)
        .with_work_dir(&project_dir)
        .with_timeout(config.timeouts.test);

    if step.command(&cmd).await {
        step.append(&format!("{}\n", TESTS_COMPLETE));
    }
    step.finish()
}

/// Run the project's `cleanup.sh <clone>` to stop what test.sh left running
pub async fn cleanup(
    runner: &dyn Runner,
    config: &TrialConfig,
    clone_path: &Path,
    project: &str,
) -> LogEntry {
    let mut step = StepRun::new(runner, Stage::Shutdown);
    let project_dir = config.project_dir(project);

    let cmd = CommandSpec::new(project_dir.join("cleanup.sh").to_string_lossy())
        .arg(clone_path.to_string_lossy())
        .with_work_dir(&project_dir)
        .with_timeout(config.timeouts.shutdown);
    step.command(&cmd).await;
    step.finish()
}

async fn append_listing(step: &mut StepRun<'_>, dir: &Path) -> bool {
    match list_dir(dir).await {
        Ok(listing) => {
            step.append(&listing);
            true
        }
        Err(e) => {
            step.fail(format!("Could not list {}: {}", dir.display(), e));
            false
        }
    }
}

/// Directory listing in the spirit of `ls -p -B`: sorted, directories
/// suffixed with `/`, hidden and backup (`~`) entries left out
pub async fn list_dir(dir: &Path) -> std::io::Result<String> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || name.ends_with('~') {
            continue;
        }
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        names.push(if is_dir { format!("{}/", name) } else { name });
    }
    names.sort();

    if names.is_empty() {
        Ok("(empty)\n".to_string())
    } else {
        Ok(format!("{}\n", names.join("  ")))
    }
}
