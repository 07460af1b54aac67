//! Trial pipeline
//!
//! Clone → Install → {StyleCheck, Test}. Install only runs after a successful
//! clone; style check and test both run once install succeeds, and a failed
//! style check does not fail the trial. The verdict is install AND test.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use super::context::{unique_path, ProjectSelector, TrialContext};
use super::journal::{Stage, TrialLog};
use super::port::choose_port;
use super::steps;
use crate::credentials::read_credentials;
use crate::runner::Runner;

/// Wall-clock limit for each step
#[derive(Debug, Clone, PartialEq)]
pub struct StepTimeouts {
    pub clone: Duration,
    pub install: Duration,
    pub stylecheck: Duration,
    pub test: Duration,
    pub shutdown: Duration,
}

impl Default for StepTimeouts {
    fn default() -> Self {
        Self {
            clone: Duration::from_secs(120),
            install: Duration::from_secs(300),
            stylecheck: Duration::from_secs(60),
            test: Duration::from_secs(15),
            shutdown: Duration::from_secs(30),
        }
    }
}

/// Settings the pipeline needs from the service configuration
#[derive(Debug, Clone)]
pub struct TrialConfig {
    /// Holds one directory of test definitions per project
    pub tests_dir: PathBuf,
    /// Where clones are created
    pub clone_root: PathBuf,
    /// Style checker command; the clone path is appended
    pub style_checker: Vec<String>,
    pub timeouts: StepTimeouts,
}

impl TrialConfig {
    /// Test definitions for one project
    pub fn project_dir(&self, project: &str) -> PathBuf {
        self.tests_dir.join(project)
    }
}

/// Result of a full trial
#[derive(Debug, Clone, Serialize)]
pub struct TrialReport {
    pub trial_id: String,
    pub success: bool,
    pub context: TrialContext,
}

impl TrialReport {
    pub fn log(&self) -> &TrialLog {
        &self.context.log
    }

    /// "OK" or "Errors", as shown on the results page
    pub fn status_label(&self) -> &'static str {
        if self.success {
            "OK"
        } else {
            "Errors"
        }
    }
}

/// Result of running cleanup.sh for an earlier trial
#[derive(Debug, Clone, Serialize)]
pub struct ShutdownReport {
    pub success: bool,
    pub log: TrialLog,
}

/// Runs trials against a `Runner`
#[derive(Clone)]
pub struct TrialRunner {
    runner: Arc<dyn Runner>,
    config: TrialConfig,
}

impl TrialRunner {
    pub fn new(runner: Arc<dyn Runner>, config: TrialConfig) -> Self {
        Self { runner, config }
    }

    /// Run a full trial for an uploaded credentials file
    pub async fn run(&self, credentials: &Path, selector: ProjectSelector) -> TrialReport {
        let trial_id = Uuid::new_v4().simple().to_string();
        let short_id = &trial_id[..8];
        let span = info_span!(
            "trial",
            id = %short_id,
            project = %selector.project,
            app = %selector.app
        );

        async move {
            let settings = read_credentials(credentials).await;
            info!("Credentials: author={}, repo={}", settings.author, settings.repo);

            let clone_path = unique_path(&self.config.clone_root, "clone");
            let ctx = TrialContext::new(credentials, selector, settings.repo, clone_path);

            let ctx = self.run_stages(ctx).await;
            let success = ctx.log.passed(Stage::Install) && ctx.log.passed(Stage::Test);
            info!(
                "Trial finished: success={}, clone_path={:?}",
                success, ctx.clone_path
            );

            TrialReport {
                trial_id,
                success,
                context: ctx,
            }
        }
        .instrument(span)
        .await
    }

    async fn run_stages(&self, ctx: TrialContext) -> TrialContext {
        let ctx = self.clone_repo(ctx).await;
        if !ctx.log.passed(Stage::Clone) {
            return ctx;
        }

        let ctx = self.install(ctx).await;
        if !ctx.log.passed(Stage::Install) {
            return ctx;
        }

        // Style problems are reported but do not stop the tests
        let ctx = self.stylecheck(ctx).await;
        self.test(ctx).await
    }

    async fn clone_repo(&self, mut ctx: TrialContext) -> TrialContext {
        let entry = steps::clone_repo(self.runner.as_ref(), &self.config, &ctx).await;
        ctx.log.push(entry);
        ctx
    }

    async fn install(&self, mut ctx: TrialContext) -> TrialContext {
        let entry = steps::install(self.runner.as_ref(), &self.config, &ctx).await;
        ctx.log.push(entry);
        ctx
    }

    async fn stylecheck(&self, mut ctx: TrialContext) -> TrialContext {
        let entry = steps::stylecheck(self.runner.as_ref(), &self.config, &ctx).await;
        ctx.log.push(entry);
        ctx
    }

    async fn test(&self, mut ctx: TrialContext) -> TrialContext {
        let port = choose_port();
        info!("Will run on port {}", port);
        let entry = steps::test_project(self.runner.as_ref(), &self.config, &ctx, &port).await;
        ctx.port = Some(port);
        ctx.log.push(entry);
        ctx
    }

    /// Stop whatever test.sh left running for an earlier trial
    pub async fn shutdown(&self, clone_path: &Path, project: &str) -> ShutdownReport {
        let span = info_span!("shutdown", project = %project);

        async move {
            let entry = steps::cleanup(self.runner.as_ref(), &self.config, clone_path, project).await;
            let success = entry.outcome.is_passed();
            let mut log = TrialLog::new();
            log.push(entry);
            ShutdownReport { success, log }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::runner::{CommandSpec, RunOutcome, RunStatus};
    use crate::trial::journal::StepOutcome;
    use crate::trial::steps::TESTS_COMPLETE;
    use async_trait::async_trait;
    use std::sync::Mutex;

    type Script = dyn Fn(&CommandSpec) -> anyhow::Result<RunOutcome> + Send + Sync;

    /// Runner that answers from a script and remembers what it was asked to run
    pub(crate) struct ScriptedRunner {
        script: Box<Script>,
        calls: Mutex<Vec<CommandSpec>>,
    }

    impl ScriptedRunner {
        pub(crate) fn new(
            script: impl Fn(&CommandSpec) -> anyhow::Result<RunOutcome> + Send + Sync + 'static,
        ) -> Self {
            Self {
                script: Box::new(script),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn programs(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(program_name).collect()
        }

        pub(crate) fn calls(&self) -> Vec<CommandSpec> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Runner for ScriptedRunner {
        async fn run(&self, cmd: &CommandSpec) -> anyhow::Result<RunOutcome> {
            self.calls.lock().unwrap().push(cmd.clone());
            (self.script)(cmd)
        }
    }

    pub(crate) fn outcome(status: RunStatus, output: &str) -> anyhow::Result<RunOutcome> {
        Ok(RunOutcome {
            status,
            output: output.to_string(),
            wall_time_ms: 1,
        })
    }

    /// Plays a healthy student repo: git creates the app folder, everything exits 0
    pub(crate) fn healthy(cmd: &CommandSpec) -> anyhow::Result<RunOutcome> {
        match program_name(cmd).as_str() {
            "git" => {
                let clone = cmd.args.last().unwrap();
                std::fs::create_dir_all(Path::new(clone).join("hello")).unwrap();
                std::fs::write(Path::new(clone).join("Makefile"), "").unwrap();
                outcome(RunStatus::Exited(0), "Cloning into repo...\n")
            }
            "make" => outcome(RunStatus::Exited(0), "pip install -r requirements.txt\n"),
            "pycodestyle" => outcome(RunStatus::Exited(0), ""),
            "test.sh" => outcome(RunStatus::Exited(0), "All 3 tests passed\n"),
            other => panic!("unexpected program {}", other),
        }
    }

    pub(crate) fn program_name(cmd: &CommandSpec) -> String {
        Path::new(&cmd.program)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    struct Fixture {
        _clones: tempfile::TempDir,
        _uploads: tempfile::TempDir,
        credentials: PathBuf,
        config: TrialConfig,
    }

    fn fixture() -> Fixture {
        let clones = tempfile::tempdir().unwrap();
        let uploads = tempfile::tempdir().unwrap();
        let credentials = uploads.path().join("cred.ini");
        std::fs::write(
            &credentials,
            "[DEFAULT]\nauthor = Ada\nrepo = https://example.com/x.git\n",
        )
        .unwrap();
        let config = TrialConfig {
            tests_dir: PathBuf::from("/srv/tests"),
            clone_root: clones.path().to_path_buf(),
            style_checker: vec!["pycodestyle".to_string()],
            timeouts: StepTimeouts::default(),
        };
        Fixture {
            _clones: clones,
            _uploads: uploads,
            credentials,
            config,
        }
    }

    fn selector() -> ProjectSelector {
        "proj0:hello".parse().unwrap()
    }

    #[tokio::test]
    async fn test_clone_failure_stops_pipeline() {
        let fx = fixture();
        let runner = Arc::new(ScriptedRunner::new(|cmd| match program_name(cmd).as_str() {
            "git" => outcome(
                RunStatus::Exited(128),
                "fatal: repository 'https://example.com/x.git/' not found\n",
            ),
            other => panic!("{} must not run after a failed clone", other),
        }));
        let trial = TrialRunner::new(runner.clone(), fx.config.clone());

        let report = trial.run(&fx.credentials, selector()).await;

        assert!(!report.success);
        assert_eq!(runner.programs(), vec!["git"]);
        assert!(!report.log().ran(Stage::Install));
        assert!(!report.log().ran(Stage::StyleCheck));
        assert!(!report.log().ran(Stage::Test));
        assert!(report.log().render().contains("repository 'https://example.com/x.git/' not found"));
        assert!(report.context.port.is_none());
    }

    #[tokio::test]
    async fn test_style_failure_is_not_fatal() {
        let fx = fixture();
        let runner = Arc::new(ScriptedRunner::new(|cmd| match program_name(cmd).as_str() {
            "pycodestyle" => outcome(RunStatus::Exited(1), "hello/app.py:3:80: E501 line too long\n"),
            _ => healthy(cmd),
        }));
        let trial = TrialRunner::new(runner.clone(), fx.config.clone());

        let report = trial.run(&fx.credentials, selector()).await;

        assert!(report.success);
        assert_eq!(report.status_label(), "OK");
        assert_eq!(runner.programs(), vec!["git", "make", "pycodestyle", "test.sh"]);
        assert_eq!(
            report.log().entry(Stage::StyleCheck).unwrap().outcome,
            StepOutcome::Failed
        );
    }

    #[tokio::test]
    async fn test_install_failure_skips_style_and_test() {
        let fx = fixture();
        let runner = Arc::new(ScriptedRunner::new(|cmd| match program_name(cmd).as_str() {
            "make" => outcome(RunStatus::Exited(2), "make: *** No rule to make target 'install'.\n"),
            _ => healthy(cmd),
        }));
        let trial = TrialRunner::new(runner.clone(), fx.config.clone());

        let report = trial.run(&fx.credentials, selector()).await;

        assert!(!report.success);
        assert_eq!(runner.programs(), vec!["git", "make"]);
        let install = report.log().entry(Stage::Install).unwrap();
        assert!(install.output.contains("No rule to make target"));
        assert!(install.output.contains("exited with status 2"));
    }

    #[tokio::test]
    async fn test_test_timeout_fails_trial() {
        let fx = fixture();
        let runner = Arc::new(ScriptedRunner::new(|cmd| match program_name(cmd).as_str() {
            "test.sh" => outcome(RunStatus::TimedOut, "Starting server on port\n"),
            _ => healthy(cmd),
        }));
        let trial = TrialRunner::new(runner.clone(), fx.config.clone());

        let report = trial.run(&fx.credentials, selector()).await;

        assert!(!report.success);
        assert_eq!(report.status_label(), "Errors");
        assert!(report.log().any_timed_out());
        let rendered = report.log().render();
        assert!(rendered.contains("Starting server on port"));
        assert!(rendered.contains("*** Testing timed out after 15s ***"));
    }

    #[tokio::test]
    async fn test_end_to_end_scenario() {
        let fx = fixture();
        let runner = Arc::new(ScriptedRunner::new(|cmd| match program_name(cmd).as_str() {
            "pycodestyle" => outcome(RunStatus::Exited(1), "app.py:1:1: E302 expected 2 blank lines\n"),
            _ => healthy(cmd),
        }));
        let trial = TrialRunner::new(runner.clone(), fx.config.clone());

        let report = trial.run(&fx.credentials, selector()).await;

        assert!(report.success);
        assert_eq!(report.context.repo_remote, "https://example.com/x.git");
        let rendered = report.log().render();
        // clone output and listing
        assert!(rendered.contains("Cloning into repo..."));
        assert!(rendered.contains("Makefile  hello/"));
        // install: credentials landed in the app folder, then make ran
        assert!(rendered.contains("credentials.ini"));
        assert!(rendered.contains("pip install -r requirements.txt"));
        assert!(rendered.contains("E302 expected 2 blank lines"));
        assert!(rendered.contains("All 3 tests passed"));
        assert!(rendered.contains(TESTS_COMPLETE));
        assert!(!rendered.contains("timed out"));
        assert!(!report.log().any_timed_out());

        let calls = runner.calls();
        let git = &calls[0];
        assert_eq!(git.args[..3], ["clone", "--", "https://example.com/x.git"]);
        assert_eq!(git.args[3], report.context.clone_path.to_string_lossy());
        let style = &calls[2];
        assert_eq!(style.work_dir.as_deref(), Some(Path::new("/srv/tests/proj0")));
        let test = &calls[3];
        assert_eq!(test.program, "/srv/tests/proj0/test.sh");
        assert_eq!(Some(&test.args[1]), report.context.port.as_ref());
        assert_eq!(test.timeout, Some(Duration::from_secs(15)));
    }

    #[tokio::test]
    async fn test_missing_repo_fails_at_clone() {
        let fx = fixture();
        std::fs::write(&fx.credentials, "[DEFAULT]\nauthor = Ada\n").unwrap();
        let runner = Arc::new(ScriptedRunner::new(|cmd| {
            assert_eq!(cmd.args[2], crate::credentials::NOT_SPECIFIED);
            outcome(RunStatus::Exited(128), "fatal: repository 'not specified' does not exist\n")
        }));
        let trial = TrialRunner::new(runner, fx.config.clone());

        let report = trial.run(&fx.credentials, selector()).await;

        assert!(!report.success);
        assert_eq!(report.context.repo_remote, crate::credentials::NOT_SPECIFIED);
        assert_eq!(
            report.log().entry(Stage::Clone).unwrap().outcome,
            StepOutcome::Failed
        );
    }

    #[tokio::test]
    async fn test_concurrent_trials_get_distinct_clones() {
        let fx = fixture();
        let trial = TrialRunner::new(Arc::new(ScriptedRunner::new(healthy)), fx.config.clone());

        let (a, b) = tokio::join!(
            trial.run(&fx.credentials, selector()),
            trial.run(&fx.credentials, selector())
        );

        assert!(a.success && b.success);
        assert_ne!(a.context.clone_path, b.context.clone_path);
        assert_ne!(a.trial_id, b.trial_id);
    }

    #[tokio::test]
    async fn test_shutdown_reports_cleanup_output() {
        let fx = fixture();
        let runner = Arc::new(ScriptedRunner::new(|cmd| {
            assert_eq!(program_name(cmd), "cleanup.sh");
            outcome(RunStatus::Exited(1), "no server running\n")
        }));
        let trial = TrialRunner::new(runner, fx.config.clone());

        let report = trial.shutdown(Path::new("/tmp/,clone.1"), "proj0").await;

        assert!(!report.success);
        let rendered = report.log.render();
        assert!(rendered.contains("*** Shutting down ***"));
        assert!(rendered.contains("no server running"));
    }
}
