mod config;
mod credentials;
mod runner;
mod trial;
mod web;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::config::Overrides;
use crate::runner::HostRunner;
use crate::trial::{ProjectSelector, TrialRunner};

#[derive(Parser)]
#[command(
    name = "autocheck",
    version,
    about = "Clones, installs, style-checks and tests student projects"
)]
struct Cli {
    /// Config file (default: autocheck.toml, or $AUTOCHECK_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Profile table in the config file to apply
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Verbose logging
    #[arg(short = 'D', long, global = true)]
    debug: bool,

    /// Directory holding one test folder per project
    #[arg(long, global = true)]
    tests_dir: Option<PathBuf>,

    /// Directory in which student repositories are cloned
    #[arg(long, global = true)]
    clone_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the web front end
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(short = 'P', long)]
        port: Option<u16>,

        /// Where uploaded credentials files are saved
        #[arg(long)]
        upload_folder: Option<PathBuf>,
    },
    /// Run one trial from the command line
    Trial {
        /// Credentials file naming author and repo
        #[arg(long)]
        credentials: PathBuf,

        /// Project and application, as project:app
        #[arg(long)]
        project: String,

        /// Print the report as JSON instead of the plain log
        #[arg(long)]
        json: bool,
    },
    /// Run cleanup.sh for an earlier trial
    Shutdown {
        /// Clone path reported by the trial
        #[arg(long)]
        clone_path: PathBuf,

        #[arg(long)]
        project: String,
    },
}

impl Cli {
    fn overrides(&self) -> Overrides {
        let mut overrides = Overrides {
            debug: self.debug,
            tests_dir: self.tests_dir.clone(),
            clone_root: self.clone_root.clone(),
            ..Overrides::default()
        };
        if let Commands::Serve {
            host,
            port,
            upload_folder,
        } = &self.command
        {
            overrides.host = host.clone();
            overrides.port = *port;
            overrides.upload_folder = upload_folder.clone();
        }
        overrides
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var("AUTOCHECK_CONFIG").ok().map(PathBuf::from));
    let config = config::load(
        config_path.as_deref(),
        cli.profile.as_deref(),
        &cli.overrides(),
    )?;

    let directive = if config.debug {
        "autocheck=debug"
    } else {
        "autocheck=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(directive.parse()?),
        )
        .init();

    info!(
        "Tests in {}, clones in {}, style checker '{}'",
        config.trial.tests_dir.display(),
        config.trial.clone_root.display(),
        config.trial.style_checker.join(" ")
    );

    let runner = Arc::new(HostRunner);

    match cli.command {
        Commands::Serve { .. } => {
            web::serve(&config, runner).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Trial {
            credentials,
            project,
            json,
        } => {
            let selector: ProjectSelector = project.parse()?;
            let trials = TrialRunner::new(runner, config.trial.clone());
            let report = trials.run(&credentials, selector).await;

            if json {
                let out = serde_json::to_string_pretty(&report)
                    .context("Failed to serialize trial report")?;
                println!("{}", out);
            } else {
                print!("{}", report.log().render());
                println!("\nStatus: {}", report.status_label());
                if let Some(port) = &report.context.port {
                    println!("Port: {}", port);
                }
                println!("Clone: {}", report.context.clone_path.display());
            }

            Ok(exit_code(report.success))
        }
        Commands::Shutdown {
            clone_path,
            project,
        } => {
            let project = trial::context::check_identifier("project", &project)?;
            let trials = TrialRunner::new(runner, config.trial.clone());
            let report = trials.shutdown(&clone_path, &project).await;
            print!("{}", report.log.render());

            Ok(exit_code(report.success))
        }
    }
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
