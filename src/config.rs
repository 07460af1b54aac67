//! Service configuration
//!
//! Values come from, in increasing precedence:
//! built-in defaults, the top level of `autocheck.toml`, the selected
//! `[profiles.<name>]` table, and command-line flags.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::trial::{StepTimeouts, TrialConfig};

/// Looked up in the working directory when no path is given
pub const DEFAULT_CONFIG_PATH: &str = "autocheck.toml";

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Profile '{0}' not found in config file")]
    UnknownProfile(String),

    #[error("style_checker must name a program")]
    EmptyStyleChecker,

    #[error("Cannot resolve {field} '{path}': {source}")]
    Path {
        field: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the web server binds to
    pub host: String,
    pub port: u16,
    /// Verbose logging
    pub debug: bool,
    /// Where uploaded credentials files are stored
    pub upload_folder: PathBuf,
    /// Upper bound on an upload request body
    pub max_upload_bytes: usize,
    /// Browser sessions remembered for `/_kill`
    pub max_sessions: usize,
    pub trial: TrialConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            debug: false,
            upload_folder: PathBuf::from("/tmp"),
            max_upload_bytes: 64 * 1024,
            max_sessions: 1024,
            trial: TrialConfig {
                tests_dir: PathBuf::from("./tests"),
                clone_root: PathBuf::from("/tmp"),
                style_checker: vec!["pycodestyle".to_string()],
                timeouts: StepTimeouts::default(),
            },
        }
    }
}

/// Command-line values; `None` leaves the file's value in place
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub debug: bool,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tests_dir: Option<PathBuf>,
    pub clone_root: Option<PathBuf>,
    pub upload_folder: Option<PathBuf>,
}

/// Raw TOML configuration
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(flatten)]
    values: RawValues,
    #[serde(default)]
    profiles: HashMap<String, RawValues>,
}

#[derive(Debug, Default, Clone, Deserialize)]
struct RawValues {
    host: Option<String>,
    port: Option<u16>,
    debug: Option<bool>,
    upload_folder: Option<PathBuf>,
    clone_root: Option<PathBuf>,
    tests_dir: Option<PathBuf>,
    style_checker: Option<String>,
    max_upload_bytes: Option<usize>,
    max_sessions: Option<usize>,
    timeouts: Option<RawTimeouts>,
}

/// Step timeouts in seconds
#[derive(Debug, Default, Clone, Deserialize)]
struct RawTimeouts {
    clone: Option<u64>,
    install: Option<u64>,
    stylecheck: Option<u64>,
    test: Option<u64>,
    shutdown: Option<u64>,
}

impl RawValues {
    /// Values in `other` win
    fn overlay(self, other: RawValues) -> RawValues {
        let timeouts = match (self.timeouts, other.timeouts) {
            (Some(base), Some(top)) => Some(RawTimeouts {
                clone: top.clone.or(base.clone),
                install: top.install.or(base.install),
                stylecheck: top.stylecheck.or(base.stylecheck),
                test: top.test.or(base.test),
                shutdown: top.shutdown.or(base.shutdown),
            }),
            (base, top) => top.or(base),
        };

        RawValues {
            host: other.host.or(self.host),
            port: other.port.or(self.port),
            debug: other.debug.or(self.debug),
            upload_folder: other.upload_folder.or(self.upload_folder),
            clone_root: other.clone_root.or(self.clone_root),
            tests_dir: other.tests_dir.or(self.tests_dir),
            style_checker: other.style_checker.or(self.style_checker),
            max_upload_bytes: other.max_upload_bytes.or(self.max_upload_bytes),
            max_sessions: other.max_sessions.or(self.max_sessions),
            timeouts,
        }
    }

    fn resolve(self) -> Result<Config, ConfigError> {
        let defaults = Config::default();
        let secs = |value: Option<u64>, default: Duration| {
            value.map(Duration::from_secs).unwrap_or(default)
        };
        let raw_timeouts = self.timeouts.unwrap_or_default();
        let default_timeouts = defaults.trial.timeouts;

        let style_checker = match self.style_checker {
            Some(cmd) => into_command(&cmd),
            None => defaults.trial.style_checker,
        };
        if style_checker.is_empty() {
            return Err(ConfigError::EmptyStyleChecker);
        }

        Ok(Config {
            host: self.host.unwrap_or(defaults.host),
            port: self.port.unwrap_or(defaults.port),
            debug: self.debug.unwrap_or(defaults.debug),
            upload_folder: self.upload_folder.unwrap_or(defaults.upload_folder),
            max_upload_bytes: self.max_upload_bytes.unwrap_or(defaults.max_upload_bytes),
            max_sessions: self.max_sessions.unwrap_or(defaults.max_sessions),
            trial: TrialConfig {
                tests_dir: absolute(
                    "tests_dir",
                    self.tests_dir.unwrap_or(defaults.trial.tests_dir),
                )?,
                clone_root: absolute(
                    "clone_root",
                    self.clone_root.unwrap_or(defaults.trial.clone_root),
                )?,
                style_checker,
                timeouts: StepTimeouts {
                    clone: secs(raw_timeouts.clone, default_timeouts.clone),
                    install: secs(raw_timeouts.install, default_timeouts.install),
                    stylecheck: secs(raw_timeouts.stylecheck, default_timeouts.stylecheck),
                    test: secs(raw_timeouts.test, default_timeouts.test),
                    shutdown: secs(raw_timeouts.shutdown, default_timeouts.shutdown),
                },
            },
        })
    }
}

impl From<&Overrides> for RawValues {
    fn from(o: &Overrides) -> Self {
        RawValues {
            host: o.host.clone(),
            port: o.port,
            // a flag can only switch debugging on
            debug: o.debug.then_some(true),
            upload_folder: o.upload_folder.clone(),
            clone_root: o.clone_root.clone(),
            tests_dir: o.tests_dir.clone(),
            ..RawValues::default()
        }
    }
}

/// Load configuration.
///
/// An explicitly given file must exist; the default `autocheck.toml` is
/// optional and built-in defaults apply without it.
pub fn load(
    path: Option<&Path>,
    profile: Option<&str>,
    overrides: &Overrides,
) -> Result<Config, ConfigError> {
    let (path, required) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
    };

    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(source) => return Err(ConfigError::Read { path, source }),
    };

    let raw: RawConfig =
        toml::from_str(&content).map_err(|source| ConfigError::Parse { path, source })?;
    resolve(raw, profile, overrides)
}

fn resolve(
    mut raw: RawConfig,
    profile: Option<&str>,
    overrides: &Overrides,
) -> Result<Config, ConfigError> {
    let mut values = raw.values;
    if let Some(name) = profile {
        let section = raw
            .profiles
            .remove(name)
            .ok_or_else(|| ConfigError::UnknownProfile(name.to_string()))?;
        values = values.overlay(section);
    }
    values.overlay(RawValues::from(overrides)).resolve()
}

/// Scripts run with their project folder as working directory, so every path
/// handed to them must not depend on the server's
fn absolute(field: &'static str, path: PathBuf) -> Result<PathBuf, ConfigError> {
    std::path::absolute(&path).map_err(|source| ConfigError::Path { field, path, source })
}

fn into_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
port = 8000
tests_dir = "/srv/autocheck/tests"
style_checker = "flake8 --max-line-length=100"

[timeouts]
test = 20
clone = 60

[profiles.proj1]
port = 8001
clone_root = "/var/tmp/clones"

[profiles.proj1.timeouts]
test = 45
"#;

    fn parse(content: &str) -> RawConfig {
        toml::from_str(content).unwrap()
    }

    #[test]
    fn test_defaults_without_file_content() {
        let config = resolve(parse(""), None, &Overrides::default()).unwrap();

        assert_eq!(config.port, 5000);
        assert_eq!(config.max_sessions, 1024);
        assert_eq!(config.trial.style_checker, vec!["pycodestyle"]);
        assert_eq!(config.trial.timeouts, StepTimeouts::default());
        assert_eq!(config.trial.timeouts.test, Duration::from_secs(15));
    }

    #[test]
    fn test_file_values() {
        let config = resolve(parse(SAMPLE), None, &Overrides::default()).unwrap();

        assert_eq!(config.port, 8000);
        assert_eq!(config.trial.tests_dir, PathBuf::from("/srv/autocheck/tests"));
        assert_eq!(
            config.trial.style_checker,
            vec!["flake8", "--max-line-length=100"]
        );
        assert_eq!(config.trial.timeouts.test, Duration::from_secs(20));
        assert_eq!(config.trial.timeouts.clone, Duration::from_secs(60));
        assert_eq!(config.trial.timeouts.install, Duration::from_secs(300));
    }

    #[test]
    fn test_profile_overrides_top_level() {
        let config = resolve(parse(SAMPLE), Some("proj1"), &Overrides::default()).unwrap();

        assert_eq!(config.port, 8001);
        assert_eq!(config.trial.clone_root, PathBuf::from("/var/tmp/clones"));
        assert_eq!(config.trial.tests_dir, PathBuf::from("/srv/autocheck/tests"));
        assert_eq!(config.trial.timeouts.test, Duration::from_secs(45));
        assert_eq!(config.trial.timeouts.clone, Duration::from_secs(60));
    }

    #[test]
    fn test_command_line_wins() {
        let overrides = Overrides {
            debug: true,
            port: Some(9001),
            tests_dir: Some(PathBuf::from("./local-tests")),
            ..Overrides::default()
        };
        let config = resolve(parse(SAMPLE), Some("proj1"), &overrides).unwrap();

        assert!(config.debug);
        assert_eq!(config.port, 9001);
        assert_eq!(
            config.trial.tests_dir,
            std::env::current_dir().unwrap().join("local-tests")
        );
    }

    #[tokio::test]
    async fn test_relative_tests_dir_still_runs_scripts() {
        use crate::runner::HostRunner;
        use crate::trial::context::TrialContext;
        use crate::trial::steps::{test_project, TESTS_COMPLETE};
        use std::os::unix::fs::PermissionsExt;

        let scratch = tempfile::Builder::new()
            .prefix("autocheck-tests")
            .tempdir_in(".")
            .unwrap();
        let relative = scratch.path().file_name().unwrap().to_string_lossy().into_owned();
        let project_dir = scratch.path().join("proj0");
        std::fs::create_dir(&project_dir).unwrap();
        let script = project_dir.join("test.sh");
        std::fs::write(&script, "#!/bin/sh\necho \"clone=$1 port=$2\"\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let raw = parse(&format!("tests_dir = \"{}\"\nclone_root = \"clones\"", relative));
        let config = resolve(raw, None, &Overrides::default()).unwrap();
        assert!(config.trial.tests_dir.is_absolute());
        assert!(config.trial.clone_root.is_absolute());

        let clone_path = config.trial.clone_root.join("c");
        let ctx = TrialContext::new("cred.ini", "proj0:hello".parse().unwrap(), "x", &clone_path);
        let entry = test_project(&HostRunner, &config.trial, &ctx, "9000").await;

        assert!(entry.outcome.is_passed(), "{}", entry.output);
        assert!(entry
            .output
            .contains(&format!("clone={} port=9000", clone_path.display())));
        assert!(entry.output.contains(TESTS_COMPLETE));
    }

    #[test]
    fn test_unknown_profile() {
        let err = resolve(parse(SAMPLE), Some("proj9"), &Overrides::default()).unwrap_err();

        assert!(matches!(err, ConfigError::UnknownProfile(name) if name == "proj9"));
    }

    #[test]
    fn test_empty_style_checker_rejected() {
        let err = resolve(parse("style_checker = \"  \""), None, &Overrides::default()).unwrap_err();

        assert!(matches!(err, ConfigError::EmptyStyleChecker));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", SAMPLE).unwrap();

        let config = load(Some(file.path()), None, &Overrides::default()).unwrap();

        assert_eq!(config.port, 8000);
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let err = load(
            Some(Path::new("/nonexistent/autocheck.toml")),
            None,
            &Overrides::default(),
        )
        .unwrap_err();

        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "port = \"not a number\"").unwrap();

        let err = load(Some(file.path()), None, &Overrides::default()).unwrap_err();

        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
