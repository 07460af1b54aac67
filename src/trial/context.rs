//! Per-trial state
//!
//! A `TrialContext` is created for each trial, moved into every pipeline stage
//! and handed back by it, so the data flow between stages stays explicit.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use super::journal::TrialLog;

/// Errors in the `project:app` value submitted with a trial
#[derive(Debug, Error, PartialEq)]
pub enum TrialRequestError {
    #[error("Expected 'project:app', got '{0}'")]
    MissingSeparator(String),

    #[error("Invalid {field} identifier '{value}'")]
    InvalidIdentifier { field: &'static str, value: String },
}

/// Which project's test definitions to use, and which application
/// sub-folder of the student's repository receives the credentials
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectSelector {
    /// e.g. proj0, proj1
    pub project: String,
    /// e.g. hello, pageserver
    pub app: String,
}

impl FromStr for ProjectSelector {
    type Err = TrialRequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (project, app) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| TrialRequestError::MissingSeparator(s.to_string()))?;

        Ok(Self {
            project: check_identifier("project", project)?,
            app: check_identifier("app", app)?,
        })
    }
}

impl fmt::Display for ProjectSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.project, self.app)
    }
}

/// Identifiers become path components, so only plain names are accepted
pub fn check_identifier(field: &'static str, value: &str) -> Result<String, TrialRequestError> {
    let valid = !value.is_empty()
        && value != "."
        && value != ".."
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid {
        Ok(value.to_string())
    } else {
        Err(TrialRequestError::InvalidIdentifier {
            field,
            value: value.to_string(),
        })
    }
}

/// State threaded through the pipeline stages
#[derive(Debug, Clone, Serialize)]
pub struct TrialContext {
    /// Uploaded credentials file
    pub credentials: PathBuf,
    pub project: String,
    pub app: String,
    pub repo_remote: String,
    /// Where the student's repository is cloned
    pub clone_path: PathBuf,
    /// Port handed to test.sh; set by the test stage
    pub port: Option<String>,
    pub log: TrialLog,
}

impl TrialContext {
    pub fn new(
        credentials: impl Into<PathBuf>,
        selector: ProjectSelector,
        repo_remote: impl Into<String>,
        clone_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            credentials: credentials.into(),
            project: selector.project,
            app: selector.app,
            repo_remote: repo_remote.into(),
            clone_path: clone_path.into(),
            port: None,
            log: TrialLog::new(),
        }
    }
}

/// Unique path in `dir` derived from `name`.
///
/// The leading comma groups these entries for periodic cleanup; the timestamp
/// keeps them roughly ordered and the UUID suffix keeps concurrent trials apart.
pub fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let stem: String = name.chars().take(8).collect();
    let suffix = Uuid::new_v4().simple().to_string();
    dir.join(format!(",{}.{}.{}", stem, Utc::now().timestamp(), &suffix[..12]))
}
