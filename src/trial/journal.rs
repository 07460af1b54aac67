//! Trial log
//!
//! An ordered, append-only record of what each pipeline step did. Entries keep
//! the captured output and outcome separate; the human-readable text shown to
//! students is produced only by `TrialLog::render`.

use serde::Serialize;
use std::fmt;

/// Pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Clone,
    Install,
    StyleCheck,
    Test,
    Shutdown,
}

impl Stage {
    /// Heading shown above the stage's output
    pub fn banner(&self) -> &'static str {
        match self {
            Stage::Clone => "Cloning",
            Stage::Install => "Installing",
            Stage::StyleCheck => "Style check",
            Stage::Test => "Testing",
            Stage::Shutdown => "Shutting down",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Clone => "clone",
            Stage::Install => "install",
            Stage::StyleCheck => "stylecheck",
            Stage::Test => "test",
            Stage::Shutdown => "shutdown",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Passed,
    Failed,
    TimedOut,
}

impl StepOutcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, StepOutcome::Passed)
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepOutcome::Passed => "passed",
            StepOutcome::Failed => "failed",
            StepOutcome::TimedOut => "timed_out",
        };
        write!(f, "{}", s)
    }
}

/// What one step recorded
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub stage: Stage,
    pub output: String,
    pub outcome: StepOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TrialLog {
    entries: Vec<LogEntry>,
}

impl TrialLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    /// Latest entry recorded for a stage
    pub fn entry(&self, stage: Stage) -> Option<&LogEntry> {
        self.entries.iter().rev().find(|e| e.stage == stage)
    }

    /// Whether a stage ran and passed
    pub fn passed(&self, stage: Stage) -> bool {
        self.entry(stage).is_some_and(|e| e.outcome.is_passed())
    }

    #[cfg(test)]
    pub fn ran(&self, stage: Stage) -> bool {
        self.entry(stage).is_some()
    }

    #[cfg(test)]
    pub fn any_timed_out(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.outcome == StepOutcome::TimedOut)
    }

    /// Render as the plain-text log shown to the student
    pub fn render(&self) -> String {
        let mut text = String::new();
        for entry in &self.entries {
            text.push_str(&format!("\n*** {} ***\n", entry.stage.banner()));
            text.push_str(&entry.output);
            if !entry.output.is_empty() && !entry.output.ends_with('\n') {
                text.push('\n');
            }
        }
        text
    }
}
