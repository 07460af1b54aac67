//! Credentials file reader
//!
//! Students upload a small INI-style file naming themselves and the repository
//! to check. Only the default section is consulted, and anything missing or
//! unreadable falls back to `NOT_SPECIFIED` instead of failing the trial.

use std::path::Path;

use serde::Serialize;
use tracing::{debug, warn};

/// Value used for any field the credentials file does not provide
pub const NOT_SPECIFIED: &str = "not specified";

/// Settings taken from a credentials file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settings {
    pub author: String,
    pub repo: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            author: NOT_SPECIFIED.to_string(),
            repo: NOT_SPECIFIED.to_string(),
        }
    }
}

/// Read settings from a credentials file on disk
pub async fn read_credentials(path: &Path) -> Settings {
    match tokio::fs::read(path).await {
        Ok(bytes) => parse_credentials(&String::from_utf8_lossy(&bytes)),
        Err(e) => {
            warn!("Could not read credentials file {:?}: {}", path, e);
            Settings::default()
        }
    }
}

/// Parse credentials file content
pub fn parse_credentials(content: &str) -> Settings {
    let mut settings = Settings::default();
    let mut in_default_section = true;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(section) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            in_default_section = section.trim() == "DEFAULT";
            continue;
        }
        if !in_default_section {
            continue;
        }

        let Some((key, value)) = split_entry(line) else {
            debug!("Skipping malformed credentials line: {}", line);
            continue;
        };

        match key.to_ascii_lowercase().as_str() {
            "author" => settings.author = value.to_string(),
            "repo" => settings.repo = value.to_string(),
            _ => {}
        }
    }

    settings
}

/// Split `key = value` or `key: value`, whichever delimiter comes first
fn split_entry(line: &str) -> Option<(&str, &str)> {
    let idx = line.find(['=', ':'])?;
    let key = line[..idx].trim();
    if key.is_empty() {
        return None;
    }
    Some((key, line[idx + 1..].trim()))
}
