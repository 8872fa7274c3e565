//! Per-run report: level-tagged lines collected during one invocation and
//! flushed once to the operator channel at the end.
//!
//! The report is an explicit value owned by the runner. Pairs processed
//! concurrently append through a shared reference; each line is pushed under
//! the lock as a whole, so lines never interleave mid-message.

use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Severity of a report line. Ordered `Info < Warning < Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Level {
    Info,
    Warning,
    Error,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Level::Info),
            "warning" | "warn" => Ok(Level::Warning),
            "error" => Ok(Level::Error),
            other => Err(format!("unknown report level: {other}")),
        }
    }
}

impl TryFrom<String> for Level {
    type Error = String;

    fn try_from(value: String) -> Result<Self, <Self as TryFrom<String>>::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportLine {
    pub level: Level,
    pub text: String,
}

impl fmt::Display for ReportLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.level, self.text)
    }
}

/// Append-only report for a single run.
#[derive(Debug, Default)]
pub struct RunReport {
    lines: Mutex<Vec<ReportLine>>,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one line and mirror it to tracing at the matching level.
    pub fn push(&self, level: Level, text: impl Into<String>) {
        let text = text.into();
        match level {
            Level::Info => info!(report = true, "{text}"),
            Level::Warning => warn!(report = true, "{text}"),
            Level::Error => error!(report = true, "{text}"),
        }
        self.guard().push(ReportLine { level, text });
    }

    pub fn info(&self, text: impl Into<String>) {
        self.push(Level::Info, text);
    }

    pub fn warning(&self, text: impl Into<String>) {
        self.push(Level::Warning, text);
    }

    pub fn error(&self, text: impl Into<String>) {
        self.push(Level::Error, text);
    }

    /// Snapshot of all lines in append order.
    pub fn lines(&self) -> Vec<ReportLine> {
        self.guard().clone()
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }

    pub fn has_errors(&self) -> bool {
        self.guard().iter().any(|line| line.level == Level::Error)
    }

    /// Lines at or above `min_level`, one per line, each prefixed with its level.
    pub fn render(&self, min_level: Level) -> String {
        self.guard()
            .iter()
            .filter(|line| line.level >= min_level)
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn guard(&self) -> MutexGuard<'_, Vec<ReportLine>> {
        // A panic while holding the lock cannot leave a half-written line behind.
        self.lines.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
