//! Human-readable run log
//!
//! Every public stage operation returns its output together with a
//! [`RunLog`] describing what succeeded and what was skipped. Each entry is
//! also emitted as a `tracing` event, so the trail is visible both to callers
//! that render it and to whatever subscriber the process installed.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::ItemFailure;
use crate::pipeline::PipelineStage;

/// Severity of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warn => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// One line of the run log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub stage: PipelineStage,
    /// Identifying key of the item concerned (column, pair, table)
    pub key: Option<String>,
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(
                f,
                "[{}] {}: {}: {}",
                self.level, self.stage, key, self.message
            ),
            None => write!(f, "[{}] {}: {}", self.level, self.stage, self.message),
        }
    }
}

/// Ordered trail of what a stage or run did
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunLog {
    entries: Vec<LogEntry>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&mut self, stage: PipelineStage, message: impl Into<String>) {
        self.push(LogLevel::Info, stage, None, message.into());
    }

    pub fn warn(&mut self, stage: PipelineStage, key: impl Into<String>, message: impl Into<String>) {
        self.push(LogLevel::Warn, stage, Some(key.into()), message.into());
    }

    pub fn error(&mut self, stage: PipelineStage, message: impl Into<String>) {
        self.push(LogLevel::Error, stage, None, message.into());
    }

    /// Record an isolated per-item failure
    pub fn failure(&mut self, stage: PipelineStage, failure: &ItemFailure) {
        self.push(
            LogLevel::Warn,
            stage,
            Some(failure.key()),
            failure.to_string(),
        );
    }

    fn push(&mut self, level: LogLevel, stage: PipelineStage, key: Option<String>, message: String) {
        let key_field = key.as_deref().unwrap_or("");
        match level {
            LogLevel::Info => info!(stage = %stage, key = key_field, "{message}"),
            LogLevel::Warn => warn!(stage = %stage, key = key_field, "{message}"),
            LogLevel::Error => error!(stage = %stage, key = key_field, "{message}"),
        }
        self.entries.push(LogEntry {
            level,
            stage,
            key,
            message,
        });
    }

    /// Append another log's entries without re-emitting them
    pub fn extend(&mut self, other: RunLog) {
        self.entries.extend(other.entries);
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries at warn level or above
    pub fn problems(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().filter(|e| e.level >= LogLevel::Warn)
    }

    pub fn problem_count(&self) -> usize {
        self.problems().count()
    }

    /// One entry per line
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&entry.to_string());
            out.push('\n');
        }
        out
    }
}

/// Output of a stage plus the log of how it was produced
#[derive(Debug, Clone)]
pub struct StageOutcome<T> {
    pub output: T,
    pub log: RunLog,
}

impl<T> StageOutcome<T> {
    pub fn new(output: T, log: RunLog) -> Self {
        Self { output, log }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StageOutcome<U> {
        StageOutcome {
            output: f(self.output),
            log: self.log,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_and_problem_count() {
        let mut log = RunLog::new();
        log.info(PipelineStage::Profile, "profiled 3 columns");
        log.failure(
            PipelineStage::Profile,
            &ItemFailure::ColumnProfileFailed {
                column: "orders.total".to_string(),
                message: "bad cast".to_string(),
            },
        );

        assert_eq!(log.len(), 2);
        assert_eq!(log.problem_count(), 1);
        let rendered = log.render();
        assert!(rendered.starts_with("[INFO] profile: profiled 3 columns\n"));
        assert!(rendered.contains("[WARN] profile: orders.total: "));
    }

    #[test]
    fn test_extend_keeps_order() {
        let mut first = RunLog::new();
        first.info(PipelineStage::Catalog, "a");
        let mut second = RunLog::new();
        second.error(PipelineStage::Relations, "b");
        first.extend(second);
        let messages: Vec<_> = first.entries().iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["a", "b"]);
    }
}
