//! Job log: append-only, timestamped trail of human-readable events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// One line in a job log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl LogEntry {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
        }
    }
}

/// Ordered log entries for one job.
///
/// Entries can only be appended. There is no way to edit, reorder or remove
/// an entry short of dropping the whole log with its job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobLog {
    entries: Vec<LogEntry>,
}

impl JobLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message stamped with the current time; returns the entry.
    pub fn append(&mut self, message: impl Into<String>) -> &LogEntry {
        self.entries.push(LogEntry::new(message));
        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.last()
    }

    /// Whether any entry contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.entries.iter().any(|e| e.message.contains(needle))
    }

    /// Render as `[RFC 3339 timestamp] message` lines.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push('[');
            out.push_str(&entry.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Secs, true));
            out.push_str("] ");
            out.push_str(&entry.message);
            out.push('\n');
        }
        out
    }
}

/// Destination for log lines produced while a stage runs.
///
/// The stage runner and backoff observer write through this trait so they
/// do not need to know where the job's log lives.
pub trait LogSink: Send + Sync {
    fn append(&self, message: String);
}

impl LogSink for Mutex<JobLog> {
    fn append(&self, message: String) {
        self.lock().unwrap_or_else(|e| e.into_inner()).append(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_keep_append_order() {
        let mut log = JobLog::new();
        log.append("first");
        log.append("second");

        let messages: Vec<&str> = log.entries().iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "second"]);
        assert!(log.entries()[0].timestamp <= log.entries()[1].timestamp);
    }

    #[test]
    fn render_prefixes_timestamps() {
        let mut log = JobLog::new();
        log.append("Queued");
        let text = log.render();
        assert!(text.starts_with('['));
        assert!(text.ends_with("] Queued\n"));
    }

    #[test]
    fn mutex_log_is_a_sink() {
        let sink = Mutex::new(JobLog::new());
        LogSink::append(&sink, "via sink".to_string());
        assert!(sink.lock().unwrap().contains("via sink"));
    }

    #[test]
    fn serializes_as_plain_array() {
        let mut log = JobLog::new();
        log.append("x");
        let json = serde_json::to_value(&log).unwrap();
        assert_eq!(json[0]["message"], "x");
    }
}
