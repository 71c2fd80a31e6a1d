/// Notice history shown by the interactive frontends
///
/// Panels raise [`Notice`]s; the runtime timestamps them into a bounded
/// [`LogBuffer`] so a frontend can replay them on demand.
use chrono::{DateTime, Local};
use serde::Serialize;

use crate::{
    api::{Notice, NoticeLevel},
    protocol::RegisterKind,
};

/// A log entry with timestamp and message
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub message: String,
    pub level: LogLevel,
    pub kind: Option<RegisterKind>,
}

/// Log entry severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl From<NoticeLevel> for LogLevel {
    fn from(level: NoticeLevel) -> Self {
        match level {
            NoticeLevel::Success => LogLevel::Info,
            NoticeLevel::Warning => LogLevel::Warning,
            NoticeLevel::Critical => LogLevel::Error,
        }
    }
}

impl LogEntry {
    /// Create a new log entry with the current timestamp
    pub fn new(message: String, level: LogLevel) -> Self {
        Self {
            timestamp: Local::now(),
            message,
            level,
            kind: None,
        }
    }
}

impl From<Notice> for LogEntry {
    fn from(notice: Notice) -> Self {
        Self {
            kind: Some(notice.kind),
            ..Self::new(notice.message, notice.level.into())
        }
    }
}

/// A simple log buffer that stores recent log entries
pub struct LogBuffer {
    entries: Vec<LogEntry>,
    max_entries: usize,
}

impl LogBuffer {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_entries,
        }
    }

    /// Add a log entry, trimming the oldest past capacity
    pub fn push(&mut self, entry: LogEntry) {
        self.entries.push(entry);
        if self.entries.len() > self.max_entries {
            let excess = self.entries.len() - self.max_entries;
            self.entries.drain(0..excess);
        }
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
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(1000)
    }
}
