use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Local;
use serde::Serialize;

use crate::types::Timestamp;

const DEFAULT_CAPACITY: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub at: Timestamp,
    pub level: Level,
    pub message: String,
}

/// Operator-facing event log shared between the worker and front-ends.
///
/// Every entry is mirrored to `tracing` at the matching level.
pub struct EventLog {
    entries: Arc<RwLock<VecDeque<LogEntry>>>,
    capacity: usize,
}

impl EventLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.record(Level::Info, message.into());
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.record(Level::Warning, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.record(Level::Error, message.into());
    }

    fn record(&self, level: Level, message: String) {
        match level {
            Level::Info => tracing::info!("{}", message),
            Level::Warning => tracing::warn!("{}", message),
            Level::Error => tracing::error!("{}", message),
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(LogEntry {
            at: Local::now(),
            level,
            message,
        });
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventLog {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            capacity: self.capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_and_ordered() {
        let log = EventLog::with_capacity(3);
        for i in 0..5 {
            log.info(format!("entry {i}"));
        }
        log.error("boom");

        let entries = log.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].message, "entry 3");
        assert_eq!(entries[2].level, Level::Error);
        assert!(entries[0].at <= entries[2].at);
    }
}
