use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

use crate::models::{ExecutionLogEntry, LogLevel};

/// Append-only run log shared by every branch of one execution.
///
/// Each entry is mirrored to `tracing` with the execution id attached.
#[derive(Debug, Clone, Default)]
pub struct ExecutionLogger {
    execution_id: Option<i64>,
    entries: Arc<Mutex<Vec<ExecutionLogEntry>>>,
}

impl ExecutionLogger {
    pub fn new(execution_id: Option<i64>) -> Self {
        Self {
            execution_id,
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn execution_id(&self) -> Option<i64> {
        self.execution_id
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let entry = ExecutionLogEntry::new(level, message);

        match level {
            LogLevel::Info => info!(execution_id = ?self.execution_id, "{}", entry.message),
            LogLevel::Warning => warn!(execution_id = ?self.execution_id, "{}", entry.message),
            LogLevel::Error => error!(execution_id = ?self.execution_id, "{}", entry.message),
            LogLevel::Debug => debug!(execution_id = ?self.execution_id, "{}", entry.message),
        }

        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(entry);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message);
    }

    pub fn entries(&self) -> Vec<ExecutionLogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn count(&self, level: LogLevel) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|e| e.level == level)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_are_shared_between_clones() {
        let logger = ExecutionLogger::new(Some(1));
        let branch = logger.clone();

        logger.info("Executing step: block");
        branch.warn("Step not found: ghost");
        branch.error("Connector not found: FW9");

        let entries = logger.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].level, LogLevel::Warning);
        assert_eq!(logger.count(LogLevel::Error), 1);
        assert_eq!(logger.execution_id(), Some(1));
    }
}
