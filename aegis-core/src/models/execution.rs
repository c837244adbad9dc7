use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "execution_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Completed => write!(f, "completed"),
            ExecutionStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Debug,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warning => write!(f, "warning"),
            LogLevel::Error => write!(f, "error"),
            LogLevel::Debug => write!(f, "debug"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionLogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Final outcome stored on an execution record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResults {
    pub success: bool,
    pub logs: Vec<ExecutionLogEntry>,
    pub context: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: i64,
    pub playbook_id: i64,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub triggered_by: Option<i64>,
    #[serde(default)]
    pub trigger_entity_id: Option<i64>,
    #[serde(default)]
    pub trigger_source: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub results: Option<ExecutionResults>,
}

impl ExecutionRecord {
    pub fn is_finished(&self) -> bool {
        self.status != ExecutionStatus::Running
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }

    pub fn apply(&mut self, update: ExecutionUpdate) {
        self.status = update.status;
        self.completed_at = Some(update.completed_at);
        self.error = update.error;
        self.results = Some(update.results);
    }
}

/// Fields known when a run starts.
#[derive(Debug, Clone, PartialEq)]
pub struct NewExecution {
    pub playbook_id: i64,
    pub triggered_by: Option<i64>,
    pub trigger_entity_id: Option<i64>,
    pub trigger_source: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// The single finalizing write applied to a record.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionUpdate {
    pub status: ExecutionStatus,
    pub completed_at: DateTime<Utc>,
    pub error: Option<String>,
    pub results: ExecutionResults,
}
