//! Storage collaborators the engine depends on, plus in-memory and
//! PostgreSQL implementations.

pub mod connector_repo;
pub mod execution_repo;
pub mod memory;
pub mod playbook_repo;
pub mod trigger_repo;

pub use connector_repo::PgConnectorRepository;
pub use execution_repo::PgExecutionRepository;
pub use memory::InMemoryStore;
pub use playbook_repo::PgPlaybookRepository;
pub use trigger_repo::PgTriggerRepository;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::AegisResult;
use crate::models::{Connector, ExecutionRecord, ExecutionUpdate, NewExecution, Playbook};

#[async_trait]
pub trait PlaybookStore: Send + Sync {
    async fn get_playbook(&self, id: i64) -> AegisResult<Option<Playbook>>;
}

#[async_trait]
pub trait ConnectorRegistry: Send + Sync {
    async fn list_connectors(&self) -> AegisResult<Vec<Connector>>;
}

/// Alert and incident lookups used to seed `context.trigger`.
#[async_trait]
pub trait TriggerStore: Send + Sync {
    async fn get_alert(&self, id: i64) -> AegisResult<Option<Value>>;
    async fn get_incident(&self, id: i64) -> AegisResult<Option<Value>>;
}

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn create_execution(&self, new: NewExecution) -> AegisResult<ExecutionRecord>;

    async fn update_execution(&self, id: i64, update: ExecutionUpdate)
        -> AegisResult<ExecutionRecord>;

    /// Bump the run counter and fold `duration_ms` into the running mean.
    async fn record_playbook_run(&self, playbook_id: i64, duration_ms: i64) -> AegisResult<()>;

    async fn get_execution(&self, id: i64) -> AegisResult<Option<ExecutionRecord>>;

    async fn list_executions(
        &self,
        playbook_id: Option<i64>,
        limit: i64,
    ) -> AegisResult<Vec<ExecutionRecord>>;
}

/// Running mean after adding one more sample.
pub fn next_average(previous: Option<f64>, previous_count: i64, sample: f64) -> f64 {
    match previous {
        Some(avg) if previous_count > 0 => {
            (avg * previous_count as f64 + sample) / (previous_count as f64 + 1.0)
        }
        _ => sample,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_average() {
        assert_eq!(next_average(None, 0, 120.0), 120.0);
        assert_eq!(next_average(Some(100.0), 1, 200.0), 150.0);
        assert_eq!(next_average(Some(150.0), 2, 300.0), 200.0);
    }
}
