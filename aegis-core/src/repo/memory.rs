use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;

use crate::error::{AegisError, AegisResult};
use crate::models::{
    Connector, ExecutionRecord, ExecutionStatus, ExecutionUpdate, NewExecution, Playbook,
};

use super::{
    next_average, ConnectorRegistry, ExecutionStore, PlaybookStore, TriggerStore,
};

/// Process-local store used by tests and the CLI's file mode.
#[derive(Default)]
pub struct InMemoryStore {
    playbooks: RwLock<HashMap<i64, Playbook>>,
    connectors: RwLock<Vec<Connector>>,
    alerts: RwLock<HashMap<i64, Value>>,
    incidents: RwLock<HashMap<i64, Value>>,
    executions: RwLock<BTreeMap<i64, ExecutionRecord>>,
    next_execution_id: AtomicI64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_playbook(&self, playbook: Playbook) {
        self.playbooks.write().await.insert(playbook.id, playbook);
    }

    pub async fn insert_connector(&self, connector: Connector) {
        let mut connectors = self.connectors.write().await;
        connectors.retain(|c| c.name != connector.name);
        connectors.push(connector);
    }

    pub async fn insert_alert(&self, id: i64, alert: Value) {
        self.alerts.write().await.insert(id, alert);
    }

    pub async fn insert_incident(&self, id: i64, incident: Value) {
        self.incidents.write().await.insert(id, incident);
    }

    pub async fn playbook(&self, id: i64) -> Option<Playbook> {
        self.playbooks.read().await.get(&id).cloned()
    }

    pub async fn executions(&self) -> Vec<ExecutionRecord> {
        self.executions.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl PlaybookStore for InMemoryStore {
    async fn get_playbook(&self, id: i64) -> AegisResult<Option<Playbook>> {
        Ok(self.playbook(id).await)
    }
}

#[async_trait]
impl ConnectorRegistry for InMemoryStore {
    async fn list_connectors(&self) -> AegisResult<Vec<Connector>> {
        Ok(self.connectors.read().await.clone())
    }
}

#[async_trait]
impl TriggerStore for InMemoryStore {
    async fn get_alert(&self, id: i64) -> AegisResult<Option<Value>> {
        Ok(self.alerts.read().await.get(&id).cloned())
    }

    async fn get_incident(&self, id: i64) -> AegisResult<Option<Value>> {
        Ok(self.incidents.read().await.get(&id).cloned())
    }
}

#[async_trait]
impl ExecutionStore for InMemoryStore {
    async fn create_execution(&self, new: NewExecution) -> AegisResult<ExecutionRecord> {
        let id = self.next_execution_id.fetch_add(1, Ordering::SeqCst) + 1;
        let record = ExecutionRecord {
            id,
            playbook_id: new.playbook_id,
            status: ExecutionStatus::Running,
            triggered_by: new.triggered_by,
            trigger_entity_id: new.trigger_entity_id,
            trigger_source: new.trigger_source,
            started_at: new.started_at,
            completed_at: None,
            error: None,
            results: None,
        };

        self.executions.write().await.insert(id, record.clone());
        Ok(record)
    }

    async fn update_execution(
        &self,
        id: i64,
        update: ExecutionUpdate,
    ) -> AegisResult<ExecutionRecord> {
        let mut executions = self.executions.write().await;
        let record = executions
            .get_mut(&id)
            .ok_or(AegisError::ExecutionNotFound(id))?;
        record.apply(update);
        Ok(record.clone())
    }

    async fn record_playbook_run(&self, playbook_id: i64, duration_ms: i64) -> AegisResult<()> {
        let mut playbooks = self.playbooks.write().await;
        let playbook = playbooks
            .get_mut(&playbook_id)
            .ok_or(AegisError::PlaybookNotFound(playbook_id))?;

        playbook.avg_duration_ms = Some(next_average(
            playbook.avg_duration_ms,
            playbook.run_count,
            duration_ms as f64,
        ));
        playbook.run_count += 1;
        playbook.last_run_at = Some(Utc::now());
        Ok(())
    }

    async fn get_execution(&self, id: i64) -> AegisResult<Option<ExecutionRecord>> {
        Ok(self.executions.read().await.get(&id).cloned())
    }

    async fn list_executions(
        &self,
        playbook_id: Option<i64>,
        limit: i64,
    ) -> AegisResult<Vec<ExecutionRecord>> {
        let executions = self.executions.read().await;
        Ok(executions
            .values()
            .rev()
            .filter(|r| playbook_id.map_or(true, |id| r.playbook_id == id))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}
