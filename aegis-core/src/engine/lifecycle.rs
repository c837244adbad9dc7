use chrono::Utc;
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::error::{retry_async_with_config, AegisError, AegisResult, RetryConfig};
use crate::models::{
    ExecutionRecord, ExecutionResults, ExecutionStatus, ExecutionUpdate, NewExecution,
    RunRequest, TriggerSource,
};
use crate::repo::{ConnectorRegistry, ExecutionStore, PlaybookStore, TriggerStore};

use super::context::ExecutionContext;
use super::logger::ExecutionLogger;
use super::PlaybookEngine;

pub const NO_START_FAILURE_MESSAGE: &str = "One or more starting steps failed";

/// Owns one playbook run from record creation to finalization.
pub struct PlaybookRunner {
    engine: PlaybookEngine,
    playbooks: Arc<dyn PlaybookStore>,
    connectors: Arc<dyn ConnectorRegistry>,
    triggers: Arc<dyn TriggerStore>,
    executions: Arc<dyn ExecutionStore>,
}

impl PlaybookRunner {
    pub fn new(
        engine: PlaybookEngine,
        playbooks: Arc<dyn PlaybookStore>,
        connectors: Arc<dyn ConnectorRegistry>,
        triggers: Arc<dyn TriggerStore>,
        executions: Arc<dyn ExecutionStore>,
    ) -> Self {
        Self {
            engine,
            playbooks,
            connectors,
            triggers,
            executions,
        }
    }

    /// Use a single store for every collaborator.
    pub fn with_store<S>(engine: PlaybookEngine, store: Arc<S>) -> Self
    where
        S: PlaybookStore + ConnectorRegistry + TriggerStore + ExecutionStore + 'static,
    {
        Self::new(engine, store.clone(), store.clone(), store.clone(), store)
    }

    pub fn engine(&self) -> &PlaybookEngine {
        &self.engine
    }

    /// Run a playbook and report only whether it completed.
    pub async fn run(&self, request: RunRequest) -> bool {
        match self.run_detailed(request).await {
            Ok(record) => record.status == ExecutionStatus::Completed,
            Err(e) => {
                e.log();
                false
            }
        }
    }

    /// Run a playbook and return the finalized execution record.
    ///
    /// Errors are returned only when the run could not be started or its
    /// record could not be written; step failures end up in the record.
    pub async fn run_detailed(&self, request: RunRequest) -> AegisResult<ExecutionRecord> {
        let playbook = self
            .playbooks
            .get_playbook(request.playbook_id)
            .await?
            .ok_or(AegisError::PlaybookNotFound(request.playbook_id))?;

        if !playbook.enabled {
            return Err(AegisError::PlaybookDisabled(playbook.id));
        }

        let started = Instant::now();
        let record = self
            .executions
            .create_execution(NewExecution {
                playbook_id: playbook.id,
                triggered_by: request.triggered_by,
                trigger_entity_id: request.trigger_entity_id,
                trigger_source: request.trigger_source.as_ref().map(|s| s.to_string()),
                started_at: Utc::now(),
            })
            .await?;

        info!(
            execution_id = record.id,
            playbook_id = playbook.id,
            playbook = %playbook.name,
            "Starting playbook execution"
        );

        let logger = ExecutionLogger::new(Some(record.id));
        logger.info(format!(
            "Starting execution of playbook {} ({})",
            playbook.name, playbook.id
        ));

        let mut ctx = match self.load_trigger(&request, &logger).await {
            Some(trigger) => ExecutionContext::with_trigger(trigger),
            None => ExecutionContext::new(),
        };

        let connectors = match self.connectors.list_connectors().await {
            Ok(connectors) => connectors,
            Err(e) => {
                logger.error(format!("Failed to load connectors: {}", e));
                Vec::new()
            }
        };

        let outcome =
            AssertUnwindSafe(self.engine.execute(&playbook, &connectors, &mut ctx, &logger))
                .catch_unwind()
                .await;

        let (success, error) = match outcome {
            Ok(Ok(true)) => (true, None),
            Ok(Ok(false)) => (false, Some(NO_START_FAILURE_MESSAGE.to_string())),
            Ok(Err(e)) => {
                logger.error(format!("Playbook execution failed: {}", e));
                (false, Some(e.to_string()))
            }
            Err(_) => {
                logger.error("Playbook execution panicked");
                (false, Some("Playbook execution panicked".to_string()))
            }
        };

        let duration_ms = started.elapsed().as_millis() as i64;
        let status = if success {
            ExecutionStatus::Completed
        } else {
            ExecutionStatus::Failed
        };
        logger.info(format!(
            "Playbook execution {} in {} ms",
            status, duration_ms
        ));

        let update = ExecutionUpdate {
            status,
            completed_at: Utc::now(),
            error,
            results: ExecutionResults {
                success,
                logs: logger.entries(),
                context: ctx.into_value(),
            },
        };
        let finalized = retry_async_with_config(
            || self.executions.update_execution(record.id, update.clone()),
            RetryConfig::for_database(),
        )
        .await?;

        if let Err(e) = self
            .executions
            .record_playbook_run(playbook.id, duration_ms)
            .await
        {
            warn!(
                playbook_id = playbook.id,
                error = %e,
                "Failed to update playbook run statistics"
            );
        }

        Ok(finalized)
    }

    /// Alert or incident payload for `context.trigger`. `None` leaves the
    /// context without a `trigger` key.
    async fn load_trigger(&self, request: &RunRequest, logger: &ExecutionLogger) -> Option<Value> {
        let (Some(source), Some(entity_id)) = (&request.trigger_source, request.trigger_entity_id)
        else {
            return None;
        };

        let lookup = match source {
            TriggerSource::Alert => self.triggers.get_alert(entity_id).await,
            TriggerSource::Incident => self.triggers.get_incident(entity_id).await,
            TriggerSource::Other(name) => {
                logger.warn(format!("Unknown trigger source: {}", name));
                return None;
            }
        };

        match lookup {
            Ok(Some(entity)) => {
                logger.info(format!("Loaded {} {} as trigger", source, entity_id));
                Some(entity)
            }
            Ok(None) => {
                logger.warn(format!("Trigger {} {} not found", source, entity_id));
                None
            }
            Err(e) => {
                logger.warn(format!(
                    "Failed to load trigger {} {}: {}",
                    source, entity_id, e
                ));
                None
            }
        }
    }
}
