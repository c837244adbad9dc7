use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tracing::debug;

use crate::error::{AegisError, AegisResult};
use crate::models::{
    ExecutionRecord, ExecutionResults, ExecutionStatus, ExecutionUpdate, NewExecution,
};

use super::ExecutionStore;

#[derive(Debug, FromRow)]
struct ExecutionRow {
    id: i64,
    playbook_id: i64,
    status: ExecutionStatus,
    triggered_by: Option<i64>,
    trigger_entity_id: Option<i64>,
    trigger_source: Option<String>,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    error: Option<String>,
    results: Option<Json<ExecutionResults>>,
}

impl From<ExecutionRow> for ExecutionRecord {
    fn from(row: ExecutionRow) -> Self {
        Self {
            id: row.id,
            playbook_id: row.playbook_id,
            status: row.status,
            triggered_by: row.triggered_by,
            trigger_entity_id: row.trigger_entity_id,
            trigger_source: row.trigger_source,
            started_at: row.started_at,
            completed_at: row.completed_at,
            error: row.error,
            results: row.results.map(|json| json.0),
        }
    }
}

const EXECUTION_COLUMNS: &str = "id, playbook_id, status, triggered_by, trigger_entity_id, \
     trigger_source, started_at, completed_at, error, results";

pub struct PgExecutionRepository {
    pool: PgPool,
}

impl PgExecutionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionStore for PgExecutionRepository {
    async fn create_execution(&self, new: NewExecution) -> AegisResult<ExecutionRecord> {
        let query = format!(
            r#"
            INSERT INTO playbook_executions
                (playbook_id, status, triggered_by, trigger_entity_id, trigger_source, started_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            EXECUTION_COLUMNS
        );

        let row = sqlx::query_as::<_, ExecutionRow>(&query)
            .bind(new.playbook_id)
            .bind(ExecutionStatus::Running)
            .bind(new.triggered_by)
            .bind(new.trigger_entity_id)
            .bind(&new.trigger_source)
            .bind(new.started_at)
            .fetch_one(&self.pool)
            .await?;

        debug!(execution_id = row.id, playbook_id = row.playbook_id, "Created execution record");
        Ok(row.into())
    }

    async fn update_execution(
        &self,
        id: i64,
        update: ExecutionUpdate,
    ) -> AegisResult<ExecutionRecord> {
        let query = format!(
            r#"
            UPDATE playbook_executions
            SET status = $2, completed_at = $3, error = $4, results = $5
            WHERE id = $1
            RETURNING {}
            "#,
            EXECUTION_COLUMNS
        );

        let row = sqlx::query_as::<_, ExecutionRow>(&query)
            .bind(id)
            .bind(update.status)
            .bind(update.completed_at)
            .bind(&update.error)
            .bind(Json(&update.results))
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AegisError::ExecutionNotFound(id))?;

        Ok(row.into())
    }

    async fn record_playbook_run(&self, playbook_id: i64, duration_ms: i64) -> AegisResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE playbooks
            SET avg_duration_ms = CASE
                    WHEN run_count = 0 OR avg_duration_ms IS NULL THEN $2::float8
                    ELSE (avg_duration_ms * run_count + $2::float8) / (run_count + 1)
                END,
                run_count = run_count + 1,
                last_run_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(playbook_id)
        .bind(duration_ms as f64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AegisError::PlaybookNotFound(playbook_id));
        }
        Ok(())
    }

    async fn get_execution(&self, id: i64) -> AegisResult<Option<ExecutionRecord>> {
        let query = format!(
            "SELECT {} FROM playbook_executions WHERE id = $1",
            EXECUTION_COLUMNS
        );

        let row = sqlx::query_as::<_, ExecutionRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(ExecutionRecord::from))
    }

    async fn list_executions(
        &self,
        playbook_id: Option<i64>,
        limit: i64,
    ) -> AegisResult<Vec<ExecutionRecord>> {
        let query = format!(
            r#"
            SELECT {}
            FROM playbook_executions
            WHERE ($1::bigint IS NULL OR playbook_id = $1)
            ORDER BY started_at DESC, id DESC
            LIMIT $2
            "#,
            EXECUTION_COLUMNS
        );

        let rows = sqlx::query_as::<_, ExecutionRow>(&query)
            .bind(playbook_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(ExecutionRecord::from).collect())
    }
}
