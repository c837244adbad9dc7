use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};

use crate::error::AegisResult;
use crate::models::{Playbook, PlaybookStep};

use super::PlaybookStore;

#[derive(Debug, FromRow)]
struct PlaybookRow {
    id: i64,
    name: String,
    description: Option<String>,
    enabled: bool,
    steps: Json<Vec<PlaybookStep>>,
    run_count: i64,
    avg_duration_ms: Option<f64>,
    last_run_at: Option<DateTime<Utc>>,
}

impl From<PlaybookRow> for Playbook {
    fn from(row: PlaybookRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            description: row.description,
            enabled: row.enabled,
            steps: row.steps.0,
            run_count: row.run_count,
            avg_duration_ms: row.avg_duration_ms,
            last_run_at: row.last_run_at,
        }
    }
}

pub struct PgPlaybookRepository {
    pool: PgPool,
}

impl PgPlaybookRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, playbook: &Playbook) -> AegisResult<Playbook> {
        let row = sqlx::query_as::<_, PlaybookRow>(
            r#"
            INSERT INTO playbooks (name, description, enabled, steps)
            VALUES ($1, $2, $3, $4)
            RETURNING id, name, description, enabled, steps, run_count, avg_duration_ms, last_run_at
            "#,
        )
        .bind(&playbook.name)
        .bind(&playbook.description)
        .bind(playbook.enabled)
        .bind(Json(&playbook.steps))
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }
}

#[async_trait]
impl PlaybookStore for PgPlaybookRepository {
    async fn get_playbook(&self, id: i64) -> AegisResult<Option<Playbook>> {
        let row = sqlx::query_as::<_, PlaybookRow>(
            r#"
            SELECT id, name, description, enabled, steps, run_count, avg_duration_ms, last_run_at
            FROM playbooks
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Playbook::from))
    }
}
