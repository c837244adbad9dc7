use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;

use crate::error::AegisResult;

use super::TriggerStore;

/// Reads alerts and incidents as JSON objects with camelCase keys, ready to
/// be placed under `context.trigger`.
pub struct PgTriggerRepository {
    pool: PgPool,
}

impl PgTriggerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TriggerStore for PgTriggerRepository {
    async fn get_alert(&self, id: i64) -> AegisResult<Option<Value>> {
        let alert = sqlx::query_scalar::<_, Value>(
            r#"
            SELECT jsonb_build_object(
                'id', id,
                'title', title,
                'severity', severity,
                'status', status,
                'source', source,
                'sourceIp', source_ip,
                'hostname', hostname,
                'username', username,
                'details', details,
                'createdAt', created_at
            )
            FROM alerts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(alert)
    }

    async fn get_incident(&self, id: i64) -> AegisResult<Option<Value>> {
        let incident = sqlx::query_scalar::<_, Value>(
            r#"
            SELECT jsonb_build_object(
                'id', id,
                'title', title,
                'description', description,
                'severity', severity,
                'status', status,
                'details', details,
                'createdAt', created_at
            )
            FROM incidents
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(incident)
    }
}
