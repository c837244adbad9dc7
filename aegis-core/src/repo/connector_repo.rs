use async_trait::async_trait;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};

use crate::error::AegisResult;
use crate::models::{Connector, ConnectorConfiguration, ConnectorType};

use super::ConnectorRegistry;

#[derive(Debug, FromRow)]
struct ConnectorRow {
    name: String,
    connector_type: String,
    configuration: Json<ConnectorConfiguration>,
    enabled: bool,
}

impl From<ConnectorRow> for Connector {
    fn from(row: ConnectorRow) -> Self {
        let connector_type = serde_json::from_value(Value::String(row.connector_type))
            .unwrap_or(ConnectorType::Other);
        Self {
            name: row.name,
            connector_type,
            configuration: row.configuration.0,
            enabled: row.enabled,
        }
    }
}

pub struct PgConnectorRepository {
    pool: PgPool,
}

impl PgConnectorRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConnectorRegistry for PgConnectorRepository {
    async fn list_connectors(&self) -> AegisResult<Vec<Connector>> {
        let rows = sqlx::query_as::<_, ConnectorRow>(
            r#"
            SELECT name, connector_type, configuration, enabled
            FROM connectors
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Connector::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_conversion() {
        let row = ConnectorRow {
            name: "okta".to_string(),
            connector_type: "identity".to_string(),
            configuration: Json(ConnectorConfiguration::new("https://okta.example.com")),
            enabled: false,
        };
        let connector = Connector::from(row);
        assert_eq!(connector.connector_type, ConnectorType::Identity);
        assert!(!connector.enabled);

        let row = ConnectorRow {
            name: "legacy".to_string(),
            connector_type: "mainframe".to_string(),
            configuration: Json(ConnectorConfiguration::new("http://legacy")),
            enabled: true,
        };
        assert_eq!(Connector::from(row).connector_type, ConnectorType::Other);
    }
}
