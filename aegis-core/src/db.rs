use serde::{Deserialize, Serialize};
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub pool_max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub pool_min_connections: u32,
    #[serde(default = "default_connect_timeout")]
    pub pool_acquire_timeout_secs: u64,
    #[serde(default = "default_idle_timeout")]
    pub pool_idle_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    600
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            pool_max_connections: default_max_connections(),
            pool_min_connections: default_min_connections(),
            pool_acquire_timeout_secs: default_connect_timeout(),
            pool_idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl DatabaseConfig {
    /// Build from `DATABASE_URL` plus optional `DB_*` pool settings.
    pub fn from_env() -> Result<Self, DatabaseError> {
        let url = std::env::var("DATABASE_URL")
            .map_err(|_| DatabaseError::MissingEnvVar("DATABASE_URL".to_string()))?;

        let env_or = |key: &str, fallback: u64| -> u64 {
            std::env::var(key)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(fallback)
        };

        Ok(Self {
            url,
            pool_max_connections: env_or("DB_MAX_CONNECTIONS", default_max_connections() as u64)
                as u32,
            pool_min_connections: env_or("DB_MIN_CONNECTIONS", default_min_connections() as u64)
                as u32,
            pool_acquire_timeout_secs: env_or("DB_CONNECT_TIMEOUT_SECS", default_connect_timeout()),
            pool_idle_timeout_secs: env_or("DB_IDLE_TIMEOUT_SECS", default_idle_timeout()),
        })
    }

    pub fn is_configured(&self) -> bool {
        !self.url.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationFailed(#[source] sqlx::migrate::MigrateError),

    #[error("Invalid database configuration: {0}")]
    InvalidConfig(String),
}

/// Shared Postgres pool backing the playbook, connector, trigger and
/// execution repositories.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        if !config.is_configured() {
            return Err(DatabaseError::InvalidConfig(
                "database url is empty".to_string(),
            ));
        }
        if config.pool_min_connections > config.pool_max_connections {
            return Err(DatabaseError::InvalidConfig(format!(
                "pool_min_connections ({}) exceeds pool_max_connections ({})",
                config.pool_min_connections, config.pool_max_connections
            )));
        }

        info!(
            pool_max_connections = config.pool_max_connections,
            "Connecting to playbook database"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.pool_max_connections)
            .min_connections(config.pool_min_connections)
            .acquire_timeout(Duration::from_secs(config.pool_acquire_timeout_secs))
            .idle_timeout(Duration::from_secs(config.pool_idle_timeout_secs))
            .connect(&config.url)
            .await?;

        debug!("Database connection pool established");
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<(), DatabaseError> {
        info!("Applying execution schema migrations");

        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(DatabaseError::MigrationFailed)?;

        debug!("Migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database connection pool closed");
    }
}

/// Connect with the given settings and bring the schema up to date.
pub async fn init_database(config: &DatabaseConfig) -> Result<Database, DatabaseError> {
    let db = Database::connect(config).await?;
    db.run_migrations().await?;
    Ok(db)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_config_default() {
        let config = DatabaseConfig::default();
        assert_eq!(config.pool_max_connections, 10);
        assert_eq!(config.pool_min_connections, 1);
        assert_eq!(config.pool_acquire_timeout_secs, 30);
        assert_eq!(config.pool_idle_timeout_secs, 600);
        assert!(!config.is_configured());
    }

    #[test]
    fn test_database_config_from_env_missing_url() {
        std::env::remove_var("DATABASE_URL");
        let result = DatabaseConfig::from_env();
        assert!(matches!(result, Err(DatabaseError::MissingEnvVar(_))));
    }

    #[tokio::test]
    async fn test_connect_rejects_empty_url() {
        let result = Database::connect(&DatabaseConfig::default()).await;
        assert!(matches!(result, Err(DatabaseError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_connect_rejects_inverted_pool_bounds() {
        let config = DatabaseConfig {
            url: "postgres://localhost/aegis".to_string(),
            pool_max_connections: 2,
            pool_min_connections: 5,
            ..Default::default()
        };
        let result = Database::connect(&config).await;
        assert!(matches!(result, Err(DatabaseError::InvalidConfig(_))));
    }
}
