//! Error types for the Aegis core library.
//!
//! Every fallible operation in the engine and its collaborators returns
//! [`AegisResult`]. Step handlers never surface these errors to the walker:
//! they log them into the execution log and report a failed step instead.
//!
//! # Error Codes Reference
//!
//! | Code Range | Category | Description |
//! |------------|----------|-------------|
//! | E1001-E1099 | Database | Connection, query and migration errors |
//! | E2001-E2099 | Config | Environment, config file and validation errors |
//! | E3001-E3099 | Playbook | Loading, step configuration and graph errors |
//! | E4001-E4099 | Execution | Run lifecycle and trigger errors |
//! | E5001-E5099 | Dispatch | Outbound HTTP, connector and timeout errors |
//! | E9001-E9099 | General | Internal, IO and serialization errors |

use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Backoff settings used when an operation is retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 for doubling)
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% jitter to each delay
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Retry settings for database operations.
    pub fn for_database() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        let final_delay = if self.jitter {
            let jitter_factor = 1.0 + (rand_jitter() * 0.25);
            capped_delay * jitter_factor
        } else {
            capped_delay
        };

        Duration::from_millis(final_delay as u64)
    }
}

/// Cheap jitter source in `[0.0, 1.0)` based on the clock.
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

/// The main error type for the Aegis core library.
#[derive(Debug, Error)]
pub enum AegisError {
    // ========================================================================
    // Database Errors (E1001-E1099)
    // ========================================================================
    #[error("[E1001] Database connection failed: {0}")]
    DatabaseConnectionFailed(String),

    #[error("[E1002] Database query failed: {0}")]
    DatabaseQueryFailed(String),

    #[error("[E1003] Database migration failed: {0}")]
    DatabaseMigrationFailed(String),

    #[error("[E1004] Database pool unavailable: {0}")]
    DatabasePoolUnavailable(String),

    // ========================================================================
    // Configuration Errors (E2001-E2099)
    // ========================================================================
    #[error("[E2001] Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("[E2002] Failed to parse configuration: {0}")]
    ConfigParseError(String),

    #[error("[E2003] Invalid configuration value for '{key}': {message}")]
    InvalidConfigValue { key: String, message: String },

    // ========================================================================
    // Playbook Errors (E3001-E3099)
    // ========================================================================
    #[error("[E3001] Playbook not found: {0}")]
    PlaybookNotFound(i64),

    #[error("[E3002] Playbook {0} is disabled")]
    PlaybookDisabled(i64),

    #[error("[E3003] Invalid configuration for step '{step_id}': {message}")]
    InvalidStepConfig { step_id: String, message: String },

    #[error("[E3004] Playbook has no starting steps")]
    NoStartingSteps,

    #[error("[E3005] Step '{step_id}' references unknown step '{target}'")]
    DanglingReference { step_id: String, target: String },

    #[error("[E3006] Duplicate step id: {0}")]
    DuplicateStepId(String),

    // ========================================================================
    // Execution Errors (E4001-E4099)
    // ========================================================================
    #[error("[E4001] Execution record not found: {0}")]
    ExecutionNotFound(i64),

    #[error("[E4002] Step '{0}' panicked")]
    StepPanicked(String),

    // ========================================================================
    // Dispatch Errors (E5001-E5099)
    // ========================================================================
    #[error("[E5001] Connector not found for step {step_id}: {name}")]
    ConnectorNotFound { step_id: String, name: String },

    #[error("[E5002] Request to {url} timed out after {timeout_ms} ms")]
    RequestTimeout { url: String, timeout_ms: u64 },

    #[error("[E5003] Request failed: {0}")]
    RequestFailed(String),

    #[error("[E5004] Invalid request: {0}")]
    InvalidRequest(String),

    #[error("[E5005] Service unavailable: {0}")]
    ServiceUnavailable(String),

    // ========================================================================
    // General Errors (E9001-E9099)
    // ========================================================================
    #[error("[E9001] Internal error: {0}")]
    Internal(String),

    #[error("[E9002] IO error: {0}")]
    IoError(String),

    #[error("[E9003] Serialization error: {0}")]
    SerializationError(String),
}

/// Result type alias for Aegis operations.
pub type AegisResult<T> = Result<T, AegisError>;

// ============================================================================
// From trait implementations
// ============================================================================

impl From<sqlx::Error> for AegisError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut => AegisError::DatabasePoolUnavailable(err.to_string()),
            sqlx::Error::PoolClosed => {
                AegisError::DatabasePoolUnavailable("Connection pool is closed".to_string())
            }
            sqlx::Error::Configuration(_) | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                AegisError::DatabaseConnectionFailed(err.to_string())
            }
            sqlx::Error::Database(db_err) => AegisError::DatabaseQueryFailed(db_err.to_string()),
            _ => AegisError::DatabaseQueryFailed(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for AegisError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AegisError::DatabaseMigrationFailed(err.to_string())
    }
}

impl From<reqwest::Error> for AegisError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AegisError::RequestTimeout {
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
                timeout_ms: 0,
            }
        } else if err.is_connect() {
            AegisError::ServiceUnavailable(err.to_string())
        } else if err.is_builder() {
            AegisError::InvalidRequest(err.to_string())
        } else {
            AegisError::RequestFailed(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AegisError {
    fn from(err: serde_json::Error) -> Self {
        AegisError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for AegisError {
    fn from(err: serde_yaml::Error) -> Self {
        AegisError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for AegisError {
    fn from(err: std::io::Error) -> Self {
        AegisError::IoError(err.to_string())
    }
}

impl From<config::ConfigError> for AegisError {
    fn from(err: config::ConfigError) -> Self {
        match err {
            config::ConfigError::NotFound(key) => AegisError::InvalidConfigValue {
                key,
                message: "Key not found".to_string(),
            },
            config::ConfigError::Type {
                origin,
                unexpected,
                expected,
                key,
            } => AegisError::InvalidConfigValue {
                key: key.unwrap_or_else(|| origin.map(|o| o.to_string()).unwrap_or_default()),
                message: format!("Expected {}, got {}", expected, unexpected),
            },
            _ => AegisError::ConfigParseError(err.to_string()),
        }
    }
}

impl From<crate::db::DatabaseError> for AegisError {
    fn from(err: crate::db::DatabaseError) -> Self {
        match err {
            crate::db::DatabaseError::MissingEnvVar(name) => AegisError::MissingEnvVar(name),
            crate::db::DatabaseError::ConnectionFailed(e) => {
                AegisError::DatabaseConnectionFailed(e.to_string())
            }
            crate::db::DatabaseError::MigrationFailed(e) => {
                AegisError::DatabaseMigrationFailed(e.to_string())
            }
            crate::db::DatabaseError::InvalidConfig(msg) => AegisError::InvalidConfigValue {
                key: "database".to_string(),
                message: msg,
            },
        }
    }
}

// ============================================================================
// Error categorization helpers
// ============================================================================

impl AegisError {
    /// Returns true if the operation might succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AegisError::DatabasePoolUnavailable(_)
                | AegisError::DatabaseConnectionFailed(_)
                | AegisError::RequestTimeout { .. }
                | AegisError::ServiceUnavailable(_)
        )
    }

    /// Returns true for errors caused by a malformed playbook definition.
    pub fn is_playbook_error(&self) -> bool {
        matches!(
            self,
            AegisError::PlaybookNotFound(_)
                | AegisError::PlaybookDisabled(_)
                | AegisError::InvalidStepConfig { .. }
                | AegisError::NoStartingSteps
                | AegisError::DanglingReference { .. }
                | AegisError::DuplicateStepId(_)
        )
    }

    /// Returns an error code suitable for logging or external reporting.
    pub fn error_code(&self) -> &'static str {
        match self {
            AegisError::DatabaseConnectionFailed(_) => "E1001",
            AegisError::DatabaseQueryFailed(_) => "E1002",
            AegisError::DatabaseMigrationFailed(_) => "E1003",
            AegisError::DatabasePoolUnavailable(_) => "E1004",
            AegisError::MissingEnvVar(_) => "E2001",
            AegisError::ConfigParseError(_) => "E2002",
            AegisError::InvalidConfigValue { .. } => "E2003",
            AegisError::PlaybookNotFound(_) => "E3001",
            AegisError::PlaybookDisabled(_) => "E3002",
            AegisError::InvalidStepConfig { .. } => "E3003",
            AegisError::NoStartingSteps => "E3004",
            AegisError::DanglingReference { .. } => "E3005",
            AegisError::DuplicateStepId(_) => "E3006",
            AegisError::ExecutionNotFound(_) => "E4001",
            AegisError::StepPanicked(_) => "E4002",
            AegisError::ConnectorNotFound { .. } => "E5001",
            AegisError::RequestTimeout { .. } => "E5002",
            AegisError::RequestFailed(_) => "E5003",
            AegisError::InvalidRequest(_) => "E5004",
            AegisError::ServiceUnavailable(_) => "E5005",
            AegisError::Internal(_) => "E9001",
            AegisError::IoError(_) => "E9002",
            AegisError::SerializationError(_) => "E9003",
        }
    }

    /// Log this error with a severity matching its category.
    pub fn log(&self) {
        let code = self.error_code();
        if self.is_transient() {
            warn!(error_code = %code, "Transient error occurred: {}", self);
        } else {
            error!(error_code = %code, "Error occurred: {}", self);
        }
    }
}

// ============================================================================
// Retry utilities
// ============================================================================

/// Execute an async operation, retrying transient failures with backoff.
pub async fn retry_async_with_config<F, Fut, T>(
    operation: F,
    config: RetryConfig,
) -> AegisResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = AegisResult<T>>,
{
    let mut last_error = None;

    for attempt in 0..config.max_attempts {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    info!(
                        "Operation succeeded on attempt {} after {} retries",
                        attempt + 1,
                        attempt
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                if !e.is_transient() || attempt + 1 >= config.max_attempts {
                    e.log();
                    return Err(e);
                }

                let delay = config.delay_for_attempt(attempt);
                warn!(
                    "Attempt {} failed ({}), retrying in {:?}",
                    attempt + 1,
                    e,
                    delay
                );

                tokio::time::sleep(delay).await;
                last_error = Some(e);
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| AegisError::Internal("Retry loop exhausted without error".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_error_display_includes_code() {
        let err = AegisError::ConnectorNotFound {
            step_id: "block".to_string(),
            name: "FW1".to_string(),
        };
        assert!(err.to_string().contains("E5001"));
        assert!(err.to_string().contains("FW1"));

        let err = AegisError::DanglingReference {
            step_id: "s1".to_string(),
            target: "missing".to_string(),
        };
        assert_eq!(err.error_code(), "E3005");
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_is_transient() {
        assert!(AegisError::RequestTimeout {
            url: "http://edr".to_string(),
            timeout_ms: 100
        }
        .is_transient());
        assert!(AegisError::ServiceUnavailable("503".to_string()).is_transient());
        assert!(!AegisError::NoStartingSteps.is_transient());
        assert!(!AegisError::StepPanicked("x".to_string()).is_transient());
    }

    #[test]
    fn test_playbook_error_category() {
        assert!(AegisError::NoStartingSteps.is_playbook_error());
        assert!(AegisError::PlaybookNotFound(7).is_playbook_error());
        assert!(!AegisError::Internal("x".to_string()).is_playbook_error());
    }

    #[test]
    fn test_delay_for_attempt_without_jitter() {
        let config = RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            backoff_multiplier: 2.0,
            jitter: false,
        };

        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_retry_async_recovers_from_transient_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let config = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 1.0,
            jitter: false,
        };

        let counter = calls.clone();
        let result = retry_async_with_config(
            || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(AegisError::ServiceUnavailable("down".to_string()))
                    } else {
                        Ok(42)
                    }
                }
            },
            config,
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_async_stops_on_permanent_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: AegisResult<()> = retry_async_with_config(
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(AegisError::NoStartingSteps)
                }
            },
            RetryConfig::default(),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
