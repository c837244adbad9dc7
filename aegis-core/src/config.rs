use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::db::DatabaseConfig;
use crate::error::RetryConfig;
use crate::models::StepType;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AegisConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json_format: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default)]
    pub retry: RetrySettings,

    /// Per step type overrides, keyed by wire name (e.g. `edr_isolate_host`).
    #[serde(default)]
    pub retry_overrides: HashMap<String, RetrySettings>,
}

/// Serializable form of [`RetryConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default)]
    pub jitter: bool,
}

/// What happens when the walker reaches a step it has already executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisitPolicy {
    /// Execute again on every visit.
    #[default]
    Always,
    /// Execute at most once per run; later visits reuse the first result.
    OncePerRun,
    /// A step already on the current path is a cycle and yields `false`.
    OncePerPath,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub revisit_policy: RevisitPolicy,

    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    #[serde(default)]
    pub strict_edges: bool,

    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_analysis_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_user_agent() -> String {
    format!("aegis/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_attempts() -> u32 {
    1
}

fn default_initial_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    5_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_depth() -> usize {
    64
}

fn default_max_wait_ms() -> u64 {
    3_600_000
}

fn default_analysis_url() -> String {
    "http://localhost:3000".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

impl RetrySettings {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
            jitter: self.jitter,
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            user_agent: default_user_agent(),
            retry: RetrySettings::default(),
            retry_overrides: HashMap::new(),
        }
    }
}

impl DispatcherConfig {
    /// Retry policy for a step type, falling back to the global one.
    pub fn retry_for(&self, step_type: StepType) -> RetryConfig {
        self.retry_overrides
            .get(step_type.as_str())
            .unwrap_or(&self.retry)
            .to_retry_config()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            revisit_policy: RevisitPolicy::default(),
            max_depth: default_max_depth(),
            strict_edges: false,
            max_wait_ms: default_max_wait_ms(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            base_url: default_analysis_url(),
            api_key: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl AegisConfig {
    pub fn load() -> Result<Self, ConfigLoadError> {
        Self::load_from_paths(get_config_paths())
    }

    pub fn load_from_paths(paths: Vec<PathBuf>) -> Result<Self, ConfigLoadError> {
        load_dotenv_files();

        let mut builder = ConfigBuilder::builder();

        for path in paths {
            if path.exists() {
                builder = builder.add_source(File::from(path).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("AEGIS")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut aegis_config: AegisConfig = builder.build()?.try_deserialize()?;

        if let Ok(url) = std::env::var("DATABASE_URL") {
            aegis_config.database.url = url;
        }

        if let Ok(level) = std::env::var("AEGIS_LOG_LEVEL") {
            aegis_config.logging.level = level;
        } else if let Ok(level) = std::env::var("RUST_LOG") {
            aegis_config.logging.level = level;
        }

        aegis_config.validate()?;

        Ok(aegis_config)
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.database.is_configured()
            && !self.database.url.starts_with("postgres://")
            && !self.database.url.starts_with("postgresql://")
        {
            return Err(ConfigLoadError::InvalidValue {
                key: "database.url".to_string(),
                message:
                    "Must be a valid PostgreSQL URL starting with postgres:// or postgresql://"
                        .to_string(),
            });
        }

        if self.database.pool_min_connections > self.database.pool_max_connections {
            return Err(ConfigLoadError::InvalidValue {
                key: "database.pool_min_connections".to_string(),
                message: "Cannot be greater than pool_max_connections".to_string(),
            });
        }

        if self.engine.max_depth == 0 {
            return Err(ConfigLoadError::InvalidValue {
                key: "engine.max_depth".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.dispatcher.default_timeout_ms == 0 {
            return Err(ConfigLoadError::InvalidValue {
                key: "dispatcher.default_timeout_ms".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.dispatcher.retry.max_attempts == 0 {
            return Err(ConfigLoadError::InvalidValue {
                key: "dispatcher.retry.max_attempts".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        for (step_type, retry) in &self.dispatcher.retry_overrides {
            if StepType::from_name(step_type).is_none() {
                return Err(ConfigLoadError::InvalidValue {
                    key: format!("dispatcher.retry_overrides.{}", step_type),
                    message: "Unknown step type".to_string(),
                });
            }
            if retry.max_attempts == 0 {
                return Err(ConfigLoadError::InvalidValue {
                    key: format!("dispatcher.retry_overrides.{}.max_attempts", step_type),
                    message: "Must be at least 1".to_string(),
                });
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        let level_lower = self.logging.level.to_lowercase();
        if !valid_levels.contains(&level_lower.as_str()) && !level_lower.contains('=') {
            return Err(ConfigLoadError::InvalidValue {
                key: "logging.level".to_string(),
                message: format!(
                    "Invalid log level '{}'. Must be one of: {:?}",
                    self.logging.level, valid_levels
                ),
            });
        }

        Ok(())
    }
}

fn get_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join("config").join("default.toml"));
        paths.push(cwd.join("config").join("local.toml"));
        paths.push(cwd.join("aegis.toml"));
    }

    if let Some(config_dir) = get_config_dir() {
        paths.push(config_dir.join("config.toml"));
    }

    paths
}

fn load_dotenv_files() {
    let mut env_paths = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        env_paths.push(cwd.join(".env"));
        env_paths.push(cwd.join(".env.local"));
    }

    if let Some(config_dir) = get_config_dir() {
        env_paths.push(config_dir.join(".env"));
    }

    for path in env_paths {
        if path.exists() {
            let _ = dotenvy::from_path(&path);
        }
    }
}

pub fn get_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("aegis"))
}
