pub mod condition;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod models;
pub mod repo;

pub use config::{
    get_config_dir, AegisConfig, AnalysisConfig, ConfigLoadError, DispatcherConfig, EngineConfig,
    LoggingConfig, RetrySettings, RevisitPolicy,
};
pub use db::{init_database, Database, DatabaseConfig, DatabaseError};
pub use dispatcher::{ActionDispatcher, ActionOutcome, ActionRequest, FailureKind};
pub use engine::{
    EngineSettings, ExecutionContext, ExecutionLogger, GraphWalker, PlaybookEngine,
    PlaybookRunner, NO_START_FAILURE_MESSAGE,
};
pub use error::{retry_async_with_config, AegisError, AegisResult, RetryConfig};
pub use models::{
    ConditionKind, Connector, ConnectorConfiguration, ConnectorType, ExecutionLogEntry,
    ExecutionRecord, ExecutionResults, ExecutionStatus, ExecutionUpdate, LogLevel, NewExecution,
    Playbook, PlaybookStep, RunRequest, StepAction, StepCondition, StepType, TriggerSource,
};
pub use repo::{
    ConnectorRegistry, ExecutionStore, InMemoryStore, PgConnectorRepository,
    PgExecutionRepository, PgPlaybookRepository, PgTriggerRepository, PlaybookStore,
    TriggerStore,
};
