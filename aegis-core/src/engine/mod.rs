//! Playbook execution: graph traversal, step handlers and run lifecycle.

mod context;
mod handlers;
mod lifecycle;
mod logger;
mod walker;

pub use context::ExecutionContext;
pub use handlers::{action_spec, ActionFamily, ActionSpec, StepHandlers};
pub use lifecycle::{PlaybookRunner, NO_START_FAILURE_MESSAGE};
pub use logger::ExecutionLogger;
pub use walker::{start_steps, GraphWalker};

use tracing::debug;

use crate::config::{AegisConfig, AnalysisConfig, DispatcherConfig, EngineConfig};
use crate::dispatcher::ActionDispatcher;
use crate::error::AegisResult;
use crate::models::{Connector, Playbook};

/// The configuration sections the engine reads during a run.
#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
    pub engine: EngineConfig,
    pub dispatcher: DispatcherConfig,
    pub analysis: AnalysisConfig,
}

impl From<&AegisConfig> for EngineSettings {
    fn from(config: &AegisConfig) -> Self {
        Self {
            engine: config.engine.clone(),
            dispatcher: config.dispatcher.clone(),
            analysis: config.analysis.clone(),
        }
    }
}

/// An explicitly constructed engine: settings plus a shared HTTP dispatcher.
pub struct PlaybookEngine {
    dispatcher: ActionDispatcher,
    settings: EngineSettings,
}

impl PlaybookEngine {
    pub fn new(settings: EngineSettings) -> AegisResult<Self> {
        let dispatcher = ActionDispatcher::new(&settings.dispatcher)?;
        Ok(Self {
            dispatcher,
            settings,
        })
    }

    pub fn from_config(config: &AegisConfig) -> AegisResult<Self> {
        Self::new(EngineSettings::from(config))
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Walk `playbook` once against `ctx`.
    ///
    /// Returns the AND of the start steps' results, or an error when the
    /// graph cannot be started at all.
    pub async fn execute(
        &self,
        playbook: &Playbook,
        connectors: &[Connector],
        ctx: &mut ExecutionContext,
        logger: &ExecutionLogger,
    ) -> AegisResult<bool> {
        debug!(
            playbook_id = playbook.id,
            steps = playbook.steps.len(),
            connectors = connectors.len(),
            "Walking playbook graph"
        );

        GraphWalker::new(playbook, connectors, &self.dispatcher, &self.settings, logger)
            .execute(ctx)
            .await
    }
}
