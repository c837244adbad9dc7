use chrono::Utc;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde_json::json;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Mutex;

use crate::condition;
use crate::config::RevisitPolicy;
use crate::dispatcher::ActionDispatcher;
use crate::error::{AegisError, AegisResult};
use crate::models::{Connector, Playbook, PlaybookStep, StepAction};

use super::context::ExecutionContext;
use super::handlers::StepHandlers;
use super::logger::ExecutionLogger;
use super::EngineSettings;

/// Steps no other step points at, plus explicit entry markers, in
/// declaration order. Self-loops do not count as references.
pub fn start_steps(playbook: &Playbook) -> Vec<&PlaybookStep> {
    let referenced: HashSet<&str> = playbook
        .steps
        .iter()
        .flat_map(|s| {
            s.on_success
                .iter()
                .chain(s.on_failure.iter())
                .chain(s.action.nested_steps().iter())
                .filter(move |target| **target != s.id)
        })
        .map(String::as_str)
        .collect();

    playbook
        .steps
        .iter()
        .filter(|s| s.step_type().is_entry_type() || !referenced.contains(s.id.as_str()))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepOutcome {
    Succeeded,
    Failed,
    Skipped,
}

impl StepOutcome {
    fn from_result(succeeded: bool) -> Self {
        if succeeded {
            StepOutcome::Succeeded
        } else {
            StepOutcome::Failed
        }
    }

    fn succeeded(&self) -> bool {
        !matches!(self, StepOutcome::Failed)
    }
}

/// Depth-first traversal of one playbook for one run.
pub struct GraphWalker<'a> {
    playbook: &'a Playbook,
    handlers: StepHandlers<'a>,
    settings: &'a EngineSettings,
    logger: &'a ExecutionLogger,
    visits: Mutex<HashMap<String, Visit>>,
}

impl<'a> GraphWalker<'a> {
    pub fn new(
        playbook: &'a Playbook,
        connectors: &'a [Connector],
        dispatcher: &'a ActionDispatcher,
        settings: &'a EngineSettings,
        logger: &'a ExecutionLogger,
    ) -> Self {
        Self {
            playbook,
            handlers: StepHandlers {
                connectors,
                dispatcher,
                settings,
                logger,
            },
            settings,
            logger,
            visits: Mutex::new(HashMap::new()),
        }
    }

    /// Run every start step in order; the result is true only if all of
    /// them succeeded.
    pub async fn execute(&self, ctx: &mut ExecutionContext) -> AegisResult<bool> {
        if self.settings.engine.strict_edges {
            let dangling = self.playbook.dangling_references().into_iter().next();
            if let Some((step_id, target)) = dangling {
                self.logger
                    .error(format!("Step {} references unknown step {}", step_id, target));
                return Err(AegisError::DanglingReference { step_id, target });
            }
        }

        let starts = start_steps(self.playbook);
        if starts.is_empty() {
            self.logger.error("No starting steps found in playbook");
            return Err(AegisError::NoStartingSteps);
        }

        self.logger.info(format!(
            "Starting playbook {} with {} start step(s)",
            self.playbook.name,
            starts.len()
        ));

        let mut all_succeeded = true;
        for step in starts {
            let succeeded = self.execute_step(&step.id, ctx, Vec::new()).await;
            all_succeeded &= succeeded;
        }

        Ok(all_succeeded)
    }

    /// Execute one step, then follow the edges for its result.
    pub fn execute_step<'s>(
        &'s self,
        step_id: &'s str,
        ctx: &'s mut ExecutionContext,
        mut path: Vec<String>,
    ) -> BoxFuture<'s, bool> {
        Box::pin(async move {
            let max_depth = self.settings.engine.max_depth;
            if path.len() >= max_depth {
                self.logger.error(format!(
                    "Maximum step depth {} exceeded at step {}",
                    max_depth, step_id
                ));
                return false;
            }

            let Some(step) = self.playbook.step(step_id) else {
                self.logger.warn(format!("Step not found: {}", step_id));
                return false;
            };

            if let Some(previous) = self.claim_visit(step_id, &path) {
                return previous;
            }

            path.push(step.id.clone());
            self.logger.info(format!(
                "Executing step: {} ({})",
                step.name,
                step.step_type()
            ));

            let outcome = match AssertUnwindSafe(self.run_guarded(step, ctx, &path))
                .catch_unwind()
                .await
            {
                Ok(outcome) => outcome,
                Err(panic) => {
                    self.logger.error(format!(
                        "{}: {}",
                        AegisError::StepPanicked(step.id.clone()),
                        panic_message(panic.as_ref())
                    ));
                    StepOutcome::Failed
                }
            };
            let succeeded = outcome.succeeded();

            ctx.record(
                "steps",
                &step.id,
                json!({
                    "type": step.step_type(),
                    "success": succeeded,
                    "skipped": outcome == StepOutcome::Skipped,
                    "timestamp": Utc::now().to_rfc3339(),
                }),
            );
            self.finish_visit(step_id, succeeded);

            if succeeded {
                self.logger.info(format!("Step {} succeeded", step.id));
            } else {
                self.logger.warn(format!("Step {} failed", step.id));
            }

            for next in step.edges(succeeded) {
                self.execute_step(next, ctx, path.clone()).await;
            }

            succeeded
        })
    }

    fn run_guarded<'s>(
        &'s self,
        step: &'s PlaybookStep,
        ctx: &'s mut ExecutionContext,
        path: &'s [String],
    ) -> BoxFuture<'s, StepOutcome> {
        Box::pin(async move {
            if let Some(condition) = &step.condition {
                if !condition::evaluate(condition, ctx.as_value()) {
                    self.logger.info(format!(
                        "Condition not met for step {}, skipping",
                        step.id
                    ));
                    return StepOutcome::Skipped;
                }
            }

            let succeeded = match &step.action {
                StepAction::Parallel(config) => {
                    self.run_parallel(step, &config.steps, ctx, path).await
                }
                _ => self.handlers.handle(step, ctx).await,
            };
            StepOutcome::from_result(succeeded)
        })
    }

    /// Fan out to every listed step concurrently and wait for all of them.
    /// Each branch works on its own fork of the context; forks are merged
    /// back in listed order once every branch has settled.
    fn run_parallel<'s>(
        &'s self,
        step: &'s PlaybookStep,
        branches: &'s [String],
        ctx: &'s mut ExecutionContext,
        path: &'s [String],
    ) -> BoxFuture<'s, bool> {
        Box::pin(async move {
            if branches.is_empty() {
                self.logger
                    .warn(format!("Parallel step {} has no sub-steps", step.id));
                return false;
            }

            self.logger.info(format!(
                "Running {} step(s) in parallel for {}",
                branches.len(),
                step.id
            ));

            let mut forks: Vec<ExecutionContext> = branches.iter().map(|_| ctx.fork()).collect();
            let futures = branches
                .iter()
                .zip(forks.iter_mut())
                .map(|(id, fork)| self.execute_step(id, fork, path.to_vec()));
            let results = join_all(futures).await;

            for fork in forks {
                ctx.merge(fork);
            }

            let succeeded = results.iter().filter(|r| **r).count();
            self.logger.info(format!(
                "Parallel step {}: {}/{} sub-step(s) succeeded",
                step.id,
                succeeded,
                results.len()
            ));
            succeeded > 0
        })
    }

    /// Apply the revisit policy. `Some(result)` means the step must not run.
    fn claim_visit(&self, step_id: &str, path: &[String]) -> Option<bool> {
        match self.settings.engine.revisit_policy {
            RevisitPolicy::Always => None,
            RevisitPolicy::OncePerPath => {
                if path.iter().any(|id| id == step_id) {
                    self.logger.warn(format!(
                        "Cycle detected: step {} is already on the current path",
                        step_id
                    ));
                    Some(false)
                } else {
                    None
                }
            }
            RevisitPolicy::OncePerRun => {
                let mut visits = self
                    .visits
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                match visits.get(step_id).copied() {
                    Some(Visit::Done(result)) => {
                        self.logger.debug(format!(
                            "Step {} already executed in this run, reusing result",
                            step_id
                        ));
                        Some(result)
                    }
                    Some(Visit::InProgress) => {
                        self.logger.warn(format!(
                            "Step {} is already running in this run",
                            step_id
                        ));
                        Some(false)
                    }
                    None => {
                        visits.insert(step_id.to_string(), Visit::InProgress);
                        None
                    }
                }
            }
        }
    }

    fn finish_visit(&self, step_id: &str, succeeded: bool) {
        if self.settings.engine.revisit_policy == RevisitPolicy::OncePerRun {
            self.visits
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .insert(step_id.to_string(), Visit::Done(succeeded));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
