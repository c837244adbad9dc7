use chrono::Utc;
use serde_json::{json, Map, Value};
use std::time::Duration;

use crate::condition;
use crate::dispatcher::{ActionDispatcher, ActionOutcome, ActionRequest};
use crate::error::AegisError;
use crate::models::{
    CallApiConfig, Connector, PlaybookStep, StepAction, StepCondition, StepType, WaitConfig,
};

use super::context::ExecutionContext;
use super::logger::ExecutionLogger;
use super::EngineSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionFamily {
    Edr,
    Firewall,
    Identity,
    Notification,
    Analysis,
}

impl ActionFamily {
    /// Context key the family's results are written under.
    pub fn namespace(&self) -> &'static str {
        match self {
            ActionFamily::Edr => "edrActions",
            ActionFamily::Firewall => "firewallActions",
            ActionFamily::Identity => "identityActions",
            ActionFamily::Notification => "notificationActions",
            ActionFamily::Analysis => "analysisActions",
        }
    }
}

/// How one step type maps onto an outbound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionSpec {
    pub family: ActionFamily,
    pub key: &'static str,
    pub method: &'static str,
    pub path: &'static str,
}

const fn spec(
    family: ActionFamily,
    key: &'static str,
    method: &'static str,
    path: &'static str,
) -> ActionSpec {
    ActionSpec {
        family,
        key,
        method,
        path,
    }
}

pub fn action_spec(step_type: StepType) -> Option<ActionSpec> {
    use ActionFamily::*;

    let entry = match step_type {
        StepType::EdrIsolateHost => spec(Edr, "isolateHost", "POST", "/hosts/isolate"),
        StepType::EdrUnisolateHost => spec(Edr, "unisolateHost", "POST", "/hosts/unisolate"),
        StepType::EdrScanHost => spec(Edr, "scanHost", "POST", "/hosts/scan"),
        StepType::EdrGetProcessList => spec(Edr, "processList", "POST", "/hosts/processes"),
        StepType::EdrKillProcess => spec(Edr, "killProcess", "POST", "/processes/kill"),
        StepType::FirewallBlockIp => spec(Firewall, "blockIp", "POST", "/rules/block-ip"),
        StepType::FirewallUnblockIp => spec(Firewall, "unblockIp", "POST", "/rules/unblock-ip"),
        StepType::FirewallBlockDomain => {
            spec(Firewall, "blockDomain", "POST", "/rules/block-domain")
        }
        StepType::FirewallUnblockDomain => {
            spec(Firewall, "unblockDomain", "POST", "/rules/unblock-domain")
        }
        StepType::IdentityDisableUser => spec(Identity, "disableUser", "POST", "/users/disable"),
        StepType::IdentityEnableUser => spec(Identity, "enableUser", "POST", "/users/enable"),
        StepType::IdentityResetPassword => {
            spec(Identity, "resetPassword", "POST", "/users/reset-password")
        }
        StepType::IdentityAddToGroup => {
            spec(Identity, "addToGroup", "POST", "/groups/add-member")
        }
        StepType::IdentityRemoveFromGroup => {
            spec(Identity, "removeFromGroup", "POST", "/groups/remove-member")
        }
        StepType::NotifyEmail => spec(Notification, "email", "POST", "/send"),
        StepType::NotifySlack => spec(Notification, "slack", "POST", ""),
        StepType::NotifySms => spec(Notification, "sms", "POST", "/messages"),
        StepType::EnrichIoc => spec(Analysis, "iocEnrichment", "POST", "/api/enrichment/ioc"),
        StepType::AiAnalyzeAlert => spec(Analysis, "aiAnalysis", "POST", "/api/ai/analyze-alert"),
        StepType::LookupThreatIntel => {
            spec(Analysis, "threatIntel", "POST", "/api/threat-intel/lookup")
        }
        StepType::Condition
        | StepType::Wait
        | StepType::Parallel
        | StepType::CallApi
        | StepType::Trigger => return None,
    };

    Some(entry)
}

/// Runs a single step's action against the current context.
///
/// Handlers never fail outward: every problem is logged and turned into a
/// `false` result.
pub struct StepHandlers<'a> {
    pub connectors: &'a [Connector],
    pub dispatcher: &'a ActionDispatcher,
    pub settings: &'a EngineSettings,
    pub logger: &'a ExecutionLogger,
}

impl<'a> StepHandlers<'a> {
    pub async fn handle(&self, step: &PlaybookStep, ctx: &mut ExecutionContext) -> bool {
        match &step.action {
            StepAction::Trigger(_) => {
                self.logger
                    .debug(format!("Trigger step {} reached", step.id));
                true
            }
            StepAction::Condition(condition) => self.handle_condition(step, condition, ctx),
            StepAction::Wait(config) => self.handle_wait(step, config).await,
            StepAction::CallApi(config) => self.handle_call_api(step, config, ctx).await,
            StepAction::Parallel(_) => {
                self.logger.error(format!(
                    "Parallel step {} cannot run outside the graph walker",
                    step.id
                ));
                false
            }
            action => match action_spec(action.step_type()) {
                Some(spec) => self.handle_action(step, spec, ctx).await,
                None => {
                    self.logger.error(format!(
                        "No handler registered for step type {}",
                        action.step_type()
                    ));
                    false
                }
            },
        }
    }

    fn find_connector(&self, name: &str) -> Option<&'a Connector> {
        self.connectors
            .iter()
            .find(|c| c.name == name && c.enabled)
    }

    fn handle_condition(
        &self,
        step: &PlaybookStep,
        condition: &StepCondition,
        ctx: &mut ExecutionContext,
    ) -> bool {
        let result = condition::evaluate(condition, ctx.as_value());

        ctx.record(
            "conditions",
            &step.id,
            json!({
                "result": result,
                "field": condition.field,
                "timestamp": Utc::now().to_rfc3339(),
            }),
        );
        self.logger.info(format!(
            "Condition {} on {} evaluated to {}",
            step.id, condition.field, result
        ));

        result
    }

    async fn handle_wait(&self, step: &PlaybookStep, config: &WaitConfig) -> bool {
        let max_wait = self.settings.engine.max_wait_ms;
        if config.duration > max_wait {
            self.logger.error(format!(
                "Wait step {} duration {} ms exceeds the maximum of {} ms",
                step.id, config.duration, max_wait
            ));
            return false;
        }

        tokio::time::sleep(Duration::from_millis(config.duration)).await;
        self.logger
            .info(format!("Waited {} ms at step {}", config.duration, step.id));
        true
    }

    async fn handle_call_api(
        &self,
        step: &PlaybookStep,
        config: &CallApiConfig,
        ctx: &mut ExecutionContext,
    ) -> bool {
        let mut unresolved = Vec::new();
        let url = ctx.render_str(&config.url, &mut unresolved);
        let timeout = config
            .timeout
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.dispatcher.default_timeout());

        let mut request = ActionRequest::new(config.method.as_str(), url.as_str(), timeout);
        for (key, value) in &config.headers {
            request = request.header(key.as_str(), ctx.render_str(value, &mut unresolved));
        }
        if let Some(body) = &config.body {
            let (rendered, missing) = ctx.render(body);
            unresolved.extend(missing);
            request = request.json(rendered);
        }
        self.report_unresolved(step, &unresolved);

        let policy = self.settings.dispatcher.retry_for(StepType::CallApi);
        let outcome = self.dispatcher.call_with_retry(&request, &policy).await;

        if !outcome.success {
            self.report_failure(step, &outcome);
            return false;
        }

        ctx.record(
            "apiCalls",
            &step.id,
            json!({
                "method": config.method.to_uppercase(),
                "url": url,
                "success": true,
                "statusCode": outcome.status_code,
                "response": outcome.data,
                "timestamp": Utc::now().to_rfc3339(),
            }),
        );
        self.logger.info(format!(
            "API call {} {} succeeded with status {}",
            config.method.to_uppercase(),
            url,
            outcome.status_code.unwrap_or_default()
        ));
        true
    }

    async fn handle_action(
        &self,
        step: &PlaybookStep,
        spec: ActionSpec,
        ctx: &mut ExecutionContext,
    ) -> bool {
        let step_type = step.step_type();

        let (url, api_key, headers, timeout): (
            String,
            Option<String>,
            Vec<(&String, &String)>,
            Duration,
        ) = if spec.family == ActionFamily::Analysis {
            let analysis = &self.settings.analysis;
            let url = format!(
                "{}/{}",
                analysis.base_url.trim_end_matches('/'),
                spec.path.trim_start_matches('/')
            );
            (
                url,
                analysis.api_key.clone(),
                Vec::new(),
                Duration::from_millis(analysis.timeout_ms),
            )
        } else {
            let name = step.action.connector_name().unwrap_or_default();
            let Some(connector) = self.find_connector(name) else {
                let err = AegisError::ConnectorNotFound {
                    step_id: step.id.clone(),
                    name: name.to_string(),
                };
                self.logger.error(err.to_string());
                return false;
            };
            let configuration = &connector.configuration;
            (
                configuration.endpoint(spec.path),
                configuration.api_key.clone(),
                configuration.headers.iter().collect(),
                configuration
                    .timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or_else(|| self.dispatcher.default_timeout()),
            )
        };

        let mut payload = step.action.config_value();
        if let (StepAction::AiAnalyzeAlert(config), Value::Object(map)) =
            (&step.action, &mut payload)
        {
            if config.alert_id.is_none() {
                let fallback = ctx.resolve("trigger.id").cloned().unwrap_or(Value::Null);
                map.insert("alertId".to_string(), fallback);
            }
        }

        let (payload, unresolved) = ctx.render(&payload);
        self.report_unresolved(step, &unresolved);

        let request = ActionRequest::new(spec.method, url.as_str(), timeout)
            .headers(headers)
            .bearer(api_key.as_deref())
            .json(payload.clone());

        let policy = self.settings.dispatcher.retry_for(step_type);
        let outcome = self.dispatcher.call_with_retry(&request, &policy).await;

        if !outcome.success {
            self.report_failure(step, &outcome);
            return false;
        }

        let mut result = match payload {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        result.insert("success".to_string(), Value::Bool(true));
        result.insert("statusCode".to_string(), json!(outcome.status_code));
        result.insert(
            "response".to_string(),
            outcome.data.clone().unwrap_or(Value::Null),
        );
        result.insert("timestamp".to_string(), json!(Utc::now().to_rfc3339()));

        ctx.record(spec.family.namespace(), spec.key, Value::Object(result));
        self.logger.info(format!(
            "{} completed for step {} ({} attempt(s))",
            step_type, step.id, outcome.attempts
        ));
        true
    }

    fn report_unresolved(&self, step: &PlaybookStep, unresolved: &[String]) {
        for path in unresolved {
            self.logger.debug(format!(
                "Unresolved placeholder ${{{}}} in step {}",
                path, step.id
            ));
        }
    }

    fn report_failure(&self, step: &PlaybookStep, outcome: &ActionOutcome) {
        self.logger.error(format!(
            "Step {} ({}) failed: {}",
            step.id,
            step.step_type(),
            outcome.error.as_deref().unwrap_or("unknown error")
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_external_type_has_a_spec() {
        let control = [
            StepType::Condition,
            StepType::Wait,
            StepType::Parallel,
            StepType::CallApi,
            StepType::Trigger,
        ];

        for step_type in StepType::all() {
            let entry = action_spec(step_type);
            if control.contains(&step_type) {
                assert!(entry.is_none(), "{} should have no spec", step_type);
            } else {
                assert!(entry.is_some(), "{} is missing a spec", step_type);
            }
        }
    }

    #[test]
    fn test_spec_namespaces() {
        let block = action_spec(StepType::FirewallBlockIp).unwrap();
        assert_eq!(block.family.namespace(), "firewallActions");
        assert_eq!(block.key, "blockIp");

        let isolate = action_spec(StepType::EdrIsolateHost).unwrap();
        assert_eq!(isolate.family.namespace(), "edrActions");
        assert_eq!(isolate.key, "isolateHost");

        let slack = action_spec(StepType::NotifySlack).unwrap();
        assert_eq!(slack.path, "");

        let analyze = action_spec(StepType::AiAnalyzeAlert).unwrap();
        assert_eq!(analyze.family, ActionFamily::Analysis);
        assert_eq!(analyze.path, "/api/ai/analyze-alert");
    }
}
