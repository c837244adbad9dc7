//! Playbook definitions: steps, typed step actions and branch conditions.
//!
//! The persisted wire form of a step is `{id, name, type, config, condition,
//! onSuccess, onFailure}`. On load, `(type, config)` is parsed into a
//! [`StepAction`] variant carrying a typed config struct, so handlers never
//! look fields up by name.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::error::{AegisError, AegisResult};

macro_rules! step_actions {
    ($($variant:ident($config:ty) => $wire:literal),* $(,)?) => {
        /// Wire-stable step type identifiers.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum StepType {
            $(#[serde(rename = $wire)] $variant),*
        }

        impl StepType {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(StepType::$variant => $wire),*
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($wire => Some(StepType::$variant),)*
                    _ => None,
                }
            }

            pub fn all() -> Vec<Self> {
                vec![$(StepType::$variant),*]
            }
        }

        /// A step's behaviour together with its typed configuration.
        #[derive(Debug, Clone, PartialEq)]
        pub enum StepAction {
            $($variant($config)),*
        }

        impl StepAction {
            pub fn step_type(&self) -> StepType {
                match self {
                    $(StepAction::$variant(_) => StepType::$variant),*
                }
            }

            fn from_parts(step_type: StepType, config: Value) -> Result<Self, serde_json::Error> {
                match step_type {
                    $(StepType::$variant => {
                        serde_json::from_value(config).map(StepAction::$variant)
                    }),*
                }
            }

            /// The typed config serialized back to its JSON wire form.
            pub fn config_value(&self) -> Value {
                let value = match self {
                    $(StepAction::$variant(config) => serde_json::to_value(config)),*
                };
                value.unwrap_or(Value::Null)
            }
        }
    };
}

step_actions! {
    EdrIsolateHost(IsolateHostConfig) => "edr_isolate_host",
    EdrUnisolateHost(EdrHostConfig) => "edr_unisolate_host",
    EdrScanHost(ScanHostConfig) => "edr_scan_host",
    EdrGetProcessList(EdrHostConfig) => "edr_get_process_list",
    EdrKillProcess(KillProcessConfig) => "edr_kill_process",
    FirewallBlockIp(BlockIpConfig) => "firewall_block_ip",
    FirewallUnblockIp(UnblockIpConfig) => "firewall_unblock_ip",
    FirewallBlockDomain(BlockDomainConfig) => "firewall_block_domain",
    FirewallUnblockDomain(UnblockDomainConfig) => "firewall_unblock_domain",
    IdentityDisableUser(UserAccountConfig) => "identity_disable_user",
    IdentityEnableUser(UserAccountConfig) => "identity_enable_user",
    IdentityResetPassword(ResetPasswordConfig) => "identity_reset_password",
    IdentityAddToGroup(GroupMembershipConfig) => "identity_add_to_group",
    IdentityRemoveFromGroup(GroupMembershipConfig) => "identity_remove_from_group",
    NotifyEmail(EmailConfig) => "notify_email",
    NotifySlack(SlackConfig) => "notify_slack",
    NotifySms(SmsConfig) => "notify_sms",
    EnrichIoc(EnrichIocConfig) => "enrich_ioc",
    AiAnalyzeAlert(AnalyzeAlertConfig) => "ai_analyze_alert",
    LookupThreatIntel(ThreatIntelConfig) => "lookup_threat_intel",
    Condition(StepCondition) => "condition",
    Wait(WaitConfig) => "wait",
    Parallel(ParallelConfig) => "parallel",
    CallApi(CallApiConfig) => "call_api",
    Trigger(TriggerConfig) => "trigger",
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl StepType {
    /// Control/trigger types that are always treated as entry points.
    pub fn is_entry_type(&self) -> bool {
        matches!(self, StepType::Trigger)
    }
}

impl StepAction {
    /// Name of the connector this action is routed through, if any.
    pub fn connector_name(&self) -> Option<&str> {
        let name = match self {
            StepAction::EdrIsolateHost(c) => &c.edr_system,
            StepAction::EdrUnisolateHost(c) | StepAction::EdrGetProcessList(c) => &c.edr_system,
            StepAction::EdrScanHost(c) => &c.edr_system,
            StepAction::EdrKillProcess(c) => &c.edr_system,
            StepAction::FirewallBlockIp(c) => &c.firewall_system,
            StepAction::FirewallUnblockIp(c) => &c.firewall_system,
            StepAction::FirewallBlockDomain(c) => &c.firewall_system,
            StepAction::FirewallUnblockDomain(c) => &c.firewall_system,
            StepAction::IdentityDisableUser(c) | StepAction::IdentityEnableUser(c) => {
                &c.identity_system
            }
            StepAction::IdentityResetPassword(c) => &c.identity_system,
            StepAction::IdentityAddToGroup(c) | StepAction::IdentityRemoveFromGroup(c) => {
                &c.identity_system
            }
            StepAction::NotifyEmail(c) => &c.notification_system,
            StepAction::NotifySlack(c) => &c.notification_system,
            StepAction::NotifySms(c) => &c.notification_system,
            _ => return None,
        };
        Some(name.as_str())
    }

    /// Step ids this action fans out to.
    pub fn nested_steps(&self) -> &[String] {
        match self {
            StepAction::Parallel(c) => &c.steps,
            _ => &[],
        }
    }
}

// ============================================================================
// Typed step configs
// ============================================================================

fn default_isolation_mode() -> String {
    "full".to_string()
}

fn default_scan_type() -> String {
    "quick".to_string()
}

fn default_true() -> bool {
    true
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IsolateHostConfig {
    pub edr_system: String,
    pub host_id: String,
    #[serde(default = "default_isolation_mode")]
    pub isolation_mode: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdrHostConfig {
    pub edr_system: String,
    pub host_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanHostConfig {
    pub edr_system: String,
    pub host_id: String,
    #[serde(default = "default_scan_type")]
    pub scan_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KillProcessConfig {
    pub edr_system: String,
    pub host_id: String,
    pub process_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockIpConfig {
    pub firewall_system: String,
    pub ip: String,
    /// Block duration in seconds; permanent when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnblockIpConfig {
    pub firewall_system: String,
    pub ip: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDomainConfig {
    pub firewall_system: String,
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnblockDomainConfig {
    pub firewall_system: String,
    pub domain: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAccountConfig {
    pub identity_system: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordConfig {
    pub identity_system: String,
    pub username: String,
    #[serde(default = "default_true")]
    pub force_change: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMembershipConfig {
    pub identity_system: String,
    pub username: String,
    pub group: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailConfig {
    pub notification_system: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlackConfig {
    pub notification_system: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsConfig {
    pub notification_system: String,
    pub to: Vec<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichIocConfig {
    pub ioc_value: String,
    pub ioc_type: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeAlertConfig {
    /// Alert to analyze; defaults to the triggering alert.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatIntelConfig {
    pub indicator: String,
    pub indicator_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitConfig {
    /// Duration in milliseconds.
    pub duration: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelConfig {
    pub steps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallApiConfig {
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Timeout in milliseconds; the dispatcher default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TriggerConfig {}

// ============================================================================
// Conditions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    Equals,
    Contains,
    GreaterThan,
    LessThan,
    Exists,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepCondition {
    #[serde(rename = "type")]
    pub kind: ConditionKind,
    /// Dot-separated path into the execution context.
    pub field: String,
    #[serde(default)]
    pub value: Value,
}

impl StepCondition {
    pub fn new(kind: ConditionKind, field: impl Into<String>, value: Value) -> Self {
        Self {
            kind,
            field: field.into(),
            value,
        }
    }
}

// ============================================================================
// Steps and playbooks
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawStep", into = "RawStep")]
pub struct PlaybookStep {
    pub id: String,
    pub name: String,
    pub action: StepAction,
    pub condition: Option<StepCondition>,
    pub on_success: Vec<String>,
    pub on_failure: Vec<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStep {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    step_type: StepType,
    #[serde(default)]
    config: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    condition: Option<StepCondition>,
    #[serde(default)]
    on_success: Option<Vec<String>>,
    #[serde(default)]
    on_failure: Option<Vec<String>>,
}

impl TryFrom<RawStep> for PlaybookStep {
    type Error = AegisError;

    fn try_from(raw: RawStep) -> Result<Self, Self::Error> {
        let config = match raw.config {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        let action = StepAction::from_parts(raw.step_type, config).map_err(|e| {
            AegisError::InvalidStepConfig {
                step_id: raw.id.clone(),
                message: format!("{} config: {}", raw.step_type, e),
            }
        })?;

        let name = if raw.name.is_empty() {
            raw.id.clone()
        } else {
            raw.name
        };

        Ok(Self {
            id: raw.id,
            name,
            action,
            condition: raw.condition,
            on_success: raw.on_success.unwrap_or_default(),
            on_failure: raw.on_failure.unwrap_or_default(),
        })
    }
}

impl From<PlaybookStep> for RawStep {
    fn from(step: PlaybookStep) -> Self {
        Self {
            step_type: step.action.step_type(),
            config: step.action.config_value(),
            id: step.id,
            name: step.name,
            condition: step.condition,
            on_success: Some(step.on_success),
            on_failure: Some(step.on_failure),
        }
    }
}

impl PlaybookStep {
    pub fn new(id: impl Into<String>, action: StepAction) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            action,
            condition: None,
            on_success: Vec::new(),
            on_failure: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_condition(mut self, condition: StepCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn on_success<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.on_success = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn on_failure<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.on_failure = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn step_type(&self) -> StepType {
        self.action.step_type()
    }

    /// Edge targets for the given branch outcome.
    pub fn edges(&self, succeeded: bool) -> &[String] {
        if succeeded {
            &self.on_success
        } else {
            &self.on_failure
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Playbook {
    /// Assigned by storage; playbook files may leave it out.
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub steps: Vec<PlaybookStep>,
    #[serde(default)]
    pub run_count: i64,
    #[serde(default)]
    pub avg_duration_ms: Option<f64>,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
}

impl Playbook {
    pub fn new(id: i64, name: impl Into<String>, steps: Vec<PlaybookStep>) -> Self {
        Self {
            id,
            name: name.into(),
            description: None,
            enabled: true,
            steps,
            run_count: 0,
            avg_duration_ms: None,
            last_run_at: None,
        }
    }

    pub fn from_json(input: &str) -> AegisResult<Self> {
        Ok(serde_json::from_str(input)?)
    }

    pub fn from_yaml(input: &str) -> AegisResult<Self> {
        Ok(serde_yaml::from_str(input)?)
    }

    /// Load a playbook file, choosing the format from its extension.
    pub fn from_path(path: &Path) -> AegisResult<Self> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            _ => Self::from_json(&content),
        }
    }

    pub fn step(&self, id: &str) -> Option<&PlaybookStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Every `(step_id, missing_target)` pair across edges and parallel lists.
    pub fn dangling_references(&self) -> Vec<(String, String)> {
        let known: HashSet<&str> = self.steps.iter().map(|s| s.id.as_str()).collect();
        let mut dangling = Vec::new();

        for step in &self.steps {
            let targets = step
                .on_success
                .iter()
                .chain(step.on_failure.iter())
                .chain(step.action.nested_steps().iter());
            for target in targets {
                if !known.contains(target.as_str()) {
                    dangling.push((step.id.clone(), target.clone()));
                }
            }
        }

        dangling
    }

    /// Structural problems: duplicate ids and dangling references.
    pub fn problems(&self) -> Vec<AegisError> {
        let mut problems = Vec::new();
        let mut seen = HashSet::new();

        for step in &self.steps {
            if !seen.insert(step.id.as_str()) {
                problems.push(AegisError::DuplicateStepId(step.id.clone()));
            }
        }

        for (step_id, target) in self.dangling_references() {
            problems.push(AegisError::DanglingReference { step_id, target });
        }

        problems
    }

    pub fn validate(&self) -> AegisResult<()> {
        match self.problems().into_iter().next() {
            Some(problem) => Err(problem),
            None => Ok(()),
        }
    }
}
