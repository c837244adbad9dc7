use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorType {
    Edr,
    Firewall,
    Identity,
    Email,
    Slack,
    Sms,
    ThreatIntel,
    Webhook,
    #[serde(other)]
    Other,
}

impl std::fmt::Display for ConnectorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectorType::Edr => "edr",
            ConnectorType::Firewall => "firewall",
            ConnectorType::Identity => "identity",
            ConnectorType::Email => "email",
            ConnectorType::Slack => "slack",
            ConnectorType::Sms => "sms",
            ConnectorType::ThreatIntel => "threat_intel",
            ConnectorType::Webhook => "webhook",
            ConnectorType::Other => "other",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorConfiguration {
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Vendor specific keys the engine does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ConnectorConfiguration {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            headers: BTreeMap::new(),
            timeout_ms: None,
            extra: Map::new(),
        }
    }

    /// Join the base URL and an action path without doubling slashes.
    pub fn endpoint(&self, path: &str) -> String {
        if path.is_empty() {
            return self.base_url.clone();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// A configured external integration, looked up by exact name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connector {
    pub name: String,
    #[serde(rename = "type")]
    pub connector_type: ConnectorType,
    pub configuration: ConnectorConfiguration,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Connector {
    pub fn new(
        name: impl Into<String>,
        connector_type: ConnectorType,
        configuration: ConnectorConfiguration,
    ) -> Self {
        Self {
            name: name.into(),
            connector_type,
            configuration,
            enabled: true,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.configuration.api_key = Some(api_key.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_endpoint_joins_paths() {
        let config = ConnectorConfiguration::new("https://edr.example.com/api/");
        assert_eq!(
            config.endpoint("/hosts/isolate"),
            "https://edr.example.com/api/hosts/isolate"
        );
        assert_eq!(config.endpoint(""), "https://edr.example.com/api/");
    }

    #[test]
    fn test_connector_deserializes_with_extra_keys() {
        let connector: Connector = serde_json::from_value(json!({
            "name": "CrowdStrike",
            "type": "edr",
            "configuration": {
                "baseUrl": "https://falcon.example.com",
                "apiKey": "secret",
                "timeoutMs": 5000,
                "tenant": "acme"
            }
        }))
        .unwrap();

        assert!(connector.enabled);
        assert_eq!(connector.connector_type, ConnectorType::Edr);
        assert_eq!(connector.configuration.api_key.as_deref(), Some("secret"));
        assert_eq!(connector.configuration.timeout_ms, Some(5000));
        assert_eq!(connector.configuration.extra["tenant"], "acme");
    }

    #[test]
    fn test_unknown_connector_type_is_other() {
        let connector: Connector = serde_json::from_value(json!({
            "name": "legacy",
            "type": "mainframe",
            "configuration": {"baseUrl": "http://legacy"}
        }))
        .unwrap();
        assert_eq!(connector.connector_type, ConnectorType::Other);
    }
}
