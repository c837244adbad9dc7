use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Kind of entity that triggered a playbook run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TriggerSource {
    Alert,
    Incident,
    Other(String),
}

impl TriggerSource {
    pub fn as_str(&self) -> &str {
        match self {
            TriggerSource::Alert => "alert",
            TriggerSource::Incident => "incident",
            TriggerSource::Other(name) => name,
        }
    }
}

impl From<String> for TriggerSource {
    fn from(value: String) -> Self {
        match value.to_lowercase().as_str() {
            "alert" => TriggerSource::Alert,
            "incident" => TriggerSource::Incident,
            _ => TriggerSource::Other(value),
        }
    }
}

impl From<TriggerSource> for String {
    fn from(source: TriggerSource) -> Self {
        source.as_str().to_string()
    }
}

impl FromStr for TriggerSource {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(TriggerSource::from(s.to_string()))
    }
}

impl std::fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Inbound request to run a playbook.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub playbook_id: i64,
    pub triggered_by: Option<i64>,
    pub trigger_entity_id: Option<i64>,
    pub trigger_source: Option<TriggerSource>,
}

impl RunRequest {
    pub fn new(playbook_id: i64) -> Self {
        Self {
            playbook_id,
            triggered_by: None,
            trigger_entity_id: None,
            trigger_source: None,
        }
    }

    pub fn triggered_by(mut self, user_id: i64) -> Self {
        self.triggered_by = Some(user_id);
        self
    }

    pub fn with_trigger(mut self, source: TriggerSource, entity_id: i64) -> Self {
        self.trigger_source = Some(source);
        self.trigger_entity_id = Some(entity_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_source_parsing() {
        assert_eq!("alert".parse::<TriggerSource>().unwrap(), TriggerSource::Alert);
        assert_eq!("INCIDENT".parse::<TriggerSource>().unwrap(), TriggerSource::Incident);
        assert_eq!(
            "ticket".parse::<TriggerSource>().unwrap(),
            TriggerSource::Other("ticket".to_string())
        );
        assert_eq!(TriggerSource::Other("ticket".into()).to_string(), "ticket");
    }

    #[test]
    fn test_run_request_builder() {
        let request = RunRequest::new(5)
            .triggered_by(9)
            .with_trigger(TriggerSource::Alert, 100);

        assert_eq!(request.playbook_id, 5);
        assert_eq!(request.triggered_by, Some(9));
        assert_eq!(request.trigger_entity_id, Some(100));
        assert_eq!(request.trigger_source, Some(TriggerSource::Alert));
    }
}
