//! Outbound HTTP for step actions.
//!
//! Every call is bounded by a timeout and folded into an [`ActionOutcome`];
//! the dispatcher never returns an error to its caller.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::DispatcherConfig;
use crate::error::{AegisResult, RetryConfig};

/// A fully described outbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
    pub timeout: Duration,
}

impl ActionRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            timeout,
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn headers<'a, I>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        for (key, value) in headers {
            self.headers.insert(key.clone(), value.clone());
        }
        self
    }

    pub fn bearer(self, api_key: Option<&str>) -> Self {
        match api_key {
            Some(key) if !key.is_empty() => self.header("Authorization", format!("Bearer {}", key)),
            _ => self,
        }
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Transport,
    Status,
    InvalidRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionOutcome {
    pub success: bool,
    pub status_code: Option<u16>,
    pub data: Option<Value>,
    pub error: Option<String>,
    pub failure: Option<FailureKind>,
    pub attempts: u32,
    pub duration_ms: u64,
}

impl ActionOutcome {
    fn failed(kind: FailureKind, error: String) -> Self {
        Self {
            success: false,
            status_code: None,
            data: None,
            error: Some(error),
            failure: Some(kind),
            attempts: 1,
            duration_ms: 0,
        }
    }

    /// Timeouts, transport errors, 429 and 5xx may succeed on another attempt.
    pub fn is_transient(&self) -> bool {
        match self.failure {
            Some(FailureKind::Timeout) | Some(FailureKind::Transport) => true,
            Some(FailureKind::Status) => self
                .status_code
                .is_some_and(|code| code == 429 || code >= 500),
            _ => false,
        }
    }
}

pub struct ActionDispatcher {
    client: reqwest::Client,
    default_timeout: Duration,
}

impl ActionDispatcher {
    pub fn new(config: &DispatcherConfig) -> AegisResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self {
            client,
            default_timeout: Duration::from_millis(config.default_timeout_ms),
        })
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Issue exactly one request.
    pub async fn call(&self, request: &ActionRequest) -> ActionOutcome {
        let started = Instant::now();
        let mut outcome = self.exchange(request).await;
        outcome.duration_ms = started.elapsed().as_millis() as u64;
        outcome
    }

    /// Issue a request, retrying transient failures according to `policy`.
    pub async fn call_with_retry(
        &self,
        request: &ActionRequest,
        policy: &RetryConfig,
    ) -> ActionOutcome {
        let started = Instant::now();
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            let mut outcome = self.exchange(request).await;
            attempt += 1;

            if outcome.success || !outcome.is_transient() || attempt >= max_attempts {
                outcome.attempts = attempt;
                outcome.duration_ms = started.elapsed().as_millis() as u64;
                return outcome;
            }

            let delay = policy.delay_for_attempt(attempt - 1);
            warn!(
                url = %request.url,
                attempt = attempt,
                max_attempts = max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = outcome.error.as_deref().unwrap_or_default(),
                "Transient action failure, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn exchange(&self, request: &ActionRequest) -> ActionOutcome {
        let method = match reqwest::Method::from_bytes(request.method.to_uppercase().as_bytes()) {
            Ok(method) => method,
            Err(_) => {
                return ActionOutcome::failed(
                    FailureKind::InvalidRequest,
                    format!("Invalid HTTP method: {}", request.method),
                )
            }
        };

        let url = match reqwest::Url::parse(&request.url) {
            Ok(url) => url,
            Err(e) => {
                return ActionOutcome::failed(
                    FailureKind::InvalidRequest,
                    format!("Invalid URL '{}': {}", request.url, e),
                )
            }
        };

        let mut builder = self.client.request(method.clone(), url);
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            if method != reqwest::Method::GET && method != reqwest::Method::HEAD {
                builder = builder.json(body);
            }
        }

        debug!(method = %method, url = %request.url, "Dispatching action request");

        let exchange = async {
            let response = builder.send().await?;
            let status = response.status();
            let text = response.text().await?;
            Ok::<_, reqwest::Error>((status, text))
        };

        let timeout_ms = request.timeout.as_millis() as u64;
        let (status, text) = match tokio::time::timeout(request.timeout, exchange).await {
            Ok(Ok(parts)) => parts,
            Ok(Err(e)) if e.is_timeout() => {
                return ActionOutcome::failed(
                    FailureKind::Timeout,
                    timeout_message(&request.url, timeout_ms),
                )
            }
            Ok(Err(e)) => {
                return ActionOutcome::failed(
                    FailureKind::Transport,
                    format!("Request to {} failed: {}", request.url, e),
                )
            }
            Err(_) => {
                return ActionOutcome::failed(
                    FailureKind::Timeout,
                    timeout_message(&request.url, timeout_ms),
                )
            }
        };

        let data = parse_body(text);
        let code = status.as_u16();

        if status.is_success() {
            debug!(url = %request.url, status = code, "Action request succeeded");
            ActionOutcome {
                success: true,
                status_code: Some(code),
                data,
                error: None,
                failure: None,
                attempts: 1,
                duration_ms: 0,
            }
        } else {
            debug!(url = %request.url, status = code, "Action request rejected");
            ActionOutcome {
                success: false,
                status_code: Some(code),
                data,
                error: Some(format!(
                    "HTTP {} {}",
                    code,
                    status.canonical_reason().unwrap_or("")
                )
                .trim_end()
                .to_string()),
                failure: Some(FailureKind::Status),
                attempts: 1,
                duration_ms: 0,
            }
        }
    }
}

fn timeout_message(url: &str, timeout_ms: u64) -> String {
    format!("Request timeout: no response from {} within {} ms", url, timeout_ms)
}

/// JSON when the body parses, otherwise the raw text.
fn parse_body(text: String) -> Option<Value> {
    if text.is_empty() {
        return None;
    }
    Some(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dispatcher() -> ActionDispatcher {
        ActionDispatcher::new(&DispatcherConfig::default()).unwrap()
    }

    #[test]
    fn test_request_builder() {
        let request = ActionRequest::new("post", "http://localhost/x", Duration::from_secs(1))
            .bearer(Some("k3y"))
            .header("X-Tenant", "acme")
            .json(json!({"a": 1}));

        assert_eq!(request.headers["Authorization"], "Bearer k3y");
        assert_eq!(request.headers["X-Tenant"], "acme");
        assert_eq!(request.body, Some(json!({"a": 1})));

        let request = ActionRequest::new("GET", "http://localhost", Duration::from_secs(1))
            .bearer(Some(""));
        assert!(request.headers.is_empty());
    }

    #[test]
    fn test_parse_body_falls_back_to_text() {
        assert_eq!(parse_body("{\"ok\":true}".to_string()), Some(json!({"ok": true})));
        assert_eq!(parse_body("accepted".to_string()), Some(json!("accepted")));
        assert_eq!(parse_body(String::new()), None);
    }

    #[test]
    fn test_transient_classification() {
        let mut outcome = ActionOutcome::failed(FailureKind::Status, "HTTP 503".to_string());
        outcome.status_code = Some(503);
        assert!(outcome.is_transient());

        outcome.status_code = Some(429);
        assert!(outcome.is_transient());

        outcome.status_code = Some(404);
        assert!(!outcome.is_transient());

        assert!(ActionOutcome::failed(FailureKind::Timeout, String::new()).is_transient());
        assert!(!ActionOutcome::failed(FailureKind::InvalidRequest, String::new()).is_transient());
    }

    #[tokio::test]
    async fn test_invalid_method_makes_no_call() {
        let request = ActionRequest::new("FETCH ME", "http://localhost/x", Duration::from_secs(1));
        let outcome = dispatcher().call(&request).await;
        assert!(!outcome.success);
        assert_eq!(outcome.failure, Some(FailureKind::InvalidRequest));
    }

    #[tokio::test]
    async fn test_invalid_url_makes_no_call() {
        let request = ActionRequest::new("GET", "not a url", Duration::from_secs(1));
        let outcome = dispatcher().call(&request).await;
        assert!(!outcome.success);
        assert_eq!(outcome.failure, Some(FailureKind::InvalidRequest));
        assert!(outcome.error.unwrap().contains("not a url"));
    }
}
