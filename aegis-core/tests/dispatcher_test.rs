use aegis_core::{
    ActionDispatcher, ActionRequest, DispatcherConfig, FailureKind, RetryConfig,
};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn dispatcher() -> ActionDispatcher {
    ActionDispatcher::new(&DispatcherConfig::default()).unwrap()
}

fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

mod single_call {
    use super::*;

    #[tokio::test]
    async fn test_success_parses_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rules/block-ip"))
            .and(header("Authorization", "Bearer fw-key"))
            .and(body_json(json!({"ip": "1.2.3.4"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ruleId": "r-1"})))
            .expect(1)
            .mount(&server)
            .await;

        let request = ActionRequest::new(
            "POST",
            format!("{}/rules/block-ip", server.uri()),
            Duration::from_secs(5),
        )
        .bearer(Some("fw-key"))
        .json(json!({"ip": "1.2.3.4"}));

        let outcome = dispatcher().call(&request).await;

        assert!(outcome.success);
        assert_eq!(outcome.status_code, Some(200));
        assert_eq!(outcome.data, Some(json!({"ruleId": "r-1"})));
        assert!(outcome.error.is_none());
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_non_json_body_is_kept_as_text() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let request = ActionRequest::new(
            "GET",
            format!("{}/health", server.uri()),
            Duration::from_secs(5),
        );
        let outcome = dispatcher().call(&request).await;

        assert!(outcome.success);
        assert_eq!(outcome.data, Some(json!("ok")));
    }

    #[tokio::test]
    async fn test_error_status_keeps_response_data() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/users/disable"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({"message": "no such user"})),
            )
            .mount(&server)
            .await;

        let request = ActionRequest::new(
            "POST",
            format!("{}/users/disable", server.uri()),
            Duration::from_secs(5),
        )
        .json(json!({"username": "ghost"}));
        let outcome = dispatcher().call(&request).await;

        assert!(!outcome.success);
        assert_eq!(outcome.status_code, Some(404));
        assert_eq!(outcome.data, Some(json!({"message": "no such user"})));
        assert_eq!(outcome.failure, Some(FailureKind::Status));
        assert!(outcome.error.unwrap().starts_with("HTTP 404"));
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let request = ActionRequest::new("POST", server.uri(), Duration::from_millis(100))
            .json(json!({}));
        let outcome = dispatcher().call(&request).await;

        assert!(!outcome.success);
        assert_eq!(outcome.failure, Some(FailureKind::Timeout));
        assert!(outcome.error.unwrap().to_lowercase().contains("timeout"));
        assert!(outcome.status_code.is_none());
    }

    #[tokio::test]
    async fn test_invalid_url_makes_no_request() {
        let request = ActionRequest::new("POST", "not a url", Duration::from_secs(1));
        let outcome = dispatcher().call(&request).await;

        assert!(!outcome.success);
        assert_eq!(outcome.failure, Some(FailureKind::InvalidRequest));
        assert!(!outcome.is_transient());
    }
}

mod retries {
    use super::*;

    #[tokio::test]
    async fn test_transient_status_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/send"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/send"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"queued": true})))
            .mount(&server)
            .await;

        let request = ActionRequest::new(
            "POST",
            format!("{}/send", server.uri()),
            Duration::from_secs(5),
        )
        .json(json!({"subject": "alert"}));
        let outcome = dispatcher().call_with_retry(&request, &fast_retry(3)).await;

        assert!(outcome.success);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.data, Some(json!({"queued": true})));
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let request = ActionRequest::new("POST", server.uri(), Duration::from_secs(5))
            .json(json!({}));
        let outcome = dispatcher().call_with_retry(&request, &fast_retry(3)).await;

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.status_code, Some(400));
    }

    #[tokio::test]
    async fn test_attempts_are_capped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .expect(2)
            .mount(&server)
            .await;

        let request = ActionRequest::new("POST", server.uri(), Duration::from_secs(5))
            .json(json!({}));
        let outcome = dispatcher().call_with_retry(&request, &fast_retry(2)).await;

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 2);
        assert!(outcome.is_transient());
    }
}
