use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::process::Output;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn write_json(dir: &Path, name: &str, value: &Value) -> String {
    let path = dir.join(name);
    fs::write(&path, serde_json::to_string_pretty(value).unwrap()).unwrap();
    path.to_string_lossy().to_string()
}

async fn run_aegis(args: Vec<String>) -> Output {
    tokio::task::spawn_blocking(move || {
        std::process::Command::new(env!("CARGO_BIN_EXE_aegis"))
            .args(&args)
            .env_remove("DATABASE_URL")
            .env_remove("RUST_LOG")
            .output()
            .expect("Failed to execute aegis command")
    })
    .await
    .unwrap()
}

fn record_from(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "stdout is not an execution record ({}): {}\nstderr: {}",
            e,
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        )
    })
}

fn containment_playbook() -> Value {
    json!({
        "name": "Contain compromised host",
        "steps": [
            {"id": "block", "type": "firewall_block_ip",
             "config": {"firewallSystem": "perimeter", "ip": "${trigger.sourceIp}", "duration": 3600},
             "onSuccess": ["notify"], "onFailure": ["page"]},
            {"id": "notify", "type": "notify_slack",
             "config": {"notificationSystem": "soc-slack",
                        "message": "Blocked ${trigger.sourceIp} for alert ${trigger.id}"}},
            {"id": "page", "type": "notify_sms",
             "config": {"notificationSystem": "pager", "to": ["+15550100"],
                        "message": "Block failed for ${trigger.sourceIp}"}}
        ]
    })
}

fn connectors(base: &str) -> Value {
    json!([
        {"name": "perimeter", "type": "firewall",
         "configuration": {"baseUrl": format!("{}/fw", base), "apiKey": "fw-secret"}},
        {"name": "soc-slack", "type": "slack",
         "configuration": {"baseUrl": format!("{}/hooks/soc", base)}},
        {"name": "pager", "type": "sms",
         "configuration": {"baseUrl": format!("{}/sms", base)}}
    ])
}

#[tokio::test]
async fn test_file_mode_run_completes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/fw/rules/block-ip"))
        .and(header("Authorization", "Bearer fw-secret"))
        .and(body_partial_json(json!({"ip": "198.51.100.23", "duration": 3600})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ruleId": "blk-1"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hooks/soc"))
        .and(body_partial_json(json!({"message": "Blocked 198.51.100.23 for alert 314"})))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sms/messages"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let playbook = write_json(dir.path(), "playbook.json", &containment_playbook());
    let connectors = write_json(dir.path(), "connectors.json", &connectors(&server.uri()));
    let trigger = write_json(
        dir.path(),
        "alert.json",
        &json!({"id": 314, "title": "C2 beacon", "sourceIp": "198.51.100.23"}),
    );

    let output = run_aegis(vec![
        "run".into(),
        "--playbook".into(),
        playbook,
        "--connectors".into(),
        connectors,
        "--trigger".into(),
        trigger,
    ])
    .await;

    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );

    let record = record_from(&output);
    assert_eq!(record["status"], json!("completed"));
    assert_eq!(record["triggerSource"], json!("alert"));
    assert_eq!(record["triggerEntityId"], json!(314));

    let context = &record["results"]["context"];
    assert_eq!(context["trigger"]["title"], json!("C2 beacon"));
    assert_eq!(context["firewallActions"]["blockIp"]["ip"], json!("198.51.100.23"));
    assert_eq!(
        context["firewallActions"]["blockIp"]["response"]["ruleId"],
        json!("blk-1")
    );
    assert_eq!(context["steps"]["notify"]["success"], json!(true));
    assert!(context["steps"].get("page").is_none());
}

#[tokio::test]
async fn test_file_mode_failure_takes_failure_branch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/fw/rules/block-ip"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({"error": "forbidden"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sms/messages"))
        .and(body_partial_json(json!({"message": "Block failed for 203.0.113.5"})))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hooks/soc"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let playbook = write_json(dir.path(), "playbook.json", &containment_playbook());
    let connectors = write_json(dir.path(), "connectors.json", &connectors(&server.uri()));
    let trigger = write_json(
        dir.path(),
        "incident.json",
        &json!({"id": 7, "sourceIp": "203.0.113.5"}),
    );

    let output = run_aegis(vec![
        "run".into(),
        "--playbook".into(),
        playbook,
        "--connectors".into(),
        connectors,
        "--trigger".into(),
        trigger,
        "--trigger-source".into(),
        "incident".into(),
    ])
    .await;

    assert!(!output.status.success());

    let record = record_from(&output);
    assert_eq!(record["status"], json!("failed"));
    assert_eq!(record["error"], json!("One or more starting steps failed"));
    assert_eq!(record["triggerSource"], json!("incident"));

    let context = &record["results"]["context"];
    assert_eq!(context["steps"]["block"]["success"], json!(false));
    assert_eq!(context["notificationActions"]["sms"]["success"], json!(true));

    let logs = record["results"]["logs"].as_array().unwrap();
    assert!(logs.iter().any(|entry| {
        entry["level"] == json!("error")
            && entry["message"]
                .as_str()
                .is_some_and(|m| m.contains("Step block (firewall_block_ip) failed: HTTP 403"))
    }));
}
