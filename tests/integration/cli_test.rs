use std::fs;
use std::path::Path;
use std::process::{Command, Output};

fn run_aegis(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_aegis"))
        .args(args)
        .env_remove("DATABASE_URL")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute aegis command")
}

fn output_to_string(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr_to_string(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn write_file(dir: &Path, name: &str, content: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path.to_string_lossy().to_string()
}

mod general_commands {
    use super::*;

    #[test]
    fn test_version_command() {
        let output = run_aegis(&["version"]);
        let stdout = output_to_string(&output);

        assert!(output.status.success());
        assert!(stdout.contains("aegis"));
        assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_help_lists_commands() {
        let output = run_aegis(&["--help"]);
        let stdout = output_to_string(&output);

        assert!(output.status.success());
        for command in ["init", "validate", "import", "run", "executions"] {
            assert!(stdout.contains(command), "help should mention {}", command);
        }
    }

    #[test]
    fn test_invalid_command() {
        let output = run_aegis(&["quarantine"]);
        assert!(!output.status.success());
    }

    #[test]
    fn test_run_requires_a_playbook_source() {
        let output = run_aegis(&["run"]);
        assert!(!output.status.success());
    }

    #[test]
    fn test_init_without_database_fails_gracefully() {
        let output = run_aegis(&["init"]);
        let stderr = stderr_to_string(&output);

        assert!(!output.status.success());
        assert!(stderr.contains("DATABASE_URL"));
    }
}

mod validate_command {
    use super::*;

    #[test]
    fn test_valid_yaml_playbook() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(
            dir.path(),
            "phishing.yaml",
            r#"
name: Phishing response
steps:
  - id: analyze
    type: ai_analyze_alert
    onSuccess: [notify]
  - id: notify
    type: notify_slack
    config:
      notificationSystem: soc-slack
      message: "Alert ${trigger.id} analyzed"
"#,
        );

        let output = run_aegis(&["validate", &file]);
        let stdout = output_to_string(&output);

        assert!(output.status.success(), "{}", stderr_to_string(&output));
        assert!(stdout.contains("Phishing response"));
        assert!(stdout.contains("notify_slack"));
        assert!(stdout.contains("Playbook is valid"));
    }

    #[test]
    fn test_dangling_reference_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(
            dir.path(),
            "broken.json",
            r#"{"name": "Broken", "steps": [
                {"id": "wait", "type": "wait", "config": {"duration": 10}, "onSuccess": ["ghost"]}
            ]}"#,
        );

        let output = run_aegis(&["validate", &file]);

        assert!(!output.status.success());
        assert!(output_to_string(&output).contains("ghost"));
        assert!(stderr_to_string(&output).contains("1 problem(s)"));
    }

    #[test]
    fn test_invalid_step_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(
            dir.path(),
            "bad.json",
            r#"{"name": "Bad", "steps": [{"id": "block", "type": "firewall_block_ip", "config": {}}]}"#,
        );

        let output = run_aegis(&["validate", &file]);

        assert!(!output.status.success());
        assert!(stderr_to_string(&output).contains("block"));
    }
}
