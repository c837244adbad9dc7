use aegis_core::{
    AegisConfig, ExecutionRecord, ExecutionStatus, ExecutionStore, PgExecutionRepository,
};
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};

use crate::config;

pub async fn cmd_executions(
    config: &AegisConfig,
    playbook_id: Option<i64>,
    limit: i64,
    format: &str,
) -> anyhow::Result<()> {
    if limit <= 0 {
        anyhow::bail!("--limit must be positive");
    }

    let db = config::connect(config).await?;
    let repo = PgExecutionRepository::new(db.pool().clone());
    let executions = repo.list_executions(playbook_id, limit).await?;
    db.close().await;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&executions)?);
        return Ok(());
    }

    if executions.is_empty() {
        println!("{}", "No executions found.".dimmed());
        return Ok(());
    }

    println!("{}", executions_table(&executions));
    println!();
    println!(
        "  {} {}",
        "Showing:".dimmed(),
        format!("{} execution(s)", executions.len()).bold()
    );

    Ok(())
}

fn executions_table(executions: &[ExecutionRecord]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("ID").fg(Color::White),
            Cell::new("Playbook").fg(Color::White),
            Cell::new("Status").fg(Color::White),
            Cell::new("Trigger").fg(Color::White),
            Cell::new("Started").fg(Color::White),
            Cell::new("Duration").fg(Color::White),
            Cell::new("Error").fg(Color::White),
        ]);

    for record in executions {
        let status = match record.status {
            ExecutionStatus::Completed => Cell::new("completed").fg(Color::Green),
            ExecutionStatus::Failed => Cell::new("failed").fg(Color::Red),
            ExecutionStatus::Running => Cell::new("running").fg(Color::Yellow),
        };
        let trigger = match (&record.trigger_source, record.trigger_entity_id) {
            (Some(source), Some(id)) => format!("{} #{}", source, id),
            _ => "-".to_string(),
        };
        let duration = record
            .duration_ms()
            .map(format_duration_ms)
            .unwrap_or_else(|| "-".to_string());

        table.add_row(vec![
            Cell::new(record.id),
            Cell::new(record.playbook_id),
            status,
            Cell::new(trigger),
            Cell::new(record.started_at.format("%m/%d %H:%M:%S").to_string()),
            Cell::new(duration),
            Cell::new(truncate(record.error.as_deref().unwrap_or("-"), 40)),
        ]);
    }

    table
}

fn format_duration_ms(ms: i64) -> String {
    if ms < 1_000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1_000.0)
    } else {
        format!("{}m {}s", ms / 60_000, (ms % 60_000) / 1_000)
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
