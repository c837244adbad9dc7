use aegis_core::engine::start_steps;
use aegis_core::{AegisConfig, AegisError, PgPlaybookRepository, Playbook};
use anyhow::Context;
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};
use std::collections::HashSet;
use std::path::Path;

use crate::config;

pub fn cmd_validate(file: &Path) -> anyhow::Result<()> {
    let playbook = load_playbook(file)?;

    println!(
        "{} {} ({} steps)",
        "Playbook:".bold(),
        playbook.name.cyan(),
        playbook.steps.len()
    );
    println!();
    print_steps(&playbook);
    println!();

    let problems = problems(&playbook);
    if problems.is_empty() {
        println!("{} {}", "✓".green().bold(), "Playbook is valid".green());
        return Ok(());
    }

    for problem in &problems {
        println!("  {} {}", "✗".red(), problem);
    }
    anyhow::bail!("{} problem(s) found in {}", problems.len(), file.display())
}

pub async fn cmd_import(config: &AegisConfig, file: &Path, disabled: bool) -> anyhow::Result<()> {
    let mut playbook = load_playbook(file)?;
    if let Some(problem) = problems(&playbook).into_iter().next() {
        anyhow::bail!("Refusing to import {}: {}", file.display(), problem);
    }
    if disabled {
        playbook.enabled = false;
    }

    let db = config::connect(config).await?;
    let stored = PgPlaybookRepository::new(db.pool().clone())
        .create(&playbook)
        .await?;
    db.close().await;

    println!(
        "{} Imported playbook {} with id {}",
        "✓".green().bold(),
        stored.name.cyan(),
        stored.id.to_string().bold()
    );
    Ok(())
}

fn load_playbook(file: &Path) -> anyhow::Result<Playbook> {
    Playbook::from_path(file).with_context(|| format!("Failed to load playbook {}", file.display()))
}

fn problems(playbook: &Playbook) -> Vec<String> {
    let mut problems: Vec<String> = playbook.problems().iter().map(|p| p.to_string()).collect();
    if !playbook.steps.is_empty() && start_steps(playbook).is_empty() {
        problems.push(AegisError::NoStartingSteps.to_string());
    }
    problems
}

fn print_steps(playbook: &Playbook) {
    let entries: HashSet<&str> = start_steps(playbook)
        .into_iter()
        .map(|s| s.id.as_str())
        .collect();

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Step").fg(Color::White),
            Cell::new("Type").fg(Color::White),
            Cell::new("Start").fg(Color::White),
            Cell::new("Condition").fg(Color::White),
            Cell::new("On success").fg(Color::White),
            Cell::new("On failure").fg(Color::White),
        ]);

    for step in &playbook.steps {
        let condition = step
            .condition
            .as_ref()
            .map(|c| format!("{} {:?}", c.field, c.kind))
            .unwrap_or_else(|| "-".to_string());
        let start = if entries.contains(step.id.as_str()) {
            Cell::new("yes").fg(Color::Green)
        } else {
            Cell::new("")
        };

        table.add_row(vec![
            Cell::new(&step.id).fg(Color::Cyan),
            Cell::new(step.step_type().as_str()),
            start,
            Cell::new(condition),
            Cell::new(join_or_dash(&step.on_success)),
            Cell::new(join_or_dash(&step.on_failure)),
        ]);
    }

    println!("{table}");
}

fn join_or_dash(ids: &[String]) -> String {
    if ids.is_empty() {
        "-".to_string()
    } else {
        ids.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_problems_include_missing_entry_point() {
        let playbook: Playbook = serde_json::from_value(serde_json::json!({
            "name": "loop",
            "steps": [
                {"id": "a", "type": "wait", "config": {"duration": 0}, "onSuccess": ["b"]},
                {"id": "b", "type": "wait", "config": {"duration": 0}, "onSuccess": ["a", "c"]},
            ]
        }))
        .unwrap();

        let problems = problems(&playbook);
        assert_eq!(problems.len(), 2);
        assert!(problems[0].contains("c"));
        assert_eq!(problems[1], AegisError::NoStartingSteps.to_string());
    }

    #[test]
    fn test_join_or_dash() {
        assert_eq!(join_or_dash(&[]), "-");
        assert_eq!(
            join_or_dash(&["a".to_string(), "b".to_string()]),
            "a, b"
        );
    }
}
