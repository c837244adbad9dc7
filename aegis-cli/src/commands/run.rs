use aegis_core::{
    AegisConfig, Connector, ExecutionRecord, ExecutionStatus, InMemoryStore, LogLevel,
    PgConnectorRepository, PgExecutionRepository, PgPlaybookRepository, PgTriggerRepository,
    Playbook, PlaybookEngine, PlaybookRunner, RunRequest, TriggerSource,
};
use anyhow::Context;
use clap::Args;
use colored::Colorize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::config;

#[derive(Args, Debug)]
pub struct RunArgs {
    #[arg(
        long,
        help = "Playbook file to run in local mode",
        required_unless_present = "playbook_id",
        conflicts_with = "playbook_id"
    )]
    pub playbook: Option<PathBuf>,

    #[arg(long, help = "JSON file with an array of connector definitions", requires = "playbook")]
    pub connectors: Option<PathBuf>,

    #[arg(
        long,
        help = "JSON file with the alert or incident that triggered the run",
        requires = "playbook"
    )]
    pub trigger: Option<PathBuf>,

    #[arg(long, help = "Stored playbook to run in database mode")]
    pub playbook_id: Option<i64>,

    #[arg(long, help = "User id recorded as the run's initiator")]
    pub triggered_by: Option<i64>,

    #[arg(long, help = "Alert or incident id that triggered the run")]
    pub trigger_id: Option<i64>,

    #[arg(long, default_value = "alert", help = "Trigger source (alert, incident)")]
    pub trigger_source: String,

    #[arg(
        short,
        long,
        default_value = "json",
        help = "Output format (json, text)"
    )]
    pub format: String,
}

pub async fn cmd_run(config: &AegisConfig, args: RunArgs) -> anyhow::Result<()> {
    let engine = PlaybookEngine::from_config(config)?;

    let record = match &args.playbook {
        Some(path) => run_from_files(engine, path, &args).await?,
        None => run_from_database(config, engine, &args).await?,
    };

    report(&record, &args.format)?;

    if record.status != ExecutionStatus::Completed {
        anyhow::bail!(
            "Playbook execution {} failed: {}",
            record.id,
            record.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

async fn run_from_files(
    engine: PlaybookEngine,
    path: &Path,
    args: &RunArgs,
) -> anyhow::Result<ExecutionRecord> {
    let mut playbook = Playbook::from_path(path)
        .with_context(|| format!("Failed to load playbook {}", path.display()))?;
    if playbook.id == 0 {
        playbook.id = 1;
    }

    let store = Arc::new(InMemoryStore::new());

    if let Some(path) = &args.connectors {
        let connectors: Vec<Connector> = serde_json::from_value(read_json(path)?)
            .with_context(|| format!("Invalid connector definitions in {}", path.display()))?;
        for connector in connectors {
            store.insert_connector(connector).await;
        }
    }

    let mut request = RunRequest::new(playbook.id);
    if let Some(by) = args.triggered_by {
        request = request.triggered_by(by);
    }

    if let Some(path) = &args.trigger {
        let trigger = read_json(path)?;
        let entity_id = args
            .trigger_id
            .or_else(|| trigger.get("id").and_then(Value::as_i64))
            .unwrap_or(1);
        let source = TriggerSource::from(args.trigger_source.clone());

        match &source {
            TriggerSource::Alert => store.insert_alert(entity_id, trigger).await,
            TriggerSource::Incident => store.insert_incident(entity_id, trigger).await,
            TriggerSource::Other(_) => {}
        }
        request = request.with_trigger(source, entity_id);
    }

    info!(playbook = %playbook.name, "Running playbook from file");
    store.insert_playbook(playbook).await;

    let runner = PlaybookRunner::with_store(engine, store);
    Ok(runner.run_detailed(request).await?)
}

async fn run_from_database(
    config: &AegisConfig,
    engine: PlaybookEngine,
    args: &RunArgs,
) -> anyhow::Result<ExecutionRecord> {
    let playbook_id = args
        .playbook_id
        .context("Either --playbook or --playbook-id is required")?;

    let db = config::connect(config).await?;
    let pool = db.pool().clone();

    let runner = PlaybookRunner::new(
        engine,
        Arc::new(PgPlaybookRepository::new(pool.clone())),
        Arc::new(PgConnectorRepository::new(pool.clone())),
        Arc::new(PgTriggerRepository::new(pool.clone())),
        Arc::new(PgExecutionRepository::new(pool)),
    );

    let mut request = RunRequest::new(playbook_id);
    if let Some(by) = args.triggered_by {
        request = request.triggered_by(by);
    }
    if let Some(entity_id) = args.trigger_id {
        request = request.with_trigger(TriggerSource::from(args.trigger_source.clone()), entity_id);
    }

    let record = runner.run_detailed(request).await;
    db.close().await;
    Ok(record?)
}

fn read_json(path: &Path) -> anyhow::Result<Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
}

fn report(record: &ExecutionRecord, format: &str) -> anyhow::Result<()> {
    if format == "json" {
        println!("{}", serde_json::to_string_pretty(record)?);
        return Ok(());
    }

    let status = match record.status {
        ExecutionStatus::Completed => record.status.to_string().green().bold(),
        ExecutionStatus::Failed => record.status.to_string().red().bold(),
        ExecutionStatus::Running => record.status.to_string().yellow().bold(),
    };

    println!("{}", "Playbook Execution".cyan().bold());
    println!("{}", "═".repeat(40).dimmed());
    println!("  {:<12} {}", "Execution:".bold(), record.id);
    println!("  {:<12} {}", "Playbook:".bold(), record.playbook_id);
    println!("  {:<12} {}", "Status:".bold(), status);
    if let Some(ms) = record.duration_ms() {
        println!("  {:<12} {} ms", "Duration:".bold(), ms);
    }
    if let Some(error) = &record.error {
        println!("  {:<12} {}", "Error:".bold(), error.red());
    }

    if let Some(results) = &record.results {
        println!();
        println!("  {}", "Log".yellow().bold());
        for entry in &results.logs {
            let level = match entry.level {
                LogLevel::Info => "info ".blue(),
                LogLevel::Warning => "warn ".yellow(),
                LogLevel::Error => "error".red(),
                LogLevel::Debug => "debug".dimmed(),
            };
            println!(
                "    {} {} {}",
                entry.timestamp.format("%H:%M:%S%.3f").to_string().dimmed(),
                level,
                entry.message
            );
        }
    }

    Ok(())
}
