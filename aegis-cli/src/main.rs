use aegis_core::{init_database, AegisConfig};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod config;

use commands::{cmd_executions, cmd_import, cmd_run, cmd_validate, RunArgs};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const NAME: &str = env!("CARGO_PKG_NAME");

#[derive(Parser)]
#[command(name = "aegis")]
#[command(version = VERSION)]
#[command(about = "Aegis - SOC playbook execution engine")]
#[command(long_about = r#"
Aegis runs security response playbooks: directed graphs of containment,
notification and enrichment steps executed against an alert or incident.

Use 'aegis validate' to check a playbook file, 'aegis run --playbook' to
execute it locally against connector definitions, or 'aegis init' followed
by 'aegis import' and 'aegis run --playbook-id' to work against Postgres.
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Initialize the database and run migrations")]
    Init,

    #[command(about = "Check a playbook file for structural problems")]
    Validate {
        #[arg(help = "Playbook file (.json, .yaml or .yml)")]
        file: PathBuf,
    },

    #[command(about = "Store a playbook file in the database")]
    Import {
        #[arg(help = "Playbook file (.json, .yaml or .yml)")]
        file: PathBuf,

        #[arg(long, help = "Store the playbook disabled")]
        disabled: bool,
    },

    #[command(about = "Execute a playbook from a file or from the database")]
    Run(RunArgs),

    #[command(about = "List recent playbook executions")]
    Executions {
        #[arg(short, long, help = "Only show runs of this playbook")]
        playbook_id: Option<i64>,

        #[arg(short, long, default_value = "20")]
        limit: i64,

        #[arg(
            short,
            long,
            default_value = "text",
            help = "Output format (text, json)"
        )]
        format: String,
    },

    #[command(about = "Show version information")]
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let loaded = config::load_config();
    let logging = loaded
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_default();
    init_logging(cli.verbose, &logging.level, logging.json_format);

    let result = match loaded {
        Ok(config) => run(cli, config).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {:#}", "Error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool, level: &str, json: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

async fn run(cli: Cli, config: AegisConfig) -> anyhow::Result<()> {
    match cli.command {
        Commands::Init => cmd_init(&config).await,
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Import { file, disabled } => cmd_import(&config, &file, disabled).await,
        Commands::Run(args) => cmd_run(&config, args).await,
        Commands::Executions {
            playbook_id,
            limit,
            format,
        } => cmd_executions(&config, playbook_id, limit, &format).await,
        Commands::Version => {
            println!("{} {}", NAME, VERSION);
            Ok(())
        }
    }
}

async fn cmd_init(config: &AegisConfig) -> anyhow::Result<()> {
    println!("{}", "Initializing Aegis...".cyan().bold());
    println!();

    let db_config = config::database_config(config)?;
    println!(
        "  {} Database URL: {}",
        "→".blue(),
        config::mask_password(&db_config.url)
    );

    println!("  {} Connecting and running migrations...", "→".blue());
    let db = init_database(&db_config).await?;

    println!("  {} Verifying connection...", "→".blue());
    db.health_check().await?;

    db.close().await;

    println!();
    println!(
        "{} {}",
        "✓".green().bold(),
        "Database initialized successfully!".green()
    );

    Ok(())
}
