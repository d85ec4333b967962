use std::sync::Arc;

use cadence_core::CadenceConfig;
use cadence_scheduler::{SchedulerEngine, SqliteRepository};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

mod http_engine;

use http_engine::HttpReportEngine;

#[derive(Parser)]
#[command(name = "cadence", about = "Report scheduling daemon")]
struct Cli {
    /// Config file (defaults to ~/.cadence/cadence.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// SQLite database path (overrides config)
    #[arg(long, global = true)]
    db: Option<String>,

    /// Maximum concurrently running reports (overrides config)
    #[arg(long, global = true)]
    max_concurrent: Option<usize>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until interrupted (default)
    Run,
    /// Print the effective configuration as JSON and exit
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cadence_daemon=info,cadence_scheduler=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Run => run(config).await,
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<CadenceConfig> {
    let mut config = CadenceConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        CadenceConfig::default()
    });
    if let Some(db) = &cli.db {
        config.database.path = db.clone();
    }
    if let Some(max) = cli.max_concurrent {
        config.scheduler.max_concurrent_executions = max;
    }
    config.validate()?;
    Ok(config)
}

async fn run(config: CadenceConfig) -> anyhow::Result<()> {
    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");
    let repository = Arc::new(SqliteRepository::open(db_path)?);

    let report_engine = Arc::new(HttpReportEngine::new(&config.engine)?);
    info!(endpoint = %config.engine.endpoint, "report engine configured");

    let engine = Arc::new(
        SchedulerEngine::new(config.scheduler.clone(), report_engine)?.with_repository(repository),
    );
    engine.restore().await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let runner = tokio::spawn(Arc::clone(&engine).run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, stopping scheduler");
    let _ = shutdown_tx.send(true);
    runner.await?;

    let status = engine.queue_status().await;
    if status.pending > 0 || status.running > 0 {
        warn!(
            pending = status.pending,
            running = status.running,
            "exiting with unfinished executions"
        );
    }
    Ok(())
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
