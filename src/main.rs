// ABOUTME: CLI entry point for quality-sync
// ABOUTME: Parses flags, sets up logging and Ctrl+C handling, and runs sync, verify or monitor

use anyhow::{bail, Context};
use clap::Parser;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;
use std::time::Duration;
use tracing_subscriber::prelude::*;

use quality_sync::config::AppConfig;
use quality_sync::endpoint::Connector;
use quality_sync::load::ConflictPolicy;
use quality_sync::monitor::Monitor;
use quality_sync::postgres::PgConnector;
use quality_sync::report::{EXIT_FAILURE, EXIT_INTERRUPTED, EXIT_SUCCESS};
use quality_sync::shutdown::forward_interrupts;
use quality_sync::sync::{
    AssumeYes, FullSyncConfirmer, FullSyncGrant, Orchestrator, PromptConfirmer, SyncMode,
    SyncOptions,
};
use quality_sync::verify::Verifier;

#[derive(Parser)]
#[command(name = "quality-sync")]
#[command(about = "Chunked, resumable sync of quality-measurement tables between PostgreSQL databases", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, env = "QUALITY_SYNC_CONFIG", default_value = "config/database/db_config.json")]
    config: PathBuf,
    /// Truncate target tables and copy everything (asks for confirmation)
    #[arg(long, conflicts_with_all = ["verify_only", "monitor"])]
    full_sync: bool,
    /// Confirm --full-sync without prompting
    #[arg(short = 'y', long, requires = "full_sync")]
    yes: bool,
    /// Only compare row counts; never write
    #[arg(long, conflicts_with = "monitor")]
    verify_only: bool,
    /// Watch copy progress without writing
    #[arg(long)]
    monitor: bool,
    /// Seconds between polls in --monitor mode
    #[arg(long, default_value_t = 5)]
    monitor_interval: u64,
    /// Update existing rows on conflict instead of skipping them
    #[arg(long)]
    overwrite: bool,
    /// Only sync these tables (comma-separated)
    #[arg(long, value_delimiter = ',')]
    tables: Vec<String>,
    /// Rows per chunk (overrides the config file)
    #[arg(long)]
    chunk_size: Option<usize>,
    /// Attempts per chunk before a table fails (overrides the config file)
    #[arg(long)]
    max_retries: Option<u32>,
    /// Row delta at which a table counts as diverged (overrides the config file)
    #[arg(long)]
    drift_threshold: Option<u64>,
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log: String,
    /// File the log is appended to
    #[arg(long, default_value = "logs/quality-sync.log")]
    log_file: PathBuf,
    /// Log to stdout only
    #[arg(long, conflicts_with = "log_file")]
    no_log_file: bool,
}

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log));

    let file_layer = if cli.no_log_file {
        None
    } else {
        if let Some(parent) = cli.log_file.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log directory {:?}", parent))?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&cli.log_file)
            .with_context(|| format!("Failed to open log file {:?}", cli.log_file))?;
        Some(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(&cli)?;
    let code = run(cli).await?;
    Ok(ExitCode::from(code))
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    let mut config = AppConfig::load(&cli.config)?;
    if let Some(chunk_size) = cli.chunk_size {
        if chunk_size == 0 {
            bail!("--chunk-size must be greater than 0");
        }
        config.sync.chunk_size = chunk_size;
    }
    if let Some(max_retries) = cli.max_retries {
        config.sync.max_chunk_retries = max_retries;
    }
    if let Some(threshold) = cli.drift_threshold {
        if threshold == 0 {
            bail!("--drift-threshold must be greater than 0");
        }
        config.sync.drift_threshold = threshold;
    }

    let mut inventory = config.inventory().context("Invalid table inventory")?;
    if !cli.tables.is_empty() {
        inventory = inventory.retain_named(&cli.tables)?;
    }

    let source = PgConnector::new(config.source.clone());
    let target = PgConnector::new(config.target.clone());

    // Create shutdown channel
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    // Set up Ctrl+C handler: the first stops at a chunk boundary, the second exits
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        match forward_interrupts(tokio::signal::ctrl_c, shutdown_tx_clone).await {
            Ok(()) => std::process::exit(i32::from(EXIT_INTERRUPTED)),
            Err(e) => tracing::warn!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    if cli.verify_only {
        let verifier = Verifier::new(&source, &target, config.sync.drift_threshold);
        let report = verifier.verify_all(&inventory).await;
        report.log();
        return Ok(if report.is_healthy() {
            EXIT_SUCCESS
        } else {
            EXIT_FAILURE
        });
    }

    if cli.monitor {
        Monitor::new(&source, &target, Duration::from_secs(cli.monitor_interval.max(1)))
            .run(&inventory, shutdown_tx.subscribe())
            .await?;
        return Ok(EXIT_SUCCESS);
    }

    let mode = if cli.full_sync {
        let confirmer: Box<dyn FullSyncConfirmer> = if cli.yes {
            Box::new(AssumeYes)
        } else {
            Box::new(PromptConfirmer)
        };
        match FullSyncGrant::request(confirmer.as_ref(), &inventory, &target.endpoint())? {
            Some(grant) => SyncMode::Full(grant),
            None => return Ok(EXIT_FAILURE),
        }
    } else {
        SyncMode::Incremental
    };

    let policy = if cli.overwrite {
        ConflictPolicy::Overwrite
    } else {
        ConflictPolicy::SkipDuplicates
    };
    if policy == ConflictPolicy::Overwrite {
        for table in inventory.iter().filter(|t| t.conflict_key.is_empty()) {
            tracing::warn!(
                "{} has no conflict key; --overwrite behaves like skip-duplicates for it",
                table.target_name()
            );
        }
    }

    let options = SyncOptions::from_settings(&config.sync, policy);
    let mut orchestrator = Orchestrator::new(Box::new(source), Box::new(target), options)
        .with_shutdown(shutdown_tx.subscribe());

    let summary = orchestrator.run(&inventory, &mode).await;
    summary.log();
    Ok(summary.exit_code())
}
