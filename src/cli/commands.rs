//! CLI command definitions for shopflow.
//!
//! Each subcommand wires the shared application configuration into one of
//! the library components: a single pipeline run, the daily scheduler, the
//! retention cleaner, the data quality checker or the health monitor.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use crate::cleanup::{RetentionCleaner, RetentionPolicy};
use crate::config::AppConfig;
use crate::db;
use crate::monitoring::{MonitorConfig, PipelineMonitor};
use crate::pipeline::{PipelineOrchestrator, PipelineStatus};
use crate::quality::QualityChecker;
use crate::scheduler::{parse_schedule_time, Scheduler, SchedulerConfig};

/// Default configuration file location.
const DEFAULT_CONFIG_PATH: &str = "config/config.yaml";

/// ETL pipeline orchestration for the ShopFlow e-commerce dataset.
#[derive(Parser)]
#[command(name = "shopflow")]
#[command(about = "Run, schedule and monitor the ShopFlow ETL pipeline")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, env = "SHOPFLOW_CONFIG", global = true)]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Execute the pipeline once, end to end.
    Run,

    /// Start the scheduler and fire the pipeline daily at the configured time.
    Schedule,

    /// Delete expired files from the configured target directories.
    Clean,

    /// Run the data quality checks and write a quality report.
    Quality,

    /// Run the health checks and write a monitoring report.
    Monitor,
}

/// Parse CLI arguments without executing commands.
///
/// This allows the caller to initialize logging with the parsed log level
/// before running the command.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with the parsed arguments.
///
/// This is the main entry point for the shopflow CLI.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;

    match cli.command {
        Commands::Run => run_pipeline_command(&config).await,
        Commands::Schedule => run_schedule_command(&config).await,
        Commands::Clean => run_clean_command(&config),
        Commands::Quality => run_quality_command(&config).await,
        Commands::Monitor => run_monitor_command(&config).await,
    }
}

async fn run_pipeline_command(config: &AppConfig) -> anyhow::Result<()> {
    let orchestrator = PipelineOrchestrator::new(config.pipeline())?;
    let report = orchestrator.run().await;
    if report.status == PipelineStatus::Failed {
        anyhow::bail!("pipeline {} failed", report.pipeline_execution_id);
    }
    Ok(())
}

async fn run_schedule_command(config: &AppConfig) -> anyhow::Result<()> {
    let scheduler_config = SchedulerConfig {
        schedule_time: parse_schedule_time(&config.pipeline_schedule_time)?,
        poll_interval: std::time::Duration::from_secs(config.poll_interval_seconds),
        lock_path: config.lock_path.clone(),
    };
    let orchestrator = PipelineOrchestrator::new(config.pipeline())?;
    let mut scheduler = Scheduler::new(scheduler_config, orchestrator, build_cleaner(config));
    scheduler.run().await;
    Ok(())
}

fn run_clean_command(config: &AppConfig) -> anyhow::Result<()> {
    let stats = build_cleaner(config).sweep()?;
    println!(
        "Cleanup complete: {} deleted, {} kept, {} missing directories",
        stats.deleted, stats.kept, stats.missing_dirs
    );
    Ok(())
}

async fn run_quality_command(config: &AppConfig) -> anyhow::Result<()> {
    let pool = db::connect(&config.database.url()).await?;
    let checker = QualityChecker::new(pool, &config.quality_sql_path, &config.quality_report_dir);
    let report = checker.run().await?;
    println!(
        "Quality score: {} (grade {})",
        report.overall_quality_score, report.quality_grade
    );
    Ok(())
}

async fn run_monitor_command(config: &AppConfig) -> anyhow::Result<()> {
    let pool = db::connect(&config.database.url()).await?;
    let monitor = PipelineMonitor::new(
        pool,
        MonitorConfig {
            report_dir: config.report_dir.clone(),
            ..MonitorConfig::default()
        },
    );
    let report = monitor.run().await?;
    println!(
        "Pipeline health: {:?} (score {})",
        report.pipeline_health, report.overall_health_score
    );
    if report.pipeline_health == crate::monitoring::HealthStatus::Critical {
        anyhow::bail!("pipeline health is critical");
    }
    Ok(())
}

fn build_cleaner(config: &AppConfig) -> RetentionCleaner {
    let policy = RetentionPolicy::new(config.retention_days)
        .with_preserve_keywords(config.preserve_keywords.clone());
    RetentionCleaner::new(policy, config.cleanup_target_dirs.clone())
}
