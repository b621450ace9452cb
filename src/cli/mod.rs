//! Command-line interface for shopflow.
//!
//! Provides commands for running the pipeline, starting the scheduler,
//! retention cleanup, data quality checks and health monitoring.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli, Commands};
