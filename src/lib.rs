//! shopflow: demonstration ETL pipeline for a synthetic e-commerce dataset.
//!
//! This library provides the orchestration core (step runner, orchestrator,
//! execution report), the daily scheduler with its filesystem lock, the
//! retention cleaner, and the data-quality and monitoring reporters.

// Core modules
pub mod cleanup;
pub mod cli;
pub mod config;
pub mod db;
pub mod monitoring;
pub mod pipeline;
pub mod quality;
pub mod scheduler;

mod util;

// Re-export commonly used types
pub use config::{AppConfig, ConfigError};
pub use pipeline::{PipelineOrchestrator, PipelineReport, StepResult, StepStatus};
