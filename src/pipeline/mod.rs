//! Pipeline orchestration for the ETL run.
//!
//! This module provides the execution core of the pipeline:
//!
//! - **Orchestrator**: sequences the fixed list of steps and persists the report
//! - **Runner**: executes one step with retry and fixed backoff
//! - **Report**: the append-only structured record of one pipeline execution
//! - **Config**: retry policy, backoff schedule, report and log locations
//!
//! # Pipeline Flow
//!
//! 1. The orchestrator creates a new [`PipelineReport`] keyed by a
//!    timestamp-derived execution id.
//! 2. Each step is handed to the [`StepRunner`], which retries failures up to
//!    the configured maximum with a fixed backoff schedule between attempts.
//! 3. On the first terminally failed step the orchestrator stops; later steps
//!    are never attempted.
//! 4. The report is finalized and written to the report directory exactly
//!    once, regardless of step outcomes.
//!
//! Steps are polymorphic: [`CommandStep`] invokes an external program (exit
//! code is the only signal consumed), [`FnStep`] runs an in-process closure
//! so the orchestration logic can be exercised without spawning processes.

pub mod config;
pub mod orchestrator;
pub mod report;
pub mod runner;

// Re-export main types for convenience
pub use config::{PipelineConfig, PipelineConfigError, StepCommands};
pub use orchestrator::{PipelineError, PipelineOrchestrator, REPORT_FILE_NAME};
pub use report::{PipelineReport, PipelineStatus, ReportError, StepResult, StepStatus};
pub use runner::{CommandStep, ErrorLog, FnStep, Step, StepError, StepOutcome, StepRunner};
