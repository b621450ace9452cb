//! Pipeline orchestrator: sequences the fixed step list and persists the
//! execution report.
//!
//! The orchestrator owns the ordered step sequence. Steps run strictly one
//! after another through the [`StepRunner`]; the first terminal failure
//! halts the run and later steps are never attempted. Finalization always
//! happens: the end time and total duration are recorded and the report is
//! written to its well-known location exactly once per run, whatever the
//! step outcomes were.

use chrono::Utc;
use thiserror::Error;
use tracing::{error, info};

use super::config::{PipelineConfig, PipelineConfigError};
use super::report::PipelineReport;
use super::runner::{CommandStep, Step, StepRunner};

/// File name of the execution report, overwritten on every run.
pub const REPORT_FILE_NAME: &str = "pipeline_execution_report.json";

/// Errors that can occur while constructing the orchestrator.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] PipelineConfigError),
}

/// Coordinates one pipeline run end to end.
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    steps: Vec<Box<dyn Step>>,
    runner: StepRunner,
}

impl PipelineOrchestrator {
    /// Creates an orchestrator whose steps invoke the external commands
    /// from the configuration, in the fixed pipeline order.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;

        let steps = config
            .step_commands
            .ordered()
            .into_iter()
            .filter_map(|(name, argv)| {
                CommandStep::from_argv(name, argv).map(|s| Box::new(s) as Box<dyn Step>)
            })
            .collect();

        let runner = StepRunner::from_config(&config);
        Ok(Self {
            config,
            steps,
            runner,
        })
    }

    /// Creates an orchestrator with injected steps. Used to run in-process
    /// steps and to exercise the orchestration logic in tests.
    pub fn with_steps(
        config: PipelineConfig,
        steps: Vec<Box<dyn Step>>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let runner = StepRunner::from_config(&config);
        Ok(Self {
            config,
            steps,
            runner,
        })
    }

    /// Gets the current configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs the pipeline once and returns the finalized report.
    ///
    /// The report is persisted before returning. A failed report write is
    /// logged but does not alter the run's own status.
    pub async fn run(&self) -> PipelineReport {
        let mut report = PipelineReport::begin(Utc::now());
        info!("Starting pipeline run {}", report.pipeline_execution_id);

        for step in &self.steps {
            let result = self.runner.run_step(step.as_ref()).await;
            let failed = result.is_failed();
            report.record_step(step.name(), result);

            if failed {
                error!("Pipeline stopped at step: {}", step.name());
                break;
            }
        }

        report.finalize(Utc::now());

        let report_path = self.config.report_dir.join(REPORT_FILE_NAME);
        match report.persist(&report_path) {
            Ok(()) => info!("Pipeline report written to {}", report_path.display()),
            Err(e) => {
                error!("Could not persist pipeline report: {}", e);
                report.add_warning(format!("report not persisted: {}", e));
            }
        }

        if report.is_success() {
            info!("Pipeline {} completed successfully", report.pipeline_execution_id);
        } else {
            error!("Pipeline {} failed", report.pipeline_execution_id);
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::report::{PipelineStatus, StepStatus};
    use crate::pipeline::runner::{FnStep, StepError, StepOutcome};

    fn ok_step(name: &str) -> Box<dyn Step> {
        Box::new(FnStep::new(name, || Ok(StepOutcome::default())))
    }

    fn failing_step(name: &str) -> Box<dyn Step> {
        Box::new(FnStep::new(name, || {
            Err(StepError::Fault("persistent failure".to_string()))
        }))
    }

    fn test_config(dir: &std::path::Path) -> PipelineConfig {
        PipelineConfig::new()
            .with_backoff(Vec::new())
            .with_report_dir(dir.join("processed"))
            .with_error_log_path(dir.join("logs").join("pipeline_errors.log"))
    }

    #[tokio::test]
    async fn test_all_steps_succeed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let orchestrator = PipelineOrchestrator::with_steps(
            test_config(dir.path()),
            vec![ok_step("a"), ok_step("b"), ok_step("c")],
        )
        .expect("orchestrator");

        let report = orchestrator.run().await;

        assert_eq!(report.status, PipelineStatus::Success);
        assert!(report.errors.is_empty());
        assert_eq!(report.steps_executed.names(), vec!["a", "b", "c"]);
        assert!(report.end_time.is_some());
        assert!(report.total_duration_seconds.is_some());
    }

    #[tokio::test]
    async fn test_halts_on_first_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let orchestrator = PipelineOrchestrator::with_steps(
            test_config(dir.path()),
            vec![
                ok_step("a"),
                ok_step("b"),
                failing_step("c"),
                ok_step("d"),
            ],
        )
        .expect("orchestrator");

        let report = orchestrator.run().await;

        assert_eq!(report.status, PipelineStatus::Failed);
        assert_eq!(report.errors, vec!["c failed"]);
        assert_eq!(report.steps_executed.names(), vec!["a", "b", "c"]);
        assert!(!report.steps_executed.contains("d"));

        let a = report.steps_executed.get("a").unwrap();
        assert_eq!(a.status, StepStatus::Success);
        let c = report.steps_executed.get("c").unwrap();
        assert_eq!(c.status, StepStatus::Failed);
        assert_eq!(c.retry_attempts, 3);
    }

    #[tokio::test]
    async fn test_report_persisted_even_on_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(dir.path());
        let report_path = config.report_dir.join(REPORT_FILE_NAME);

        let orchestrator =
            PipelineOrchestrator::with_steps(config, vec![failing_step("a")])
                .expect("orchestrator");
        let report = orchestrator.run().await;

        assert_eq!(report.status, PipelineStatus::Failed);
        let persisted = PipelineReport::load(&report_path).expect("report written");
        assert_eq!(persisted.status, PipelineStatus::Failed);
        assert_eq!(persisted.pipeline_execution_id, report.pipeline_execution_id);
    }

    #[tokio::test]
    async fn test_default_steps_follow_fixed_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let orchestrator =
            PipelineOrchestrator::new(test_config(dir.path())).expect("orchestrator");

        let names: Vec<&str> = orchestrator.steps.iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec![
                "data_generation",
                "data_ingestion",
                "data_quality",
                "staging_to_production",
                "warehouse_load",
                "analytics_generation"
            ]
        );
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = PipelineConfig::new().with_max_retries(0);
        let result = PipelineOrchestrator::with_steps(config, Vec::new());
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }
}
