//! Pipeline configuration: retry policy, backoff schedule and output paths.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur during pipeline configuration validation.
#[derive(Debug, Error)]
pub enum PipelineConfigError {
    /// Configuration validation failed.
    #[error("Pipeline configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Commands for the six pipeline steps.
///
/// The step *sequence* is fixed in the orchestrator; only the commands that
/// each step invokes are configurable. Each command is an argv vector whose
/// first element is the program.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StepCommands {
    /// Generates the synthetic raw CSV files.
    pub data_generation: Vec<String>,
    /// Loads raw files into the staging schema.
    pub data_ingestion: Vec<String>,
    /// Runs the staging data-quality gate.
    pub data_quality: Vec<String>,
    /// Transforms staging data into the production schema.
    pub staging_to_production: Vec<String>,
    /// Loads the dimensional warehouse.
    pub warehouse_load: Vec<String>,
    /// Computes analytics aggregates.
    pub analytics_generation: Vec<String>,
}

impl Default for StepCommands {
    fn default() -> Self {
        fn script(path: &str) -> Vec<String> {
            vec!["python".to_string(), path.to_string()]
        }

        Self {
            data_generation: script("scripts/data_generation/generate_data.py"),
            data_ingestion: script("scripts/ingestion/ingest_to_staging.py"),
            data_quality: script("scripts/quality_checks/validate_data.py"),
            staging_to_production: script("scripts/transformation/staging_to_production.py"),
            warehouse_load: script("scripts/transformation/load_warehouse.py"),
            analytics_generation: script("scripts/transformation/generate_analytics.py"),
        }
    }
}

impl StepCommands {
    /// Returns the commands in pipeline execution order, with step names.
    pub fn ordered(&self) -> Vec<(&'static str, &[String])> {
        vec![
            ("data_generation", self.data_generation.as_slice()),
            ("data_ingestion", self.data_ingestion.as_slice()),
            ("data_quality", self.data_quality.as_slice()),
            ("staging_to_production", self.staging_to_production.as_slice()),
            ("warehouse_load", self.warehouse_load.as_slice()),
            ("analytics_generation", self.analytics_generation.as_slice()),
        ]
    }
}

/// Configuration for the pipeline orchestrator and step runner.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum attempts per step.
    pub max_retries: u32,
    /// Fixed backoff schedule between attempts.
    pub backoff: Vec<Duration>,
    /// Directory the execution report is written to.
    pub report_dir: PathBuf,
    /// Path of the dedicated step error log.
    pub error_log_path: PathBuf,
    /// Commands for the six steps.
    pub step_commands: StepCommands,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
            ],
            report_dir: PathBuf::from("data/processed"),
            error_log_path: PathBuf::from("logs/pipeline_errors.log"),
            step_commands: StepCommands::default(),
        }
    }
}

impl PipelineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), PipelineConfigError> {
        if self.max_retries == 0 {
            return Err(PipelineConfigError::ValidationFailed(
                "max_retries must be greater than 0".to_string(),
            ));
        }

        // The backoff schedule must be monotonically non-decreasing
        if self.backoff.windows(2).any(|w| w[1] < w[0]) {
            return Err(PipelineConfigError::ValidationFailed(
                "backoff schedule must be non-decreasing".to_string(),
            ));
        }

        for (name, command) in self.step_commands.ordered() {
            if command.is_empty() {
                return Err(PipelineConfigError::ValidationFailed(format!(
                    "step '{}' has an empty command",
                    name
                )));
            }
        }

        Ok(())
    }

    /// Builder method to set the maximum attempts per step.
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Builder method to set the backoff schedule.
    pub fn with_backoff(mut self, backoff: Vec<Duration>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Builder method to set the backoff schedule from whole seconds.
    pub fn with_backoff_seconds(mut self, seconds: &[u64]) -> Self {
        self.backoff = seconds.iter().map(|s| Duration::from_secs(*s)).collect();
        self
    }

    /// Builder method to set the report directory.
    pub fn with_report_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.report_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Builder method to set the error log path.
    pub fn with_error_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.error_log_path = path.into();
        self
    }

    /// Builder method to set the step commands.
    pub fn with_step_commands(mut self, commands: StepCommands) -> Self {
        self.step_commands = commands;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(
            config.backoff,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_step_order_is_fixed() {
        let commands = StepCommands::default();
        let names: Vec<&str> = commands.ordered().into_iter().map(|(n, _)| n).collect();
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

    #[test]
    fn test_validation_zero_retries() {
        let config = PipelineConfig::default().with_max_retries(0);
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("max_retries"));
    }

    #[test]
    fn test_validation_decreasing_backoff() {
        let config = PipelineConfig::default().with_backoff_seconds(&[4, 2, 1]);
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("non-decreasing"));
    }

    #[test]
    fn test_validation_empty_step_command() {
        let mut commands = StepCommands::default();
        commands.warehouse_load.clear();
        let config = PipelineConfig::default().with_step_commands(commands);
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("warehouse_load"));
    }

    #[test]
    fn test_empty_backoff_is_valid() {
        // An empty schedule means retry immediately
        let config = PipelineConfig::default().with_backoff(Vec::new());
        assert!(config.validate().is_ok());
    }
}
