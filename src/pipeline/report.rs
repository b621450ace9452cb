//! Pipeline execution report model.
//!
//! A [`PipelineReport`] is created at orchestrator start, mutated as each
//! step completes, finalized once at the end of the run and then persisted.
//! The serialized form is a single JSON object matching the execution report
//! interface consumed by monitoring.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::util::round2;

/// Errors that can occur while persisting or loading a report.
#[derive(Debug, Error)]
pub enum ReportError {
    /// IO error while reading or writing the report file.
    #[error("Report IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Serialization/deserialization error.
    #[error("Report serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Outcome of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// The step completed within the allowed attempts.
    Success,
    /// The step exhausted all attempts.
    Failed,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Success => write!(f, "success"),
            StepStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Overall outcome of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    /// Every executed step succeeded.
    Success,
    /// A step terminally failed and the run was halted.
    Failed,
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStatus::Success => write!(f, "success"),
            PipelineStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Result of running one step to completion or terminal failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Final status of the step.
    pub status: StepStatus,
    /// Wall-clock duration across all attempts, in seconds.
    pub duration_seconds: f64,
    /// Reserved: no current step reports a count. Serialized as `null` on
    /// success and `0` on terminal failure.
    pub records_processed: Option<u64>,
    /// Number of failed attempts that preceded the final outcome.
    pub retry_attempts: u32,
    /// Error message of the last attempt, present only on failure.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_message: Option<String>,
}

impl StepResult {
    /// Creates a successful result.
    pub fn success(duration: Duration, retry_attempts: u32) -> Self {
        Self {
            status: StepStatus::Success,
            duration_seconds: round2(duration.as_secs_f64()),
            records_processed: None,
            retry_attempts,
            error_message: None,
        }
    }

    /// Creates a terminally failed result.
    pub fn failure(duration: Duration, error: impl Into<String>, retry_attempts: u32) -> Self {
        Self {
            status: StepStatus::Failed,
            duration_seconds: round2(duration.as_secs_f64()),
            records_processed: Some(0),
            retry_attempts,
            error_message: Some(error.into()),
        }
    }

    /// Returns whether the step failed.
    pub fn is_failed(&self) -> bool {
        self.status == StepStatus::Failed
    }
}

/// Step results keyed by step name, in execution order.
///
/// Serializes as a JSON object whose keys appear in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepResults(Vec<(String, StepResult)>);

impl StepResults {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a step result, preserving execution order.
    pub fn insert(&mut self, name: impl Into<String>, result: StepResult) {
        self.0.push((name.into(), result));
    }

    /// Looks up a step result by name.
    pub fn get(&self, name: &str) -> Option<&StepResult> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, r)| r)
    }

    /// Returns whether a step was executed.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Number of executed steps.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns whether no steps were executed.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over (name, result) pairs in execution order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &StepResult)> {
        self.0.iter().map(|(n, r)| (n.as_str(), r))
    }

    /// Step names in execution order.
    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(|(n, _)| n.as_str()).collect()
    }
}

impl Serialize for StepResults {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, result) in &self.0 {
            map.serialize_entry(name, result)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for StepResults {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct StepResultsVisitor;

        impl<'de> Visitor<'de> for StepResultsVisitor {
            type Value = StepResults;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of step name to step result")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, result)) = access.next_entry::<String, StepResult>()? {
                    entries.push((name, result));
                }
                Ok(StepResults(entries))
            }
        }

        deserializer.deserialize_map(StepResultsVisitor)
    }
}

/// Structured record of one pipeline execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    /// Identifier derived from the run's start timestamp.
    pub pipeline_execution_id: String,
    /// When the run started.
    pub start_time: DateTime<Utc>,
    /// When the run finished; set by [`PipelineReport::finalize`].
    pub end_time: Option<DateTime<Utc>>,
    /// Total run duration in seconds; set by [`PipelineReport::finalize`].
    pub total_duration_seconds: Option<f64>,
    /// Overall run status.
    pub status: PipelineStatus,
    /// Per-step results in execution order.
    pub steps_executed: StepResults,
    /// Descriptive errors, one per failed step.
    pub errors: Vec<String>,
    /// Non-fatal warnings.
    pub warnings: Vec<String>,
}

impl PipelineReport {
    /// Creates a report for a run starting now.
    pub fn new() -> Self {
        Self::begin(Utc::now())
    }

    /// Creates a report for a run starting at the given instant.
    pub fn begin(start_time: DateTime<Utc>) -> Self {
        Self {
            pipeline_execution_id: execution_id(start_time),
            start_time,
            end_time: None,
            total_duration_seconds: None,
            status: PipelineStatus::Success,
            steps_executed: StepResults::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Records one step outcome. A failed step flips the overall status and
    /// appends a descriptive error.
    pub fn record_step(&mut self, name: &str, result: StepResult) {
        if result.is_failed() {
            self.status = PipelineStatus::Failed;
            self.errors.push(format!("{} failed", name));
        }
        self.steps_executed.insert(name, result);
    }

    /// Appends a non-fatal warning.
    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Records the end time and total duration. Called exactly once per run.
    pub fn finalize(&mut self, end_time: DateTime<Utc>) {
        self.end_time = Some(end_time);
        let elapsed = (end_time - self.start_time).num_milliseconds() as f64 / 1000.0;
        self.total_duration_seconds = Some(round2(elapsed));
    }

    /// Returns whether every executed step succeeded.
    pub fn is_success(&self) -> bool {
        self.status == PipelineStatus::Success
    }

    /// Writes the report as pretty-printed JSON, overwriting any prior
    /// report at the same path.
    pub fn persist(&self, path: &Path) -> Result<(), ReportError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ReportError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reads a previously persisted report.
    pub fn load(path: &Path) -> Result<Self, ReportError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }
}

impl Default for PipelineReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Derives the execution identifier from the run's start timestamp.
pub fn execution_id(start_time: DateTime<Utc>) -> String {
    format!("PIPE_{}", start_time.format("%Y%m%d_%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 2, 0, 7).unwrap()
    }

    #[test]
    fn test_execution_id_format() {
        assert_eq!(execution_id(start()), "PIPE_20250314_020007");
    }

    #[test]
    fn test_step_result_success() {
        let result = StepResult::success(Duration::from_millis(1234), 0);
        assert_eq!(result.status, StepStatus::Success);
        assert!((result.duration_seconds - 1.23).abs() < f64::EPSILON);
        assert_eq!(result.records_processed, None);
        assert_eq!(result.retry_attempts, 0);
        assert!(result.error_message.is_none());
        assert!(!result.is_failed());
    }

    #[test]
    fn test_step_result_failure() {
        let result = StepResult::failure(Duration::from_secs(7), "exit status 1", 3);
        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.records_processed, Some(0));
        assert_eq!(result.retry_attempts, 3);
        assert_eq!(result.error_message.as_deref(), Some("exit status 1"));
        assert!(result.is_failed());
    }

    #[test]
    fn test_step_result_json_shape() {
        let success = serde_json::to_value(StepResult::success(Duration::from_secs(1), 0))
            .expect("serialize");
        assert_eq!(success["status"], "success");
        // records_processed is present and null on success
        assert!(success.as_object().unwrap().contains_key("records_processed"));
        assert!(success["records_processed"].is_null());
        // error_message is omitted on success
        assert!(!success.as_object().unwrap().contains_key("error_message"));

        let failure = serde_json::to_value(StepResult::failure(
            Duration::from_secs(2),
            "boom",
            3,
        ))
        .expect("serialize");
        assert_eq!(failure["status"], "failed");
        assert_eq!(failure["records_processed"], 0);
        assert_eq!(failure["error_message"], "boom");
    }

    #[test]
    fn test_step_results_preserve_order() {
        let mut steps = StepResults::new();
        steps.insert("data_generation", StepResult::success(Duration::ZERO, 0));
        steps.insert("data_ingestion", StepResult::success(Duration::ZERO, 0));
        steps.insert("data_quality", StepResult::failure(Duration::ZERO, "e", 3));

        assert_eq!(
            steps.names(),
            vec!["data_generation", "data_ingestion", "data_quality"]
        );

        let json = serde_json::to_string(&steps).expect("serialize");
        let gen_pos = json.find("data_generation").unwrap();
        let ing_pos = json.find("data_ingestion").unwrap();
        let dq_pos = json.find("data_quality").unwrap();
        assert!(gen_pos < ing_pos && ing_pos < dq_pos);

        let parsed: StepResults = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, steps);
    }

    #[test]
    fn test_report_record_step_and_status() {
        let mut report = PipelineReport::begin(start());
        assert!(report.is_success());

        report.record_step("data_generation", StepResult::success(Duration::ZERO, 0));
        assert!(report.is_success());
        assert!(report.errors.is_empty());

        report.record_step(
            "data_ingestion",
            StepResult::failure(Duration::ZERO, "copy failed", 3),
        );
        assert!(!report.is_success());
        assert_eq!(report.errors, vec!["data_ingestion failed"]);
        assert!(report.steps_executed.contains("data_generation"));
        assert!(report.steps_executed.contains("data_ingestion"));
    }

    #[test]
    fn test_report_finalize() {
        let mut report = PipelineReport::begin(start());
        let end = start() + chrono::Duration::milliseconds(12_340);
        report.finalize(end);

        assert_eq!(report.end_time, Some(end));
        assert!((report.total_duration_seconds.unwrap() - 12.34).abs() < f64::EPSILON);
    }

    #[test]
    fn test_report_persist_load_and_overwrite() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("processed").join("pipeline_execution_report.json");

        let mut first = PipelineReport::begin(start());
        first.record_step("data_generation", StepResult::success(Duration::ZERO, 0));
        first.finalize(start() + chrono::Duration::seconds(5));
        first.persist(&path).expect("persist");

        let mut second = PipelineReport::begin(start() + chrono::Duration::days(1));
        second.record_step(
            "data_generation",
            StepResult::failure(Duration::ZERO, "boom", 3),
        );
        second.finalize(start() + chrono::Duration::days(1));
        second.persist(&path).expect("persist overwrites");

        let loaded = PipelineReport::load(&path).expect("load");
        assert_eq!(loaded, second);
        assert_ne!(loaded, first);
    }
}
