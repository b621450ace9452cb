//! Step execution with retry and fixed backoff.
//!
//! A [`Step`] is one externally invocable unit of work. [`CommandStep`]
//! spawns an external program and consumes only its exit code;
//! [`FnStep`] wraps an in-process closure so orchestration logic can be
//! exercised without spawning processes. The [`StepRunner`] drives a step
//! through up to `max_retries` attempts with a fixed backoff schedule in
//! between, writing each failed attempt's diagnostic to a dedicated error
//! log separate from the main run log.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::process::Command;
use tracing::{error, info, warn};

use super::config::PipelineConfig;
use super::report::StepResult;

/// Maximum stderr bytes carried into a step error message.
const STDERR_CAPTURE_LIMIT: usize = 4096;

/// Errors produced by a single step attempt.
#[derive(Debug, Error)]
pub enum StepError {
    /// The step command could not be spawned.
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    /// The step command exited with a non-zero status.
    #[error("Command '{program}' exited with {code}: {stderr}")]
    NonZeroExit {
        program: String,
        code: String,
        stderr: String,
    },

    /// An in-process step raised a fault.
    #[error("Step fault: {0}")]
    Fault(String),
}

/// Output of a successful step attempt.
///
/// `records_processed` is reserved: no current step reports a count back to
/// the runner, so it is always `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepOutcome {
    /// Reserved per-step record count.
    pub records_processed: Option<u64>,
}

/// One externally invocable unit of pipeline work.
#[async_trait]
pub trait Step: Send + Sync {
    /// Name of the step, unique within a run.
    fn name(&self) -> &str;

    /// Runs the step once to completion.
    async fn run(&self) -> Result<StepOutcome, StepError>;
}

/// A step that invokes an external program.
///
/// The exit code is the only signal consumed; stderr is captured solely for
/// diagnostics.
pub struct CommandStep {
    name: String,
    program: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
}

impl CommandStep {
    /// Creates a command step.
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
        }
    }

    /// Creates a command step from an argv vector. Returns `None` when the
    /// vector is empty.
    pub fn from_argv(name: impl Into<String>, argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            name: name.into(),
            program: program.clone(),
            args: args.to_vec(),
            current_dir: None,
        })
    }

    /// Sets the command arguments.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Sets the working directory for the command.
    pub fn with_current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl Step for CommandStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<StepOutcome, StepError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }

        let output = cmd.output().await.map_err(|source| StepError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        if output.status.success() {
            Ok(StepOutcome::default())
        } else {
            let mut stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            if stderr.len() > STDERR_CAPTURE_LIMIT {
                let cut = stderr
                    .char_indices()
                    .map(|(i, _)| i)
                    .take_while(|i| *i <= STDERR_CAPTURE_LIMIT)
                    .last()
                    .unwrap_or(0);
                stderr.truncate(cut);
            }
            let code = output
                .status
                .code()
                .map(|c| format!("exit code {}", c))
                .unwrap_or_else(|| "signal".to_string());
            Err(StepError::NonZeroExit {
                program: self.program.clone(),
                code,
                stderr,
            })
        }
    }
}

/// A step backed by an in-process closure.
pub struct FnStep<F>
where
    F: Fn() -> Result<StepOutcome, StepError> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnStep<F>
where
    F: Fn() -> Result<StepOutcome, StepError> + Send + Sync,
{
    /// Creates an in-process step.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

#[async_trait]
impl<F> Step for FnStep<F>
where
    F: Fn() -> Result<StepOutcome, StepError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<StepOutcome, StepError> {
        (self.func)()
    }
}

/// Append-only error channel for failed step attempts, kept separate from
/// the main run log.
#[derive(Debug, Clone)]
pub struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    /// Creates an error log writing to the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one failed-attempt diagnostic.
    pub fn append(&self, step: &str, attempt: u32, error: &StepError) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(
            file,
            "{} | ERROR | step={} attempt={} | {}",
            Utc::now().format("%Y-%m-%d %H:%M:%S"),
            step,
            attempt,
            error
        )
    }
}

/// Executes one step, enforcing the retry policy.
pub struct StepRunner {
    max_retries: u32,
    backoff: Vec<Duration>,
    error_log: Option<ErrorLog>,
}

impl StepRunner {
    /// Creates a runner with the default retry policy.
    pub fn new() -> Self {
        let config = PipelineConfig::default();
        Self {
            max_retries: config.max_retries,
            backoff: config.backoff,
            error_log: None,
        }
    }

    /// Creates a runner from a pipeline configuration, with the error log
    /// at the configured path.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: config.backoff.clone(),
            error_log: Some(ErrorLog::new(&config.error_log_path)),
        }
    }

    /// Builder method to set the maximum attempts.
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Builder method to set the backoff schedule.
    pub fn with_backoff(mut self, backoff: Vec<Duration>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Builder method to set the error log.
    pub fn with_error_log(mut self, log: ErrorLog) -> Self {
        self.error_log = Some(log);
        self
    }

    /// Runs a step to success or terminal failure.
    ///
    /// The returned [`StepResult`] always carries the wall-clock duration
    /// across all attempts. A step either fully succeeds or is terminally
    /// failed after exhausting retries; there is no partial success.
    pub async fn run_step(&self, step: &dyn Step) -> StepResult {
        let start = Instant::now();
        let mut retries = 0u32;

        for attempt in 1..=self.max_retries {
            info!("Starting step: {} (attempt {})", step.name(), attempt);

            match step.run().await {
                Ok(_outcome) => {
                    let duration = start.elapsed();
                    info!(
                        "Completed step: {} in {:.2}s",
                        step.name(),
                        duration.as_secs_f64()
                    );
                    return StepResult::success(duration, retries);
                }
                Err(e) => {
                    retries += 1;
                    error!("Step failed: {} | attempt {}", step.name(), attempt);
                    if let Some(log) = &self.error_log {
                        if let Err(io_err) = log.append(step.name(), attempt, &e) {
                            warn!(
                                "Could not write to error log {}: {}",
                                log.path().display(),
                                io_err
                            );
                        }
                    }

                    if attempt < self.max_retries {
                        let delay = self.backoff_delay(attempt);
                        warn!("Retrying {} in {:?}", step.name(), delay);
                        tokio::time::sleep(delay).await;
                    } else {
                        return StepResult::failure(start.elapsed(), e.to_string(), retries);
                    }
                }
            }
        }

        // Reached only with max_retries == 0, which validation rejects
        StepResult::failure(start.elapsed(), "step was never attempted", retries)
    }

    /// Delay before the attempt following `failed_attempt`. Attempts past
    /// the end of the schedule reuse its last entry.
    fn backoff_delay(&self, failed_attempt: u32) -> Duration {
        let idx = failed_attempt.saturating_sub(1) as usize;
        self.backoff
            .get(idx)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

impl Default for StepRunner {
    fn default() -> Self {
        Self::new()
    }
}
