//! Daily scheduler for the pipeline.
//!
//! A single-threaded cooperative polling loop: every poll interval the
//! scheduler checks whether the configured local time of day has been
//! reached and, at most once per day, fires the pipeline under the
//! filesystem lock. A firing that finds the lock held is dropped and
//! logged, never queued; the next opportunity is the following day's
//! trigger. The retention cleaner runs only after a successful pipeline.
//!
//! The time comparison is a pure function taking "now" as an explicit
//! input, so the firing logic is testable without waiting on the clock.

pub mod lock;

pub use lock::{LockError, LockGuard, LockHandle};

use std::path::PathBuf;
use std::time::Duration;

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::cleanup::RetentionCleaner;
use crate::pipeline::{PipelineOrchestrator, PipelineStatus};

/// Errors that can occur in the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A schedule time string was not valid `HH:MM`.
    #[error("Invalid schedule time '{0}': expected HH:MM")]
    InvalidScheduleTime(String),

    /// Lock marker error.
    #[error(transparent)]
    Lock(#[from] LockError),
}

/// Parses a `HH:MM` local time of day.
pub fn parse_schedule_time(value: &str) -> Result<NaiveTime, SchedulerError> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|_| SchedulerError::InvalidScheduleTime(value.to_string()))
}

/// Decides whether the scheduler should fire at `now`.
///
/// Fires on the first poll at or after the scheduled time of day, at most
/// once per local day.
pub fn should_fire(
    now: NaiveDateTime,
    schedule_time: NaiveTime,
    last_fired: Option<NaiveDate>,
) -> bool {
    now.time() >= schedule_time && last_fired != Some(now.date())
}

/// Seed for `last_fired` at startup. A scheduler started past the day's
/// trigger arms for the next occurrence; it does not catch up on the
/// firing it missed.
pub fn initial_last_fired(now: NaiveDateTime, schedule_time: NaiveTime) -> Option<NaiveDate> {
    (now.time() >= schedule_time).then(|| now.date())
}

/// Scheduler settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Local time of day at which the pipeline fires.
    pub schedule_time: NaiveTime,
    /// Interval between polls.
    pub poll_interval: Duration,
    /// Path of the lock marker.
    pub lock_path: PathBuf,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            schedule_time: NaiveTime::from_hms_opt(2, 0, 0).unwrap_or_default(),
            poll_interval: Duration::from_secs(30),
            lock_path: PathBuf::from("scheduler.lock"),
        }
    }
}

/// Outcome of a single scheduler poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The scheduled time has not been reached, or today already fired.
    NotDue,
    /// The firing was dropped because the lock marker was held.
    SkippedLockHeld,
    /// The firing was dropped because the lock marker could not be
    /// created or checked.
    LockFault,
    /// The pipeline ran to completion with the given status.
    Completed(PipelineStatus),
}

/// Fires the orchestrator once per configured time of day.
pub struct Scheduler {
    config: SchedulerConfig,
    lock: LockGuard,
    orchestrator: PipelineOrchestrator,
    cleaner: RetentionCleaner,
    last_fired: Option<NaiveDate>,
}

impl Scheduler {
    /// Creates a scheduler armed for the next occurrence of the schedule
    /// time. Started past today's trigger, it waits until tomorrow.
    pub fn new(
        config: SchedulerConfig,
        orchestrator: PipelineOrchestrator,
        cleaner: RetentionCleaner,
    ) -> Self {
        Self::starting_at(config, orchestrator, cleaner, Local::now().naive_local())
    }

    /// Creates a scheduler with an explicit startup instant.
    pub fn starting_at(
        config: SchedulerConfig,
        orchestrator: PipelineOrchestrator,
        cleaner: RetentionCleaner,
        now: NaiveDateTime,
    ) -> Self {
        let lock = LockGuard::new(&config.lock_path);
        let last_fired = initial_last_fired(now, config.schedule_time);
        Self {
            config,
            lock,
            orchestrator,
            cleaner,
            last_fired,
        }
    }

    /// Runs the polling loop forever.
    pub async fn run(&mut self) {
        info!(
            "Scheduler started; firing daily at {} (poll every {:?})",
            self.config.schedule_time.format("%H:%M"),
            self.config.poll_interval
        );

        loop {
            self.tick(Local::now().naive_local()).await;
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Performs one poll at the given local time.
    pub async fn tick(&mut self, now: NaiveDateTime) -> TickOutcome {
        if !should_fire(now, self.config.schedule_time, self.last_fired) {
            return TickOutcome::NotDue;
        }

        // A held lock drops today's firing entirely; it is not deferred
        self.last_fired = Some(now.date());
        self.fire().await
    }

    /// Runs the guarded orchestrator invocation and, on success, cleanup.
    async fn fire(&mut self) -> TickOutcome {
        let handle = match self.lock.try_hold() {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                warn!("Pipeline already running. Skipping this execution.");
                return TickOutcome::SkippedLockHeld;
            }
            Err(e) => {
                error!("Could not acquire lock marker: {}", e);
                return TickOutcome::LockFault;
            }
        };

        info!("Pipeline execution started");
        let report = self.orchestrator.run().await;

        if report.is_success() {
            info!("Pipeline execution SUCCESS");
            match self.cleaner.sweep() {
                Ok(stats) => info!(
                    "Cleanup removed {} file(s), kept {}",
                    stats.deleted, stats.kept
                ),
                Err(e) => warn!("Cleanup failed: {}", e),
            }
        } else {
            error!("Pipeline execution FAILED");
        }

        drop(handle);
        info!("Pipeline execution finished");
        TickOutcome::Completed(report.status)
    }
}
