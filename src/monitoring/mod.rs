//! Pipeline health monitoring.
//!
//! Runs a fixed battery of read-only checks against the persisted execution
//! report and the external store: last-execution age, freshness lag between
//! the staging/production/warehouse layers, transaction-volume anomalies
//! over a trailing window (mean ± 3·stddev), an orphan-record probe and
//! database responsiveness. The results roll up into an overall health
//! status and score and are written as a JSON monitoring report.
//!
//! The statistics and threshold comparisons are pure functions taking
//! explicit inputs, so they are testable without a database or a clock.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::{info, warn};

use crate::pipeline::{PipelineReport, REPORT_FILE_NAME};
use crate::util::round2;

/// File name of the monitoring report.
pub const MONITORING_REPORT_FILE_NAME: &str = "monitoring_report.json";

/// Errors that can occur while monitoring.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Query execution failed.
    #[error("Query failed: {0}")]
    Query(#[from] sqlx::Error),

    /// The monitoring report could not be written.
    #[error("Could not write monitoring report: {0}")]
    ReportIo(std::io::Error),

    /// Report serialization failed.
    #[error("Report serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Overall pipeline health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All checks within thresholds.
    Healthy,
    /// At least one warning.
    Degraded,
    /// At least one critical finding.
    Critical,
}

/// Severity of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    /// Degrades health.
    Warning,
    /// Marks the pipeline critical.
    Critical,
}

/// One alert raised by a check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Severity of the finding.
    pub severity: AlertSeverity,
    /// Name of the check that raised it.
    pub check: String,
    /// Human-readable message.
    pub message: String,
    /// When the alert was raised.
    pub timestamp: DateTime<Utc>,
}

/// Structured monitoring report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringReport {
    /// When monitoring ran.
    pub monitoring_timestamp: DateTime<Utc>,
    /// Rolled-up health status.
    pub pipeline_health: HealthStatus,
    /// Per-check results.
    pub checks: BTreeMap<String, Value>,
    /// Alerts raised by the checks.
    pub alerts: Vec<Alert>,
    /// Rolled-up health score, 0–100.
    pub overall_health_score: u32,
}

/// Monitoring thresholds and locations.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Directory holding the execution report; the monitoring report is
    /// written next to it.
    pub report_dir: PathBuf,
    /// Hours without a pipeline run before the state is critical.
    pub stale_run_threshold_hours: f64,
    /// Acceptable freshness lag between layers, in hours.
    pub freshness_lag_threshold_hours: f64,
    /// Trailing window for volume anomaly detection, in days.
    pub volume_window_days: i32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            report_dir: PathBuf::from("data/processed"),
            stale_run_threshold_hours: 25.0,
            freshness_lag_threshold_hours: 1.0,
            volume_window_days: 30,
        }
    }
}

/// Absolute distance between two instants, in hours.
pub fn hours_between(a: DateTime<Utc>, b: DateTime<Utc>) -> f64 {
    (a - b).num_milliseconds().abs() as f64 / 3_600_000.0
}

/// Kind of volume anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyKind {
    /// Latest count above the expected range.
    Spike,
    /// Latest count below the expected range.
    Drop,
}

/// Statistics over a trailing window of daily counts.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeStats {
    /// Mean of the window.
    pub mean: f64,
    /// Sample standard deviation of the window.
    pub stddev: f64,
    /// Lower bound of the expected range (mean − 3σ).
    pub lower: f64,
    /// Upper bound of the expected range (mean + 3σ).
    pub upper: f64,
    /// Most recent daily count.
    pub latest: i64,
    /// Detected anomaly, if any.
    pub anomaly: Option<AnomalyKind>,
}

/// Analyzes daily volume counts with a mean ± 3·stddev band.
///
/// Returns `None` for an empty window. With a single observation the
/// standard deviation is zero and the band collapses to the mean.
pub fn analyze_volumes(counts: &[i64]) -> Option<VolumeStats> {
    let latest = *counts.last()?;
    let n = counts.len() as f64;
    let mean = counts.iter().sum::<i64>() as f64 / n;

    let stddev = if counts.len() > 1 {
        let variance = counts
            .iter()
            .map(|c| {
                let d = *c as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / (n - 1.0);
        variance.sqrt()
    } else {
        0.0
    };

    let lower = mean - 3.0 * stddev;
    let upper = mean + 3.0 * stddev;
    let latest_f = latest as f64;

    let anomaly = if latest_f > upper {
        Some(AnomalyKind::Spike)
    } else if latest_f < lower {
        Some(AnomalyKind::Drop)
    } else {
        None
    };

    Some(VolumeStats {
        mean,
        stddev,
        lower,
        upper,
        latest,
        anomaly,
    })
}

/// Rolls alerts up into a health status and score.
pub fn health_rollup(alerts: &[Alert]) -> (HealthStatus, u32) {
    if alerts
        .iter()
        .any(|a| a.severity == AlertSeverity::Critical)
    {
        (HealthStatus::Critical, 70)
    } else if !alerts.is_empty() {
        (HealthStatus::Degraded, 85)
    } else {
        (HealthStatus::Healthy, 100)
    }
}

/// Runs the monitoring battery and writes the report.
pub struct PipelineMonitor {
    pool: PgPool,
    config: MonitorConfig,
}

impl PipelineMonitor {
    /// Creates a monitor.
    pub fn new(pool: PgPool, config: MonitorConfig) -> Self {
        Self { pool, config }
    }

    /// Runs all checks, assembles the report and persists it.
    pub async fn run(&self) -> Result<MonitoringReport, MonitorError> {
        let now = Utc::now();
        let mut checks = BTreeMap::new();
        let mut alerts = Vec::new();

        self.check_last_execution(now, &mut checks, &mut alerts);
        self.check_data_freshness(now, &mut checks).await?;
        self.check_volume_anomalies(now, &mut checks, &mut alerts)
            .await?;
        self.check_data_quality(&mut checks).await?;
        self.check_database_connectivity(&mut checks).await?;

        let (pipeline_health, overall_health_score) = health_rollup(&alerts);
        let report = MonitoringReport {
            monitoring_timestamp: now,
            pipeline_health,
            checks,
            alerts,
            overall_health_score,
        };

        self.persist(&report)?;
        info!(
            "Monitoring completed: {:?} (score {})",
            report.pipeline_health, report.overall_health_score
        );
        Ok(report)
    }

    /// How stale is the last pipeline run, judged from the persisted report.
    fn check_last_execution(
        &self,
        now: DateTime<Utc>,
        checks: &mut BTreeMap<String, Value>,
        alerts: &mut Vec<Alert>,
    ) {
        let report_path = self.config.report_dir.join(REPORT_FILE_NAME);
        let last_run = PipelineReport::load(&report_path)
            .ok()
            .and_then(|r| r.end_time);

        match last_run {
            Some(end_time) => {
                let hours_since = hours_between(now, end_time);
                let stale = hours_since > self.config.stale_run_threshold_hours;
                if stale {
                    alerts.push(Alert {
                        severity: AlertSeverity::Critical,
                        check: "last_execution".to_string(),
                        message: format!("No pipeline run in last {:.1} hours", hours_since),
                        timestamp: now,
                    });
                }
                checks.insert(
                    "last_execution".to_string(),
                    json!({
                        "status": if stale { "critical" } else { "ok" },
                        "last_run": end_time,
                        "hours_since_last_run": round2(hours_since),
                        "threshold_hours": self.config.stale_run_threshold_hours,
                    }),
                );
            }
            None => {
                warn!("No pipeline execution report at {}", report_path.display());
                alerts.push(Alert {
                    severity: AlertSeverity::Critical,
                    check: "last_execution".to_string(),
                    message: "No pipeline execution report found".to_string(),
                    timestamp: now,
                });
                checks.insert(
                    "last_execution".to_string(),
                    json!({
                        "status": "critical",
                        "note": "no pipeline execution report found",
                    }),
                );
            }
        }
    }

    /// Freshness lag between the staging, production and warehouse layers.
    async fn check_data_freshness(
        &self,
        now: DateTime<Utc>,
        checks: &mut BTreeMap<String, Value>,
    ) -> Result<(), MonitorError> {
        let rows = sqlx::query(
            "SELECT 'staging' AS layer, MAX(loaded_at) AS ts FROM staging.customers \
             UNION ALL \
             SELECT 'production', MAX(created_at) FROM production.transactions \
             UNION ALL \
             SELECT 'warehouse', MAX(created_at) FROM warehouse.fact_sales",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut latest: BTreeMap<String, DateTime<Utc>> = BTreeMap::new();
        for row in rows {
            let layer: String = row.try_get("layer")?;
            let ts: Option<NaiveDateTime> = row.try_get("ts")?;
            if let Some(ts) = ts {
                latest.insert(layer, ts.and_utc());
            }
        }

        let (staging, production, warehouse) = (
            latest.get("staging"),
            latest.get("production"),
            latest.get("warehouse"),
        );

        match (staging, production, warehouse) {
            (Some(stg), Some(prod), Some(wh)) => {
                let lag_stg_prod = hours_between(*stg, *prod);
                let lag_prod_wh = hours_between(*prod, *wh);
                let max_lag = lag_stg_prod.max(lag_prod_wh);
                let status = if max_lag > self.config.freshness_lag_threshold_hours {
                    "warning"
                } else {
                    "ok"
                };
                checks.insert(
                    "data_freshness".to_string(),
                    json!({
                        "status": status,
                        "staging_latest_record": stg,
                        "production_latest_record": prod,
                        "warehouse_latest_record": wh,
                        "max_lag_hours": round2(max_lag),
                        "checked_at": now,
                    }),
                );
            }
            _ => {
                checks.insert(
                    "data_freshness".to_string(),
                    json!({
                        "status": "warning",
                        "note": "one or more layers have no records",
                    }),
                );
            }
        }

        Ok(())
    }

    /// Daily transaction volume against the expected mean ± 3σ band.
    async fn check_volume_anomalies(
        &self,
        now: DateTime<Utc>,
        checks: &mut BTreeMap<String, Value>,
        alerts: &mut Vec<Alert>,
    ) -> Result<(), MonitorError> {
        let rows = sqlx::query(
            "SELECT d.full_date, COUNT(*) AS cnt \
             FROM warehouse.fact_sales f \
             JOIN warehouse.dim_date d ON f.date_key = d.date_key \
             WHERE d.full_date >= CURRENT_DATE - $1 \
             GROUP BY d.full_date \
             ORDER BY d.full_date",
        )
        .bind(self.config.volume_window_days)
        .fetch_all(&self.pool)
        .await?;

        let counts: Vec<i64> = rows
            .iter()
            .map(|row| row.try_get::<i64, _>("cnt"))
            .collect::<Result<_, _>>()?;

        match analyze_volumes(&counts) {
            None => {
                checks.insert(
                    "data_volume_anomalies".to_string(),
                    json!({
                        "status": "ok",
                        "note": "No data available for anomaly detection",
                        "actual_count": 0,
                        "anomaly_detected": false,
                        "anomaly_type": Value::Null,
                    }),
                );
            }
            Some(stats) => {
                if let Some(kind) = stats.anomaly {
                    alerts.push(Alert {
                        severity: AlertSeverity::Warning,
                        check: "data_volume".to_string(),
                        message: format!(
                            "Transaction volume anomaly detected: {} ({:?})",
                            stats.latest, kind
                        ),
                        timestamp: now,
                    });
                }
                checks.insert(
                    "data_volume_anomalies".to_string(),
                    json!({
                        "status": if stats.anomaly.is_some() { "anomaly_detected" } else { "ok" },
                        "expected_range": format!("{} - {}", stats.lower as i64, stats.upper as i64),
                        "actual_count": stats.latest,
                        "anomaly_detected": stats.anomaly.is_some(),
                        "anomaly_type": stats.anomaly,
                    }),
                );
            }
        }

        Ok(())
    }

    /// Orphan-record probe over the production layer.
    async fn check_data_quality(
        &self,
        checks: &mut BTreeMap<String, Value>,
    ) -> Result<(), MonitorError> {
        let orphans: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) \
             FROM production.transactions t \
             LEFT JOIN production.customers c ON t.customer_id = c.customer_id \
             WHERE c.customer_id IS NULL",
        )
        .fetch_one(&self.pool)
        .await?;

        checks.insert(
            "data_quality".to_string(),
            json!({
                "status": if orphans == 0 { "ok" } else { "degraded" },
                "quality_score": if orphans == 0 { 100 } else { 90 },
                "orphan_records": orphans,
            }),
        );

        Ok(())
    }

    /// Database responsiveness and connection pressure.
    async fn check_database_connectivity(
        &self,
        checks: &mut BTreeMap<String, Value>,
    ) -> Result<(), MonitorError> {
        let started = Instant::now();
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        let response_ms = started.elapsed().as_secs_f64() * 1000.0;

        let active: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pg_stat_activity")
            .fetch_one(&self.pool)
            .await?;

        checks.insert(
            "database_connectivity".to_string(),
            json!({
                "status": "ok",
                "response_time_ms": round2(response_ms),
                "connections_active": active,
            }),
        );

        Ok(())
    }

    /// Writes the monitoring report next to the execution report.
    fn persist(&self, report: &MonitoringReport) -> Result<(), MonitorError> {
        std::fs::create_dir_all(&self.config.report_dir).map_err(MonitorError::ReportIo)?;
        let path = self.config.report_dir.join(MONITORING_REPORT_FILE_NAME);
        let json = serde_json::to_string_pretty(report)?;
        std::fs::write(&path, json).map_err(MonitorError::ReportIo)?;
        info!("Monitoring report written to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_hours_between() {
        let a = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2025, 6, 1, 9, 30, 0).unwrap();
        assert!((hours_between(a, b) - 2.5).abs() < 1e-9);
        // Symmetric
        assert!((hours_between(b, a) - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_analyze_volumes_empty() {
        assert!(analyze_volumes(&[]).is_none());
    }

    #[test]
    fn test_analyze_volumes_single_observation() {
        let stats = analyze_volumes(&[120]).expect("stats");
        assert!((stats.mean - 120.0).abs() < f64::EPSILON);
        assert!((stats.stddev - 0.0).abs() < f64::EPSILON);
        // Band collapses to the mean; the only point is inside it
        assert!(stats.anomaly.is_none());
    }

    #[test]
    fn test_analyze_volumes_stable_window() {
        let counts = vec![100, 102, 98, 101, 99, 100];
        let stats = analyze_volumes(&counts).expect("stats");
        assert!(stats.anomaly.is_none());
        assert!(stats.lower < 100.0 && stats.upper > 100.0);
    }

    #[test]
    fn test_analyze_volumes_spike() {
        let mut counts = vec![100; 29];
        counts.push(100_000);
        let stats = analyze_volumes(&counts).expect("stats");
        assert_eq!(stats.anomaly, Some(AnomalyKind::Spike));
        assert_eq!(stats.latest, 100_000);
    }

    #[test]
    fn test_analyze_volumes_drop() {
        let mut counts = vec![1000; 29];
        counts.push(0);
        let stats = analyze_volumes(&counts).expect("stats");
        assert_eq!(stats.anomaly, Some(AnomalyKind::Drop));
        assert_eq!(stats.latest, 0);
    }

    fn alert(severity: AlertSeverity) -> Alert {
        Alert {
            severity,
            check: "test".to_string(),
            message: "test".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_health_rollup() {
        assert_eq!(health_rollup(&[]), (HealthStatus::Healthy, 100));
        assert_eq!(
            health_rollup(&[alert(AlertSeverity::Warning)]),
            (HealthStatus::Degraded, 85)
        );
        assert_eq!(
            health_rollup(&[alert(AlertSeverity::Warning), alert(AlertSeverity::Critical)]),
            (HealthStatus::Critical, 70)
        );
    }
}
