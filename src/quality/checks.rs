//! Execution of the opaque quality query set and report assembly.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::{debug, info};

use super::{grade_for, CheckOutcome, ChecksPerformed, QualityReport};

/// Errors that can occur while running the quality checks.
#[derive(Debug, Error)]
pub enum QualityError {
    /// The SQL query file could not be read.
    #[error("Could not read query file {path}: {source}")]
    QueryFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Query execution failed.
    #[error("Query failed: {0}")]
    Query(#[from] sqlx::Error),

    /// The report could not be written.
    #[error("Could not write quality report: {0}")]
    ReportIo(std::io::Error),

    /// Report serialization failed.
    #[error("Report serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Runs the fixed data-quality battery against the external store.
pub struct QualityChecker {
    pool: PgPool,
    sql_path: PathBuf,
    report_dir: PathBuf,
}

impl QualityChecker {
    /// Creates a checker reading queries from `sql_path` and writing
    /// reports under `report_dir`.
    pub fn new(pool: PgPool, sql_path: impl Into<PathBuf>, report_dir: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            sql_path: sql_path.into(),
            report_dir: report_dir.into(),
        }
    }

    /// Runs the query set, builds the report and persists it.
    pub async fn run(&self) -> Result<QualityReport, QualityError> {
        info!("Starting data quality checks");

        let sql = std::fs::read_to_string(&self.sql_path).map_err(|source| {
            QualityError::QueryFile {
                path: self.sql_path.clone(),
                source,
            }
        })?;

        let results = self.execute_query_set(&sql).await?;
        let report = build_report(&results, Utc::now());
        self.persist(&report)?;

        info!(
            "Data quality checks completed: score {:.2} (grade {})",
            report.overall_quality_score, report.quality_grade
        );
        Ok(report)
    }

    /// Executes each `;`-separated statement and collects labeled counts.
    ///
    /// Rows are expected to be shaped `(label, count)` or `(count,)`; for
    /// single-column rows the label is derived from the statement's final
    /// `AS` alias.
    async fn execute_query_set(
        &self,
        sql: &str,
    ) -> Result<BTreeMap<String, i64>, QualityError> {
        let mut results = BTreeMap::new();

        for statement in sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            debug!("Executing quality query: {:.60}...", statement);
            let rows = sqlx::query(statement).fetch_all(&self.pool).await?;

            for row in rows {
                match row.columns().len() {
                    2 => {
                        let label: String = row.try_get(0)?;
                        let count: i64 = row.try_get(1)?;
                        results.insert(label, count);
                    }
                    1 => {
                        let count: i64 = row.try_get(0)?;
                        results.insert(label_from_statement(statement), count);
                    }
                    _ => continue,
                }
            }
        }

        Ok(results)
    }

    /// Writes a timestamped report file.
    fn persist(&self, report: &QualityReport) -> Result<(), QualityError> {
        std::fs::create_dir_all(&self.report_dir).map_err(QualityError::ReportIo)?;
        let file_name = format!(
            "quality_report_{}.json",
            report.check_timestamp.format("%Y%m%d_%H%M%S")
        );
        let path = self.report_dir.join(file_name);
        let json = serde_json::to_string_pretty(report)?;
        std::fs::write(&path, json).map_err(QualityError::ReportIo)?;
        info!("Quality report written to {}", path.display());
        Ok(())
    }
}

/// Derives a result label from a single-column statement's last `AS` alias.
fn label_from_statement(statement: &str) -> String {
    let after_alias = statement.rsplit("AS").next().unwrap_or(statement);
    match after_alias.split_whitespace().next() {
        Some(word) => word.to_lowercase(),
        None => after_alias.trim().to_lowercase().replace(' ', "_"),
    }
}

/// Folds labeled counts into the fixed check battery and scores them.
///
/// Pure with respect to the database: callable on any collected result set.
pub fn build_report(results: &BTreeMap<String, i64>, now: DateTime<Utc>) -> QualityReport {
    let get = |label: &str| results.get(label).copied().unwrap_or(0);

    // Completeness: per-column null counts are labeled by table.column
    let null_details: BTreeMap<String, i64> = results
        .iter()
        .filter(|(label, _)| {
            label.contains("customers.")
                || label.contains("products.")
                || label.contains("transactions.")
        })
        .map(|(label, count)| (label.clone(), *count))
        .collect();

    let duplicate_details = BTreeMap::from([
        ("duplicate_emails".to_string(), get("duplicate_emails")),
        (
            "duplicate_transactions".to_string(),
            get("duplicate_transactions"),
        ),
    ]);

    let referential_details = BTreeMap::from([
        (
            "orphan_transactions".to_string(),
            get("orphan_transactions"),
        ),
        (
            "orphan_items_transaction".to_string(),
            get("orphan_items_transaction"),
        ),
        (
            "orphan_items_product".to_string(),
            get("orphan_items_product"),
        ),
    ]);

    let range_details = BTreeMap::from([(
        "range_violations".to_string(),
        get("range_violations"),
    )]);

    let consistency_details = BTreeMap::from([(
        "line_total_mismatch".to_string(),
        get("line_total_mismatch"),
    )]);

    let checks_performed = ChecksPerformed {
        null_checks: CheckOutcome::from_details(null_details),
        duplicate_checks: CheckOutcome::from_details(duplicate_details),
        referential_integrity: CheckOutcome::from_details(referential_details),
        range_checks: CheckOutcome::from_details(range_details),
        data_consistency: CheckOutcome::from_details(consistency_details),
    };

    let overall_quality_score = checks_performed.weighted_score();
    QualityReport {
        check_timestamp: now,
        checks_performed,
        overall_quality_score,
        quality_grade: grade_for(overall_quality_score),
    }
}
