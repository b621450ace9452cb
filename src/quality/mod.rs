//! Data-quality checking and scoring.
//!
//! The checker executes an opaque, parameterless query set against the
//! staging store, folds the labeled counts into a fixed battery of checks
//! (completeness, uniqueness, referential integrity, range validity,
//! consistency), computes a weighted composite score with a letter grade
//! and writes a timestamped JSON report. It is a pure read+report
//! component: no retry or lock semantics of its own.

pub mod checks;

pub use checks::{build_report, QualityChecker, QualityError};

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::util::round2;

/// Weight of referential integrity in the composite score.
pub const WEIGHT_REFERENTIAL_INTEGRITY: f64 = 0.30;
/// Weight of cross-field consistency in the composite score.
pub const WEIGHT_CONSISTENCY: f64 = 0.20;
/// Weight of completeness (null checks) in the composite score.
pub const WEIGHT_COMPLETENESS: f64 = 0.20;
/// Weight of range validity in the composite score.
pub const WEIGHT_VALIDITY: f64 = 0.15;
/// Weight of uniqueness in the composite score.
pub const WEIGHT_UNIQUENESS: f64 = 0.15;

/// Outcome of one check in the battery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    /// No violations found.
    Passed,
    /// One or more violations found.
    Failed,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckStatus::Passed => write!(f, "passed"),
            CheckStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One check's result: status, total violations and the contributing counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    /// Pass/fail status.
    pub status: CheckStatus,
    /// Total violations found by this check.
    pub violations: i64,
    /// Labeled counts contributing to the total.
    pub details: BTreeMap<String, i64>,
}

impl CheckOutcome {
    /// Builds an outcome from labeled counts; passes when the total is zero.
    pub fn from_details(details: BTreeMap<String, i64>) -> Self {
        let violations = details.values().sum();
        Self {
            status: if violations == 0 {
                CheckStatus::Passed
            } else {
                CheckStatus::Failed
            },
            violations,
            details,
        }
    }

    /// Component score contributed to the composite: 100 when clean, 0
    /// otherwise.
    pub fn component_score(&self) -> f64 {
        if self.violations == 0 {
            100.0
        } else {
            0.0
        }
    }
}

/// The fixed battery of checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksPerformed {
    /// Null/completeness violations across staging tables.
    pub null_checks: CheckOutcome,
    /// Duplicate emails and transactions.
    pub duplicate_checks: CheckOutcome,
    /// Orphaned transactions and line items.
    pub referential_integrity: CheckOutcome,
    /// Out-of-range numeric values.
    pub range_checks: CheckOutcome,
    /// Line totals that disagree with quantity × price.
    pub data_consistency: CheckOutcome,
}

impl ChecksPerformed {
    /// Weighted composite score over the five dimensions.
    pub fn weighted_score(&self) -> f64 {
        let score = self.referential_integrity.component_score() * WEIGHT_REFERENTIAL_INTEGRITY
            + self.data_consistency.component_score() * WEIGHT_CONSISTENCY
            + self.null_checks.component_score() * WEIGHT_COMPLETENESS
            + self.range_checks.component_score() * WEIGHT_VALIDITY
            + self.duplicate_checks.component_score() * WEIGHT_UNIQUENESS;
        round2(score)
    }
}

/// Letter grade for a composite score.
pub fn grade_for(score: f64) -> char {
    if score >= 90.0 {
        'A'
    } else if score >= 80.0 {
        'B'
    } else if score >= 70.0 {
        'C'
    } else if score >= 60.0 {
        'D'
    } else {
        'F'
    }
}

/// Structured data-quality report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    /// When the checks ran.
    pub check_timestamp: DateTime<Utc>,
    /// Results of the fixed check battery.
    pub checks_performed: ChecksPerformed,
    /// Weighted composite score, 0–100.
    pub overall_quality_score: f64,
    /// Letter grade A–F.
    pub quality_grade: char,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean() -> CheckOutcome {
        CheckOutcome::from_details(BTreeMap::new())
    }

    fn dirty(label: &str, count: i64) -> CheckOutcome {
        CheckOutcome::from_details(BTreeMap::from([(label.to_string(), count)]))
    }

    #[test]
    fn test_check_outcome_pass_fail() {
        assert_eq!(clean().status, CheckStatus::Passed);
        assert_eq!(clean().violations, 0);
        assert!((clean().component_score() - 100.0).abs() < f64::EPSILON);

        let bad = dirty("orphan_transactions", 4);
        assert_eq!(bad.status, CheckStatus::Failed);
        assert_eq!(bad.violations, 4);
        assert!((bad.component_score() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_weights_sum_to_one() {
        let total = WEIGHT_REFERENTIAL_INTEGRITY
            + WEIGHT_CONSISTENCY
            + WEIGHT_COMPLETENESS
            + WEIGHT_VALIDITY
            + WEIGHT_UNIQUENESS;
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_score_all_clean() {
        let checks = ChecksPerformed {
            null_checks: clean(),
            duplicate_checks: clean(),
            referential_integrity: clean(),
            range_checks: clean(),
            data_consistency: clean(),
        };
        assert!((checks.weighted_score() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_weighted_score_referential_failure() {
        let checks = ChecksPerformed {
            null_checks: clean(),
            duplicate_checks: clean(),
            referential_integrity: dirty("orphan_transactions", 2),
            range_checks: clean(),
            data_consistency: clean(),
        };
        // Referential integrity carries 30 points
        assert!((checks.weighted_score() - 70.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_weighted_score_everything_failed() {
        let checks = ChecksPerformed {
            null_checks: dirty("staging.customers.email", 1),
            duplicate_checks: dirty("duplicate_emails", 1),
            referential_integrity: dirty("orphan_transactions", 1),
            range_checks: dirty("range_violations", 1),
            data_consistency: dirty("line_total_mismatch", 1),
        };
        assert!((checks.weighted_score() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_grades() {
        assert_eq!(grade_for(100.0), 'A');
        assert_eq!(grade_for(90.0), 'A');
        assert_eq!(grade_for(85.0), 'B');
        assert_eq!(grade_for(70.0), 'C');
        assert_eq!(grade_for(65.0), 'D');
        assert_eq!(grade_for(59.9), 'F');
        assert_eq!(grade_for(0.0), 'F');
    }
}
