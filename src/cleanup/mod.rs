//! Retention cleanup for pipeline data and log directories.
//!
//! Deletes regular files older than the retention window, skipping files
//! modified today and files whose name contains a preserve keyword.
//! Missing target directories are silently skipped. The sweep is
//! idempotent: re-running it on an unchanged tree deletes nothing further.

use std::path::PathBuf;

use chrono::{DateTime, Duration, Local};
use thiserror::Error;
use tracing::info;

/// Errors that can occur during a cleanup sweep.
#[derive(Debug, Error)]
pub enum CleanupError {
    /// IO error while listing or deleting files.
    #[error("Cleanup IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Retention window and preserve rules, evaluated per file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Files older than this many days are eligible for deletion.
    pub retention_days: u32,
    /// Case-insensitive filename substrings that exempt a file.
    pub preserve_keywords: Vec<String>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            retention_days: 7,
            preserve_keywords: vec![
                "metadata".to_string(),
                "report".to_string(),
                "summary".to_string(),
            ],
        }
    }
}

impl RetentionPolicy {
    /// Creates a policy with the given window and the default keywords.
    pub fn new(retention_days: u32) -> Self {
        Self {
            retention_days,
            ..Self::default()
        }
    }

    /// Builder method to set the preserve keywords.
    pub fn with_preserve_keywords(mut self, keywords: Vec<String>) -> Self {
        self.preserve_keywords = keywords;
        self
    }

    /// Returns whether a filename matches a preserve keyword.
    pub fn preserves(&self, file_name: &str) -> bool {
        let lowered = file_name.to_lowercase();
        self.preserve_keywords
            .iter()
            .any(|keyword| lowered.contains(&keyword.to_lowercase()))
    }

    /// Decides whether a file should be deleted, given its name, its
    /// modification time and the current time.
    pub fn should_delete(
        &self,
        file_name: &str,
        modified: DateTime<Local>,
        now: DateTime<Local>,
    ) -> bool {
        // Files touched today are always kept
        if modified.date_naive() == now.date_naive() {
            return false;
        }

        if self.preserves(file_name) {
            return false;
        }

        modified < now - Duration::days(i64::from(self.retention_days))
    }
}

/// Counts from one cleanup sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Files deleted.
    pub deleted: usize,
    /// Files examined and kept.
    pub kept: usize,
    /// Target directories that did not exist.
    pub missing_dirs: usize,
}

/// Sweeps the configured target directories against a retention policy.
#[derive(Debug, Clone)]
pub struct RetentionCleaner {
    policy: RetentionPolicy,
    target_dirs: Vec<PathBuf>,
}

impl RetentionCleaner {
    /// Creates a cleaner over the given directories.
    pub fn new(policy: RetentionPolicy, target_dirs: Vec<PathBuf>) -> Self {
        Self {
            policy,
            target_dirs,
        }
    }

    /// The active policy.
    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Sweeps now.
    pub fn sweep(&self) -> Result<SweepStats, CleanupError> {
        self.sweep_at(Local::now())
    }

    /// Sweeps with an explicit "now", used by tests.
    ///
    /// Deletion is not transactional: an interrupted sweep leaves some
    /// files deleted and some not, and a re-run converges to the same
    /// eventual state.
    pub fn sweep_at(&self, now: DateTime<Local>) -> Result<SweepStats, CleanupError> {
        let mut stats = SweepStats::default();

        for dir in &self.target_dirs {
            if !dir.exists() {
                stats.missing_dirs += 1;
                continue;
            }

            for entry in std::fs::read_dir(dir)? {
                let entry = entry?;
                let metadata = entry.metadata()?;
                if !metadata.is_file() {
                    continue;
                }

                let modified: DateTime<Local> = metadata.modified()?.into();
                let file_name = entry.file_name();
                let name = file_name.to_string_lossy();

                if self.policy.should_delete(&name, modified, now) {
                    let path = entry.path();
                    std::fs::remove_file(&path)?;
                    info!("Deleted old file: {}", path.display());
                    stats.deleted += 1;
                } else {
                    stats.kept += 1;
                }
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{File, FileTimes};
    use std::path::Path;
    use std::time::{Duration as StdDuration, SystemTime};

    fn policy() -> RetentionPolicy {
        RetentionPolicy::default()
    }

    #[test]
    fn test_old_file_is_deleted() {
        let now = Local::now();
        let modified = now - Duration::days(8);
        assert!(policy().should_delete("transactions_20250101.csv", modified, now));
    }

    #[test]
    fn test_file_modified_today_is_kept() {
        let now = Local::now();
        // Touched today, even if the window would otherwise expire it
        assert!(!policy().should_delete("transactions.csv", now, now));
    }

    #[test]
    fn test_file_inside_window_is_kept() {
        let now = Local::now();
        let modified = now - Duration::days(3);
        assert!(!policy().should_delete("transactions.csv", modified, now));
    }

    #[test]
    fn test_preserve_keyword_wins_over_age() {
        let now = Local::now();
        let modified = now - Duration::days(365);
        assert!(!policy().should_delete("sales_summary.csv", modified, now));
        assert!(!policy().should_delete("PIPELINE_REPORT.json", modified, now));
        assert!(!policy().should_delete("dataset_Metadata.yaml", modified, now));
    }

    #[test]
    fn test_preserves_is_case_insensitive() {
        let p = policy();
        assert!(p.preserves("Sales_SUMMARY.csv"));
        assert!(p.preserves("quality_report_20250101.json"));
        assert!(!p.preserves("transactions.csv"));
    }

    /// Creates a file and backdates its modification time.
    fn create_aged_file(dir: &Path, name: &str, age_days: u64) {
        let path = dir.join(name);
        let file = File::create(&path).expect("create file");
        let mtime = SystemTime::now() - StdDuration::from_secs(age_days * 86_400);
        file.set_times(FileTimes::new().set_modified(mtime))
            .expect("set mtime");
    }

    #[test]
    fn test_sweep_deletes_only_expired_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        create_aged_file(dir.path(), "old_transactions.csv", 8);
        create_aged_file(dir.path(), "recent_transactions.csv", 3);
        create_aged_file(dir.path(), "sales_summary.csv", 30);
        File::create(dir.path().join("today.csv")).expect("create");

        let cleaner = RetentionCleaner::new(policy(), vec![dir.path().to_path_buf()]);
        let stats = cleaner.sweep().expect("sweep");

        assert_eq!(stats.deleted, 1);
        assert_eq!(stats.kept, 3);
        assert!(!dir.path().join("old_transactions.csv").exists());
        assert!(dir.path().join("recent_transactions.csv").exists());
        assert!(dir.path().join("sales_summary.csv").exists());
        assert!(dir.path().join("today.csv").exists());
    }

    #[test]
    fn test_sweep_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        create_aged_file(dir.path(), "old_a.csv", 10);
        create_aged_file(dir.path(), "old_b.csv", 12);
        create_aged_file(dir.path(), "fresh.csv", 1);

        let cleaner = RetentionCleaner::new(policy(), vec![dir.path().to_path_buf()]);

        let first = cleaner.sweep().expect("first sweep");
        assert_eq!(first.deleted, 2);

        let second = cleaner.sweep().expect("second sweep");
        assert_eq!(second.deleted, 0);
        assert_eq!(second.kept, 1);
    }

    #[test]
    fn test_missing_directories_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cleaner = RetentionCleaner::new(
            policy(),
            vec![
                dir.path().join("does_not_exist"),
                dir.path().join("also_missing"),
            ],
        );

        let stats = cleaner.sweep().expect("sweep");
        assert_eq!(stats.missing_dirs, 2);
        assert_eq!(stats.deleted, 0);
    }

    #[test]
    fn test_subdirectories_are_not_touched() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("nested")).expect("mkdir");
        create_aged_file(&dir.path().join("nested"), "old.csv", 30);

        let cleaner = RetentionCleaner::new(policy(), vec![dir.path().to_path_buf()]);
        let stats = cleaner.sweep().expect("sweep");

        assert_eq!(stats.deleted, 0);
        assert!(dir.path().join("nested").join("old.csv").exists());
    }
}
