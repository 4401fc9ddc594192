use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipRecord {
    pub path: PathBuf,
    pub reason: String,
}

/// Counters and ledgers for one job. Only the job's worker mutates it; the
/// finished value is handed out by [`OperationStats::finish`].
#[derive(Debug, Clone)]
pub struct OperationStats {
    pub files_copied: u64,
    pub files_skipped: u64,
    pub files_errored: u64,
    pub bytes_copied: u64,
    pub entries_visited: u64,
    pub started_utc: DateTime<Utc>,
    pub finished_utc: Option<DateTime<Utc>>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub skipped: Vec<SkipRecord>,
    pub written: Vec<PathBuf>,
}

impl Default for OperationStats {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationStats {
    pub fn new() -> Self {
        Self {
            files_copied: 0,
            files_skipped: 0,
            files_errored: 0,
            bytes_copied: 0,
            entries_visited: 0,
            started_utc: Utc::now(),
            finished_utc: None,
            warnings: Vec::new(),
            errors: Vec::new(),
            skipped: Vec::new(),
            written: Vec::new(),
        }
    }

    pub fn record_copied(&mut self, dest: &Path, bytes: u64) {
        self.entries_visited += 1;
        self.files_copied += 1;
        self.bytes_copied += bytes;
        self.written.push(dest.to_path_buf());
    }

    pub fn record_skipped(&mut self, path: &Path, reason: impl Into<String>) {
        self.entries_visited += 1;
        self.files_skipped += 1;
        self.skipped.push(SkipRecord {
            path: path.to_path_buf(),
            reason: reason.into(),
        });
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.entries_visited += 1;
        self.files_errored += 1;
        self.errors.push(message.into());
    }

    /// A job-level error that does not correspond to a visited entry.
    pub fn record_fatal(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn finish(mut self) -> OperationStats {
        self.finished_utc = Some(Utc::now());
        self
    }

    pub fn duration_secs(&self) -> i64 {
        let end = self.finished_utc.unwrap_or_else(Utc::now);
        (end - self.started_utc).num_seconds().max(0)
    }

    pub fn duration_ms(&self) -> u64 {
        let end = self.finished_utc.unwrap_or_else(Utc::now);
        (end - self.started_utc).num_milliseconds().max(0) as u64
    }

    pub fn summary(&self) -> String {
        format!(
            "Files: {} processed, {} skipped, {} failed | Bytes: {} | Duration: {} sec",
            self.files_copied,
            self.files_skipped,
            self.files_errored,
            self.bytes_copied,
            self.duration_secs()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_track_visits() {
        let mut stats = OperationStats::new();
        stats.record_copied(Path::new("/d/a"), 10);
        stats.record_copied(Path::new("/d/b"), 0);
        stats.record_skipped(Path::new("/s/NTUSER.DAT"), "DangerousFile");
        stats.record_error("copy /s/c: denied");
        stats.record_fatal("manifest write failed");
        assert_eq!(stats.entries_visited, 4);
        assert_eq!(
            stats.files_copied + stats.files_skipped + stats.files_errored,
            stats.entries_visited
        );
        assert_eq!(stats.bytes_copied, 10);
        assert_eq!(stats.errors.len(), 2);
    }

    #[test]
    fn summary_format() {
        let mut stats = OperationStats::new();
        stats.record_copied(Path::new("/d/a"), 42);
        let stats = stats.finish();
        let summary = stats.summary();
        assert!(summary.starts_with("Files: 1 processed, 0 skipped, 0 failed | Bytes: 42 | Duration: "));
        assert!(summary.ends_with(" sec"));
    }
}
