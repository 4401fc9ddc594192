use crate::events::ProgressUpdate;

pub const PROGRESS_FILE_INTERVAL: u64 = 100;
pub const PROGRESS_BYTE_INTERVAL: u64 = 100 * 1024 * 1024;

/// Accumulates copy totals for a whole job and decides when a progress
/// event is due: every 100 files or 100 MiB, whichever comes first.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    total_bytes: u64,
    total_files: u64,
    bytes_copied: u64,
    files_copied: u64,
    last_bytes: u64,
    last_files: u64,
}

impl ProgressTracker {
    pub fn new(total_bytes: u64, total_files: u64) -> Self {
        Self {
            total_bytes,
            total_files,
            ..Self::default()
        }
    }

    pub fn record(&mut self, bytes: u64) -> Option<ProgressUpdate> {
        self.files_copied += 1;
        self.bytes_copied += bytes;
        let due = self.files_copied - self.last_files >= PROGRESS_FILE_INTERVAL
            || self.bytes_copied - self.last_bytes >= PROGRESS_BYTE_INTERVAL;
        if !due {
            return None;
        }
        self.last_files = self.files_copied;
        self.last_bytes = self.bytes_copied;
        Some(self.snapshot())
    }

    pub fn snapshot(&self) -> ProgressUpdate {
        ProgressUpdate {
            bytes_copied: self.bytes_copied,
            total_bytes: self.total_bytes,
            files_copied: self.files_copied,
            total_files: self.total_files,
        }
    }
}
