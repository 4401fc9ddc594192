use std::path::PathBuf;

use crate::copy::CancelFlag;
use crate::events::{EventSink, JobEvent};
use crate::stats::OperationStats;
use crate::types::{ActionStatus, RunMode};

/// What a running job needs from whoever started it.
#[derive(Debug, Clone, Default)]
pub struct JobContext {
    pub cancel: CancelFlag,
    pub events: EventSink,
    pub run_mode: RunMode,
}

impl JobContext {
    pub fn new(cancel: CancelFlag, events: EventSink, run_mode: RunMode) -> Self {
        Self {
            cancel,
            events,
            run_mode,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub status: ActionStatus,
    pub stats: OperationStats,
    pub manifest_path: Option<PathBuf>,
    pub message: String,
}

impl JobOutcome {
    /// Cancelled wins; otherwise a fatal error or an empty copy is a failure.
    pub fn settle(
        stats: OperationStats,
        cancelled: bool,
        fatal: Option<String>,
        manifest_path: Option<PathBuf>,
    ) -> Self {
        let status = if cancelled {
            ActionStatus::Cancelled
        } else if fatal.is_some() || stats.files_copied == 0 {
            ActionStatus::Failed
        } else {
            ActionStatus::Success
        };
        let message = match (&status, fatal) {
            (ActionStatus::Cancelled, _) => format!("cancelled; {}", stats.summary()),
            (_, Some(reason)) => format!("{}; {}", reason, stats.summary()),
            (ActionStatus::Failed, None) => format!("no files copied; {}", stats.summary()),
            _ => stats.summary(),
        };
        Self {
            status,
            stats,
            manifest_path,
            message,
        }
    }

    pub fn success(&self) -> bool {
        self.status == ActionStatus::Success
    }

    pub fn announce(&self, events: &EventSink) {
        events.emit(JobEvent::Complete {
            success: self.success(),
            summary: self.message.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn settle_rules() {
        let empty = OperationStats::new().finish();
        assert_eq!(
            JobOutcome::settle(empty.clone(), false, None, None).status,
            ActionStatus::Failed
        );
        assert_eq!(
            JobOutcome::settle(empty, true, None, None).status,
            ActionStatus::Cancelled
        );

        let mut stats = OperationStats::new();
        stats.record_copied(Path::new("/d/a"), 1);
        stats.record_error("one bad file");
        let outcome = JobOutcome::settle(stats.clone().finish(), false, None, None);
        assert_eq!(outcome.status, ActionStatus::Success);
        assert!(outcome.message.starts_with("Files: 1 processed"));

        let outcome = JobOutcome::settle(stats.finish(), false, Some("boom".into()), None);
        assert_eq!(outcome.status, ActionStatus::Failed);
        assert!(outcome.message.starts_with("boom; "));
    }
}
