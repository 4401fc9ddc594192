use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::types::ActionStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressUpdate {
    pub bytes_copied: u64,
    pub total_bytes: u64,
    pub files_copied: u64,
    pub total_files: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStage {
    CopyStarted,
    Copied { bytes: u64 },
    PermissionsApplied,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Progress(ProgressUpdate),
    File { path: PathBuf, stage: FileStage },
    UserStatus { username: String, status: ActionStatus },
    Log { level: LogLevel, message: String },
    Complete { success: bool, summary: String },
}

type Emit = dyn Fn(JobEvent) + Send + Sync;

/// Where a job delivers its events. Cloning shares the destination.
#[derive(Clone)]
pub struct EventSink {
    emit: Option<Arc<Emit>>,
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("attached", &self.emit.is_some())
            .finish()
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::none()
    }
}

impl EventSink {
    /// Discards events; log lines still reach tracing.
    pub fn none() -> Self {
        Self { emit: None }
    }

    pub fn channel() -> (Self, Receiver<JobEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self::from_sender(tx), rx)
    }

    pub fn from_sender(tx: Sender<JobEvent>) -> Self {
        let tx = Mutex::new(tx);
        Self::from_fn(move |event| {
            if let Ok(tx) = tx.lock() {
                let _ = tx.send(event);
            }
        })
    }

    pub fn from_fn(f: impl Fn(JobEvent) + Send + Sync + 'static) -> Self {
        Self {
            emit: Some(Arc::new(f)),
        }
    }

    pub fn emit(&self, event: JobEvent) {
        if let Some(emit) = &self.emit {
            emit(event);
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.emit(JobEvent::Log {
            level: LogLevel::Info,
            message,
        });
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.emit(JobEvent::Log {
            level: LogLevel::Warning,
            message,
        });
    }

    pub fn progress(&self, update: ProgressUpdate) {
        self.emit(JobEvent::Progress(update));
    }

    pub fn file(&self, path: PathBuf, stage: FileStage) {
        self.emit(JobEvent::File { path, stage });
    }

    pub fn user_status(&self, username: &str, status: ActionStatus) {
        self.emit(JobEvent::UserStatus {
            username: username.to_string(),
            status,
        });
    }
}
