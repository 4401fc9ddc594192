pub mod backup;
pub mod config_init;
pub mod manifest;
pub mod quick_action;
pub mod restore;
pub mod scan;

use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use crate::backup::space::SystemVolumes;
use crate::config::model::RuntimeConfig;
use crate::dispatch::{DispatchEvent, Dispatcher, JobId, JobReport};
use crate::error::{JobError, VaultError};
use crate::events::{JobEvent, ProgressUpdate};
use crate::profile::SystemProbe;
use crate::signal_handler::signal_handler;
use crate::types::{ActionStatus, RunMode};

/// What every command needs from the command line and the config file.
pub struct Context {
    /// Only set when `--config` was given; forwarded to helper children.
    pub config_path: Option<PathBuf>,
    pub cfg: RuntimeConfig,
    pub run_mode: RunMode,
}

impl Context {
    pub fn probe(&self) -> SystemProbe {
        SystemProbe::new(&self.cfg.users_root)
    }

    /// Dispatcher with SIGINT/SIGTERM wired to cancellation.
    pub fn dispatcher(&self) -> (Dispatcher, Receiver<DispatchEvent>) {
        let (dispatcher, rx) = Dispatcher::new(
            Arc::new(self.probe()),
            Arc::new(SystemVolumes),
            self.run_mode,
        );
        signal_handler(&dispatcher);
        (dispatcher, rx)
    }
}

/// Prints events of job `id` until it finishes and returns its report.
pub fn follow_job(rx: &Receiver<DispatchEvent>, id: JobId, verbose: bool) -> Option<JobReport> {
    let mut last_percent = None;
    while let Ok(event) = rx.recv() {
        match event {
            DispatchEvent::Started { id: started, kind } if started == id => {
                println!("{} started", kind.as_str());
            }
            DispatchEvent::Job { id: job, event } if job == id => match event {
                JobEvent::UserStatus { username, status } => {
                    println!("  {}: {}", username, status);
                }
                JobEvent::Progress(update) if verbose => {
                    let percent = percent(&update);
                    if last_percent != Some(percent) {
                        println!(
                            "  {}% ({} of {} files)",
                            percent, update.files_copied, update.total_files
                        );
                        last_percent = Some(percent);
                    }
                }
                _ => {}
            },
            DispatchEvent::Finished(report) if report.id == id => return Some(report),
            _ => {}
        }
    }
    None
}

fn percent(update: &ProgressUpdate) -> u64 {
    if update.total_bytes == 0 {
        return 100;
    }
    (update.bytes_copied.saturating_mul(100) / update.total_bytes).min(100)
}

pub fn print_report(report: &JobReport) {
    println!(
        "{} {}: {} ({} files, {} bytes)",
        report.kind.as_str(),
        report.status,
        report.message,
        report.files_copied,
        report.bytes_copied
    );
}

pub fn exit_for_error(err: &VaultError) -> ! {
    let code = match err {
        VaultError::Config(_) => 2,
        VaultError::Job(JobError::Cancelled) => 3,
        VaultError::Job(JobError::InsufficientSpace { .. }) => 4,
        VaultError::Job(_) => 1,
        VaultError::Manifest(_) => 5,
        VaultError::Message(_) | VaultError::Io(_) => 2,
    };
    println!("{}", err);
    std::process::exit(code);
}

/// Exits non-zero for a job that did not succeed.
pub fn exit_for_status(status: ActionStatus) {
    match status {
        ActionStatus::Failed => std::process::exit(1),
        ActionStatus::Cancelled => std::process::exit(3),
        _ => {}
    }
}
