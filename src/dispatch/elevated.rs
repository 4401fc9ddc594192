use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dispatch::actions::{Catalog, QuickAction};
use crate::error::{Result, VaultError};
use crate::job::{JobContext, JobOutcome};
use crate::profile::AccountProbe;
use crate::types::{ActionStatus, RunMode};
use crate::util::command::run_command;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_UNKNOWN_ACTION: i32 = 1;
pub const EXIT_FAILED: i32 = 2;

/// What a helper child reports back through its result file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionResult {
    pub success: bool,
    pub message: String,
    pub bytes_processed: u64,
    pub files_processed: u64,
    pub duration_ms: u64,
    pub output_path: String,
    pub log: String,
    pub status: ActionStatus,
}

impl ExecutionResult {
    pub fn from_outcome(outcome: &JobOutcome, output: &Path) -> Self {
        let stats = &outcome.stats;
        let mut log: Vec<String> = stats.warnings.clone();
        log.extend(stats.errors.iter().cloned());
        Self {
            success: outcome.success(),
            message: outcome.message.clone(),
            bytes_processed: stats.bytes_copied,
            files_processed: stats.files_copied,
            duration_ms: stats.duration_ms(),
            output_path: output.display().to_string(),
            log: log.join("\n"),
            status: outcome.status,
        }
    }

    pub fn failed(message: &str, log: &str) -> Self {
        Self {
            success: false,
            message: message.to_string(),
            log: log.to_string(),
            status: ActionStatus::Failed,
            ..Self::default()
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

pub fn write_result_file(path: &Path, result: &ExecutionResult) -> Result<()> {
    let data = serde_json::to_string(result)
        .map_err(|e| VaultError::message(format!("encode result: {}", e)))?;
    fs::write(path, data)
        .map_err(|e| VaultError::message(format!("write result file {}: {}", path.display(), e)))
}

pub fn read_result_file(path: &Path) -> Result<ExecutionResult> {
    let raw = fs::read_to_string(path)
        .map_err(|e| VaultError::message(format!("read result file {}: {}", path.display(), e)))?;
    serde_json::from_str(&raw)
        .map_err(|e| VaultError::message(format!("invalid result file {}: {}", path.display(), e)))
}

/// Arguments the parent passes to a helper child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperArgs {
    pub action: String,
    pub backup_location: PathBuf,
    pub result_file: PathBuf,
    pub config: Option<PathBuf>,
}

pub fn helper_command(exe: &Path, args: &HelperArgs) -> Command {
    let mut cmd = Command::new(exe);
    if let Some(config) = &args.config {
        cmd.arg("--config").arg(config);
    }
    cmd.arg("--run-quick-action")
        .arg(&args.action)
        .arg("--backup-location")
        .arg(&args.backup_location)
        .arg("--result-file")
        .arg(&args.result_file);
    cmd
}

/// Runs one action in a child copy of this program and collects its
/// result file. A child that leaves no readable result counts as failed.
pub fn run_elevated(
    action: &str,
    backup_location: &Path,
    config: Option<&Path>,
    run_mode: RunMode,
) -> Result<ExecutionResult> {
    let exe = env::current_exe()
        .map_err(|e| VaultError::message(format!("locate executable: {}", e)))?;
    let result_file = tempfile::Builder::new()
        .prefix("profilevault-result-")
        .suffix(".json")
        .tempfile()
        .map_err(|e| VaultError::message(format!("create result file: {}", e)))?
        .into_temp_path();
    let args = HelperArgs {
        action: action.to_string(),
        backup_location: backup_location.to_path_buf(),
        result_file: result_file.to_path_buf(),
        config: config.map(Path::to_path_buf),
    };
    let mut cmd = helper_command(&exe, &args);
    info!("running {} in helper process", action);
    let code = run_command(&mut cmd, run_mode)?;
    if run_mode.dry_run {
        return Ok(ExecutionResult {
            message: "dry run".to_string(),
            status: ActionStatus::Idle,
            ..ExecutionResult::default()
        });
    }
    match read_result_file(&result_file) {
        Ok(mut result) => {
            if code != EXIT_SUCCESS {
                result.success = false;
            }
            Ok(result)
        }
        Err(err) => {
            warn!("helper exited with {}: {}", code, err);
            Ok(ExecutionResult::failed(
                &format!("helper exited with code {}", code),
                &err.to_string(),
            ))
        }
    }
}

/// Child side: runs the named action headless, writes the result file and
/// returns the process exit code.
pub fn run_helper(
    args: &HelperArgs,
    catalog: &Catalog,
    probe: &dyn AccountProbe,
    ctx: &JobContext,
) -> i32 {
    let Some(record) = catalog.find(&args.action) else {
        let result = ExecutionResult::failed(
            "Action not found",
            &format!("No action registered with name: {}", args.action),
        );
        if let Err(err) = write_result_file(&args.result_file, &result) {
            warn!("{}", err);
        }
        return EXIT_UNKNOWN_ACTION;
    };
    info!("running quick action {}", record.name);
    let mut action = QuickAction::new(record.clone());
    let result = match action.execute(&args.backup_location, ctx, probe) {
        Ok(result) => result,
        Err(err) => ExecutionResult {
            status: action.status(),
            ..ExecutionResult::failed(&err.to_string(), "")
        },
    };
    match write_result_file(&args.result_file, &result) {
        Ok(()) if result.success => EXIT_SUCCESS,
        Ok(()) => EXIT_FAILED,
        Err(err) => {
            warn!("{}", err);
            EXIT_FAILED
        }
    }
}
