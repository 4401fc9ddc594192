use std::process::Command;

use tracing::debug;

use crate::error::{Result, VaultError};
use crate::types::RunMode;

pub fn describe_command(cmd: &Command) -> String {
    let program = cmd.get_program().to_string_lossy().to_string();
    let args: Vec<String> = cmd
        .get_args()
        .map(|a| a.to_string_lossy().to_string())
        .collect();
    if args.is_empty() {
        program
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

/// Runs `cmd` to completion and returns its exit code (1 when killed by a
/// signal). In dry-run mode the command is only printed.
pub fn run_command(cmd: &mut Command, run_mode: RunMode) -> Result<i32> {
    let line = describe_command(cmd);
    if run_mode.dry_run {
        println!("{}", line);
        return Ok(0);
    }
    if run_mode.verbose {
        println!("{}", line);
    }
    debug!("exec {}", line);
    let status = cmd.status().map_err(|e| {
        VaultError::message(format!("{}: {}", cmd.get_program().to_string_lossy(), e))
    })?;
    Ok(status.code().unwrap_or(1))
}
