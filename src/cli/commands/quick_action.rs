use std::path::{Path, PathBuf};

use crate::cli::commands::Context;
use crate::copy::CancelFlag;
use crate::dispatch::actions::{Catalog, QuickAction, QuickActionRecord, ScanReport};
use crate::dispatch::elevated::{run_elevated, run_helper, ExecutionResult, HelperArgs};
use crate::error::{ConfigError, Result, VaultError};
use crate::events::EventSink;
use crate::job::JobContext;
use crate::types::ActionStatus;

pub fn catalog(ctx: &Context) -> Catalog {
    Catalog::with_extra(&ctx.cfg.quick_actions)
}

pub fn run_list(ctx: &Context) {
    for record in catalog(ctx).records() {
        print_record(record);
    }
}

pub fn run_action(
    ctx: &Context,
    name: &str,
    backup_location: Option<&Path>,
    elevated: bool,
) -> Result<ActionStatus> {
    let catalog = catalog(ctx);
    let record = catalog
        .find(name)
        .ok_or_else(|| VaultError::message(format!("no quick action named {}", name)))?;
    let location = location(ctx, backup_location)?;

    if elevated || record.requires_admin {
        let result = run_elevated(
            &record.name,
            &location,
            ctx.config_path.as_deref(),
            ctx.run_mode,
        )?;
        print_result(&record.name, &result);
        return Ok(result.status);
    }

    let probe = ctx.probe();
    let mut action = QuickAction::new(record.clone());
    if ctx.run_mode.dry_run {
        let report = action.scan(&probe, &CancelFlag::new())?;
        print_scan(&record.name, report);
        println!("dry run: nothing written");
        return Ok(ActionStatus::Idle);
    }
    let job = JobContext::new(CancelFlag::new(), EventSink::none(), ctx.run_mode);
    let result = action.execute(&location, &job, &probe)?;
    print_result(&record.name, &result);
    Ok(result.status)
}

/// Child side of `run --elevated`; never returns.
pub fn run_helper_command(
    ctx: &Context,
    name: &str,
    backup_location: &Path,
    result_file: &Path,
) -> ! {
    let args = HelperArgs {
        action: name.to_string(),
        backup_location: backup_location.to_path_buf(),
        result_file: result_file.to_path_buf(),
        config: None,
    };
    let job = JobContext::new(CancelFlag::new(), EventSink::none(), ctx.run_mode);
    let code = run_helper(&args, &catalog(ctx), &ctx.probe(), &job);
    std::process::exit(code);
}

fn location(ctx: &Context, explicit: Option<&Path>) -> Result<PathBuf> {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| ctx.cfg.destination.clone())
        .ok_or_else(|| {
            ConfigError::Invalid(
                "no backup location; pass --backup-location or set destination in the config"
                    .to_string(),
            )
            .into()
        })
}

fn print_record(record: &QuickActionRecord) {
    println!(
        "{}{} -> {}",
        record.name,
        if record.requires_admin { " (admin)" } else { "" },
        record.destination
    );
    for source in &record.sources {
        println!("  {}", source);
    }
    if record.files.iter().any(|f| f != "*") {
        println!("  files: {}", record.files.join(", "));
    }
}

fn print_scan(name: &str, report: &ScanReport) {
    println!(
        "{}: {} location(s), {} files, {} bytes",
        name,
        report.hits.len(),
        report.files,
        report.bytes
    );
    for hit in &report.hits {
        println!(
            "  {}: {} ({} files, {} bytes)",
            hit.username,
            hit.source.display(),
            hit.files,
            hit.bytes
        );
    }
}

fn print_result(name: &str, result: &ExecutionResult) {
    println!("{}: {} {}", name, result.status, result.message);
    if !result.output_path.is_empty() {
        println!("  output: {}", result.output_path);
    }
    println!(
        "  {} files, {} bytes in {} ms",
        result.files_processed, result.bytes_processed, result.duration_ms
    );
    for line in result.log.lines() {
        println!("  {}", line);
    }
}
