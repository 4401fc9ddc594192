use chrono::Local;

use crate::backup::space::SystemVolumes;
use crate::backup::{plan_backup, BackupPlan, BackupRequest};
use crate::cli::args::BackupArgs;
use crate::cli::commands::{follow_job, print_report, Context};
use crate::dispatch::JobRequest;
use crate::error::{ConfigError, JobError, Result};
use crate::profile::{list_accounts_with, UserProfile};
use crate::types::{ActionStatus, FolderKind, PermissionStrategy};

pub fn run_backup_command(ctx: &Context, args: &BackupArgs) -> Result<ActionStatus> {
    println!("{}", Local::now().format("%d-%m-%Y %H:%M"));

    let destination = args
        .destination
        .clone()
        .or_else(|| ctx.cfg.destination.clone())
        .ok_or_else(|| {
            ConfigError::Invalid(
                "no destination; pass --destination or set destination in the config".to_string(),
            )
        })?;
    let strategy = match args.strategy.as_deref() {
        Some(raw) => PermissionStrategy::parse(raw).map_err(ConfigError::Invalid)?,
        None => ctx.cfg.permission_strategy,
    };
    let kinds = args
        .folders
        .iter()
        .map(|raw| FolderKind::parse(raw).map_err(ConfigError::Invalid))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let probe = ctx.probe();
    let users = select_profiles(list_accounts_with(&probe)?, &args.users, &kinds)?;
    let request = BackupRequest {
        destination,
        users,
        filter_rules: ctx.cfg.filter_rules.clone(),
        strategy,
        free_space_margin: ctx.cfg.free_space_margin,
    };

    let plan = plan_backup(&request, &SystemVolumes)?;
    print_plan(&request, &plan);
    if ctx.run_mode.dry_run {
        println!("dry run: nothing written");
        return Ok(ActionStatus::Idle);
    }

    let (dispatcher, rx) = ctx.dispatcher();
    let id = dispatcher.submit(JobRequest::Backup(request));
    let report = follow_job(&rx, id, ctx.run_mode.verbose);
    dispatcher.wait_idle();
    match report.or_else(|| dispatcher.report(id)) {
        Some(report) => {
            print_report(&report);
            Ok(report.status)
        }
        None => Err(JobError::Cancelled.into()),
    }
}

/// Keeps the requested users (all when none are named) and, when folder
/// kinds are given, selects exactly those folders.
pub fn select_profiles(
    profiles: Vec<UserProfile>,
    users: &[String],
    kinds: &[FolderKind],
) -> Result<Vec<UserProfile>> {
    for name in users {
        if !profiles.iter().any(|p| p.username.eq_ignore_ascii_case(name)) {
            return Err(JobError::NoSuchProfile(name.clone()).into());
        }
    }
    let mut selected: Vec<UserProfile> = profiles
        .into_iter()
        .filter(|p| users.is_empty() || users.iter().any(|u| u.eq_ignore_ascii_case(&p.username)))
        .collect();
    if !kinds.is_empty() {
        for profile in selected.iter_mut() {
            for folder in profile.folder_selections.iter_mut() {
                folder.selected = kinds.contains(&folder.kind);
            }
        }
    }
    Ok(selected)
}

fn print_plan(request: &BackupRequest, plan: &BackupPlan) {
    println!(
        "backup to {} ({})",
        request.destination.display(),
        request.strategy.as_str()
    );
    for user in &plan.users {
        let folders: Vec<&str> = user
            .selected_folders()
            .map(|f| f.relative_path.as_str())
            .collect();
        println!("  {}: {}", user.username, folders.join(", "));
    }
    for message in &plan.rejected {
        println!("  skipped: {}", message);
    }
    for message in &plan.warnings {
        println!("  warning: {}", message);
    }
    println!(
        "  planned: {} files, {} bytes; required with margin: {} bytes",
        plan.total_files, plan.total_bytes, plan.required_bytes
    );
    match plan.available_bytes {
        Some(available) => println!("  available: {} bytes", available),
        None => println!("  available: unknown"),
    }
}
