use crate::cli::args::RestoreArgs;
use crate::cli::commands::{follow_job, print_report, Context};
use crate::dispatch::JobRequest;
use crate::error::{ConfigError, JobError, Result};
use crate::manifest::BackupManifest;
use crate::restore::{plan_restore, RestorePlan, RestoreRequest, UserMapping};
use crate::types::{ActionStatus, ConflictPolicy, MergeMode, PermissionStrategy};

pub fn run_restore_command(ctx: &Context, args: &RestoreArgs) -> Result<ActionStatus> {
    let mappings = if args.maps.is_empty() {
        // Every backed-up user back onto the account of the same name.
        let loaded = BackupManifest::load(&args.backup)?;
        loaded
            .manifest
            .users
            .iter()
            .map(|u| {
                let mut mapping = UserMapping::new(&u.username, &u.username, MergeMode::Merge);
                mapping.source_sid = u.sid.clone();
                mapping
            })
            .collect()
    } else {
        args.maps
            .iter()
            .map(|raw| parse_mapping(raw))
            .collect::<Result<Vec<_>>>()?
    };

    let mut request = RestoreRequest::new(&args.backup, mappings, &ctx.cfg.users_root);
    request.conflict_policy = match args.conflict.as_deref() {
        Some(raw) => ConflictPolicy::parse(raw).map_err(ConfigError::Invalid)?,
        None => ctx.cfg.conflict_policy,
    };
    request.strategy = match args.strategy.as_deref() {
        Some(raw) => PermissionStrategy::parse(raw).map_err(ConfigError::Invalid)?,
        None => ctx.cfg.permission_strategy,
    };
    request.verify = args.verify;

    let probe = ctx.probe();
    let plan = plan_restore(&request, &probe)?;
    print_plan(&request, &plan);
    if ctx.run_mode.dry_run {
        println!("dry run: nothing written");
        return Ok(ActionStatus::Idle);
    }

    let (dispatcher, rx) = ctx.dispatcher();
    let id = dispatcher.submit(JobRequest::Restore(request));
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

/// Parses `<src>[=<dest>[:<mode>]]`. The destination defaults to the
/// source name and the mode to merge.
pub fn parse_mapping(raw: &str) -> Result<UserMapping> {
    let (source, rest) = match raw.split_once('=') {
        Some((source, rest)) => (source.trim(), Some(rest.trim())),
        None => (raw.trim(), None),
    };
    if source.is_empty() {
        return Err(ConfigError::Invalid(format!("invalid mapping {}: empty source", raw)).into());
    }
    let (destination, mode) = match rest {
        None => (source, MergeMode::Merge),
        Some(rest) => match rest.rsplit_once(':') {
            Some((dest, mode)) => (
                dest.trim(),
                MergeMode::parse(mode).map_err(ConfigError::Invalid)?,
            ),
            None => (rest, MergeMode::Merge),
        },
    };
    let destination = if destination.is_empty() { source } else { destination };
    Ok(UserMapping::new(source, destination, mode))
}

fn print_plan(request: &RestoreRequest, plan: &RestorePlan) {
    let meta = &plan.manifest.backup_metadata;
    println!(
        "restore from {} (backup of {} on {})",
        request.backup_root.display(),
        meta.source_machine,
        meta.created_date
    );
    if !plan.checksum_valid {
        println!("  warning: manifest checksum mismatch");
    }
    for planned in &plan.mappings {
        println!(
            "  {} -> {} [{}] at {}",
            planned.mapping.source_username,
            planned.mapping.destination_username,
            planned.mapping.merge_mode.as_str(),
            planned.destination_root.display()
        );
    }
    for message in &plan.rejected {
        println!("  skipped: {}", message);
    }
    println!(
        "  planned: {} files, {} bytes; conflicts: {}",
        plan.total_files,
        plan.total_bytes,
        request.conflict_policy.as_str()
    );
}
