use std::fs;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::copy::{CopyPipeline, PlainCopy, ProgressTracker, TreeCopy};
use crate::error::{ConfigError, JobError, Result, VaultError};
use crate::events::JobEvent;
use crate::filter::{FileFilter, FilterRules, FolderGlobs};
use crate::job::{JobContext, JobOutcome};
use crate::manifest::{BackedUpUser, BackupManifest, Completion};
use crate::permission::PermissionPolicy;
use crate::profile::UserProfile;
use crate::types::{ActionStatus, PermissionStrategy};
use crate::util::paths::{join_relative, normalize_relative};

pub mod space;

use space::{required_bytes, VolumeSpace, DEFAULT_FREE_SPACE_MARGIN, MIN_FREE_SPACE_MARGIN};

#[derive(Debug, Clone)]
pub struct BackupRequest {
    pub destination: PathBuf,
    pub users: Vec<UserProfile>,
    pub filter_rules: FilterRules,
    pub strategy: PermissionStrategy,
    pub free_space_margin: f64,
}

impl BackupRequest {
    pub fn new(destination: &Path, users: Vec<UserProfile>) -> Self {
        Self {
            destination: destination.to_path_buf(),
            users,
            filter_rules: FilterRules::default(),
            strategy: PermissionStrategy::StripAll,
            free_space_margin: DEFAULT_FREE_SPACE_MARGIN,
        }
    }
}

/// Validated work list. Building it touches nothing on disk.
#[derive(Debug, Clone)]
pub struct BackupPlan {
    pub users: Vec<UserProfile>,
    /// Users dropped during validation, one message each.
    pub rejected: Vec<String>,
    pub warnings: Vec<String>,
    pub total_bytes: u64,
    pub total_files: u64,
    pub required_bytes: u64,
    pub available_bytes: Option<u64>,
}

pub fn plan_backup(request: &BackupRequest, space: &dyn VolumeSpace) -> Result<BackupPlan> {
    if request.free_space_margin < MIN_FREE_SPACE_MARGIN {
        return Err(ConfigError::Invalid(format!(
            "free space margin {} is below {}",
            request.free_space_margin, MIN_FREE_SPACE_MARGIN
        ))
        .into());
    }
    let dest = &request.destination;
    if dest.exists() && !dest.is_dir() {
        return Err(JobError::DestinationUnwritable(format!(
            "{} is not a directory",
            dest.display()
        ))
        .into());
    }

    let mut plan = BackupPlan {
        users: Vec::new(),
        rejected: Vec::new(),
        warnings: Vec::new(),
        total_bytes: 0,
        total_files: 0,
        required_bytes: 0,
        available_bytes: None,
    };
    for user in &request.users {
        if !user.profile_root.is_dir() {
            plan.rejected.push(
                JobError::NoSuchProfile(format!(
                    "{} ({})",
                    user.username,
                    user.profile_root.display()
                ))
                .to_string(),
            );
            continue;
        }
        let mut user = user.clone();
        for folder in user.folder_selections.iter_mut() {
            match normalize_relative(&folder.relative_path) {
                Ok(normalized) => folder.relative_path = normalized,
                Err(err) => {
                    if folder.selected {
                        plan.warnings
                            .push(format!("{}: {}; folder not copied", user.username, err));
                    }
                    folder.selected = false;
                }
            }
        }
        for folder in user.selected_folders() {
            plan.total_bytes += folder.size_bytes;
            plan.total_files += folder.file_count;
            let source = join_relative(&user.profile_root, &folder.relative_path);
            if dest.starts_with(&source) {
                plan.warnings.push(format!(
                    "{} lies inside {}; it will not be copied into itself",
                    dest.display(),
                    source.display()
                ));
            }
            if request.filter_rules.folder_exceeds_limit(folder.size_bytes) {
                plan.warnings.push(format!(
                    "{}/{} is {} bytes, above the {} byte folder limit",
                    user.username,
                    folder.relative_path,
                    folder.size_bytes,
                    request.filter_rules.max_folder_size
                ));
            }
        }
        plan.users.push(user);
    }

    plan.required_bytes = required_bytes(plan.total_bytes, request.free_space_margin);
    plan.available_bytes = space.available_bytes(dest);
    match plan.available_bytes {
        Some(available) if available < plan.required_bytes => {
            return Err(JobError::InsufficientSpace {
                available,
                required: plan.required_bytes,
            }
            .into());
        }
        Some(_) => {}
        None => plan.warnings.push(format!(
            "free space on {} could not be determined; continuing",
            dest.display()
        )),
    }
    Ok(plan)
}

/// Runs a backup to completion, cancellation or failure. Validation
/// failures return `Err`; everything after copying starts settles into a
/// [`JobOutcome`] with a manifest written.
pub fn run_backup(
    request: BackupRequest,
    ctx: &JobContext,
    space: &dyn VolumeSpace,
) -> Result<JobOutcome> {
    let result = execute(&request, ctx, space);
    match &result {
        Ok(outcome) => outcome.announce(&ctx.events),
        Err(err) => ctx.events.emit(JobEvent::Complete {
            success: false,
            summary: err.to_string(),
        }),
    }
    result
}

fn execute(request: &BackupRequest, ctx: &JobContext, space: &dyn VolumeSpace) -> Result<JobOutcome> {
    let events = &ctx.events;
    events.info(format!(
        "backup of {} user(s) to {}",
        request.users.len(),
        request.destination.display()
    ));
    let plan = plan_backup(request, space)?;
    ensure_writable(&request.destination)?;

    let filter = FileFilter::new(request.filter_rules.clone());
    let policy = PermissionPolicy::new(request.strategy);
    let progress = ProgressTracker::new(plan.total_bytes, plan.total_files);
    let mut pipeline = CopyPipeline::new(&filter, &policy, &ctx.cancel, events, progress);
    pipeline.exclude_output(&request.destination);
    for message in &plan.rejected {
        events.warn(message);
        pipeline.stats_mut().record_fatal(message.clone());
    }
    for message in &plan.warnings {
        events.warn(message);
        pipeline.stats_mut().warn(message.clone());
    }

    let mut manifest = BackupManifest::skeleton(request.filter_rules.clone());
    let mut cancelled = false;
    for user in &plan.users {
        if ctx.cancel.is_cancelled() {
            cancelled = true;
            break;
        }
        let user_dest = request.destination.join(&user.username);
        if let Err(err) = fs::create_dir_all(&user_dest) {
            let message = format!("create {}: {}", user_dest.display(), err);
            events.warn(&message);
            pipeline.stats_mut().record_fatal(message);
            events.user_status(&user.username, ActionStatus::Failed);
            continue;
        }
        events.user_status(&user.username, ActionStatus::Running);
        manifest.users.push(backed_up_user(user, request.strategy));

        for folder in user.selected_folders() {
            let source = join_relative(&user.profile_root, &folder.relative_path);
            let dest = join_relative(&user_dest, &folder.relative_path);
            let tree = TreeCopy {
                source: &source,
                dest: &dest,
                filter_root: &user.profile_root,
                globs: FolderGlobs::new(&folder.include_globs, &folder.exclude_globs),
                dest_sid: Some(user.sid.as_str()),
            };
            match pipeline.copy_tree(&tree, &PlainCopy) {
                Ok(()) => {}
                Err(err) if err.is_cancelled() => {
                    cancelled = true;
                    break;
                }
                Err(err) => {
                    let message = format!("{}: {}", source.display(), err);
                    events.warn(&message);
                    pipeline.stats_mut().record_fatal(message);
                }
            }
        }
        let status = if cancelled {
            ActionStatus::Cancelled
        } else {
            ActionStatus::Success
        };
        events.user_status(&user.username, status);
        if cancelled {
            break;
        }
    }

    let mut stats = pipeline.finish();
    manifest.total_bytes_written = stats.bytes_copied;
    manifest.backup_metadata.total_files_written = stats.files_copied;
    manifest.backup_metadata.completion = if cancelled {
        Completion::Cancelled
    } else if stats.files_errored > 0 || !stats.errors.is_empty() {
        Completion::Partial
    } else {
        Completion::Complete
    };
    let manifest_path = match manifest.write(&request.destination) {
        Ok(path) => {
            events.info(format!("manifest written to {}", path.display()));
            Some(path)
        }
        Err(err) => {
            let message = err.to_string();
            events.warn(&message);
            stats.warn(message);
            None
        }
    };
    Ok(JobOutcome::settle(stats, cancelled, None, manifest_path))
}

fn backed_up_user(user: &UserProfile, strategy: PermissionStrategy) -> BackedUpUser {
    BackedUpUser {
        username: user.username.clone(),
        sid: user.sid.clone(),
        original_profile_root: user.profile_root.display().to_string(),
        backed_up_folders: user.folder_selections.clone(),
        permission_strategy: strategy,
        encrypted: false,
        compression: "none".to_string(),
        checksum_sha256: None,
    }
}

fn ensure_writable(dest: &Path) -> Result<()> {
    let unwritable =
        |e: std::io::Error| -> VaultError {
            JobError::DestinationUnwritable(format!("{}: {}", dest.display(), e)).into()
        };
    fs::create_dir_all(dest).map_err(unwritable)?;
    NamedTempFile::new_in(dest).map_err(unwritable)?;
    Ok(())
}
