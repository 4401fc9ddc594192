use std::fs::{self, File};
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::copy::{CopyPipeline, ProgressTracker, TreeCopy};
use crate::error::{JobError, Result};
use crate::events::JobEvent;
use crate::filter::{FileFilter, FolderGlobs, Verdict};
use crate::job::{JobContext, JobOutcome};
use crate::manifest::{BackedUpUser, BackupManifest};
use crate::permission::PermissionPolicy;
use crate::profile::{resolve_account, AccountProbe};
use crate::stats::OperationStats;
use crate::types::{ActionStatus, ConflictPolicy, MergeMode, PermissionStrategy};
use crate::util::paths::{join_relative, normalize_relative};

pub mod conflict;

use conflict::ConflictCopy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserMapping {
    pub source_username: String,
    pub source_sid: String,
    pub destination_username: String,
    /// Empty when the destination account is looked up or created.
    pub destination_sid: String,
    pub merge_mode: MergeMode,
    /// Overrides the request-wide policy for this mapping.
    pub conflict_policy: Option<ConflictPolicy>,
    pub selected: bool,
}

impl UserMapping {
    pub fn new(source: &str, destination: &str, merge_mode: MergeMode) -> Self {
        Self {
            source_username: source.to_string(),
            source_sid: String::new(),
            destination_username: destination.to_string(),
            destination_sid: String::new(),
            merge_mode,
            conflict_policy: None,
            selected: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RestoreRequest {
    pub backup_root: PathBuf,
    pub mappings: Vec<UserMapping>,
    pub conflict_policy: ConflictPolicy,
    pub strategy: PermissionStrategy,
    pub verify: bool,
    /// Parent of newly created profiles.
    pub users_root: PathBuf,
}

impl RestoreRequest {
    pub fn new(backup_root: &Path, mappings: Vec<UserMapping>, users_root: &Path) -> Self {
        Self {
            backup_root: backup_root.to_path_buf(),
            mappings,
            conflict_policy: ConflictPolicy::default(),
            strategy: PermissionStrategy::StripAll,
            verify: false,
            users_root: users_root.to_path_buf(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlannedMapping {
    pub mapping: UserMapping,
    pub user: BackedUpUser,
    pub destination_root: PathBuf,
    pub destination_sid: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RestorePlan {
    pub manifest: BackupManifest,
    pub checksum_valid: bool,
    pub mappings: Vec<PlannedMapping>,
    /// Mappings that cannot run, one message each.
    pub rejected: Vec<String>,
    pub total_bytes: u64,
    pub total_files: u64,
}

/// Loads the manifest and resolves every selected mapping to a destination
/// root. Nothing is created on disk.
pub fn plan_restore(request: &RestoreRequest, probe: &dyn AccountProbe) -> Result<RestorePlan> {
    let loaded = BackupManifest::load(&request.backup_root)?;
    let mut plan = RestorePlan {
        checksum_valid: loaded.checksum_valid,
        manifest: loaded.manifest,
        mappings: Vec::new(),
        rejected: Vec::new(),
        total_bytes: 0,
        total_files: 0,
    };
    for mapping in request.mappings.iter().filter(|m| m.selected) {
        let Some(user) = plan.manifest.user(&mapping.source_username).cloned() else {
            plan.rejected.push(format!(
                "{} is not in the backup",
                mapping.source_username
            ));
            continue;
        };
        match resolve_destination(mapping, request, probe) {
            Ok((destination_root, destination_sid)) => {
                for folder in user.backed_up_folders.iter().filter(|f| f.selected) {
                    plan.total_bytes += folder.size_bytes;
                    plan.total_files += folder.file_count;
                }
                plan.mappings.push(PlannedMapping {
                    mapping: mapping.clone(),
                    user,
                    destination_root,
                    destination_sid,
                });
            }
            Err(err) => plan.rejected.push(err.to_string()),
        }
    }
    Ok(plan)
}

fn resolve_destination(
    mapping: &UserMapping,
    request: &RestoreRequest,
    probe: &dyn AccountProbe,
) -> Result<(PathBuf, Option<String>)> {
    let explicit_sid = Some(mapping.destination_sid.clone()).filter(|s| !s.is_empty());
    match mapping.merge_mode {
        MergeMode::CreateNew => Ok((
            request.users_root.join(&mapping.source_username),
            explicit_sid,
        )),
        MergeMode::Replace | MergeMode::Merge => {
            let unknown = || JobError::UnknownDestinationUser(mapping.destination_username.clone());
            let account = resolve_account(probe, &mapping.destination_username)
                .map_err(|_| unknown())?
                .ok_or_else(unknown)?;
            Ok((account.profile_root, explicit_sid.or(Some(account.sid))))
        }
    }
}

/// Profile roots the selected mappings write into. A destination that does
/// not resolve yet counts as `<users root>/<name>`.
pub fn target_roots(request: &RestoreRequest, probe: &dyn AccountProbe) -> Vec<PathBuf> {
    request
        .mappings
        .iter()
        .filter(|m| m.selected)
        .map(|m| match resolve_destination(m, request, probe) {
            Ok((root, _)) => root,
            Err(_) => request.users_root.join(&m.destination_username),
        })
        .collect()
}

pub fn run_restore(
    request: RestoreRequest,
    ctx: &JobContext,
    probe: &dyn AccountProbe,
) -> Result<JobOutcome> {
    let result = execute(&request, ctx, probe);
    match &result {
        Ok(outcome) => outcome.announce(&ctx.events),
        Err(err) => ctx.events.emit(JobEvent::Complete {
            success: false,
            summary: err.to_string(),
        }),
    }
    result
}

fn execute(request: &RestoreRequest, ctx: &JobContext, probe: &dyn AccountProbe) -> Result<JobOutcome> {
    let events = &ctx.events;
    events.info(format!("restore from {}", request.backup_root.display()));
    let plan = plan_restore(request, probe)?;
    if !plan.checksum_valid {
        events.warn("manifest checksum mismatch; continuing");
    }

    let filter = FileFilter::new(plan.manifest.filter_rules.clone());
    let policy = PermissionPolicy::new(request.strategy);
    let progress = ProgressTracker::new(plan.total_bytes, plan.total_files);
    let mut pipeline = CopyPipeline::new(&filter, &policy, &ctx.cancel, events, progress);
    if !plan.checksum_valid {
        pipeline
            .stats_mut()
            .warn("manifest checksum mismatch".to_string());
    }
    for message in &plan.rejected {
        events.warn(message);
        pipeline.stats_mut().record_fatal(message.clone());
    }

    let mut cancelled = false;
    for planned in &plan.mappings {
        if ctx.cancel.is_cancelled() {
            cancelled = true;
            break;
        }
        let name = &planned.mapping.destination_username;
        if let Err(err) = fs::create_dir_all(&planned.destination_root) {
            let message = format!("create {}: {}", planned.destination_root.display(), err);
            events.warn(&message);
            pipeline.stats_mut().record_fatal(message);
            events.user_status(name, ActionStatus::Failed);
            continue;
        }
        events.user_status(name, ActionStatus::Running);
        cancelled = restore_mapping(request, planned, &filter, &policy, &mut pipeline, ctx)?;
        events.user_status(
            name,
            if cancelled {
                ActionStatus::Cancelled
            } else {
                ActionStatus::Success
            },
        );
        if cancelled {
            break;
        }
    }

    let mut stats = pipeline.finish();
    if request.verify && !cancelled {
        verify_written(&mut stats, ctx);
    }
    Ok(JobOutcome::settle(stats, cancelled, None, None))
}

/// Copies one mapping's folders. Returns true when cancelled.
fn restore_mapping(
    request: &RestoreRequest,
    planned: &PlannedMapping,
    filter: &FileFilter,
    policy: &PermissionPolicy,
    pipeline: &mut CopyPipeline<'_>,
    ctx: &JobContext,
) -> Result<bool> {
    let events = &ctx.events;
    let source_root = request.backup_root.join(&planned.user.username);
    let action = ConflictCopy::new(
        planned
            .mapping
            .conflict_policy
            .unwrap_or(request.conflict_policy),
    );
    let replace = planned.mapping.merge_mode == MergeMode::Replace;
    let dest_sid = planned.destination_sid.as_deref();
    let mut restored_roots = Vec::new();
    let mut cancelled = false;

    for folder in planned.user.backed_up_folders.iter().filter(|f| f.selected) {
        let relative = match normalize_relative(&folder.relative_path) {
            Ok(relative) => relative,
            Err(err) => {
                let message = format!("{}: {}", planned.user.username, err);
                events.warn(&message);
                pipeline.stats_mut().record_fatal(message);
                continue;
            }
        };
        let source = join_relative(&source_root, &relative);
        let dest = join_relative(&planned.destination_root, &relative);
        let tree = TreeCopy {
            source: &source,
            dest: &dest,
            filter_root: &source_root,
            globs: FolderGlobs::new(&folder.include_globs, &folder.exclude_globs),
            dest_sid,
        };
        if replace {
            match prune_absent(&tree, &planned.destination_root, filter, pipeline, ctx) {
                Ok(()) => {}
                Err(err) if err.is_cancelled() => {
                    cancelled = true;
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        match pipeline.copy_tree(&tree, &action) {
            Ok(()) => restored_roots.push(dest),
            Err(err) if err.is_cancelled() => {
                cancelled = true;
                break;
            }
            Err(err) => return Err(err),
        }
    }

    for root in restored_roots.iter().filter(|r| r.exists()) {
        if let Err(err) = policy.apply(root, dest_sid) {
            let message = err.to_string();
            events.warn(&message);
            pipeline.stats_mut().warn(message);
        }
    }
    Ok(cancelled)
}

/// Replace mode: removes regular files under the destination folder that
/// the backup does not have. Entries the filter or globs would never have
/// backed up are left alone, as are directories and links.
fn prune_absent(
    tree: &TreeCopy<'_>,
    destination_root: &Path,
    filter: &FileFilter,
    pipeline: &mut CopyPipeline<'_>,
    ctx: &JobContext,
) -> Result<()> {
    if !tree.source.is_dir() || !tree.dest.is_dir() {
        return Ok(());
    }
    let mut walker = WalkDir::new(tree.dest)
        .min_depth(1)
        .follow_links(false)
        .into_iter();
    while let Some(entry) = walker.next() {
        ctx.cancel.check()?;
        let Ok(entry) = entry else {
            continue;
        };
        let path = entry.path();
        let file_type = entry.file_type();
        if file_type.is_dir() {
            if let Verdict::Drop(_) = filter.classify_dir(path, destination_root) {
                walker.skip_current_dir();
            }
            continue;
        }
        if !file_type.is_file() {
            continue;
        }
        let relative = path.strip_prefix(tree.dest).unwrap_or(path);
        if tree.source.join(relative).exists() {
            continue;
        }
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        if let Verdict::Drop(_) = filter.classify_file(path, size, destination_root) {
            continue;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if !tree.globs.allows(&name) {
            continue;
        }
        match fs::remove_file(path) {
            Ok(()) => debug!("removed {} (not in backup)", path.display()),
            Err(err) => {
                let message = format!("remove {}: {}", path.display(), err);
                ctx.events.warn(&message);
                pipeline.stats_mut().warn(message);
            }
        }
    }
    Ok(())
}

fn verify_written(stats: &mut OperationStats, ctx: &JobContext) {
    let failures: Vec<String> = stats
        .written
        .iter()
        .filter_map(|path| match File::open(path) {
            Ok(_) => None,
            Err(err) => Some(format!("verify {}: {}", path.display(), err)),
        })
        .collect();
    if failures.is_empty() {
        ctx.events
            .info(format!("verified {} restored file(s)", stats.written.len()));
    }
    for failure in failures {
        ctx.events.warn(&failure);
        stats.record_fatal(failure);
    }
}

#[cfg(all(test, not(windows)))]
mod tests {
    use super::*;
    use crate::backup::space::FixedSpace;
    use crate::backup::{run_backup, BackupRequest};
    use crate::copy::CancelFlag;
    use crate::error::{ManifestError, VaultError};
    use crate::events::EventSink;
    use crate::manifest::MANIFEST_FILE;
    use crate::profile::{default_folder_selections, LocalProbe, UserProfile};
    use crate::types::{FolderKind, RunMode};
    use std::time::{Duration, SystemTime};

    fn write(path: &Path, body: &[u8]) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdir");
        }
        fs::write(path, body).expect("write");
    }

    fn ctx() -> JobContext {
        JobContext::new(CancelFlag::new(), EventSink::none(), RunMode::default())
    }

    struct World {
        _dir: tempfile::TempDir,
        source_users: PathBuf,
        backup: PathBuf,
        dest_users: PathBuf,
    }

    /// Backs up `alice` (Documents and AppData/Roaming) into a scratch backup.
    fn backed_up_world(files: &[(&str, &[u8])]) -> World {
        let dir = tempfile::tempdir().expect("tempdir");
        let source_users = dir.path().join("src_users");
        let backup = dir.path().join("backup");
        let dest_users = dir.path().join("dst_users");
        let root = source_users.join("alice");
        fs::create_dir_all(&root).expect("mkdir");
        fs::create_dir_all(&dest_users).expect("mkdir");
        for (rel, body) in files {
            write(&root.join(rel), body);
        }
        let selections = default_folder_selections(&root)
            .into_iter()
            .map(|mut f| {
                f.selected = matches!(f.kind, FolderKind::Documents | FolderKind::AppDataRoaming);
                f
            })
            .collect();
        let user = UserProfile {
            username: "alice".to_string(),
            sid: "S-1-5-21-1-2-3-1001".to_string(),
            profile_root: root,
            is_current_session: false,
            estimated_size: 0,
            folder_selections: selections,
        };
        run_backup(BackupRequest::new(&backup, vec![user]), &ctx(), &FixedSpace(None)).expect("backup");
        World {
            _dir: dir,
            source_users,
            backup,
            dest_users,
        }
    }

    fn request(world: &World, mapping: UserMapping) -> RestoreRequest {
        RestoreRequest::new(&world.backup, vec![mapping], &world.dest_users)
    }

    #[test]
    fn round_trip_preserves_sizes() {
        let world = backed_up_world(&[
            ("Documents/a.txt", b"0123456789"),
            ("Documents/empty.txt", b""),
            ("Documents/deep/nested/b.bin", &[7u8; 300]),
            ("Documents/NTUSER.DAT", b"hive"),
            ("AppData/Roaming/App/settings.json", b"{}"),
            ("AppData/Roaming/App/Cache/blob", b"cached"),
        ]);
        fs::create_dir_all(world.dest_users.join("bob")).expect("mkdir");
        let probe = LocalProbe::new(&world.dest_users);
        let outcome = run_restore(
            request(&world, UserMapping::new("alice", "bob", MergeMode::Replace)),
            &ctx(),
            &probe,
        )
        .expect("restore");
        assert_eq!(outcome.status, ActionStatus::Success);

        let backed_up = world.backup.join("alice");
        let mut checked = 0;
        for entry in WalkDir::new(&backed_up).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry.path().strip_prefix(&backed_up).expect("rel");
            let restored = world.dest_users.join("bob").join(rel);
            let source = world.source_users.join("alice").join(rel);
            assert_eq!(
                fs::metadata(&restored).expect("restored").len(),
                fs::metadata(&source).expect("source").len(),
                "{}",
                rel.display()
            );
            checked += 1;
        }
        assert_eq!(checked, 4);
        assert!(!world.dest_users.join("bob/Documents/NTUSER.DAT").exists());
        assert!(!world.dest_users.join("bob/AppData/Roaming/App/Cache").exists());
    }

    #[test]
    fn keep_newer_leaves_newer_destination() {
        let world = backed_up_world(&[("Documents/a.txt", b"from backup")]);
        let dest = world.dest_users.join("bob/Documents/a.txt");
        write(&dest, b"local edit");
        let now = SystemTime::now();
        fs::OpenOptions::new()
            .write(true)
            .open(world.backup.join("alice/Documents/a.txt"))
            .and_then(|f| f.set_modified(now - Duration::from_secs(1)))
            .expect("mtime");
        fs::OpenOptions::new()
            .write(true)
            .open(&dest)
            .and_then(|f| f.set_modified(now))
            .expect("mtime");

        let mut mapping = UserMapping::new("alice", "bob", MergeMode::Merge);
        mapping.conflict_policy = Some(ConflictPolicy::KeepNewer);
        let outcome = run_restore(request(&world, mapping), &ctx(), &LocalProbe::new(&world.dest_users))
            .expect("restore");
        assert_eq!(fs::read(&dest).expect("read"), b"local edit");
        assert_eq!(outcome.stats.files_skipped, 1);
        assert_eq!(outcome.stats.files_errored, 0);
        assert!(outcome.stats.errors.is_empty());
    }

    #[test]
    fn replace_applies_policy_and_drops_files_missing_from_backup() {
        let world = backed_up_world(&[
            ("Documents/a.txt", b"from backup"),
            ("Documents/b.txt", b"only in backup"),
        ]);
        let bob = world.dest_users.join("bob");
        write(&bob.join("Documents/a.txt"), b"local");
        write(&bob.join("Documents/extra.txt"), b"not in backup");
        write(&bob.join("Documents/NTUSER.DAT"), b"hive");
        write(&bob.join("Desktop/keep.txt"), b"other folder");

        let mut mapping = UserMapping::new("alice", "bob", MergeMode::Replace);
        mapping.conflict_policy = Some(ConflictPolicy::SkipDuplicate);
        let outcome = run_restore(request(&world, mapping), &ctx(), &LocalProbe::new(&world.dest_users))
            .expect("restore");
        assert_eq!(outcome.status, ActionStatus::Success);
        assert_eq!(outcome.stats.files_skipped, 1);
        assert_eq!(fs::read(bob.join("Documents/a.txt")).expect("read"), b"local");
        assert_eq!(fs::read(bob.join("Documents/b.txt")).expect("read"), b"only in backup");
        assert!(!bob.join("Documents/extra.txt").exists());
        assert!(bob.join("Documents/NTUSER.DAT").is_file());
        assert!(bob.join("Desktop/keep.txt").is_file());
    }

    #[test]
    fn rename_with_suffix_on_merge() {
        let world = backed_up_world(&[("Documents/a.txt", b"from backup")]);
        let docs = world.dest_users.join("bob/Documents");
        write(&docs.join("a.txt"), b"local");
        let probe = LocalProbe::new(&world.dest_users);
        let mapping = UserMapping::new("alice", "bob", MergeMode::Merge);

        run_restore(request(&world, mapping.clone()), &ctx(), &probe).expect("restore");
        assert_eq!(fs::read(docs.join("a_backup1.txt")).expect("read"), b"from backup");
        run_restore(request(&world, mapping), &ctx(), &probe).expect("restore");
        assert_eq!(fs::read(docs.join("a_backup2.txt")).expect("read"), b"from backup");
        assert_eq!(fs::read(docs.join("a.txt")).expect("read"), b"local");
    }

    #[test]
    fn create_new_builds_profile_under_users_root() {
        let world = backed_up_world(&[("Documents/a.txt", b"x")]);
        let mut req = request(&world, UserMapping::new("alice", "", MergeMode::CreateNew));
        req.verify = true;
        let outcome = run_restore(req, &ctx(), &LocalProbe::new(&world.dest_users)).expect("restore");
        assert_eq!(outcome.status, ActionStatus::Success);
        assert!(world.dest_users.join("alice/Documents/a.txt").is_file());
        assert!(outcome.stats.errors.is_empty());
    }

    #[test]
    fn unknown_destination_fails_mapping() {
        let world = backed_up_world(&[("Documents/a.txt", b"x")]);
        let outcome = run_restore(
            request(&world, UserMapping::new("alice", "nobody", MergeMode::Merge)),
            &ctx(),
            &LocalProbe::new(&world.dest_users),
        )
        .expect("restore");
        assert_eq!(outcome.status, ActionStatus::Failed);
        assert!(outcome.stats.errors.iter().any(|e| e.contains("nobody")));
    }

    #[test]
    fn unselected_mappings_are_ignored() {
        let world = backed_up_world(&[("Documents/a.txt", b"x")]);
        fs::create_dir_all(world.dest_users.join("bob")).expect("mkdir");
        let mut mapping = UserMapping::new("alice", "bob", MergeMode::Replace);
        mapping.selected = false;
        let plan = plan_restore(&request(&world, mapping), &LocalProbe::new(&world.dest_users))
            .expect("plan");
        assert!(plan.mappings.is_empty());
        assert_eq!(plan.total_bytes, 0);
    }

    #[test]
    fn plan_totals_from_manifest() {
        let world = backed_up_world(&[("Documents/a.txt", b"12345"), ("Music/x.mp3", b"123")]);
        fs::create_dir_all(world.dest_users.join("bob")).expect("mkdir");
        let plan = plan_restore(
            &request(&world, UserMapping::new("alice", "bob", MergeMode::Replace)),
            &LocalProbe::new(&world.dest_users),
        )
        .expect("plan");
        assert!(plan.checksum_valid);
        assert_eq!(plan.total_bytes, 5);
        assert_eq!(plan.total_files, 1);
        assert_eq!(plan.mappings[0].destination_root, world.dest_users.join("bob"));
        assert!(plan.mappings[0]
            .destination_sid
            .as_deref()
            .is_some_and(|s| s.starts_with("S-1-22-1-")));
    }

    #[test]
    fn unsupported_manifest_is_fatal() {
        let world = backed_up_world(&[("Documents/a.txt", b"x")]);
        let path = world.backup.join(MANIFEST_FILE);
        let raw = fs::read_to_string(&path).expect("read");
        fs::write(&path, raw.replace("\"version\": \"1.0\"", "\"version\": \"9.0\"")).expect("write");
        let err = run_restore(
            request(&world, UserMapping::new("alice", "", MergeMode::CreateNew)),
            &ctx(),
            &LocalProbe::new(&world.dest_users),
        )
        .expect_err("refused");
        assert!(matches!(
            err,
            VaultError::Manifest(ManifestError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn checksum_mismatch_only_warns() {
        let world = backed_up_world(&[("Documents/a.txt", b"x")]);
        let path = world.backup.join(MANIFEST_FILE);
        let raw = fs::read_to_string(&path).expect("read");
        fs::write(&path, raw.replace("\"encrypted\": false", "\"encrypted\": true")).expect("write");
        let outcome = run_restore(
            request(&world, UserMapping::new("alice", "", MergeMode::CreateNew)),
            &ctx(),
            &LocalProbe::new(&world.dest_users),
        )
        .expect("restore");
        assert_eq!(outcome.status, ActionStatus::Success);
        assert!(outcome.stats.warnings.iter().any(|w| w.contains("checksum")));
    }
}
