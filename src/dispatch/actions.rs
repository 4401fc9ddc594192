use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::debug;

use crate::copy::{CancelFlag, CopyPipeline, PlainCopy, ProgressTracker, TreeCopy};
use crate::dispatch::elevated::ExecutionResult;
use crate::error::{Result, VaultError};
use crate::filter::{FileFilter, FilterRules, FolderGlobs};
use crate::job::{JobContext, JobOutcome};
use crate::permission::PermissionPolicy;
use crate::profile::{is_system_account, resolve_account, scan_folder, AccountProbe};
use crate::types::{ActionStatus, PermissionStrategy};
use crate::util::paths::{is_safe_name, join_relative, normalize_relative};

/// One catalog entry: which profile-relative locations to collect and the
/// subfolder of the backup location they land in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuickActionRecord {
    pub name: String,
    /// Profile-relative paths; each may name a folder or a single file.
    pub sources: Vec<String>,
    pub destination: String,
    /// File-name globs; only matching files inside a source are taken.
    pub files: Vec<String>,
    pub requires_admin: bool,
}

impl QuickActionRecord {
    pub fn new(name: &str, sources: &[&str], destination: &str) -> Self {
        Self {
            name: name.to_string(),
            sources: sources.iter().map(|s| s.to_string()).collect(),
            destination: destination.to_string(),
            files: vec!["*".to_string()],
            requires_admin: false,
        }
    }

    fn with_files(mut self, files: &[&str]) -> Self {
        self.files = files.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(VaultError::message("quick action name is required"));
        }
        if !is_safe_name(&self.destination) {
            return Err(VaultError::message(format!(
                "quick action {}: destination {} must be a single folder name",
                self.name, self.destination
            )));
        }
        if self.sources.is_empty() {
            return Err(VaultError::message(format!(
                "quick action {}: no sources",
                self.name
            )));
        }
        for source in &self.sources {
            let normalized = normalize_relative(source)?;
            if normalized.is_empty() {
                return Err(VaultError::message(format!(
                    "quick action {}: empty source path",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

pub fn builtin_catalog() -> Vec<QuickActionRecord> {
    vec![
        QuickActionRecord::new(
            "Sticky Notes Backup",
            &["AppData/Local/Packages/Microsoft.MicrosoftStickyNotes_8wekyb3d8bbwe/LocalState"],
            "StickyNotes",
        ),
        QuickActionRecord::new(
            "Saved Game Data Backup",
            &[
                "Saved Games",
                "Documents/My Games",
                "AppData/Local/EpicGamesLauncher/Saved",
                "AppData/Local/GOG.com",
            ],
            "SavedGames",
        ),
        QuickActionRecord::new(
            "Outlook Email Backup",
            &["AppData/Local/Microsoft/Outlook", "Documents/Outlook Files"],
            "Outlook",
        )
        .with_files(&["*.pst", "*.ost"]),
        QuickActionRecord::new(
            "QuickBooks Backup",
            &["Documents/Intuit/QuickBooks", "Documents/QuickBooks"],
            "QuickBooks",
        )
        .with_files(&["*.qbw", "*.qbb", "*.tlg", "*.nd"]),
        QuickActionRecord::new(
            "Tax Software Data Backup",
            &["Documents/TurboTax", "Documents/HRBlock", "Documents/TaxACT"],
            "TaxData",
        )
        .with_files(&["*.tax*", "*.ttax", "*.t[0-9][0-9]", "*.ta*"]),
        QuickActionRecord::new(
            "Photo Management Backup",
            &[
                "Pictures/Lightroom",
                "Documents/Lightroom",
                "AppData/Roaming/Adobe/Adobe Photoshop",
                "Pictures/Capture One",
            ],
            "PhotoManagement",
        ),
        QuickActionRecord::new(
            "Browser Profile Backup",
            &[
                "AppData/Local/Google/Chrome/User Data",
                "AppData/Local/Microsoft/Edge/User Data",
                "AppData/Roaming/Mozilla/Firefox/Profiles",
            ],
            "BrowserProfiles",
        ),
        QuickActionRecord::new(
            "Development Configs Backup",
            &[
                ".gitconfig",
                ".ssh",
                "AppData/Roaming/Code/User",
                "AppData/Roaming/JetBrains",
            ],
            "DevConfigs",
        ),
        QuickActionRecord::new(
            "Desktop Wallpaper Backup",
            &["AppData/Roaming/Microsoft/Windows/Themes/TranscodedWallpaper"],
            "Wallpapers",
        ),
    ]
}

/// Builtin records plus configured extras. An extra with a builtin's name
/// replaces it.
#[derive(Debug, Clone)]
pub struct Catalog {
    records: Vec<QuickActionRecord>,
}

impl Catalog {
    pub fn builtin() -> Self {
        Self {
            records: builtin_catalog(),
        }
    }

    pub fn with_extra(extra: &[QuickActionRecord]) -> Self {
        let mut catalog = Self::builtin();
        for record in extra {
            match catalog
                .records
                .iter_mut()
                .find(|r| r.name.eq_ignore_ascii_case(&record.name))
            {
                Some(existing) => *existing = record.clone(),
                None => catalog.records.push(record.clone()),
            }
        }
        catalog
    }

    pub fn records(&self) -> &[QuickActionRecord] {
        &self.records
    }

    pub fn find(&self, name: &str) -> Option<&QuickActionRecord> {
        self.records
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(name.trim()))
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanHit {
    pub username: String,
    pub source: PathBuf,
    /// Source path relative to the profile root, forward slashes.
    pub relative: String,
    pub bytes: u64,
    pub files: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub hits: Vec<ScanHit>,
    pub bytes: u64,
    pub files: u64,
}

impl ScanReport {
    pub fn applicable(&self) -> bool {
        !self.hits.is_empty()
    }
}

/// Runs a catalog record through scan and execution, tracking its status.
#[derive(Debug, Clone)]
pub struct QuickAction {
    record: QuickActionRecord,
    status: ActionStatus,
    scan: Option<ScanReport>,
    last_result: Option<ExecutionResult>,
}

impl QuickAction {
    pub fn new(record: QuickActionRecord) -> Self {
        Self {
            record,
            status: ActionStatus::Idle,
            scan: None,
            last_result: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn record(&self) -> &QuickActionRecord {
        &self.record
    }

    pub fn status(&self) -> ActionStatus {
        self.status
    }

    pub fn last_scan(&self) -> Option<&ScanReport> {
        self.scan.as_ref()
    }

    pub fn last_result(&self) -> Option<&ExecutionResult> {
        self.last_result.as_ref()
    }

    fn step(&mut self, next: ActionStatus) -> Result<()> {
        self.status = self.status.transition(next)?;
        Ok(())
    }

    /// A finished action starts over from Idle.
    fn rearm(&mut self) {
        if self.status.is_terminal() {
            self.status = ActionStatus::Idle;
            self.scan = None;
        }
    }

    /// Idle → Scanning → Ready. Looks for every source under every profile.
    pub fn scan(&mut self, probe: &dyn AccountProbe, cancel: &CancelFlag) -> Result<&ScanReport> {
        self.rearm();
        if self.status == ActionStatus::Ready {
            self.status = ActionStatus::Idle;
        }
        self.step(ActionStatus::Scanning)?;
        let report = match collect_hits(&self.record, probe, cancel) {
            Ok(report) => report,
            Err(err) => {
                let next = if err.is_cancelled() {
                    ActionStatus::Cancelled
                } else {
                    ActionStatus::Failed
                };
                self.step(next)?;
                return Err(err);
            }
        };
        self.step(ActionStatus::Ready)?;
        Ok(self.scan.insert(report))
    }

    /// Ready (or Idle) → Running → terminal. Scans first when no scan is
    /// on record.
    pub fn execute(
        &mut self,
        backup_location: &Path,
        ctx: &JobContext,
        probe: &dyn AccountProbe,
    ) -> Result<ExecutionResult> {
        self.rearm();
        if self.scan.is_none() {
            self.scan(probe, &ctx.cancel)?;
        }
        self.step(ActionStatus::Running)?;
        let report = self.scan.clone().unwrap_or_default();
        let output = backup_location.join(&self.record.destination);
        let started = Instant::now();
        ctx.events.info(format!(
            "{}: {} location(s), {} bytes planned",
            self.record.name,
            report.hits.len(),
            report.bytes
        ));

        let outcome = match copy_hits(&self.record, &report, &output, ctx) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.step(ActionStatus::Failed)?;
                let result = ExecutionResult::failed(&err.to_string(), "")
                    .with_duration(started.elapsed().as_millis() as u64);
                self.last_result = Some(result.clone());
                return Ok(result);
            }
        };
        self.step(outcome.status)?;
        outcome.announce(&ctx.events);
        let result = ExecutionResult::from_outcome(&outcome, &output)
            .with_duration(started.elapsed().as_millis() as u64);
        self.last_result = Some(result.clone());
        Ok(result)
    }
}

fn collect_hits(
    record: &QuickActionRecord,
    probe: &dyn AccountProbe,
    cancel: &CancelFlag,
) -> Result<ScanReport> {
    let mut report = ScanReport::default();
    let relatives = record
        .sources
        .iter()
        .map(|s| normalize_relative(s))
        .collect::<Result<Vec<_>>>()?;
    for name in probe.account_names()? {
        cancel.check()?;
        if is_system_account(&name) {
            continue;
        }
        let account = match resolve_account(probe, &name) {
            Ok(Some(account)) => account,
            Ok(None) | Err(_) => {
                debug!("{}: no profile for {}", record.name, name);
                continue;
            }
        };
        for relative in &relatives {
            let source = join_relative(&account.profile_root, relative);
            let (bytes, files) = if source.is_file() {
                (fs::metadata(&source).map(|m| m.len()).unwrap_or(0), 1)
            } else if source.is_dir() {
                scan_folder(&source)
            } else {
                continue;
            };
            report.bytes += bytes;
            report.files += files;
            report.hits.push(ScanHit {
                username: account.username.clone(),
                source,
                relative: relative.clone(),
                bytes,
                files,
            });
        }
    }
    Ok(report)
}

fn copy_hits(
    record: &QuickActionRecord,
    report: &ScanReport,
    output: &Path,
    ctx: &JobContext,
) -> Result<JobOutcome> {
    let filter = FileFilter::new(FilterRules::default());
    let policy = PermissionPolicy::new(PermissionStrategy::StripAll);
    let progress = ProgressTracker::new(report.bytes, report.files);
    let mut pipeline = CopyPipeline::new(&filter, &policy, &ctx.cancel, &ctx.events, progress);
    pipeline.exclude_output(output);
    let globs = FolderGlobs::new(&record.files, &[]);
    let mut cancelled = false;
    for hit in &report.hits {
        let dest = join_relative(&output.join(&hit.username), &hit.relative);
        let tree = TreeCopy {
            source: &hit.source,
            dest: &dest,
            filter_root: &hit.source,
            globs: globs.clone(),
            dest_sid: None,
        };
        match pipeline.copy_tree(&tree, &PlainCopy) {
            Ok(()) => {}
            Err(err) if err.is_cancelled() => {
                cancelled = true;
                break;
            }
            Err(err) => return Err(err),
        }
    }
    let fatal = if report.applicable() || cancelled {
        None
    } else {
        Some(format!("{}: nothing found to back up", record.name))
    };
    Ok(JobOutcome::settle(pipeline.finish(), cancelled, fatal, None))
}

#[cfg(all(test, not(windows)))]
mod tests {
    use super::*;
    use crate::events::EventSink;
    use crate::profile::LocalProbe;
    use crate::types::RunMode;

    fn write(path: &Path, body: &[u8]) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdir");
        }
        fs::write(path, body).expect("write");
    }

    fn ctx() -> JobContext {
        JobContext::new(CancelFlag::new(), EventSink::none(), RunMode::default())
    }

    #[test]
    fn builtin_records_are_valid() {
        let catalog = Catalog::builtin();
        assert_eq!(catalog.records().len(), 9);
        for record in catalog.records() {
            record.validate().expect("valid");
        }
        assert!(catalog.find("sticky notes backup").is_some());
    }

    #[test]
    fn extra_records_replace_by_name() {
        let mut custom = QuickActionRecord::new("Outlook Email Backup", &["Mail"], "Mail");
        custom.files = vec!["*.eml".to_string()];
        let extra = QuickActionRecord::new("Notes", &["Notes"], "Notes");
        let catalog = Catalog::with_extra(&[custom.clone(), extra]);
        assert_eq!(catalog.records().len(), 10);
        assert_eq!(catalog.find("outlook email backup"), Some(&custom));
    }

    #[test]
    fn invalid_records_rejected() {
        let record = QuickActionRecord::new("Bad", &["../etc"], "Bad");
        assert!(record.validate().is_err());
        let record = QuickActionRecord::new("Bad", &["Docs"], "a/b");
        assert!(record.validate().is_err());
    }

    #[test]
    fn scan_then_execute_copies_matching_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let users = dir.path().join("users");
        let outlook = users.join("alice/AppData/Local/Microsoft/Outlook");
        write(&outlook.join("mail.pst"), b"0123456789");
        write(&outlook.join("notes.txt"), b"ignored");
        write(&users.join("bob/Documents/Outlook Files/archive.PST"), b"123");
        let location = dir.path().join("backups");

        let record = Catalog::builtin()
            .find("Outlook Email Backup")
            .cloned()
            .expect("record");
        let mut action = QuickAction::new(record);
        let probe = LocalProbe::new(&users);
        let report = action.scan(&probe, &CancelFlag::new()).expect("scan");
        assert_eq!(report.hits.len(), 2);
        assert_eq!(action.status(), ActionStatus::Ready);

        let result = action.execute(&location, &ctx(), &probe).expect("execute");
        assert!(result.success, "{}", result.message);
        assert_eq!(result.status, ActionStatus::Success);
        assert_eq!(result.files_processed, 2);
        assert_eq!(result.bytes_processed, 13);
        assert_eq!(action.status(), ActionStatus::Success);
        assert!(location
            .join("Outlook/alice/AppData/Local/Microsoft/Outlook/mail.pst")
            .is_file());
        assert!(!location
            .join("Outlook/alice/AppData/Local/Microsoft/Outlook/notes.txt")
            .exists());
        assert!(location
            .join("Outlook/bob/Documents/Outlook Files/archive.PST")
            .is_file());
    }

    #[test]
    fn lone_file_sources_and_packages_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let users = dir.path().join("users");
        write(&users.join("alice/.gitconfig"), b"[user]");
        let sticky = users
            .join("alice/AppData/Local/Packages/Microsoft.MicrosoftStickyNotes_8wekyb3d8bbwe/LocalState");
        write(&sticky.join("plum.sqlite"), b"db");
        let location = dir.path().join("backups");
        let probe = LocalProbe::new(&users);
        let catalog = Catalog::builtin();

        let mut dev = QuickAction::new(catalog.find("Development Configs Backup").cloned().expect("dev"));
        let result = dev.execute(&location, &ctx(), &probe).expect("execute");
        assert!(result.success);
        assert!(location.join("DevConfigs/alice/.gitconfig").is_file());

        let mut notes = QuickAction::new(catalog.find("Sticky Notes Backup").cloned().expect("notes"));
        let result = notes.execute(&location, &ctx(), &probe).expect("execute");
        assert!(result.success, "{}", result.message);
        assert!(location
            .join("StickyNotes/alice/AppData/Local/Packages/Microsoft.MicrosoftStickyNotes_8wekyb3d8bbwe/LocalState/plum.sqlite")
            .is_file());
    }

    #[test]
    fn nothing_found_fails_and_rearms() {
        let dir = tempfile::tempdir().expect("tempdir");
        let users = dir.path().join("users");
        fs::create_dir_all(users.join("alice")).expect("mkdir");
        let probe = LocalProbe::new(&users);
        let mut action = QuickAction::new(Catalog::builtin().find("QuickBooks Backup").cloned().expect("qb"));
        let result = action.execute(dir.path(), &ctx(), &probe).expect("execute");
        assert!(!result.success);
        assert_eq!(action.status(), ActionStatus::Failed);

        write(&users.join("alice/Documents/QuickBooks/company.QBW"), b"qb");
        let result = action.execute(dir.path(), &ctx(), &probe).expect("execute");
        assert!(result.success, "{}", result.message);
    }

    #[test]
    fn cancelled_scan_is_terminal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let users = dir.path().join("users");
        fs::create_dir_all(users.join("alice")).expect("mkdir");
        let cancel = CancelFlag::new();
        cancel.cancel();
        let record = Catalog::builtin()
            .find("Desktop Wallpaper Backup")
            .cloned()
            .expect("record");
        let mut action = QuickAction::new(record);
        let err = action.scan(&LocalProbe::new(&users), &cancel).expect_err("cancelled");
        assert!(err.is_cancelled());
        assert_eq!(action.status(), ActionStatus::Cancelled);
    }
}
