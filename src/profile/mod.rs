use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::Result;
use crate::types::FolderKind;
use crate::util::paths::join_relative;

#[cfg(not(windows))]
mod local;
#[cfg(windows)]
mod windows;

#[cfg(not(windows))]
pub use self::local::LocalProbe as SystemProbe;
#[cfg(windows)]
pub use self::windows::WindowsProbe as SystemProbe;

#[cfg(not(windows))]
pub use self::local::LocalProbe;

/// Files counted per subtree by [`estimate_size`].
pub const ESTIMATE_FILE_CAP: usize = 1000;
/// Upper bound on the file count [`scan_folder`] reports.
pub const SCAN_FILE_CAP: u64 = 10_000;

const ESTIMATE_FOLDERS: [&str; 6] = ["Documents", "Desktop", "Pictures", "Videos", "Music", "Downloads"];

const SYSTEM_ACCOUNTS: [&str; 12] = [
    "administrator",
    "guest",
    "defaultaccount",
    "wdagutilityaccount",
    "defaultuser0",
    "default",
    "default user",
    "public",
    "all users",
    "system",
    "localservice",
    "networkservice",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderSelection {
    #[serde(rename = "type")]
    pub kind: FolderKind,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub relative_path: String,
    #[serde(default)]
    pub selected: bool,
    #[serde(default, rename = "include_patterns")]
    pub include_globs: Vec<String>,
    #[serde(default, rename = "exclude_patterns")]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default)]
    pub file_count: u64,
}

impl FolderSelection {
    pub fn new(kind: FolderKind, display_name: &str, relative_path: &str, selected: bool) -> Self {
        Self {
            kind,
            display_name: display_name.to_string(),
            relative_path: relative_path.to_string(),
            selected,
            include_globs: vec!["*".to_string()],
            exclude_globs: Vec::new(),
            size_bytes: 0,
            file_count: 0,
        }
    }

    /// Fills `size_bytes` and `file_count` from the folder under `profile_root`.
    pub fn scanned(mut self, profile_root: &Path) -> Self {
        let (size, count) = scan_folder(&join_relative(profile_root, &self.relative_path));
        self.size_bytes = size;
        self.file_count = count;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserProfile {
    pub username: String,
    pub sid: String,
    pub profile_root: PathBuf,
    pub is_current_session: bool,
    pub estimated_size: u64,
    pub folder_selections: Vec<FolderSelection>,
}

impl UserProfile {
    pub fn selected_folders(&self) -> impl Iterator<Item = &FolderSelection> {
        self.folder_selections.iter().filter(|f| f.selected)
    }
}

/// An account resolved to its SID and on-disk profile root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAccount {
    pub username: String,
    pub sid: String,
    pub profile_root: PathBuf,
}

/// Host primitives behind account enumeration.
pub trait AccountProbe {
    fn account_names(&self) -> Result<Vec<String>>;
    fn lookup_sid(&self, username: &str) -> Result<String>;
    /// Profile root recorded by the host for `sid`, if it keeps such a record.
    fn registry_profile_root(&self, sid: &str) -> Option<PathBuf>;
    fn users_root(&self) -> PathBuf;
    fn active_session_users(&self) -> Result<Vec<String>>;
}

pub fn list_accounts() -> Result<Vec<UserProfile>> {
    list_accounts_with(&SystemProbe::default())
}

/// Enumerates accounts that have a resolvable SID and an existing profile
/// root. Per-account probe failures drop that account only.
pub fn list_accounts_with(probe: &dyn AccountProbe) -> Result<Vec<UserProfile>> {
    let current = current_user();
    let mut profiles = Vec::new();
    for name in probe.account_names()? {
        if is_system_account(&name) {
            debug!("skipping system account {}", name);
            continue;
        }
        let account = match resolve_account(probe, &name) {
            Ok(Some(account)) => account,
            Ok(None) => {
                debug!("skipping {}: no profile on disk", name);
                continue;
            }
            Err(err) => {
                warn!("skipping {}: {}", name, err);
                continue;
            }
        };
        let is_current_session = current
            .as_deref()
            .map(|c| c.eq_ignore_ascii_case(&account.username))
            .unwrap_or(false);
        profiles.push(UserProfile {
            estimated_size: estimate_size(&account.profile_root),
            folder_selections: default_folder_selections(&account.profile_root),
            username: account.username,
            sid: account.sid,
            profile_root: account.profile_root,
            is_current_session,
        });
    }
    Ok(profiles)
}

/// Resolves one account. `Ok(None)` means it has no SID or no profile root.
pub fn resolve_account(probe: &dyn AccountProbe, username: &str) -> Result<Option<ResolvedAccount>> {
    let sid = probe.lookup_sid(username)?;
    if sid.is_empty() {
        return Ok(None);
    }
    let profile_root = probe
        .registry_profile_root(&sid)
        .filter(|p| p.is_dir())
        .unwrap_or_else(|| probe.users_root().join(username));
    if !profile_root.is_dir() {
        return Ok(None);
    }
    Ok(Some(ResolvedAccount {
        username: username.to_string(),
        sid,
        profile_root,
    }))
}

pub fn current_user() -> Option<String> {
    env::var("USERNAME")
        .or_else(|_| env::var("USER"))
        .ok()
        .filter(|u| !u.is_empty())
}

pub fn is_session_active(username: &str) -> bool {
    is_session_active_with(&SystemProbe::default(), username)
}

pub fn is_session_active_with(probe: &dyn AccountProbe, username: &str) -> bool {
    match probe.active_session_users() {
        Ok(users) => users.iter().any(|u| u.eq_ignore_ascii_case(username)),
        Err(err) => {
            warn!("session enumeration failed: {}", err);
            false
        }
    }
}

pub fn is_system_account(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.ends_with('$') || SYSTEM_ACCOUNTS.contains(&lower.as_str())
}

/// Quick advisory size of the main content folders; each subtree stops
/// after [`ESTIMATE_FILE_CAP`] files.
pub fn estimate_size(profile_root: &Path) -> u64 {
    ESTIMATE_FOLDERS
        .iter()
        .map(|folder| sum_files(&profile_root.join(folder), ESTIMATE_FILE_CAP).0)
        .sum()
}

/// Size of every file in a folder, and the file count capped at
/// [`SCAN_FILE_CAP`].
pub fn scan_folder(path: &Path) -> (u64, u64) {
    scan_bounded(path, SCAN_FILE_CAP)
}

fn scan_bounded(path: &Path, count_cap: u64) -> (u64, u64) {
    let (size, count) = sum_files(path, usize::MAX);
    (size, (count as u64).min(count_cap))
}

fn sum_files(path: &Path, cap: usize) -> (u64, usize) {
    if !path.is_dir() {
        return (0, 0);
    }
    let mut size = 0;
    let mut count = 0;
    for entry in WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .take(cap)
    {
        if let Ok(meta) = entry.metadata() {
            size += meta.len();
        }
        count += 1;
    }
    (size, count)
}

/// Canonical folder list in fixed order with recommended selections.
pub fn default_folder_selections(profile_root: &Path) -> Vec<FolderSelection> {
    [
        (FolderKind::Documents, "Documents", "Documents", true),
        (FolderKind::Desktop, "Desktop", "Desktop", true),
        (FolderKind::Pictures, "Pictures", "Pictures", true),
        (FolderKind::Downloads, "Downloads", "Downloads", true),
        (FolderKind::Videos, "Videos", "Videos", false),
        (FolderKind::Music, "Music", "Music", false),
        (FolderKind::Favorites, "Favorites", "Favorites", false),
        (FolderKind::AppDataRoaming, "AppData (Roaming)", "AppData/Roaming", false),
        (FolderKind::AppDataLocal, "AppData (Local)", "AppData/Local", false),
    ]
    .into_iter()
    .map(|(kind, display, relative, selected)| {
        FolderSelection::new(kind, display, relative, selected).scanned(profile_root)
    })
    .collect()
}

/// Uid carried by a local `S-1-22-1-<uid>` identifier.
pub fn uid_from_sid(sid: &str) -> Option<u32> {
    sid.strip_prefix("S-1-22-1-")?.parse().ok()
}
