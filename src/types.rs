use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};

/// Canonical profile folders. Manifest strings are the variant names, with
/// the two AppData kinds spelled `AppData_Roaming` / `AppData_Local`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FolderKind {
    Documents,
    Desktop,
    Pictures,
    Videos,
    Music,
    Downloads,
    AppDataRoaming,
    AppDataLocal,
    Favorites,
    StartMenu,
    Custom,
}

impl FolderKind {
    pub const ALL: [FolderKind; 11] = [
        FolderKind::Documents,
        FolderKind::Desktop,
        FolderKind::Pictures,
        FolderKind::Videos,
        FolderKind::Music,
        FolderKind::Downloads,
        FolderKind::AppDataRoaming,
        FolderKind::AppDataLocal,
        FolderKind::Favorites,
        FolderKind::StartMenu,
        FolderKind::Custom,
    ];

    pub fn parse(value: &str) -> std::result::Result<Self, String> {
        let wanted = value.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        FolderKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str().to_ascii_lowercase() == wanted)
            .ok_or_else(|| {
                format!(
                    "invalid folder {}; expected one of {}",
                    value,
                    FolderKind::ALL.map(|k| k.as_str()).join(", ")
                )
            })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FolderKind::Documents => "Documents",
            FolderKind::Desktop => "Desktop",
            FolderKind::Pictures => "Pictures",
            FolderKind::Videos => "Videos",
            FolderKind::Music => "Music",
            FolderKind::Downloads => "Downloads",
            FolderKind::AppDataRoaming => "AppData_Roaming",
            FolderKind::AppDataLocal => "AppData_Local",
            FolderKind::Favorites => "Favorites",
            FolderKind::StartMenu => "StartMenu",
            FolderKind::Custom => "Custom",
        }
    }
}

impl From<String> for FolderKind {
    // unrecognised manifest values degrade to Custom
    fn from(value: String) -> Self {
        FolderKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == value)
            .unwrap_or(FolderKind::Custom)
    }
}

impl From<FolderKind> for String {
    fn from(kind: FolderKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for FolderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PermissionStrategy {
    #[default]
    StripAll,
    PreserveOriginal,
    AssignToDestination,
    Hybrid,
}

impl PermissionStrategy {
    pub fn parse(value: &str) -> std::result::Result<Self, String> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stripall" | "strip-all" | "strip" => Ok(PermissionStrategy::StripAll),
            "preserveoriginal" | "preserve-original" | "preserve" => {
                Ok(PermissionStrategy::PreserveOriginal)
            }
            "assigntodestination" | "assign-to-destination" | "assign" => {
                Ok(PermissionStrategy::AssignToDestination)
            }
            "hybrid" => Ok(PermissionStrategy::Hybrid),
            _ => Err(format!(
                "invalid permission strategy {}; expected StripAll, PreserveOriginal, AssignToDestination, or Hybrid",
                value
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionStrategy::StripAll => "StripAll",
            PermissionStrategy::PreserveOriginal => "PreserveOriginal",
            PermissionStrategy::AssignToDestination => "AssignToDestination",
            PermissionStrategy::Hybrid => "Hybrid",
        }
    }

    /// Strategies that rewrite owners need take-ownership and restore privileges.
    pub fn needs_privileges(&self) -> bool {
        matches!(
            self,
            PermissionStrategy::AssignToDestination | PermissionStrategy::Hybrid
        )
    }
}

impl From<String> for PermissionStrategy {
    fn from(value: String) -> Self {
        PermissionStrategy::parse(&value).unwrap_or_default()
    }
}

impl From<PermissionStrategy> for String {
    fn from(strategy: PermissionStrategy) -> Self {
        strategy.as_str().to_string()
    }
}

impl fmt::Display for PermissionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeMode {
    #[default]
    Replace,
    Merge,
    CreateNew,
}

impl MergeMode {
    pub fn parse(value: &str) -> std::result::Result<Self, String> {
        match value.trim().to_ascii_lowercase().as_str() {
            "replace" => Ok(MergeMode::Replace),
            "merge" => Ok(MergeMode::Merge),
            "createnew" | "create-new" | "new" => Ok(MergeMode::CreateNew),
            _ => Err(format!(
                "invalid merge mode {}; expected replace, merge, or create-new",
                value
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MergeMode::Replace => "Replace",
            MergeMode::Merge => "Merge",
            MergeMode::CreateNew => "CreateNew",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    SkipDuplicate,
    #[default]
    RenameWithSuffix,
    KeepNewer,
    KeepLarger,
    AutoRename,
}

impl ConflictPolicy {
    pub fn parse(value: &str) -> std::result::Result<Self, String> {
        match value.trim().to_ascii_lowercase().as_str() {
            "skipduplicate" | "skip-duplicate" | "skip" => Ok(ConflictPolicy::SkipDuplicate),
            "renamewithsuffix" | "rename-with-suffix" | "rename" => {
                Ok(ConflictPolicy::RenameWithSuffix)
            }
            "keepnewer" | "keep-newer" | "newer" => Ok(ConflictPolicy::KeepNewer),
            "keeplarger" | "keep-larger" | "larger" => Ok(ConflictPolicy::KeepLarger),
            "autorename" | "auto-rename" => Ok(ConflictPolicy::AutoRename),
            _ => Err(format!(
                "invalid conflict policy {}; expected skip, rename, keep-newer, keep-larger, or auto-rename",
                value
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPolicy::SkipDuplicate => "SkipDuplicate",
            ConflictPolicy::RenameWithSuffix => "RenameWithSuffix",
            ConflictPolicy::KeepNewer => "KeepNewer",
            ConflictPolicy::KeepLarger => "KeepLarger",
            ConflictPolicy::AutoRename => "AutoRename",
        }
    }
}

/// Lifecycle of a single action or job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActionStatus {
    #[default]
    Idle,
    Scanning,
    Ready,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Idle => "Idle",
            ActionStatus::Scanning => "Scanning",
            ActionStatus::Ready => "Ready",
            ActionStatus::Running => "Running",
            ActionStatus::Success => "Success",
            ActionStatus::Failed => "Failed",
            ActionStatus::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionStatus::Success | ActionStatus::Failed | ActionStatus::Cancelled
        )
    }

    /// Validates a state-machine step. Running may only be entered from
    /// Idle or Ready; terminal states are final.
    pub fn transition(self, next: ActionStatus) -> Result<ActionStatus> {
        let allowed = match (self, next) {
            (ActionStatus::Idle, ActionStatus::Scanning) => true,
            (ActionStatus::Scanning, ActionStatus::Ready) => true,
            (ActionStatus::Scanning, ActionStatus::Failed) => true,
            (ActionStatus::Scanning, ActionStatus::Cancelled) => true,
            (ActionStatus::Idle | ActionStatus::Ready, ActionStatus::Running) => true,
            (ActionStatus::Idle | ActionStatus::Ready, ActionStatus::Cancelled) => true,
            (ActionStatus::Running, next) => next.is_terminal(),
            _ => false,
        };
        if allowed {
            Ok(next)
        } else {
            Err(VaultError::message(format!(
                "invalid status transition {} -> {}",
                self.as_str(),
                next.as_str()
            )))
        }
    }
}

impl From<String> for ActionStatus {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "scanning" => ActionStatus::Scanning,
            "ready" => ActionStatus::Ready,
            "running" => ActionStatus::Running,
            "success" => ActionStatus::Success,
            "failed" => ActionStatus::Failed,
            "cancelled" => ActionStatus::Cancelled,
            _ => ActionStatus::Idle,
        }
    }
}

impl From<ActionStatus> for String {
    fn from(status: ActionStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunMode {
    pub dry_run: bool,
    pub verbose: bool,
}
