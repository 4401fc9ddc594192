use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::backup::space::DEFAULT_FREE_SPACE_MARGIN;
use crate::dispatch::actions::QuickActionRecord;
use crate::filter::FilterRules;
use crate::types::{ConflictPolicy, PermissionStrategy};
use crate::util::paths::default_users_root;

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default, rename = "usersRoot", skip_serializing_if = "Option::is_none")]
    pub users_root: Option<String>,
    #[serde(default, rename = "permissionStrategy", skip_serializing_if = "Option::is_none")]
    pub permission_strategy: Option<String>,
    #[serde(default, rename = "conflictPolicy", skip_serializing_if = "Option::is_none")]
    pub conflict_policy: Option<String>,
    #[serde(default, rename = "freeSpaceMargin", skip_serializing_if = "Option::is_none")]
    pub free_space_margin: Option<f64>,
    #[serde(default, rename = "logLevel", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterConfig>,
    #[serde(default, rename = "quickActions", skip_serializing_if = "Vec::is_empty")]
    pub quick_actions: Vec<QuickActionConfig>,
}

/// Overrides for the default filter rules. `dangerousFiles` only adds names.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct FilterConfig {
    #[serde(default, rename = "enableFileSizeLimit", skip_serializing_if = "Option::is_none")]
    pub enable_file_size_limit: Option<bool>,
    #[serde(default, rename = "enableFolderSizeLimit", skip_serializing_if = "Option::is_none")]
    pub enable_folder_size_limit: Option<bool>,
    #[serde(default, rename = "maxSingleFileSize", skip_serializing_if = "Option::is_none")]
    pub max_single_file_size: Option<u64>,
    #[serde(default, rename = "maxFolderSize", skip_serializing_if = "Option::is_none")]
    pub max_folder_size: Option<u64>,
    #[serde(default, rename = "excludePatterns", skip_serializing_if = "Option::is_none")]
    pub exclude_patterns: Option<Vec<String>>,
    #[serde(default, rename = "excludeFolders", skip_serializing_if = "Option::is_none")]
    pub exclude_folders: Option<Vec<String>>,
    #[serde(default, rename = "dangerousFiles", skip_serializing_if = "Vec::is_empty")]
    pub dangerous_files: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct QuickActionConfig {
    pub name: String,
    pub sources: Vec<String>,
    pub destination: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(default, rename = "requiresAdmin")]
    pub requires_admin: bool,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub destination: Option<PathBuf>,
    pub users_root: PathBuf,
    pub permission_strategy: PermissionStrategy,
    pub conflict_policy: ConflictPolicy,
    pub free_space_margin: f64,
    pub log_level: Option<String>,
    pub filter_rules: FilterRules,
    pub quick_actions: Vec<QuickActionRecord>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            destination: None,
            users_root: default_users_root(),
            permission_strategy: PermissionStrategy::default(),
            conflict_policy: ConflictPolicy::default(),
            free_space_margin: DEFAULT_FREE_SPACE_MARGIN,
            log_level: None,
            filter_rules: FilterRules::default(),
            quick_actions: Vec::new(),
        }
    }
}
