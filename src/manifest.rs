use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::error::{JobError, ManifestError, Result};
use crate::filter::FilterRules;
use crate::profile::FolderSelection;
use crate::types::PermissionStrategy;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const FORMAT_VERSION: &str = "1.0";
pub const SUPPORTED_MAJOR: u32 = 1;
pub const BACKUP_KIND: &str = "user_profiles";
const CHECKSUM_FIELD: &str = "manifest_checksum";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Completion {
    #[default]
    Complete,
    Partial,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupMetadata {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub created_date: String,
    #[serde(default)]
    pub source_machine: String,
    #[serde(default, rename = "sak_utility_version")]
    pub origin_app_version: String,
    #[serde(default)]
    pub backup_type: String,
    #[serde(default)]
    pub completion: Completion,
    #[serde(default)]
    pub total_files_written: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackedUpUser {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub sid: String,
    #[serde(default, rename = "profile_path")]
    pub original_profile_root: String,
    #[serde(default)]
    pub backed_up_folders: Vec<FolderSelection>,
    #[serde(default, rename = "permissions_mode")]
    pub permission_strategy: PermissionStrategy,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default = "default_compression")]
    pub compression: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum_sha256: Option<String>,
}

fn default_compression() -> String {
    "none".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub backup_metadata: BackupMetadata,
    #[serde(default)]
    pub users: Vec<BackedUpUser>,
    #[serde(default)]
    pub filter_rules: FilterRules,
    #[serde(default, rename = "total_backup_size_bytes")]
    pub total_bytes_written: u64,
    #[serde(default)]
    pub manifest_checksum: String,
}

/// A manifest read from disk plus the outcome of its self-check.
#[derive(Debug, Clone)]
pub struct LoadedManifest {
    pub manifest: BackupManifest,
    pub checksum_valid: bool,
}

impl BackupManifest {
    /// Metadata-only manifest stamped with the current time and host.
    pub fn skeleton(filter_rules: FilterRules) -> Self {
        let machine = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            backup_metadata: BackupMetadata {
                version: FORMAT_VERSION.to_string(),
                created_date: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
                source_machine: machine,
                origin_app_version: env!("CARGO_PKG_VERSION").to_string(),
                backup_type: BACKUP_KIND.to_string(),
                completion: Completion::Complete,
                total_files_written: 0,
            },
            users: Vec::new(),
            filter_rules,
            total_bytes_written: 0,
            manifest_checksum: String::new(),
        }
    }

    pub fn user(&self, username: &str) -> Option<&BackedUpUser> {
        self.users
            .iter()
            .find(|u| u.username.eq_ignore_ascii_case(username))
    }

    pub fn compute_checksum(&self) -> Result<String> {
        let value = serde_json::to_value(self)
            .map_err(|e| JobError::ManifestWriteFailed(e.to_string()))?;
        Ok(checksum_of(value))
    }

    /// Writes `manifest.json` into `dir` through a temp file and rename.
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        let mut stamped = self.clone();
        stamped.manifest_checksum = self.compute_checksum()?;
        let body = serde_json::to_string_pretty(&stamped)
            .map_err(|e| JobError::ManifestWriteFailed(e.to_string()))?;
        let target = dir.join(MANIFEST_FILE);
        let failed = |e: std::io::Error| {
            JobError::ManifestWriteFailed(format!("{}: {}", target.display(), e))
        };
        let mut tmp = NamedTempFile::new_in(dir).map_err(failed)?;
        tmp.write_all(body.as_bytes()).map_err(failed)?;
        tmp.as_file().sync_all().map_err(failed)?;
        tmp.persist(&target).map_err(|e| failed(e.error))?;
        Ok(target)
    }

    pub fn load(dir: &Path) -> Result<LoadedManifest> {
        let path = dir.join(MANIFEST_FILE);
        if !path.is_file() {
            return Err(ManifestError::Missing(path.display().to_string()).into());
        }
        let raw = fs::read_to_string(&path)
            .map_err(|e| ManifestError::Parse(format!("{}: {}", path.display(), e)))?;
        parse(&raw)
    }
}

pub fn parse(raw: &str) -> Result<LoadedManifest> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| ManifestError::Parse(e.to_string()))?;
    let manifest: BackupManifest = serde_json::from_value(value.clone())
        .map_err(|e| ManifestError::Parse(e.to_string()))?;
    check_version(&manifest.backup_metadata.version)?;
    let checksum_valid = checksum_of(value) == manifest.manifest_checksum;
    Ok(LoadedManifest {
        manifest,
        checksum_valid,
    })
}

fn check_version(version: &str) -> Result<()> {
    let major = version
        .split('.')
        .next()
        .and_then(|m| m.trim().parse::<u32>().ok());
    match major {
        Some(SUPPORTED_MAJOR) => Ok(()),
        _ => Err(ManifestError::UnsupportedVersion(version.to_string()).into()),
    }
}

/// Digest of the compact JSON form with the checksum field blanked.
fn checksum_of(mut value: Value) -> String {
    if let Value::Object(map) = &mut value {
        map.insert(CHECKSUM_FIELD.to_string(), Value::String(String::new()));
    }
    let canonical = value.to_string();
    let digest = Sha256::digest(canonical.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
