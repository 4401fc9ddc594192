use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use crate::error::{Result, VaultError};
use crate::profile::{current_user, AccountProbe};
use crate::util::paths::default_users_root;

/// Directory-based probe for hosts without a SAM: every directory under the
/// users root is an account, and its owner uid becomes an `S-1-22-1-<uid>`
/// identifier.
#[derive(Debug, Clone)]
pub struct LocalProbe {
    users_root: PathBuf,
}

impl LocalProbe {
    pub fn new(users_root: &Path) -> Self {
        Self {
            users_root: users_root.to_path_buf(),
        }
    }
}

impl Default for LocalProbe {
    fn default() -> Self {
        Self::new(&default_users_root())
    }
}

impl AccountProbe for LocalProbe {
    fn account_names(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.users_root).map_err(|e| {
            VaultError::message(format!("read {}: {}", self.users_root.display(), e))
        })?;
        let mut names = Vec::new();
        for entry in entries.flatten() {
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        names.sort();
        Ok(names)
    }

    fn lookup_sid(&self, username: &str) -> Result<String> {
        let path = self.users_root.join(username);
        let meta = fs::metadata(&path)
            .map_err(|e| VaultError::message(format!("stat {}: {}", path.display(), e)))?;
        Ok(format!("S-1-22-1-{}", meta.uid()))
    }

    fn registry_profile_root(&self, _sid: &str) -> Option<PathBuf> {
        None
    }

    fn users_root(&self) -> PathBuf {
        self.users_root.clone()
    }

    fn active_session_users(&self) -> Result<Vec<String>> {
        Ok(current_user().into_iter().collect())
    }
}
