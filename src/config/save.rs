use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crate::backup::space::DEFAULT_FREE_SPACE_MARGIN;
use crate::config::model::Config;
use crate::error::{Result, VaultError};
use crate::types::{ConflictPolicy, PermissionStrategy};
use crate::util::paths::default_users_root;

pub fn save_config(path: &str, cfg: &Config) -> Result<()> {
    let data = serde_yaml::to_string(cfg)
        .map_err(|e| VaultError::message(format!("encode config: {}", e)))?;
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| VaultError::message(format!("create {}: {}", parent.display(), e)))?;
    }
    let mut file = File::create(path)
        .map_err(|e| VaultError::message(format!("write config {}: {}", path, e)))?;
    file.write_all(data.as_bytes())
        .map_err(|e| VaultError::message(format!("write config {}: {}", path, e)))?;
    Ok(())
}

/// Config written by `config init`: every scalar setting spelled out with
/// its default.
pub fn starter_config(destination: Option<&Path>) -> Config {
    Config {
        destination: destination.map(|d| d.display().to_string()),
        users_root: Some(default_users_root().display().to_string()),
        permission_strategy: Some(PermissionStrategy::default().as_str().to_string()),
        conflict_policy: Some(ConflictPolicy::default().as_str().to_string()),
        free_space_margin: Some(DEFAULT_FREE_SPACE_MARGIN),
        log_level: Some("info".to_string()),
        filter: None,
        quick_actions: Vec::new(),
    }
}
