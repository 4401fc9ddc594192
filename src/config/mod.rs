use std::path::PathBuf;

pub mod load;
pub mod model;
pub mod save;

#[cfg(windows)]
const CONFIG_FILE: &str = "profilevault.yaml";
#[cfg(not(windows))]
const CONFIG_FILE: &str = "/etc/profilevault.yaml";

/// `profilevault.yaml` next to the executable on Windows,
/// `/etc/profilevault.yaml` elsewhere.
#[cfg(windows)]
pub fn default_config_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(CONFIG_FILE)))
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE))
}

#[cfg(not(windows))]
pub fn default_config_path() -> PathBuf {
    PathBuf::from(CONFIG_FILE)
}
