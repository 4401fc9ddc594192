use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use crate::profile::uid_from_sid;

const DEFAULT_PARENT_MODE: u32 = 0o755;
const OWNER_BITS: u32 = 0o700;

/// Privileges are a Windows token concept; nothing to hold here.
#[derive(Debug)]
pub struct PrivilegeScope;

impl PrivilegeScope {
    pub fn acquire(_needed: bool) -> Self {
        PrivilegeScope
    }

    pub fn is_held(&self) -> bool {
        true
    }
}

/// Narrows the entry to what its parent directory grants group and others.
/// The owner keeps its bits and nothing is ever widened.
pub fn strip(path: &Path) -> io::Result<()> {
    let current = fs::symlink_metadata(path)?.permissions().mode() & 0o777;
    let inherited = path
        .parent()
        .and_then(|p| fs::metadata(p).ok())
        .map(|m| m.permissions().mode() & 0o777)
        .unwrap_or(DEFAULT_PARENT_MODE);
    let mode = current & (inherited | OWNER_BITS);
    if mode == current {
        return Ok(());
    }
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

pub fn assign(path: &Path, sid: &str) -> io::Result<()> {
    let uid = uid_from_sid(sid).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a local account identifier", sid),
        )
    })?;
    std::os::unix::fs::chown(path, Some(uid), None)?;
    let meta = fs::symlink_metadata(path)?;
    let mode = if meta.is_dir() { 0o700 } else { 0o600 };
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}
