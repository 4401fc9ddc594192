use std::env;
use std::path::{Component, Path, PathBuf};

use crate::error::{Result, VaultError};

/// Names used as a single path component (quick-action destinations,
/// catalog identifiers).
pub fn is_safe_name(name: &str) -> bool {
    if name.is_empty() || name == "." || name == ".." {
        return false;
    }
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' || c == ' ')
}

/// Normalizes a profile-relative folder path to forward-slash form.
/// Absolute paths, drive prefixes and `..` components are rejected.
pub fn normalize_relative(raw: &str) -> Result<String> {
    let unified = raw.trim().replace('\\', "/");
    if unified.starts_with('/') || has_drive_prefix(&unified) {
        return Err(VaultError::message(format!(
            "folder path {} must be relative to the profile root",
            raw
        )));
    }
    let mut parts = Vec::new();
    for part in unified.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                return Err(VaultError::message(format!(
                    "folder path {} must not contain '..'",
                    raw
                )))
            }
            other => parts.push(other),
        }
    }
    Ok(parts.join("/"))
}

fn has_drive_prefix(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Joins a normalized relative path onto a root, one component at a time.
pub fn join_relative(root: &Path, relative: &str) -> PathBuf {
    let mut out = root.to_path_buf();
    for part in relative.split('/').filter(|p| !p.is_empty()) {
        out.push(part);
    }
    out
}

/// Forward-slash rendering of `path` relative to `root`; falls back to the
/// full path when `path` is outside `root`.
pub fn relative_slash(path: &Path, root: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();
    parts.join("/")
}

pub fn system_drive() -> PathBuf {
    if cfg!(windows) {
        let drive = env::var("SystemDrive").unwrap_or_else(|_| "C:".to_string());
        PathBuf::from(format!("{}\\", drive.trim_end_matches('\\')))
    } else {
        PathBuf::from("/")
    }
}

pub fn default_users_root() -> PathBuf {
    if cfg!(windows) {
        system_drive().join("Users")
    } else {
        PathBuf::from("/home")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_backslashes_and_dots() {
        assert_eq!(
            normalize_relative("AppData\\Roaming\\").expect("normalize"),
            "AppData/Roaming"
        );
        assert_eq!(normalize_relative("./Documents").expect("normalize"), "Documents");
    }

    #[test]
    fn rejects_escaping_paths() {
        assert!(normalize_relative("../Other").is_err());
        assert!(normalize_relative("/etc").is_err());
        assert!(normalize_relative("C:\\Users").is_err());
    }

    #[test]
    fn relative_slash_strips_root() {
        let root = Path::new("/tmp/profile");
        let path = root.join("AppData").join("Local").join("x.txt");
        assert_eq!(relative_slash(&path, root), "AppData/Local/x.txt");
    }

    #[test]
    fn safe_names() {
        assert!(is_safe_name("Sticky Notes"));
        assert!(!is_safe_name(".."));
        assert!(!is_safe_name("a/b"));
    }
}
