use std::path::{Path, PathBuf};

use sysinfo::Disks;

pub const DEFAULT_FREE_SPACE_MARGIN: f64 = 1.10;
pub const MIN_FREE_SPACE_MARGIN: f64 = 1.05;

/// Free-space source for the destination volume.
pub trait VolumeSpace {
    /// `None` when the volume cannot be determined.
    fn available_bytes(&self, path: &Path) -> Option<u64>;
}

/// Reads mounted volumes through sysinfo and picks the one with the
/// longest mount point containing the path.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemVolumes;

impl VolumeSpace for SystemVolumes {
    fn available_bytes(&self, path: &Path) -> Option<u64> {
        let target = existing_ancestor(path)?;
        let disks = Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .filter(|disk| target.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space())
    }
}

/// Fixed answer, for callers that already know the figure.
#[derive(Debug, Clone, Copy)]
pub struct FixedSpace(pub Option<u64>);

impl VolumeSpace for FixedSpace {
    fn available_bytes(&self, _path: &Path) -> Option<u64> {
        self.0
    }
}

/// `planned × margin`, rounded up. The margin is taken to three decimals.
pub fn required_bytes(planned: u64, margin: f64) -> u64 {
    let permille = (margin * 1000.0).round().max(0.0) as u128;
    let required = (planned as u128 * permille).div_ceil(1000);
    u64::try_from(required).unwrap_or(u64::MAX)
}

fn existing_ancestor(path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .find(|p| p.exists())
        .and_then(|p| p.canonicalize().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn margin_applied_and_rounded_up() {
        assert_eq!(required_bytes(1000, DEFAULT_FREE_SPACE_MARGIN), 1100);
        assert_eq!(required_bytes(1, DEFAULT_FREE_SPACE_MARGIN), 2);
        assert_eq!(required_bytes(0, DEFAULT_FREE_SPACE_MARGIN), 0);
        assert_eq!(required_bytes(10, DEFAULT_FREE_SPACE_MARGIN), 11);
        assert_eq!(required_bytes(u64::MAX, 2.0), u64::MAX);
    }

    #[test]
    fn missing_leaf_resolves_to_parent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let leaf = dir.path().join("not").join("yet");
        let found = existing_ancestor(&leaf).expect("ancestor");
        assert_eq!(found, dir.path().canonicalize().expect("canonical"));
    }
}
