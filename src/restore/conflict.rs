use std::fs;
use std::path::{Path, PathBuf};

use crate::copy::{copy_preserving_mtime, FileAction, FileOutcome};
use crate::error::{JobError, Result};
use crate::types::ConflictPolicy;

pub const MAX_RENAME_ATTEMPTS: u32 = 1000;

/// Copy step used by restore. Only does anything different when the
/// destination file already exists.
#[derive(Debug, Clone, Copy)]
pub struct ConflictCopy {
    pub policy: ConflictPolicy,
}

impl ConflictCopy {
    pub fn new(policy: ConflictPolicy) -> Self {
        Self { policy }
    }
}

impl FileAction for ConflictCopy {
    fn copy_file(&self, source: &Path, dest: &Path) -> Result<FileOutcome> {
        if !dest.exists() {
            return copy_to(source, dest);
        }
        match self.policy {
            ConflictPolicy::SkipDuplicate => Ok(skipped("destination exists")),
            ConflictPolicy::RenameWithSuffix => copy_to(source, &free_sibling(dest, "_backup")?),
            ConflictPolicy::AutoRename => copy_to(source, &free_sibling(dest, "_restored")?),
            ConflictPolicy::KeepNewer => {
                let src_time = fs::metadata(source).and_then(|m| m.modified())?;
                let dst_time = fs::metadata(dest).and_then(|m| m.modified())?;
                if dst_time >= src_time {
                    return Ok(skipped("destination is newer or equal"));
                }
                overwrite(source, dest)
            }
            ConflictPolicy::KeepLarger => {
                let src_len = fs::metadata(source)?.len();
                let dst_len = fs::metadata(dest)?.len();
                if dst_len >= src_len {
                    return Ok(skipped("destination is larger or equal"));
                }
                overwrite(source, dest)
            }
        }
    }
}

fn copy_to(source: &Path, dest: &Path) -> Result<FileOutcome> {
    let bytes = copy_preserving_mtime(source, dest)?;
    Ok(FileOutcome::Copied {
        dest: dest.to_path_buf(),
        bytes,
    })
}

/// Stages the copy beside `dest` and renames it over; `dest` is untouched
/// unless the copy completes.
fn overwrite(source: &Path, dest: &Path) -> Result<FileOutcome> {
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    let staged = tempfile::Builder::new()
        .prefix(".profilevault-")
        .tempfile_in(parent)
        .map_err(|e| JobError::CopyFailed(format!("stage {}: {}", dest.display(), e)))?;
    let bytes = copy_preserving_mtime(source, staged.path())?;
    staged
        .persist(dest)
        .map_err(|e| JobError::CopyFailed(format!("replace {}: {}", dest.display(), e.error)))?;
    Ok(FileOutcome::Copied {
        dest: dest.to_path_buf(),
        bytes,
    })
}

fn skipped(reason: &str) -> FileOutcome {
    FileOutcome::Skipped {
        reason: reason.to_string(),
    }
}

/// First free `<stem><tag><N>.<ext>` beside `dest`, N counting from 1.
pub fn free_sibling(dest: &Path, tag: &str) -> Result<PathBuf> {
    let parent = dest.parent().unwrap_or_else(|| Path::new(""));
    let stem = dest
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = dest
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    for n in 1..=MAX_RENAME_ATTEMPTS {
        let candidate = parent.join(format!("{}{}{}{}", stem, tag, n, ext));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(JobError::ConflictUnresolvable(format!(
        "no free name for {} after {} attempts",
        dest.display(),
        MAX_RENAME_ATTEMPTS
    ))
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn set_mtime(path: &Path, when: SystemTime) {
        fs::OpenOptions::new()
            .write(true)
            .open(path)
            .and_then(|f| f.set_modified(when))
            .expect("set mtime");
    }

    fn pair(src_body: &[u8], dst_body: &[u8]) -> (tempfile::TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let src = dir.path().join("backup_a.txt");
        let dst = dir.path().join("a.txt");
        fs::write(&src, src_body).expect("write");
        fs::write(&dst, dst_body).expect("write");
        (dir, src, dst)
    }

    #[test]
    fn sibling_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("a.txt");
        assert_eq!(free_sibling(&dest, "_backup").expect("name"), dir.path().join("a_backup1.txt"));
        fs::write(dir.path().join("a_backup1.txt"), b"").expect("write");
        assert_eq!(free_sibling(&dest, "_backup").expect("name"), dir.path().join("a_backup2.txt"));
        assert_eq!(
            free_sibling(&dir.path().join("README"), "_restored").expect("name"),
            dir.path().join("README_restored1")
        );
    }

    #[test]
    fn rename_gives_up_after_bound() {
        let dir = tempfile::tempdir().expect("tempdir");
        for n in 1..=MAX_RENAME_ATTEMPTS {
            fs::write(dir.path().join(format!("a_backup{}.txt", n)), b"").expect("write");
        }
        let err = free_sibling(&dir.path().join("a.txt"), "_backup").expect_err("exhausted");
        assert!(matches!(
            err,
            crate::error::VaultError::Job(JobError::ConflictUnresolvable(_))
        ));
    }

    #[test]
    fn rename_with_suffix_keeps_both() {
        let (dir, src, dst) = pair(b"backup", b"local");
        let outcome = ConflictCopy::new(ConflictPolicy::RenameWithSuffix)
            .copy_file(&src, &dst)
            .expect("copy");
        let renamed = dir.path().join("a_backup1.txt");
        assert_eq!(outcome, FileOutcome::Copied { dest: renamed.clone(), bytes: 6 });
        assert_eq!(fs::read(&dst).expect("read"), b"local");
        assert_eq!(fs::read(&renamed).expect("read"), b"backup");
    }

    #[test]
    fn auto_rename_scheme() {
        let (dir, src, dst) = pair(b"backup", b"local");
        ConflictCopy::new(ConflictPolicy::AutoRename)
            .copy_file(&src, &dst)
            .expect("copy");
        assert!(dir.path().join("a_restored1.txt").is_file());
    }

    #[test]
    fn skip_duplicate_leaves_destination() {
        let (_dir, src, dst) = pair(b"backup", b"local");
        let outcome = ConflictCopy::new(ConflictPolicy::SkipDuplicate)
            .copy_file(&src, &dst)
            .expect("copy");
        assert!(matches!(outcome, FileOutcome::Skipped { .. }));
        assert_eq!(fs::read(&dst).expect("read"), b"local");
    }

    #[test]
    fn keep_newer_compares_mtimes() {
        let (_dir, src, dst) = pair(b"backup", b"local");
        let now = SystemTime::now();
        set_mtime(&dst, now);
        set_mtime(&src, now - Duration::from_secs(1));
        let policy = ConflictCopy::new(ConflictPolicy::KeepNewer);
        assert!(matches!(policy.copy_file(&src, &dst).expect("copy"), FileOutcome::Skipped { .. }));
        assert_eq!(fs::read(&dst).expect("read"), b"local");

        set_mtime(&src, now + Duration::from_secs(60));
        assert!(matches!(policy.copy_file(&src, &dst).expect("copy"), FileOutcome::Copied { .. }));
        assert_eq!(fs::read(&dst).expect("read"), b"backup");
    }

    #[test]
    fn keep_larger_compares_sizes() {
        let (_dir, src, dst) = pair(b"tiny", b"much larger");
        let policy = ConflictCopy::new(ConflictPolicy::KeepLarger);
        assert!(matches!(policy.copy_file(&src, &dst).expect("copy"), FileOutcome::Skipped { .. }));
        fs::write(&src, b"this backup copy is the largest").expect("write");
        assert!(matches!(policy.copy_file(&src, &dst).expect("copy"), FileOutcome::Copied { .. }));
        assert_eq!(fs::read(&dst).expect("read"), b"this backup copy is the largest");
    }

    #[test]
    fn failed_overwrite_keeps_destination() {
        let dir = tempfile::tempdir().expect("tempdir");
        let src = dir.path().join("backup_a.txt");
        let dst = dir.path().join("a.txt");
        // a directory source makes the byte copy fail after staging
        fs::create_dir(&src).expect("mkdir");
        fs::write(&dst, b"local").expect("write");
        set_mtime(&dst, SystemTime::now() - Duration::from_secs(86_400));

        let err = ConflictCopy::new(ConflictPolicy::KeepNewer)
            .copy_file(&src, &dst)
            .expect_err("copy fails");
        assert!(matches!(err, crate::error::VaultError::Job(JobError::CopyFailed(_))));
        assert_eq!(fs::read(&dst).expect("read"), b"local");
        assert_eq!(fs::read_dir(dir.path()).expect("list").count(), 2);
    }
}
