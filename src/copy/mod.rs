use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::{JobError, Result};
use crate::events::{EventSink, FileStage};
use crate::filter::{DropReason, FileFilter, FolderGlobs, Verdict};
use crate::permission::PermissionPolicy;
use crate::stats::OperationStats;

pub mod cancel;
pub mod progress;

pub use cancel::CancelFlag;
pub use progress::ProgressTracker;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Copied { dest: PathBuf, bytes: u64 },
    Skipped { reason: String },
}

/// The per-file step of the pipeline. Backup copies plainly; restore
/// substitutes a conflict-resolving copy.
pub trait FileAction {
    fn copy_file(&self, source: &Path, dest: &Path) -> Result<FileOutcome>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PlainCopy;

impl FileAction for PlainCopy {
    fn copy_file(&self, source: &Path, dest: &Path) -> Result<FileOutcome> {
        let bytes = copy_preserving_mtime(source, dest)?;
        Ok(FileOutcome::Copied {
            dest: dest.to_path_buf(),
            bytes,
        })
    }
}

/// Byte copy that carries the source modification time over.
pub fn copy_preserving_mtime(source: &Path, dest: &Path) -> Result<u64> {
    let bytes = fs::copy(source, dest).map_err(|e| {
        JobError::CopyFailed(format!("{} -> {}: {}", source.display(), dest.display(), e))
    })?;
    let modified = fs::metadata(source).and_then(|m| m.modified());
    if let Ok(modified) = modified {
        let stamped = fs::OpenOptions::new()
            .write(true)
            .open(dest)
            .and_then(|f| f.set_modified(modified));
        if let Err(err) = stamped {
            debug!("keep mtime {}: {}", dest.display(), err);
        }
    }
    Ok(bytes)
}

/// One source tree mirrored into one destination tree.
#[derive(Debug, Clone)]
pub struct TreeCopy<'a> {
    pub source: &'a Path,
    pub dest: &'a Path,
    /// Root that relative paths are measured from when filtering.
    pub filter_root: &'a Path,
    pub globs: FolderGlobs,
    pub dest_sid: Option<&'a str>,
}

/// Depth-first filtered copy. A pipeline lives for one job and accumulates
/// that job's stats and progress across every tree it copies.
pub struct CopyPipeline<'a> {
    filter: &'a FileFilter,
    permissions: &'a PermissionPolicy,
    cancel: &'a CancelFlag,
    events: &'a EventSink,
    stats: OperationStats,
    progress: ProgressTracker,
    /// Canonical roots this job writes; never walked as sources.
    output_roots: Vec<PathBuf>,
}

impl<'a> CopyPipeline<'a> {
    pub fn new(
        filter: &'a FileFilter,
        permissions: &'a PermissionPolicy,
        cancel: &'a CancelFlag,
        events: &'a EventSink,
        progress: ProgressTracker,
    ) -> Self {
        Self {
            filter,
            permissions,
            cancel,
            events,
            stats: OperationStats::new(),
            progress,
            output_roots: Vec::new(),
        }
    }

    /// Keeps every tree walked afterwards from descending into `root`.
    pub fn exclude_output(&mut self, root: &Path) {
        self.output_roots.push(canonical(root));
    }

    pub fn stats(&self) -> &OperationStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut OperationStats {
        &mut self.stats
    }

    pub fn finish(self) -> OperationStats {
        self.events.progress(self.progress.snapshot());
        self.stats.finish()
    }

    /// Returns `Err(Cancelled)` as soon as the flag is seen; every other
    /// failure is counted and the walk continues.
    pub fn copy_tree(&mut self, tree: &TreeCopy<'_>, action: &dyn FileAction) -> Result<()> {
        self.cancel.check()?;
        if tree.source.is_file() {
            // A lone file source: `dest` names the destination file.
            match fs::metadata(tree.source) {
                Ok(meta) => self.copy_entry(tree.source, tree.dest, meta.len(), tree, action),
                Err(err) => {
                    let message = format!("stat {}: {}", tree.source.display(), err);
                    self.events.warn(&message);
                    self.stats.record_error(message);
                }
            }
            return Ok(());
        }
        if !tree.source.is_dir() {
            self.events
                .info(format!("{} not found, nothing to copy", tree.source.display()));
            return Ok(());
        }
        if let Verdict::Drop(reason) = self.filter.classify_dir(tree.source, tree.filter_root) {
            self.skip(tree.source, reason);
            return Ok(());
        }
        if let Err(err) = fs::create_dir_all(tree.dest) {
            let message = format!("create {}: {}", tree.dest.display(), err);
            self.events.warn(&message);
            self.stats.record_error(message);
            return Ok(());
        }

        let walk_root = canonical(tree.source);
        let mut outputs = self.output_roots.clone();
        outputs.push(canonical(tree.dest));

        let mut walker = WalkDir::new(tree.source)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();
        loop {
            self.cancel.check()?;
            let entry = match walker.next() {
                None => break,
                Some(Ok(entry)) => entry,
                Some(Err(err)) => {
                    let message = format!("walk {}: {}", tree.source.display(), err);
                    self.events.warn(&message);
                    self.stats.record_error(message);
                    continue;
                }
            };
            let path = entry.path();
            let relative = path.strip_prefix(tree.source).unwrap_or(path);
            let target = tree.dest.join(relative);
            let file_type = entry.file_type();

            if file_type.is_symlink() {
                debug!("not following link {}", path.display());
                continue;
            }
            if file_type.is_dir() {
                let resolved = walk_root.join(relative);
                if outputs.iter().any(|o| resolved.starts_with(o)) {
                    walker.skip_current_dir();
                    debug!("not copying output directory {}", path.display());
                    continue;
                }
                if let Verdict::Drop(reason) = self.filter.classify_dir(path, tree.filter_root) {
                    walker.skip_current_dir();
                    self.skip(path, reason);
                    continue;
                }
                if let Err(err) = fs::create_dir_all(&target) {
                    walker.skip_current_dir();
                    let message = format!("create {}: {}", target.display(), err);
                    self.events.warn(&message);
                    self.stats.record_error(message);
                }
                continue;
            }

            let size = match entry.metadata() {
                Ok(meta) => meta.len(),
                Err(err) => {
                    let message = format!("stat {}: {}", path.display(), err);
                    self.events.warn(&message);
                    self.stats.record_error(message);
                    continue;
                }
            };
            self.copy_entry(path, &target, size, tree, action);
        }
        Ok(())
    }

    fn copy_entry(
        &mut self,
        path: &Path,
        target: &Path,
        size: u64,
        tree: &TreeCopy<'_>,
        action: &dyn FileAction,
    ) {
        if let Verdict::Drop(reason) = self.filter.classify_file(path, size, tree.filter_root) {
            self.skip(path, reason);
            return;
        }
        let name = entry_name(path);
        if !tree.globs.allows(&name) {
            self.skip(path, DropReason::MatchesExcludePattern);
            return;
        }
        if let Some(parent) = target.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                let message = format!("create {}: {}", parent.display(), err);
                self.events.warn(&message);
                self.stats.record_error(message);
                return;
            }
        }

        self.events.file(path.to_path_buf(), FileStage::CopyStarted);
        match action.copy_file(path, target) {
            Ok(FileOutcome::Copied { dest, bytes }) => {
                self.stats.record_copied(&dest, bytes);
                self.events.file(dest.clone(), FileStage::Copied { bytes });
                match self.permissions.apply(&dest, tree.dest_sid) {
                    Ok(()) => self.events.file(dest, FileStage::PermissionsApplied),
                    Err(err) => {
                        let message = err.to_string();
                        self.events.warn(&message);
                        self.stats.warn(message);
                    }
                }
                if let Some(update) = self.progress.record(bytes) {
                    self.events.progress(update);
                }
            }
            Ok(FileOutcome::Skipped { reason }) => {
                self.events
                    .info(format!("skipped {}: {}", path.display(), reason));
                self.stats.record_skipped(path, reason);
            }
            Err(err) => {
                let message = err.to_string();
                self.events.warn(&message);
                self.stats.record_error(message);
            }
        }
    }

    fn skip(&mut self, path: &Path, reason: DropReason) {
        self.events
            .info(format!("skipped {}: {}", path.display(), reason));
        self.stats.record_skipped(path, reason.as_str());
    }
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn entry_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::JobEvent;
    use crate::filter::FilterRules;
    use crate::types::PermissionStrategy;
    use std::cell::Cell;
    use std::time::{Duration, SystemTime};

    struct Fixture {
        _dir: tempfile::TempDir,
        src: PathBuf,
        dst: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::create_dir_all(&src).expect("mkdir");
        Fixture { _dir: dir, src, dst }
    }

    fn write(path: &Path, len: usize) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdir");
        }
        fs::write(path, vec![b'x'; len]).expect("write");
    }

    fn run(
        fx: &Fixture,
        rules: FilterRules,
        cancel: &CancelFlag,
        action: &dyn FileAction,
    ) -> (Result<()>, OperationStats, Vec<JobEvent>) {
        let filter = FileFilter::new(rules);
        let policy = PermissionPolicy::new(PermissionStrategy::PreserveOriginal);
        let (events, rx) = EventSink::channel();
        let mut pipeline = CopyPipeline::new(&filter, &policy, cancel, &events, ProgressTracker::new(0, 0));
        let tree = TreeCopy {
            source: &fx.src,
            dest: &fx.dst,
            filter_root: &fx.src,
            globs: FolderGlobs::default(),
            dest_sid: None,
        };
        let result = pipeline.copy_tree(&tree, action);
        let stats = pipeline.finish();
        (result, stats, rx.try_iter().collect())
    }

    #[test]
    fn dangerous_file_skipped_and_counted() {
        let fx = fixture();
        write(&fx.src.join("a.txt"), 10);
        write(&fx.src.join("NTUSER.DAT"), 4096);
        let (result, stats, _) = run(&fx, FilterRules::default(), &CancelFlag::new(), &PlainCopy);
        result.expect("copy");
        assert_eq!(stats.files_copied, 1);
        assert_eq!(stats.bytes_copied, 10);
        assert_eq!(stats.files_skipped, 1);
        assert_eq!(stats.skipped[0].reason, "DangerousFile");
        assert!(stats.skipped[0].path.ends_with("NTUSER.DAT"));
        assert!(fx.dst.join("a.txt").exists());
        assert!(!fx.dst.join("NTUSER.DAT").exists());
    }

    #[test]
    fn size_boundary() {
        let fx = fixture();
        write(&fx.src.join("a"), 1023);
        write(&fx.src.join("b"), 1024);
        write(&fx.src.join("c"), 1025);
        let rules = FilterRules {
            enable_file_size_limit: true,
            max_single_file_size: 1024,
            ..FilterRules::default()
        };
        let (result, stats, _) = run(&fx, rules, &CancelFlag::new(), &PlainCopy);
        result.expect("copy");
        assert_eq!(stats.files_copied, 2);
        assert_eq!(stats.bytes_copied, 2047);
        assert_eq!(stats.skipped.len(), 1);
        assert_eq!(stats.skipped[0].reason, "ExceedsFileSize");
    }

    #[test]
    fn cache_directory_dropped_before_enumeration() {
        let fx = fixture();
        let cache = fx.src.join("Google/Chrome/User Data/Default/Cache");
        write(&cache.join("f_000001"), 100);
        write(&cache.join("f_000002"), 100);
        write(&fx.src.join("Google/Chrome/User Data/Default/Bookmarks"), 5);
        let (result, stats, _) = run(&fx, FilterRules::default(), &CancelFlag::new(), &PlainCopy);
        result.expect("copy");
        assert_eq!(stats.files_copied, 1);
        assert_eq!(stats.files_skipped, 1);
        assert_eq!(stats.skipped[0].reason, "InsideCacheDirectory");
        assert!(stats.skipped[0].path.ends_with("Cache"));
        assert!(!fx.dst.join("Google/Chrome/User Data/Default/Cache").exists());
    }

    #[test]
    fn counters_account_for_every_visited_entry() {
        let fx = fixture();
        write(&fx.src.join("keep/a.txt"), 3);
        write(&fx.src.join("keep/empty.bin"), 0);
        write(&fx.src.join("node_modules/x.js"), 3);
        write(&fx.src.join("b.tmp"), 3);
        write(&fx.src.join("ntuser.ini"), 3);
        let (result, stats, _) = run(&fx, FilterRules::default(), &CancelFlag::new(), &PlainCopy);
        result.expect("copy");
        assert_eq!(
            stats.files_copied + stats.files_skipped + stats.files_errored,
            stats.entries_visited
        );
        assert_eq!(stats.files_copied, 2);
        assert_eq!(stats.files_skipped, 3);
        assert_eq!(stats.bytes_copied, 3);
        let sizes: u64 = stats
            .written
            .iter()
            .map(|p| fs::metadata(p).expect("stat").len())
            .sum();
        assert_eq!(sizes, stats.bytes_copied);
        assert_eq!(fs::metadata(fx.dst.join("keep/empty.bin")).expect("stat").len(), 0);
    }

    #[test]
    fn children_copied_in_sorted_order() {
        let fx = fixture();
        for name in ["c.txt", "a.txt", "b/z.txt", "b/y.txt", "d.txt"] {
            write(&fx.src.join(name), 1);
        }
        let (result, _, events) = run(&fx, FilterRules::default(), &CancelFlag::new(), &PlainCopy);
        result.expect("copy");
        let started: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                JobEvent::File {
                    path,
                    stage: FileStage::CopyStarted,
                } => Some(
                    path.strip_prefix(&fx.src)
                        .expect("under src")
                        .to_string_lossy()
                        .replace('\\', "/"),
                ),
                _ => None,
            })
            .collect();
        assert_eq!(started, vec!["a.txt", "b/y.txt", "b/z.txt", "c.txt", "d.txt"]);
    }

    #[test]
    fn per_file_events_in_program_order() {
        let fx = fixture();
        write(&fx.src.join("a.txt"), 2);
        let (result, _, events) = run(&fx, FilterRules::default(), &CancelFlag::new(), &PlainCopy);
        result.expect("copy");
        let stages: Vec<&FileStage> = events
            .iter()
            .filter_map(|e| match e {
                JobEvent::File { stage, .. } => Some(stage),
                _ => None,
            })
            .collect();
        assert_eq!(
            stages,
            vec![
                &FileStage::CopyStarted,
                &FileStage::Copied { bytes: 2 },
                &FileStage::PermissionsApplied
            ]
        );
    }

    #[test]
    fn cancelled_before_start_copies_nothing() {
        let fx = fixture();
        write(&fx.src.join("a.txt"), 1);
        let cancel = CancelFlag::new();
        cancel.cancel();
        let (result, stats, _) = run(&fx, FilterRules::default(), &cancel, &PlainCopy);
        assert!(result.expect_err("cancelled").is_cancelled());
        assert_eq!(stats.files_copied, 0);
        assert!(!fx.dst.exists());
    }

    struct CancelAfter<'a> {
        flag: &'a CancelFlag,
        after: usize,
        seen: Cell<usize>,
    }

    impl FileAction for CancelAfter<'_> {
        fn copy_file(&self, source: &Path, dest: &Path) -> Result<FileOutcome> {
            self.seen.set(self.seen.get() + 1);
            if self.seen.get() == self.after {
                self.flag.cancel();
            }
            PlainCopy.copy_file(source, dest)
        }
    }

    #[test]
    fn cancel_mid_copy_finishes_current_file() {
        let fx = fixture();
        for i in 0..200 {
            write(&fx.src.join(format!("f{:04}.txt", i)), 8);
        }
        let cancel = CancelFlag::new();
        let action = CancelAfter {
            flag: &cancel,
            after: 50,
            seen: Cell::new(0),
        };
        let (result, stats, _) = run(&fx, FilterRules::default(), &cancel, &action);
        assert!(result.expect_err("cancelled").is_cancelled());
        assert_eq!(stats.files_copied, 50);
        for written in &stats.written {
            assert_eq!(fs::metadata(written).expect("stat").len(), 8);
        }
        assert!(!fx.dst.join("f0050.txt").exists());
    }

    #[test]
    fn modification_time_is_preserved() {
        let fx = fixture();
        let src = fx.src.join("old.txt");
        write(&src, 4);
        let past = SystemTime::now() - Duration::from_secs(86_400);
        fs::OpenOptions::new()
            .write(true)
            .open(&src)
            .and_then(|f| f.set_modified(past))
            .expect("set mtime");
        let (result, _, _) = run(&fx, FilterRules::default(), &CancelFlag::new(), &PlainCopy);
        result.expect("copy");
        let copied = fs::metadata(fx.dst.join("old.txt"))
            .and_then(|m| m.modified())
            .expect("mtime");
        let delta = copied
            .duration_since(past)
            .unwrap_or_else(|e| e.duration());
        assert!(delta < Duration::from_secs(2));
    }

    #[test]
    fn folder_globs_exclude_files() {
        let fx = fixture();
        write(&fx.src.join("keep.docx"), 1);
        write(&fx.src.join("skip.iso"), 1);
        let filter = FileFilter::default();
        let policy = PermissionPolicy::new(PermissionStrategy::PreserveOriginal);
        let cancel = CancelFlag::new();
        let events = EventSink::none();
        let mut pipeline = CopyPipeline::new(&filter, &policy, &cancel, &events, ProgressTracker::default());
        let tree = TreeCopy {
            source: &fx.src,
            dest: &fx.dst,
            filter_root: &fx.src,
            globs: FolderGlobs::new(&["*".to_string()], &["*.iso".to_string()]),
            dest_sid: None,
        };
        pipeline.copy_tree(&tree, &PlainCopy).expect("copy");
        let stats = pipeline.finish();
        assert_eq!(stats.files_copied, 1);
        assert_eq!(stats.skipped[0].reason, "MatchesExcludePattern");
    }

    #[test]
    fn missing_source_is_not_an_error() {
        let fx = fixture();
        fs::remove_dir_all(&fx.src).expect("rm");
        let (result, stats, _) = run(&fx, FilterRules::default(), &CancelFlag::new(), &PlainCopy);
        result.expect("copy");
        assert_eq!(stats.entries_visited, 0);
    }

    #[test]
    fn lone_file_source_copies_to_dest_path() {
        let fx = fixture();
        let file = fx.src.join(".gitconfig");
        write(&file, 12);
        let filter = FileFilter::new(FilterRules::default());
        let policy = PermissionPolicy::new(PermissionStrategy::PreserveOriginal);
        let cancel = CancelFlag::new();
        let events = EventSink::none();
        let mut pipeline = CopyPipeline::new(&filter, &policy, &cancel, &events, ProgressTracker::new(12, 1));
        let dest = fx.dst.join("alice").join(".gitconfig");
        let tree = TreeCopy {
            source: &file,
            dest: &dest,
            filter_root: &fx.src,
            globs: FolderGlobs::default(),
            dest_sid: None,
        };
        pipeline.copy_tree(&tree, &PlainCopy).expect("copy");
        let stats = pipeline.finish();
        assert_eq!(stats.files_copied, 1);
        assert_eq!(fs::metadata(&dest).expect("dest").len(), 12);
    }

    #[test]
    fn destination_nested_in_source_is_not_walked() {
        let fx = fixture();
        write(&fx.src.join("a.txt"), 10);
        let filter = FileFilter::new(FilterRules::default());
        let policy = PermissionPolicy::new(PermissionStrategy::PreserveOriginal);
        let cancel = CancelFlag::new();
        let events = EventSink::none();
        let mut pipeline = CopyPipeline::new(&filter, &policy, &cancel, &events, ProgressTracker::new(10, 1));
        let output = fx.src.join("zbackup");
        pipeline.exclude_output(&output);
        let dest = output.join("alice");
        let tree = TreeCopy {
            source: &fx.src,
            dest: &dest,
            filter_root: &fx.src,
            globs: FolderGlobs::default(),
            dest_sid: None,
        };
        pipeline.copy_tree(&tree, &PlainCopy).expect("copy");
        let stats = pipeline.finish();
        assert_eq!(stats.files_copied, 1);
        assert!(dest.join("a.txt").is_file());
        assert!(!dest.join("zbackup").exists());
    }

    #[cfg(unix)]
    #[test]
    fn strip_copy_keeps_private_file_private() {
        use std::os::unix::fs::PermissionsExt;
        let fx = fixture();
        let key = fx.src.join(".ssh/id_rsa");
        write(&key, 64);
        fs::set_permissions(&key, fs::Permissions::from_mode(0o600)).expect("chmod");
        let filter = FileFilter::new(FilterRules::default());
        let policy = PermissionPolicy::new(PermissionStrategy::StripAll);
        let cancel = CancelFlag::new();
        let events = EventSink::none();
        let mut pipeline = CopyPipeline::new(&filter, &policy, &cancel, &events, ProgressTracker::new(64, 1));
        let tree = TreeCopy {
            source: &fx.src,
            dest: &fx.dst,
            filter_root: &fx.src,
            globs: FolderGlobs::default(),
            dest_sid: None,
        };
        pipeline.copy_tree(&tree, &PlainCopy).expect("copy");
        assert_eq!(pipeline.finish().files_copied, 1);
        let mode = fs::metadata(fx.dst.join(".ssh/id_rsa")).expect("stat").permissions().mode();
        assert_eq!(mode & 0o077, 0);
    }

    #[cfg(unix)]
    #[test]
    fn links_are_not_followed() {
        let fx = fixture();
        write(&fx.src.join("real.txt"), 1);
        std::os::unix::fs::symlink(fx.src.join("real.txt"), fx.src.join("link.txt")).expect("link");
        let (result, stats, _) = run(&fx, FilterRules::default(), &CancelFlag::new(), &PlainCopy);
        result.expect("copy");
        assert_eq!(stats.files_copied, 1);
        assert!(!fx.dst.join("link.txt").exists());
    }
}
