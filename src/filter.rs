use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use glob::{MatchOptions, Pattern};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::util::paths::relative_slash;

pub const DEFAULT_MAX_SINGLE_FILE_SIZE: u64 = 2 * 1024 * 1024 * 1024;
pub const DEFAULT_MAX_FOLDER_SIZE: u64 = 50 * 1024 * 1024 * 1024;

/// Registry hives and their transaction logs. Always excluded.
pub const DANGEROUS_FILES: [&str; 7] = [
    "NTUSER.DAT",
    "NTUSER.DAT.LOG1",
    "NTUSER.DAT.LOG2",
    "ntuser.ini",
    "UsrClass.dat",
    "UsrClass.dat.LOG1",
    "UsrClass.dat.LOG2",
];

pub const DEFAULT_EXCLUDE_PATTERNS: [&str; 5] = [
    r".*\.(tmp|temp|cache|lock|lck|crdownload|part)$",
    r".*~$",
    r"desktop\.ini$",
    r"thumbs\.db$",
    r"\.DS_Store$",
];

pub const DEFAULT_EXCLUDE_FOLDERS: [&str; 13] = [
    "Temp",
    "$RECYCLE.BIN",
    "Cache",
    "GPUCache",
    "Code Cache",
    "Service Worker",
    "Session Storage",
    "WebCache",
    "node_modules",
    ".git",
    ".svn",
    "__pycache__",
    "Packages",
];

const CACHE_DIR_NAMES: [&str; 7] = [
    "cache",
    "gpucache",
    "code cache",
    "shadercache",
    "webcache",
    "service worker",
    "session storage",
];

/// Filter rules as persisted in the manifest's `filter_rules` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRules {
    #[serde(default)]
    pub enable_file_size_limit: bool,
    #[serde(default)]
    pub enable_folder_size_limit: bool,
    #[serde(default)]
    pub max_single_file_size: u64,
    #[serde(default)]
    pub max_folder_size: u64,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub exclude_folders: Vec<String>,
    #[serde(default)]
    pub dangerous_files: Vec<String>,
}

impl Default for FilterRules {
    fn default() -> Self {
        Self {
            enable_file_size_limit: false,
            enable_folder_size_limit: false,
            max_single_file_size: DEFAULT_MAX_SINGLE_FILE_SIZE,
            max_folder_size: DEFAULT_MAX_FOLDER_SIZE,
            exclude_patterns: DEFAULT_EXCLUDE_PATTERNS.iter().map(|s| s.to_string()).collect(),
            exclude_folders: DEFAULT_EXCLUDE_FOLDERS.iter().map(|s| s.to_string()).collect(),
            dangerous_files: DANGEROUS_FILES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl FilterRules {
    /// True when the folder-size limit is on and `size` goes over it.
    pub fn folder_exceeds_limit(&self, size: u64) -> bool {
        self.enable_folder_size_limit && size > self.max_folder_size
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    DangerousFile,
    ExceedsFileSize,
    MatchesExcludePattern,
    InsideExcludeFolder,
    InsideCacheDirectory,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::DangerousFile => "DangerousFile",
            DropReason::ExceedsFileSize => "ExceedsFileSize",
            DropReason::MatchesExcludePattern => "MatchesExcludePattern",
            DropReason::InsideExcludeFolder => "InsideExcludeFolder",
            DropReason::InsideCacheDirectory => "InsideCacheDirectory",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Keep,
    Drop(DropReason),
}

impl Verdict {
    pub fn is_keep(&self) -> bool {
        matches!(self, Verdict::Keep)
    }
}

/// Compiled form of [`FilterRules`]. Build once per job and share by reference.
#[derive(Debug, Clone)]
pub struct FileFilter {
    rules: FilterRules,
    patterns: Vec<Regex>,
    dangerous: HashSet<String>,
    folders: HashSet<String>,
}

impl FileFilter {
    pub fn new(rules: FilterRules) -> Self {
        let mut patterns = Vec::new();
        for raw in &rules.exclude_patterns {
            match RegexBuilder::new(raw).case_insensitive(true).build() {
                Ok(regex) => patterns.push(regex),
                Err(err) => warn!("ignoring invalid exclude pattern {}: {}", raw, err),
            }
        }
        let dangerous = DANGEROUS_FILES
            .iter()
            .map(|s| s.to_string())
            .chain(rules.dangerous_files.iter().cloned())
            .map(|s| s.to_lowercase())
            .collect();
        let folders = rules
            .exclude_folders
            .iter()
            .map(|s| s.to_lowercase())
            .collect();
        Self {
            rules,
            patterns,
            dangerous,
            folders,
        }
    }

    pub fn rules(&self) -> &FilterRules {
        &self.rules
    }

    /// Classifies a regular file. Checks run in a fixed order and the first
    /// match wins.
    pub fn classify_file(&self, path: &Path, size: u64, profile_root: &Path) -> Verdict {
        let name = file_name(path);
        if self.dangerous.contains(&name.to_lowercase()) {
            return Verdict::Drop(DropReason::DangerousFile);
        }
        if self.rules.enable_file_size_limit && size > self.rules.max_single_file_size {
            return Verdict::Drop(DropReason::ExceedsFileSize);
        }
        if self.matches_pattern(&name) {
            return Verdict::Drop(DropReason::MatchesExcludePattern);
        }
        let relative = relative_slash(path, profile_root);
        let mut parents: Vec<&str> = relative.split('/').collect();
        parents.pop();
        self.classify_location(&parents, &format!("/{}", relative.to_lowercase()))
    }

    /// Classifies a directory. Same rules as files without the
    /// dangerous-file and size tests; the directory's own name counts.
    pub fn classify_dir(&self, path: &Path, profile_root: &Path) -> Verdict {
        let name = file_name(path);
        if self.matches_pattern(&name) {
            return Verdict::Drop(DropReason::MatchesExcludePattern);
        }
        let relative = relative_slash(path, profile_root);
        if relative.is_empty() {
            return Verdict::Keep;
        }
        let components: Vec<&str> = relative.split('/').collect();
        self.classify_location(&components, &format!("/{}/", relative.to_lowercase()))
    }

    fn classify_location(&self, components: &[&str], lowered: &str) -> Verdict {
        for component in components {
            let lower = component.to_lowercase();
            if self.folders.contains(&lower) {
                // a name that is also a cache directory reports the narrower reason
                if CACHE_DIR_NAMES.contains(&lower.as_str()) {
                    return Verdict::Drop(DropReason::InsideCacheDirectory);
                }
                return Verdict::Drop(DropReason::InsideExcludeFolder);
            }
        }
        if CACHE_DIR_NAMES
            .iter()
            .any(|name| lowered.contains(&format!("/{}/", name)))
        {
            return Verdict::Drop(DropReason::InsideCacheDirectory);
        }
        Verdict::Keep
    }

    fn matches_pattern(&self, name: &str) -> bool {
        self.patterns.iter().any(|regex| regex.is_match(name))
    }
}

impl Default for FileFilter {
    fn default() -> Self {
        FileFilter::new(FilterRules::default())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Per-folder include/exclude globs, matched against file names.
#[derive(Debug, Clone, Default)]
pub struct FolderGlobs {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl FolderGlobs {
    pub fn new(include: &[String], exclude: &[String]) -> Self {
        Self {
            include: compile_globs(include),
            exclude: compile_globs(exclude),
        }
    }

    /// An empty include list admits everything.
    pub fn allows(&self, name: &str) -> bool {
        let options = MatchOptions {
            case_sensitive: false,
            require_literal_separator: false,
            require_literal_leading_dot: false,
        };
        if self.exclude.iter().any(|p| p.matches_with(name, options)) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|p| p.matches_with(name, options))
    }
}

fn compile_globs(raw: &[String]) -> Vec<Pattern> {
    raw.iter()
        .filter_map(|g| match Pattern::new(g) {
            Ok(pattern) => Some(pattern),
            Err(err) => {
                warn!("ignoring invalid glob {}: {}", g, err);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn root() -> PathBuf {
        PathBuf::from("/profiles/alice")
    }

    #[test]
    fn dangerous_files_are_always_dropped() {
        let mut rules = FilterRules::default();
        rules.dangerous_files.clear();
        let filter = FileFilter::new(rules);
        for name in DANGEROUS_FILES {
            let path = root().join(name.to_uppercase());
            assert_eq!(
                filter.classify_file(&path, 10, &root()),
                Verdict::Drop(DropReason::DangerousFile),
                "{}",
                name
            );
        }
    }

    #[test]
    fn size_limit_is_strictly_greater_than() {
        let rules = FilterRules {
            enable_file_size_limit: true,
            max_single_file_size: 1024,
            ..FilterRules::default()
        };
        let filter = FileFilter::new(rules);
        let path = root().join("Documents").join("f.bin");
        assert_eq!(filter.classify_file(&path, 1023, &root()), Verdict::Keep);
        assert_eq!(filter.classify_file(&path, 1024, &root()), Verdict::Keep);
        assert_eq!(
            filter.classify_file(&path, 1025, &root()),
            Verdict::Drop(DropReason::ExceedsFileSize)
        );
    }

    #[test]
    fn size_limit_disabled_by_default() {
        let filter = FileFilter::default();
        let path = root().join("Videos").join("big.mkv");
        assert_eq!(filter.classify_file(&path, u64::MAX, &root()), Verdict::Keep);
    }

    #[test]
    fn patterns_match_file_name_case_insensitively() {
        let filter = FileFilter::default();
        for name in ["x.TMP", "notes.txt~", "Desktop.ini", "THUMBS.DB", ".DS_Store", "a.crdownload"] {
            assert_eq!(
                filter.classify_file(&root().join("Documents").join(name), 1, &root()),
                Verdict::Drop(DropReason::MatchesExcludePattern),
                "{}",
                name
            );
        }
        assert_eq!(
            filter.classify_file(&root().join("Documents").join("report.docx"), 1, &root()),
            Verdict::Keep
        );
    }

    #[test]
    fn exclude_folder_anywhere_in_path() {
        let filter = FileFilter::default();
        for folder in ["node_modules", ".git", "Temp", "__pycache__", "$RECYCLE.BIN", "packages"] {
            let path = root().join("Documents").join(folder).join("deep").join("x.js");
            assert_eq!(
                filter.classify_file(&path, 1, &root()),
                Verdict::Drop(DropReason::InsideExcludeFolder),
                "{}",
                folder
            );
        }
    }

    #[test]
    fn chrome_cache_is_a_cache_directory() {
        let filter = FileFilter::default();
        let dir = root().join("AppData/Local/Google/Chrome/User Data/Default/Cache");
        assert_eq!(
            filter.classify_dir(&dir, &root()),
            Verdict::Drop(DropReason::InsideCacheDirectory)
        );
        assert_eq!(
            filter.classify_file(&dir.join("f_000001"), 100, &root()),
            Verdict::Drop(DropReason::InsideCacheDirectory)
        );
    }

    #[test]
    fn cache_substring_without_folder_rule() {
        let rules = FilterRules {
            exclude_folders: Vec::new(),
            ..FilterRules::default()
        };
        let filter = FileFilter::new(rules);
        let path = root().join("AppData/Local/App/ShaderCache/blob");
        assert_eq!(
            filter.classify_file(&path, 1, &root()),
            Verdict::Drop(DropReason::InsideCacheDirectory)
        );
    }

    #[test]
    fn directory_form_skips_dangerous_and_size() {
        let rules = FilterRules {
            enable_file_size_limit: true,
            max_single_file_size: 0,
            ..FilterRules::default()
        };
        let filter = FileFilter::new(rules);
        assert_eq!(filter.classify_dir(&root().join("NTUSER.DAT"), &root()), Verdict::Keep);
        assert_eq!(filter.classify_dir(&root().join("Documents"), &root()), Verdict::Keep);
        assert_eq!(filter.classify_dir(&root(), &root()), Verdict::Keep);
    }

    #[test]
    fn verdicts_are_deterministic() {
        let filter = FileFilter::default();
        let path = root().join("Documents/work/plan.lock");
        let first = filter.classify_file(&path, 5, &root());
        for _ in 0..10 {
            assert_eq!(filter.classify_file(&path, 5, &root()), first);
        }
    }

    #[test]
    fn invalid_patterns_are_ignored() {
        let rules = FilterRules {
            exclude_patterns: vec!["([".to_string(), r"\.bak$".to_string()],
            ..FilterRules::default()
        };
        let filter = FileFilter::new(rules);
        assert_eq!(
            filter.classify_file(&root().join("a.bak"), 1, &root()),
            Verdict::Drop(DropReason::MatchesExcludePattern)
        );
    }

    #[test]
    fn folder_globs() {
        let globs = FolderGlobs::new(&["*.txt".to_string()], &["secret*".to_string()]);
        assert!(globs.allows("Notes.TXT"));
        assert!(!globs.allows("photo.jpg"));
        assert!(!globs.allows("secret.txt"));
        assert!(FolderGlobs::new(&[], &[]).allows("anything"));
        assert!(FolderGlobs::new(&["*".to_string()], &[]).allows(".hidden"));
    }

    #[test]
    fn folder_limit_warning_threshold() {
        let rules = FilterRules {
            enable_folder_size_limit: true,
            max_folder_size: 100,
            ..FilterRules::default()
        };
        assert!(rules.folder_exceeds_limit(101));
        assert!(!rules.folder_exceeds_limit(100));
        assert!(!FilterRules::default().folder_exceeds_limit(u64::MAX));
    }
}
