//! Media discovery.
//!
//! A [`MediaScanner`] lists the playable files under a series' source folder
//! and measures how long a file plays. Scans carry a [`ScanToken`]; once a newer
//! build has started the token goes stale and the scan stops with
//! [`Superseded`].

use crate::error::{Error, Result};
use crate::media;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Deepest directory level visited below a source folder.
pub const MAX_SCAN_DEPTH: usize = 64;

/// File extensions accepted when none are configured.
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    "3gp", "a52", "aac", "asf", "au", "avi", "dts", "dv", "flac", "flv", "mka", "mkv", "mov",
    "mp2", "mp3", "mp4", "mpg", "nsc", "nsv", "nut", "ogg", "ogm", "ra", "ram", "rm", "rmbv",
    "rv", "tac", "ts", "tta", "ty", "vid", "wav", "wmv", "xa",
];

/// A scan was abandoned because a newer build started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("scan superseded by a newer build")]
pub struct Superseded;

/// Hands out monotonically increasing build generations.
#[derive(Debug, Clone, Default)]
pub struct BuildGenerations {
    latest: Arc<AtomicU64>,
}

impl BuildGenerations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new generation, making every earlier token stale.
    pub fn begin(&self) -> ScanToken {
        let generation = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        ScanToken {
            generation,
            latest: self.latest.clone(),
        }
    }

    pub fn latest(&self) -> u64 {
        self.latest.load(Ordering::SeqCst)
    }
}

/// Identifies one build attempt.
#[derive(Debug, Clone)]
pub struct ScanToken {
    generation: u64,
    latest: Arc<AtomicU64>,
}

impl ScanToken {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self) -> bool {
        self.latest.load(Ordering::SeqCst) == self.generation
    }

    pub fn check(&self) -> std::result::Result<(), Superseded> {
        if self.is_current() { Ok(()) } else { Err(Superseded) }
    }
}

/// Finds playable media and measures it.
pub trait MediaScanner: Send + Sync {
    /// Playable files below `root`. Unreadable entries are skipped.
    fn list_files(
        &self,
        root: &Path,
        token: &ScanToken,
    ) -> std::result::Result<Vec<PathBuf>, Superseded>;

    /// How long `file` plays. May be slow.
    fn measure_duration(&self, file: &Path) -> Result<Duration>;
}

/// Scans real directories, filtering by extension, and probes durations
/// from the media container.
#[derive(Debug, Clone)]
pub struct FsScanner {
    extensions: Vec<String>,
    max_depth: usize,
}

impl FsScanner {
    /// Only alphanumeric extensions are honoured; matching ignores case.
    pub fn new<S: AsRef<str>>(extensions: &[S]) -> Self {
        let extensions = extensions
            .iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
            .collect();
        FsScanner {
            extensions,
            max_depth: MAX_SCAN_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Whether the file's extension is on the allow-list.
    pub fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .is_some_and(|e| self.extensions.contains(&e))
    }
}

impl Default for FsScanner {
    fn default() -> Self {
        FsScanner::new(DEFAULT_EXTENSIONS)
    }
}

impl MediaScanner for FsScanner {
    fn list_files(
        &self,
        root: &Path,
        token: &ScanToken,
    ) -> std::result::Result<Vec<PathBuf>, Superseded> {
        let mut files = Vec::new();
        let walker = WalkDir::new(root)
            .min_depth(1)
            .max_depth(self.max_depth)
            .follow_links(false);

        for entry in walker {
            token.check()?;
            match entry {
                Ok(entry) => {
                    if entry.file_type().is_file() && self.accepts(entry.path()) {
                        files.push(entry.into_path());
                    }
                }
                Err(e) => warn!(root = %root.display(), "Skipping unreadable entry: {}", e),
            }
        }
        token.check()?;
        debug!(root = %root.display(), count = files.len(), "Scanned source folder");
        Ok(files)
    }

    fn measure_duration(&self, file: &Path) -> Result<Duration> {
        media::probe_duration(file)
    }
}

/// In-memory catalogue for simulations and previews that must not touch disk.
#[derive(Debug, Clone, Default)]
pub struct MemoryScanner {
    folders: HashMap<PathBuf, Vec<PathBuf>>,
    durations: HashMap<PathBuf, Duration>,
}

impl MemoryScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a folder holding `(file, seconds)` entries.
    pub fn with_folder(mut self, root: &str, files: &[(&str, u64)]) -> Self {
        self.insert_folder(root, files);
        self
    }

    pub fn insert_folder(&mut self, root: &str, files: &[(&str, u64)]) {
        let listed = files
            .iter()
            .map(|(name, secs)| {
                let path = PathBuf::from(name);
                self.durations.insert(path.clone(), Duration::from_secs(*secs));
                path
            })
            .collect();
        self.folders.insert(PathBuf::from(root), listed);
    }
}

impl MediaScanner for MemoryScanner {
    fn list_files(
        &self,
        root: &Path,
        token: &ScanToken,
    ) -> std::result::Result<Vec<PathBuf>, Superseded> {
        token.check()?;
        Ok(self.folders.get(root).cloned().unwrap_or_default())
    }

    fn measure_duration(&self, file: &Path) -> Result<Duration> {
        self.durations.get(file).copied().ok_or_else(|| Error::Probe {
            path: file.to_path_buf(),
            message: "not in catalogue".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn newer_generation_makes_old_tokens_stale() {
        let generations = BuildGenerations::new();
        let first = generations.begin();
        assert!(first.is_current());
        let second = generations.begin();
        assert!(!first.is_current());
        assert!(second.is_current());
        assert_eq!(first.check(), Err(Superseded));
        assert!(second.generation() > first.generation());
        assert_eq!(generations.latest(), second.generation());
    }

    #[test]
    fn extension_filter_ignores_case_and_junk() {
        let scanner = FsScanner::new(&["MKV", ".mp4", "m?v", ""]);
        assert!(scanner.accepts(Path::new("show/E01.mkv")));
        assert!(scanner.accepts(Path::new("show/E01.MP4")));
        assert!(!scanner.accepts(Path::new("show/E01.m?v")));
        assert!(!scanner.accepts(Path::new("show/notes.txt")));
        assert!(!scanner.accepts(Path::new("show/noext")));
    }

    #[test]
    fn scans_nested_folders() {
        let dir = tempfile::tempdir().unwrap();
        let season = dir.path().join("Season 1");
        fs::create_dir(&season).unwrap();
        fs::write(dir.path().join("pilot.mkv"), b"x").unwrap();
        fs::write(season.join("e01.mkv"), b"x").unwrap();
        fs::write(season.join("e01.srt"), b"x").unwrap();

        let token = BuildGenerations::new().begin();
        let mut files = FsScanner::default().list_files(dir.path(), &token).unwrap();
        files.sort();
        assert_eq!(files, vec![dir.path().join("Season 1/e01.mkv"), dir.path().join("pilot.mkv")]);
    }

    #[test]
    fn depth_limit_is_respected() {
        let dir = tempfile::tempdir().unwrap();
        let deep = dir.path().join("a").join("b");
        fs::create_dir_all(&deep).unwrap();
        fs::write(dir.path().join("top.mp3"), b"x").unwrap();
        fs::write(deep.join("deep.mp3"), b"x").unwrap();

        let token = BuildGenerations::new().begin();
        let files = FsScanner::default()
            .with_max_depth(2)
            .list_files(dir.path(), &token)
            .unwrap();
        assert_eq!(files, vec![dir.path().join("top.mp3")]);
    }

    #[test]
    fn missing_folder_yields_nothing() {
        let token = BuildGenerations::new().begin();
        let files = FsScanner::default()
            .list_files(Path::new("/nonexistent/tvflow/folder"), &token)
            .unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn stale_token_aborts_scan() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.mp3"), b"x").unwrap();
        let generations = BuildGenerations::new();
        let token = generations.begin();
        generations.begin();
        assert_eq!(
            FsScanner::default().list_files(dir.path(), &token),
            Err(Superseded)
        );
    }

    #[test]
    fn memory_scanner_lists_and_measures() {
        let scanner = MemoryScanner::new().with_folder("A", &[("a1", 30), ("a2", 45)]);
        let token = BuildGenerations::new().begin();
        assert_eq!(
            scanner.list_files(Path::new("A"), &token).unwrap(),
            vec![PathBuf::from("a1"), PathBuf::from("a2")]
        );
        assert!(scanner.list_files(Path::new("B"), &token).unwrap().is_empty());
        assert_eq!(
            scanner.measure_duration(Path::new("a2")).unwrap(),
            Duration::from_secs(45)
        );
        assert!(scanner.measure_duration(Path::new("zz")).is_err());
    }
}
