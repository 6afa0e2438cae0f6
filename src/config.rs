use crate::error::{Error, Result};
use crate::playlist::BuildOptions;
use crate::scanner::{DEFAULT_EXTENSIONS, FsScanner, MAX_SCAN_DEPTH};
use crate::series::{Series, SeriesRegistry};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const CONFIG_DIR: &str = "tvflow";
const CONFIG_FILE: &str = "tvflow.json";

/// Persisted station settings and the ordered series list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationConfig {
    #[serde(default)]
    pub series: Vec<Series>,
    #[serde(default = "default_next_id")]
    next_id: u32,
    #[serde(default = "default_extensions")]
    pub accepted_extensions: Vec<String>,
    #[serde(default)]
    pub randomize_series_order: bool,
    #[serde(default)]
    pub randomize_start_offset: bool,
    #[serde(default = "default_max_scan_depth")]
    pub max_scan_depth: usize,
}

fn default_next_id() -> u32 {
    1
}

fn default_extensions() -> Vec<String> {
    DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect()
}

fn default_max_scan_depth() -> usize {
    MAX_SCAN_DEPTH
}

impl StationConfig {
    pub fn new() -> Self {
        StationConfig {
            series: Vec::new(),
            next_id: default_next_id(),
            accepted_extensions: default_extensions(),
            randomize_series_order: false,
            randomize_start_offset: false,
            max_scan_depth: MAX_SCAN_DEPTH,
        }
    }

    /// `<config dir>/tvflow/tvflow.json`, or the working directory when the
    /// platform has no config dir.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join(CONFIG_DIR))
            .unwrap_or_default()
            .join(CONFIG_FILE)
    }

    /// Load from `path`. A missing file gives defaults; so does a corrupt one,
    /// with a warning.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(data) => match serde_json::from_str(&data) {
                    Ok(config) => return config,
                    Err(e) => warn!(path = %path.display(), "Corrupt config, starting fresh: {}", e),
                },
                Err(e) => warn!(path = %path.display(), "Could not read config: {}", e),
            }
        }
        StationConfig::new()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        debug!(path = %path.display(), "Saved config");
        Ok(())
    }

    /// Register a new always-on series for `source`. Returns its ID.
    pub fn add_series(&mut self, source: PathBuf) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.series.push(Series::new(id, source));
        id
    }

    pub fn remove_series(&mut self, id: u32) -> Result<Series> {
        let pos = self.position(id)?;
        Ok(self.series.remove(pos))
    }

    pub fn find_series(&self, id: u32) -> Option<&Series> {
        self.series.iter().find(|s| s.id == id)
    }

    pub fn find_series_mut(&mut self, id: u32) -> Option<&mut Series> {
        self.series.iter_mut().find(|s| s.id == id)
    }

    /// Move a series to `position` in the rotation (clamped to the end).
    pub fn move_series(&mut self, id: u32, position: usize) -> Result<()> {
        let from = self.position(id)?;
        let series = self.series.remove(from);
        let to = position.min(self.series.len());
        self.series.insert(to, series);
        Ok(())
    }

    /// Replace the extension allow-list. Entries that are not alphanumeric
    /// are dropped; a leading dot is tolerated.
    pub fn set_extensions<S: AsRef<str>>(&mut self, extensions: &[S]) -> Result<()> {
        let cleaned: Vec<String> = extensions
            .iter()
            .map(|e| e.as_ref().trim().trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
            .collect();
        if cleaned.is_empty() {
            return Err(Error::InvalidInput(
                "No valid extensions given (letters and digits only)".to_string(),
            ));
        }
        self.accepted_extensions = cleaned;
        Ok(())
    }

    pub fn build_options(&self) -> BuildOptions {
        BuildOptions {
            randomize_series_order: self.randomize_series_order,
            randomize_start_offset: self.randomize_start_offset,
        }
    }

    /// Filesystem scanner honouring the configured extensions and depth.
    pub fn scanner(&self) -> FsScanner {
        FsScanner::new(&self.accepted_extensions).with_max_depth(self.max_scan_depth)
    }

    fn position(&self, id: u32) -> Result<usize> {
        self.series
            .iter()
            .position(|s| s.id == id)
            .ok_or(Error::SeriesNotFound(id))
    }
}

impl Default for StationConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SeriesRegistry for StationConfig {
    fn list_series(&self) -> Vec<Series> {
        self.series.clone()
    }
}
