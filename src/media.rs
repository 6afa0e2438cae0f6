use crate::error::{Error, Result};
use crate::scanner::MediaScanner;
use crate::series::DurationPolicy;
use lofty::file::AudioFile;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

/// One step of the programme: a file to play, or dead air until a schedule
/// window opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    /// `None` marks dead air.
    pub file: Option<PathBuf>,
    pub duration_secs: u64,
    /// How `duration_secs` was obtained. Dead air is always `Fixed`.
    pub policy: DurationPolicy,
}

impl MediaItem {
    pub fn new(file: PathBuf, duration_secs: u64, policy: DurationPolicy) -> Self {
        MediaItem {
            file: Some(file),
            duration_secs,
            policy,
        }
    }

    pub fn dead_air(duration_secs: u64) -> Self {
        MediaItem {
            file: None,
            duration_secs,
            policy: DurationPolicy::Fixed,
        }
    }

    pub fn is_dead_air(&self) -> bool {
        self.file.is_none()
    }

    /// Format duration as H:MM:SS or M:SS.
    pub fn duration_display(&self) -> String {
        let secs = self.duration_secs;
        if secs >= 3600 {
            format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
        } else {
            format!("{}:{:02}", secs / 60, secs % 60)
        }
    }

    /// File name for display, or "(dead air)".
    pub fn label(&self) -> String {
        match &self.file {
            Some(path) => path
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string()),
            None => "(dead air)".to_string(),
        }
    }
}

/// How long a media file plays.
///
/// Audio containers are read with lofty. Anything lofty cannot identify,
/// which includes most video containers, is handed to `ffprobe`.
pub fn probe_duration(path: &Path) -> Result<Duration> {
    let audio_error = match lofty::read_from_path(path) {
        Ok(tagged_file) => return Ok(tagged_file.properties().duration()),
        Err(e) => e.to_string(),
    };
    debug!(path = %path.display(), "lofty could not read file ({}); trying ffprobe", audio_error);
    ffprobe_duration(path).map_err(|e| Error::Probe {
        path: path.to_path_buf(),
        message: format!("{audio_error}; {e}"),
    })
}

/// Run `ffprobe` on `path` and read the duration from its stream report.
pub fn ffprobe_duration(path: &Path) -> std::result::Result<Duration, String> {
    let output = Command::new("ffprobe")
        .args(["-v", "error", "-print_format", "json", "-show_streams", "-show_format"])
        .arg(path)
        .output()
        .map_err(|e| format!("Failed to launch ffprobe: {e}"))?;
    if !output.status.success() {
        return Err(format!(
            "ffprobe exited with status {}: {}",
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    parse_ffprobe_output(&String::from_utf8_lossy(&output.stdout))
}

#[derive(Debug, Deserialize)]
struct FfprobeReport {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    #[serde(default)]
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    #[serde(default)]
    codec_type: Option<String>,
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    #[serde(default)]
    duration: Option<String>,
}

/// Duration from `ffprobe -print_format json` output.
///
/// Video streams are consulted first, then audio, then the rest. A stream's
/// own `duration` wins; otherwise a `DURATION*` tag in `H:MM:SS.fff` form is
/// used. The container duration is the last resort.
pub fn parse_ffprobe_output(json: &str) -> std::result::Result<Duration, String> {
    let report: FfprobeReport =
        serde_json::from_str(json).map_err(|e| format!("Unreadable ffprobe output: {e}"))?;
    let has_media = report
        .streams
        .iter()
        .any(|s| matches!(s.codec_type.as_deref(), Some("video" | "audio")));
    if !has_media {
        return Err("No audio or video stream found".to_string());
    }

    let mut streams: Vec<&FfprobeStream> = report.streams.iter().collect();
    streams.sort_by_key(|s| match s.codec_type.as_deref() {
        Some("video") => 0,
        Some("audio") => 1,
        _ => 2,
    });
    for stream in streams {
        if let Some(secs) = stream.duration.as_deref().and_then(parse_seconds) {
            return Ok(Duration::from_secs_f64(secs));
        }
        let tagged = stream
            .tags
            .iter()
            .filter(|(key, _)| key.to_lowercase().starts_with("duration"))
            .find_map(|(_, value)| parse_clock(value));
        if let Some(secs) = tagged {
            return Ok(Duration::from_secs(secs));
        }
    }
    report
        .format
        .and_then(|f| f.duration)
        .as_deref()
        .and_then(parse_seconds)
        .map(Duration::from_secs_f64)
        .ok_or_else(|| "No duration reported".to_string())
}

fn parse_seconds(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs > 0.0)
}

/// Whole seconds of an `H:MM:SS.fff` tag, as Matroska muxers write them.
fn parse_clock(value: &str) -> Option<u64> {
    let (clock, fraction) = value.trim().split_once('.')?;
    if fraction.is_empty() || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let fields: Vec<&str> = clock.split(':').collect();
    let &[hours, minutes, seconds] = fields.as_slice() else {
        return None;
    };
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !digits(hours) || minutes.len() != 2 || seconds.len() != 2 || !digits(minutes) || !digits(seconds) {
        return None;
    }
    let hours: u64 = hours.parse().ok()?;
    let minutes: u64 = minutes.parse().ok()?;
    let seconds: u64 = seconds.parse().ok()?;
    Some(hours * 3600 + minutes * 60 + seconds)
}

/// Memoizes measured durations per file.
///
/// Failed measurements are not cached, so a later lookup retries the probe.
#[derive(Debug, Default)]
pub struct DurationCache {
    secs: Mutex<HashMap<PathBuf, u64>>,
}

impl DurationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whole seconds `file` plays; zero if it cannot be measured.
    pub fn lookup(&self, scanner: &dyn MediaScanner, file: &Path) -> u64 {
        if let Some(secs) = self.cached(file) {
            return secs;
        }
        match scanner.measure_duration(file) {
            Ok(duration) => {
                let secs = duration.as_secs();
                self.map().insert(file.to_path_buf(), secs);
                secs
            }
            Err(e) => {
                warn!("{}; using zero duration", e);
                0
            }
        }
    }

    pub fn cached(&self, file: &Path) -> Option<u64> {
        self.map().get(file).copied()
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn map(&self) -> MutexGuard<'_, HashMap<PathBuf, u64>> {
        self.secs.lock().unwrap_or_else(|e| e.into_inner())
    }
}
