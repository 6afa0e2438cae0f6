use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Schedule given to newly added series: always on air.
pub const ALWAYS: &str = "* * * * *";

/// How a series orders its files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayOrder {
    /// Natural, case-insensitive sort by path.
    #[default]
    #[serde(alias = "alphabetical")]
    Sequential,
    /// Uniform shuffle on every build.
    Random,
}

impl fmt::Display for PlayOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayOrder::Sequential => write!(f, "sequential"),
            PlayOrder::Random => write!(f, "random"),
        }
    }
}

impl PlayOrder {
    /// Parse an order from a string (case-insensitive).
    pub fn from_str_loose(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "sequential" | "alphabetical" | "sorted" => Ok(PlayOrder::Sequential),
            "random" | "shuffle" => Ok(PlayOrder::Random),
            _ => Err(format!(
                "Unknown play order '{}'. Expected: sequential, random",
                s
            )),
        }
    }
}

/// Where the play time of an item comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationPolicy {
    /// Measured length of the media file.
    #[default]
    Media,
    /// The series' configured `fixed_secs`.
    Fixed,
}

impl fmt::Display for DurationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DurationPolicy::Media => write!(f, "media"),
            DurationPolicy::Fixed => write!(f, "fixed"),
        }
    }
}

/// A configured, independently scheduled content source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Series {
    /// Unique identifier, stable for the life of the series.
    pub id: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    /// Root folder scanned for media.
    pub source: PathBuf,
    /// Five-field cron expression; the series may only play while it matches.
    #[serde(default = "default_schedule")]
    pub schedule: String,
    /// Items played back to back before the rotation moves on. Always >= 1.
    #[serde(default = "default_repeat_count")]
    pub repeat_count: u32,
    #[serde(default)]
    pub order: PlayOrder,
    /// Signed index offset applied to the initial play cursor.
    #[serde(default)]
    pub start_offset: i64,
    #[serde(default)]
    pub duration: DurationPolicy,
    /// Play time per item when `duration` is `Fixed`.
    #[serde(default)]
    pub fixed_secs: u64,
}

fn default_schedule() -> String {
    ALWAYS.to_string()
}

fn default_repeat_count() -> u32 {
    1
}

impl Series {
    pub fn new(id: u32, source: PathBuf) -> Self {
        Series {
            id,
            title: String::new(),
            source,
            schedule: default_schedule(),
            repeat_count: 1,
            order: PlayOrder::Sequential,
            start_offset: 0,
            duration: DurationPolicy::Media,
            fixed_secs: 0,
        }
    }

    /// Builder-style schedule setter.
    pub fn with_schedule(mut self, schedule: &str) -> Self {
        self.schedule = schedule.to_string();
        self
    }

    /// Builder-style repeat count setter; zero is raised to one.
    pub fn with_repeat_count(mut self, count: u32) -> Self {
        self.repeat_count = count.max(1);
        self
    }

    pub fn with_order(mut self, order: PlayOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_start_offset(mut self, offset: i64) -> Self {
        self.start_offset = offset;
        self
    }

    /// Play every item for exactly `secs` seconds.
    pub fn with_fixed_duration(mut self, secs: u64) -> Self {
        self.duration = DurationPolicy::Fixed;
        self.fixed_secs = secs;
        self
    }

    /// Repeat count with the `>= 1` invariant applied to hand-edited configs.
    pub fn effective_repeat_count(&self) -> u32 {
        self.repeat_count.max(1)
    }

    /// Title for display, falling back to the source folder name.
    pub fn display_name(&self) -> String {
        if !self.title.is_empty() {
            return self.title.clone();
        }
        self.source
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.source.display().to_string())
    }
}

/// Source of the ordered series list.
///
/// Each call returns a read-only snapshot; registry order is the rotation
/// order unless the builder is told to shuffle it.
pub trait SeriesRegistry {
    fn list_series(&self) -> Vec<Series>;
}

impl SeriesRegistry for Vec<Series> {
    fn list_series(&self) -> Vec<Series> {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_order_from_str() {
        assert_eq!(
            PlayOrder::from_str_loose("Sequential").unwrap(),
            PlayOrder::Sequential
        );
        assert_eq!(
            PlayOrder::from_str_loose("alphabetical").unwrap(),
            PlayOrder::Sequential
        );
        assert_eq!(PlayOrder::from_str_loose("RANDOM").unwrap(), PlayOrder::Random);
        assert!(PlayOrder::from_str_loose("bogus").is_err());
    }

    #[test]
    fn display_values() {
        assert_eq!(format!("{}", PlayOrder::Random), "random");
        assert_eq!(format!("{}", DurationPolicy::Fixed), "fixed");
    }

    #[test]
    fn defaults_when_missing_from_json() {
        let json = r#"{"id":3,"source":"/media/cartoons"}"#;
        let series: Series = serde_json::from_str(json).unwrap();
        assert_eq!(series.schedule, ALWAYS);
        assert_eq!(series.repeat_count, 1);
        assert_eq!(series.order, PlayOrder::Sequential);
        assert_eq!(series.duration, DurationPolicy::Media);
        assert_eq!(series.start_offset, 0);
    }

    #[test]
    fn legacy_alphabetical_order_loads() {
        let json = r#"{"id":1,"source":"x","order":"alphabetical"}"#;
        let series: Series = serde_json::from_str(json).unwrap();
        assert_eq!(series.order, PlayOrder::Sequential);
    }

    #[test]
    fn serialization_roundtrip() {
        let series = Series::new(7, "/media/news".into())
            .with_schedule("0 18 * * 1-5")
            .with_repeat_count(2)
            .with_order(PlayOrder::Random)
            .with_start_offset(-1)
            .with_fixed_duration(900);
        let json = serde_json::to_string(&series).unwrap();
        let loaded: Series = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded, series);
    }

    #[test]
    fn zero_repeat_count_is_raised() {
        let series = Series::new(1, "x".into()).with_repeat_count(0);
        assert_eq!(series.repeat_count, 1);

        let json = r#"{"id":1,"source":"x","repeat_count":0}"#;
        let loaded: Series = serde_json::from_str(json).unwrap();
        assert_eq!(loaded.effective_repeat_count(), 1);
    }

    #[test]
    fn display_name_falls_back_to_folder() {
        let mut series = Series::new(1, "/media/Looney Tunes".into());
        assert_eq!(series.display_name(), "Looney Tunes");
        series.title = "Cartoons".to_string();
        assert_eq!(series.display_name(), "Cartoons");
    }
}
