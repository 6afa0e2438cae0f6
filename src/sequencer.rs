//! Picks what plays next.
//!
//! The [`Sequencer`] owns the series of one completed build and the live
//! [`QueryState`]. Every step first checks whether any series is on air at
//! the logical clock; if none is, the step yields dead air that lasts until
//! the soonest schedule window opens. Otherwise the round-robin cursor walks
//! the series until it finds one that is on air and has files.

use crate::cron::CronSchedule;
use crate::media::{DurationCache, MediaItem};
use crate::playlist::PlaylistSet;
use crate::scanner::MediaScanner;
use crate::series::{DurationPolicy, Series};
use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Selection attempts before a step gives up.
pub const MAX_QUERY_LOOP_COUNT: usize = 65_536;

/// Play time assumed for media items whose length is not measured.
pub const PLACEHOLDER_SECS: u64 = 3600;

/// Dead air emitted when series have content but no schedule will ever open.
pub const NO_WINDOW_WAIT_SECS: u64 = 3600;

/// Progress of one series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// -1 before the first play.
    pub last_played: i64,
    pub subsequent_plays: u32,
}

impl Default for Cursor {
    fn default() -> Self {
        Cursor {
            last_played: -1,
            subsequent_plays: 0,
        }
    }
}

/// Everything a step reads and moves: the logical clock, whose turn it is,
/// and each series' cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryState {
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    pub series_index: usize,
    #[serde(default)]
    pub cursors: HashMap<u32, Cursor>,
}

impl QueryState {
    pub fn at(timestamp_ms: i64) -> Self {
        QueryState {
            timestamp_ms,
            ..Self::default()
        }
    }

    pub fn cursor(&self, series_id: u32) -> Cursor {
        self.cursors.get(&series_id).copied().unwrap_or_default()
    }

    /// Reset an out-of-range series index to 0.
    pub fn normalize(&mut self, series_count: usize) {
        if self.series_index >= series_count {
            self.series_index = 0;
        }
    }
}

/// Whether a step measures media durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationLookup {
    Measure,
    /// Use [`PLACEHOLDER_SECS`] for media-derived items.
    Skip,
}

struct Slot {
    series: Series,
    schedule: Option<CronSchedule>,
    files: Vec<PathBuf>,
}

impl Slot {
    fn on_air<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> bool {
        self.schedule.as_ref().is_some_and(|s| s.matches(at))
    }
}

pub struct Sequencer<Tz: TimeZone = Local> {
    slots: Vec<Slot>,
    live: QueryState,
    generation: u64,
    scanner: Arc<dyn MediaScanner>,
    cache: DurationCache,
    tz: Tz,
}

impl Sequencer<Local> {
    /// Sequencer evaluating schedules in the local time zone.
    pub fn new(set: PlaylistSet, scanner: Arc<dyn MediaScanner>) -> Self {
        Sequencer::with_timezone(set, scanner, Local)
    }
}

impl<Tz: TimeZone> Sequencer<Tz> {
    pub fn with_timezone(set: PlaylistSet, scanner: Arc<dyn MediaScanner>, tz: Tz) -> Self {
        let mut sequencer = Sequencer {
            slots: Vec::new(),
            live: QueryState::default(),
            generation: 0,
            scanner,
            cache: DurationCache::new(),
            tz,
        };
        sequencer.reload(set);
        sequencer
    }

    /// Replace the series with a fresh build. Cursors restart from the
    /// build's initial positions; measured durations are kept.
    pub fn reload(&mut self, mut set: PlaylistSet) {
        let mut live = QueryState::default();
        let mut slots = Vec::with_capacity(set.series.len());
        for series in set.series {
            let schedule = match CronSchedule::parse(&series.schedule) {
                Ok(schedule) => Some(schedule),
                Err(e) => {
                    warn!(series = series.id, "Schedule '{}' never matches: {}", series.schedule, e);
                    None
                }
            };
            let files = match set.playlists.remove(&series.id) {
                Some(playlist) => {
                    live.cursors.insert(
                        series.id,
                        Cursor {
                            last_played: playlist.last_played,
                            subsequent_plays: playlist.subsequent_plays,
                        },
                    );
                    playlist.files
                }
                None => Vec::new(),
            };
            slots.push(Slot {
                series,
                schedule,
                files,
            });
        }
        self.slots = slots;
        self.live = live;
        self.generation = set.generation;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn series(&self) -> impl Iterator<Item = &Series> {
        self.slots.iter().map(|s| &s.series)
    }

    pub fn files(&self, series_id: u32) -> &[PathBuf] {
        self.slots
            .iter()
            .find(|s| s.series.id == series_id)
            .map(|s| s.files.as_slice())
            .unwrap_or(&[])
    }

    /// The live cursors.
    pub fn state(&self) -> &QueryState {
        &self.live
    }

    pub fn restore_state(&mut self, state: QueryState) {
        self.live = state;
    }

    pub fn duration_cache(&self) -> &DurationCache {
        &self.cache
    }

    /// Run one step against `state`, moving its clock and cursors.
    ///
    /// Returns `None` when no series has anything to play.
    pub fn query_next(&self, state: &mut QueryState, lookup: DurationLookup) -> Option<MediaItem> {
        if let Some(gap) = self.schedule_gate(state) {
            return Some(gap);
        }
        self.select(state, lookup)
    }

    /// The next `n` items from a copy of `state`. Stops early if nothing is
    /// playable.
    pub fn query(&self, state: &QueryState, n: usize) -> Vec<MediaItem> {
        self.query_with(state, n, DurationLookup::Measure)
    }

    pub fn query_with(&self, state: &QueryState, n: usize, lookup: DurationLookup) -> Vec<MediaItem> {
        let mut scratch = state.clone();
        let mut items = Vec::with_capacity(n);
        for _ in 0..n {
            match self.query_next(&mut scratch, lookup) {
                Some(item) => items.push(item),
                None => break,
            }
        }
        items
    }

    /// Look ahead `n` items from the live cursors with the clock at `now_ms`.
    pub fn preview(&self, n: usize, now_ms: i64) -> Vec<MediaItem> {
        let mut state = self.live.clone();
        state.timestamp_ms = now_ms;
        self.query(&state, n)
    }

    /// Move playback forward by one item.
    pub fn advance_once(&mut self, now_ms: i64) -> Option<MediaItem> {
        self.advance_live(now_ms, DurationLookup::Measure)
    }

    /// Skip ahead `n` items and return the last. Only the returned item has
    /// its duration measured.
    pub fn advance_by(&mut self, n: usize, now_ms: i64) -> Option<MediaItem> {
        let mut item = None;
        for step in 1..=n {
            let lookup = if step < n {
                DurationLookup::Skip
            } else {
                DurationLookup::Measure
            };
            item = self.advance_live(now_ms, lookup);
        }
        item
    }

    fn advance_live(&mut self, now_ms: i64, lookup: DurationLookup) -> Option<MediaItem> {
        let mut state = std::mem::take(&mut self.live);
        state.timestamp_ms = now_ms;
        let item = self.query_next(&mut state, lookup);
        self.live = state;
        item
    }

    /// Step A: dead air if no series with files is on air.
    fn schedule_gate(&self, state: &mut QueryState) -> Option<MediaItem> {
        let count = self.slots.len();
        if count == 0 {
            return None;
        }
        state.normalize(count);
        let now = state.timestamp_ms;
        let at = self.instant(now)?;

        let mut soonest: Option<i64> = None;
        let mut has_content = false;
        for offset in 0..count {
            let slot = &self.slots[(state.series_index + offset) % count];
            if slot.files.is_empty() {
                continue;
            }
            has_content = true;
            let Some(schedule) = &slot.schedule else {
                continue;
            };
            if schedule.matches(&at) {
                return None;
            }
            if let Some(next) = schedule.next_match(&at) {
                let next = next.timestamp_millis();
                // strict comparison keeps the first series found on ties
                if soonest.is_none_or(|s| next < s) {
                    soonest = Some(next);
                }
            }
        }
        if !has_content {
            return None;
        }

        let until = soonest
            .unwrap_or_else(|| now.saturating_add(NO_WINDOW_WAIT_SECS as i64 * 1000))
            .max(now);
        let secs = ((until - now).saturating_add(500) / 1000) as u64;
        state.timestamp_ms = until;
        debug!(secs, "No series on air");
        Some(MediaItem::dead_air(secs))
    }

    /// Step B: walk the rotation to the next on-air series with files.
    fn select(&self, state: &mut QueryState, lookup: DurationLookup) -> Option<MediaItem> {
        let count = self.slots.len();
        if count == 0 {
            return None;
        }
        let at = self.instant(state.timestamp_ms);

        for _ in 0..MAX_QUERY_LOOP_COUNT {
            state.normalize(count);
            let slot = &self.slots[state.series_index];
            let on_air = at.as_ref().is_some_and(|at| slot.on_air(at));
            if slot.files.is_empty() || !on_air {
                state.series_index += 1;
                continue;
            }

            let cursor = state.cursors.entry(slot.series.id).or_default();
            let mut index = cursor.last_played.saturating_add(1);
            if index < 0 || index >= slot.files.len() as i64 {
                index = 0;
            }
            cursor.last_played = index;
            let file = slot.files[index as usize].clone();
            let secs = self.duration_for(&slot.series, &file, lookup);

            cursor.subsequent_plays = cursor.subsequent_plays.saturating_add(1);
            if cursor.subsequent_plays >= slot.series.effective_repeat_count() {
                cursor.subsequent_plays = 0;
                state.series_index += 1;
            }
            state.timestamp_ms = state
                .timestamp_ms
                .saturating_add((secs as i64).saturating_mul(1000));
            return Some(MediaItem::new(file, secs, slot.series.duration));
        }

        warn!("No playable series after {} attempts", MAX_QUERY_LOOP_COUNT);
        None
    }

    fn duration_for(&self, series: &Series, file: &Path, lookup: DurationLookup) -> u64 {
        match (series.duration, lookup) {
            (DurationPolicy::Fixed, _) => series.fixed_secs,
            (DurationPolicy::Media, DurationLookup::Skip) => PLACEHOLDER_SECS,
            (DurationPolicy::Media, DurationLookup::Measure) => {
                self.cache.lookup(self.scanner.as_ref(), file)
            }
        }
    }

    fn instant(&self, timestamp_ms: i64) -> Option<DateTime<Tz>> {
        self.tz.timestamp_millis_opt(timestamp_ms).single()
    }
}
