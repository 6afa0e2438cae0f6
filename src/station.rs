//! Station: the facade a host drives.
//!
//! Wires the configured series, the playlist builder, the sequencer and a
//! playback sink together. Hosts call [`Station::build`] after configuration
//! changes, then [`Station::next`] each time the current item finishes.
//! Progress is reported on channels handed out by [`Station::subscribe`].

use crate::config::StationConfig;
use crate::error::{Error, Result};
use crate::media::MediaItem;
use crate::playlist::{BuildOutcome, PlaylistBuilder};
use crate::scanner::MediaScanner;
use crate::sequencer::Sequencer;
use crate::series::SeriesRegistry;
use crate::sink::PlaybackSink;
use chrono::{Local, TimeZone, Utc};
use serde::Serialize;
use std::sync::{Arc, mpsc};
use tracing::{info, warn};

/// Notifications sent to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StationEvent {
    BuildCompleted {
        generation: u64,
        series: usize,
        files: usize,
    },
    /// A newer build started first; this one was discarded.
    BuildSuperseded,
    MediaStarted(MediaItem),
    /// The sink refused the item. The cursors have still moved past it.
    MediaStartFailed { item: MediaItem, error: String },
    NothingPlayable,
}

/// Snapshot for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct StationStatus {
    pub series: usize,
    pub built: bool,
    pub generation: Option<u64>,
    pub files: usize,
    pub now_playing: Option<MediaItem>,
    pub remaining_secs: u64,
}

/// Current wall-clock time in epoch milliseconds.
pub fn clock_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub struct Station<Tz: TimeZone = Local> {
    config: StationConfig,
    builder: PlaylistBuilder,
    sequencer: Option<Sequencer<Tz>>,
    sink: Box<dyn PlaybackSink>,
    subscribers: Vec<mpsc::Sender<StationEvent>>,
    now_playing: Option<MediaItem>,
    playing_until_ms: Option<i64>,
    tz: Tz,
}

impl Station<Local> {
    /// Station scanning real folders, with schedules in local time.
    pub fn new(config: StationConfig, sink: Box<dyn PlaybackSink>) -> Self {
        let scanner = Arc::new(config.scanner());
        Station::with_scanner(config, scanner, sink, Local)
    }
}

impl<Tz: TimeZone> Station<Tz> {
    pub fn with_scanner(
        config: StationConfig,
        scanner: Arc<dyn MediaScanner>,
        sink: Box<dyn PlaybackSink>,
        tz: Tz,
    ) -> Self {
        let builder = PlaylistBuilder::new(scanner).with_options(config.build_options());
        Station {
            config,
            builder,
            sequencer: None,
            sink,
            subscribers: Vec::new(),
            now_playing: None,
            playing_until_ms: None,
            tz,
        }
    }

    pub fn config(&self) -> &StationConfig {
        &self.config
    }

    /// Changes take effect on the next build.
    pub fn config_mut(&mut self) -> &mut StationConfig {
        &mut self.config
    }

    pub fn builder(&self) -> &PlaylistBuilder {
        &self.builder
    }

    pub fn sequencer(&self) -> Option<&Sequencer<Tz>> {
        self.sequencer.as_ref()
    }

    pub fn sequencer_mut(&mut self) -> Option<&mut Sequencer<Tz>> {
        self.sequencer.as_mut()
    }

    pub fn is_built(&self) -> bool {
        self.sequencer.is_some()
    }

    pub fn now_playing(&self) -> Option<&MediaItem> {
        self.now_playing.as_ref()
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&mut self) -> mpsc::Receiver<StationEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    /// Rescan and rebuild all playlists. Returns false if the build was
    /// superseded.
    pub fn build(&mut self) -> bool {
        self.builder.set_options(self.config.build_options());
        match self.builder.build(&self.config.list_series()) {
            BuildOutcome::Completed(set) => {
                let event = StationEvent::BuildCompleted {
                    generation: set.generation,
                    series: set.series.len(),
                    files: set.file_count(),
                };
                match &mut self.sequencer {
                    Some(sequencer) => sequencer.reload(set),
                    None => {
                        let scanner = self.builder.scanner();
                        self.sequencer =
                            Some(Sequencer::with_timezone(set, scanner, self.tz.clone()));
                    }
                }
                self.emit(event);
                true
            }
            BuildOutcome::Superseded => {
                self.emit(StationEvent::BuildSuperseded);
                false
            }
        }
    }

    /// Seconds left of the current item at `now_ms`.
    pub fn remaining_play_secs(&self, now_ms: i64) -> u64 {
        self.playing_until_ms
            .map_or(0, |until| (until.saturating_sub(now_ms).max(0) / 1000) as u64)
    }

    /// Override how long the current item keeps playing, e.g. after a seek.
    pub fn set_remaining_play_time(&mut self, secs: u64, now_ms: i64) {
        self.playing_until_ms = Some(now_ms.saturating_add(secs as i64 * 1000));
    }

    /// The next `n` items after the current one finishes. Moves nothing.
    pub fn query(&self, n: usize, now_ms: i64) -> Result<Vec<MediaItem>> {
        let sequencer = self.sequencer.as_ref().ok_or(Error::NotBuilt)?;
        let start = self.playing_until_ms.map_or(now_ms, |until| until.max(now_ms));
        Ok(sequencer.preview(n, start))
    }

    /// Advance one item and hand it to the sink. `None` stops the sink.
    pub fn next(&mut self, now_ms: i64) -> Result<Option<MediaItem>> {
        let sequencer = self.sequencer.as_mut().ok_or(Error::NotBuilt)?;
        let item = sequencer.advance_once(now_ms);
        self.start(item.clone(), now_ms);
        Ok(item)
    }

    /// Skip `count` items and play the last one.
    pub fn jump(&mut self, count: usize, now_ms: i64) -> Result<Option<MediaItem>> {
        if count == 0 {
            return Err(Error::InvalidInput("Jump count must be at least 1".to_string()));
        }
        let sequencer = self.sequencer.as_mut().ok_or(Error::NotBuilt)?;
        let item = sequencer.advance_by(count, now_ms);
        info!(count, "Jumped ahead");
        self.start(item.clone(), now_ms);
        Ok(item)
    }

    /// Build, then start the first item.
    pub fn autoplay(&mut self, now_ms: i64) -> Result<Option<MediaItem>> {
        if !self.build() {
            return Ok(None);
        }
        self.next(now_ms)
    }

    pub fn status(&self, now_ms: i64) -> StationStatus {
        StationStatus {
            series: self.config.series.len(),
            built: self.is_built(),
            generation: self.sequencer.as_ref().map(Sequencer::generation),
            files: self
                .sequencer
                .as_ref()
                .map_or(0, |s| s.series().map(|series| s.files(series.id).len()).sum::<usize>()),
            now_playing: self.now_playing.clone(),
            remaining_secs: self.remaining_play_secs(now_ms),
        }
    }

    fn start(&mut self, item: Option<MediaItem>, now_ms: i64) {
        let Some(item) = item else {
            self.sink.stop();
            self.now_playing = None;
            self.playing_until_ms = None;
            self.emit(StationEvent::NothingPlayable);
            return;
        };
        match self.sink.play(&item) {
            Ok(()) => {
                self.set_remaining_play_time(item.duration_secs, now_ms);
                self.now_playing = Some(item.clone());
                self.emit(StationEvent::MediaStarted(item));
            }
            Err(e) => {
                warn!(file = %item.label(), "Sink could not start item: {}", e);
                self.now_playing = None;
                self.playing_until_ms = None;
                self.emit(StationEvent::MediaStartFailed {
                    item,
                    error: e.to_string(),
                });
            }
        }
    }

    fn emit(&mut self, event: StationEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::MemoryScanner;
    use crate::sink::{ChannelSink, LogSink, SinkCommand};

    fn station(scanner: MemoryScanner, config: StationConfig) -> Station<Utc> {
        Station::with_scanner(config, Arc::new(scanner), Box::new(LogSink), Utc)
    }

    fn one_series() -> (MemoryScanner, StationConfig) {
        let scanner = MemoryScanner::new().with_folder("A", &[("a1", 60), ("a2", 90)]);
        let mut config = StationConfig::new();
        config.add_series("A".into());
        (scanner, config)
    }

    #[test]
    fn advancing_before_build_errors() {
        let (scanner, config) = one_series();
        let mut station = station(scanner, config);
        assert!(matches!(station.next(0), Err(Error::NotBuilt)));
        assert!(matches!(station.query(3, 0), Err(Error::NotBuilt)));
        assert!(!station.status(0).built);
    }

    #[test]
    fn build_emits_completion() {
        let (scanner, config) = one_series();
        let mut station = station(scanner, config);
        let events = station.subscribe();
        assert!(station.build());
        assert_eq!(
            events.try_recv().unwrap(),
            StationEvent::BuildCompleted {
                generation: 1,
                series: 1,
                files: 2
            }
        );
        assert_eq!(station.status(0).files, 2);
    }

    #[test]
    fn query_starts_after_current_item() {
        let (scanner, config) = one_series();
        let mut station = station(scanner, config);
        station.build();
        let first = station.next(0).unwrap().unwrap();
        assert_eq!(first.label(), "a1");
        assert_eq!(station.remaining_play_secs(20_000), 40);

        let ahead = station.query(2, 20_000).unwrap();
        assert_eq!(ahead.iter().map(MediaItem::label).collect::<Vec<_>>(), vec!["a2", "a1"]);

        station.set_remaining_play_time(5, 20_000);
        assert_eq!(station.remaining_play_secs(20_000), 5);
    }

    #[test]
    fn jump_zero_is_rejected() {
        let (scanner, config) = one_series();
        let mut station = station(scanner, config);
        station.build();
        assert!(matches!(station.jump(0, 0), Err(Error::InvalidInput(_))));
        assert_eq!(station.jump(2, 0).unwrap().unwrap().label(), "a2");
    }

    #[test]
    fn nothing_playable_stops_the_sink() {
        let (sink, commands) = ChannelSink::new();
        let mut config = StationConfig::new();
        config.add_series("Empty".into());
        let mut station =
            Station::with_scanner(config, Arc::new(MemoryScanner::new()), Box::new(sink), Utc);
        let events = station.subscribe();
        assert_eq!(station.autoplay(0).unwrap(), None);
        assert_eq!(commands.try_recv().unwrap(), SinkCommand::Stop);
        let events: Vec<StationEvent> = events.try_iter().collect();
        assert_eq!(events.last(), Some(&StationEvent::NothingPlayable));
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let (scanner, config) = one_series();
        let mut station = station(scanner, config);
        drop(station.subscribe());
        let kept = station.subscribe();
        station.build();
        assert_eq!(station.subscribers.len(), 1);
        assert!(kept.try_recv().is_ok());
    }
}
