//! Headless integration tests for tvflow.
//!
//! These drive a `Station` end to end with in-memory catalogues and a
//! recording sink, plus one run against real folders on disk.

use chrono::{TimeZone, Utc};
use std::fs;
use std::sync::{Arc, Mutex};
use tvflow::config::StationConfig;
use tvflow::media::MediaItem;
use tvflow::scanner::{FsScanner, MemoryScanner};
use tvflow::series::{DurationPolicy, PlayOrder};
use tvflow::sink::PlaybackSink;
use tvflow::station::{Station, StationEvent};
use tvflow::{Error, Result};

#[derive(Clone, Default)]
struct RecordingSink {
    played: Arc<Mutex<Vec<MediaItem>>>,
    stops: Arc<Mutex<usize>>,
    refuse: bool,
}

impl PlaybackSink for RecordingSink {
    fn play(&mut self, item: &MediaItem) -> Result<()> {
        if self.refuse {
            return Err(Error::Playback("device busy".to_string()));
        }
        self.played.lock().unwrap().push(item.clone());
        Ok(())
    }

    fn stop(&mut self) {
        *self.stops.lock().unwrap() += 1;
    }
}

fn ms(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> i64 {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap().timestamp_millis()
}

fn labels(items: &[MediaItem]) -> Vec<String> {
    items.iter().map(MediaItem::label).collect()
}

fn cartoon_catalogue() -> MemoryScanner {
    MemoryScanner::new()
        .with_folder(
            "Cartoons",
            &[("c03.mkv", 600), ("c01.mkv", 600), ("c02.mkv", 600)],
        )
        .with_folder("News", &[("n1.mp4", 1800)])
        .with_folder("Movies", &[("m1.mkv", 5400), ("m2.mkv", 6000)])
}

fn cartoon_config() -> StationConfig {
    let mut config = StationConfig::new();
    let cartoons = config.add_series("Cartoons".into());
    let news = config.add_series("News".into());
    let movies = config.add_series("Movies".into());
    config.find_series_mut(cartoons).unwrap().repeat_count = 2;
    config.find_series_mut(news).unwrap().schedule = "* 18-19 * * *".to_string();
    config.find_series_mut(movies).unwrap().schedule = "* 20-23 * * 5,6".to_string();
    config
}

fn station(sink: RecordingSink) -> Station<Utc> {
    Station::with_scanner(
        cartoon_config(),
        Arc::new(cartoon_catalogue()),
        Box::new(sink),
        Utc,
    )
}

// ── Build and playback ────────────────────────────────────────────────────

#[test]
fn autoplay_builds_and_starts_first_item() {
    let sink = RecordingSink::default();
    let mut station = station(sink.clone());
    let events = station.subscribe();

    // Tuesday afternoon: only cartoons are on air
    let item = station.autoplay(ms(2024, 3, 5, 14, 0)).unwrap().unwrap();
    assert_eq!(item.label(), "c01.mkv");
    assert_eq!(item.duration_secs, 600);
    assert_eq!(item.policy, DurationPolicy::Media);

    let events: Vec<StationEvent> = events.try_iter().collect();
    assert!(matches!(events[0], StationEvent::BuildCompleted { series: 3, files: 6, .. }));
    assert_eq!(events[1], StationEvent::MediaStarted(item.clone()));
    assert_eq!(labels(&sink.played.lock().unwrap()), vec!["c01.mkv"]);
}

#[test]
fn evening_schedule_interleaves_news() {
    let mut station = station(RecordingSink::default());
    station.build();
    let mut now = ms(2024, 3, 5, 17, 40);
    let mut played = Vec::new();
    for _ in 0..6 {
        let item = station.next(now).unwrap().unwrap();
        now += item.duration_secs as i64 * 1000;
        played.push(item);
    }
    // 17:40 c01, 17:50 c02, 18:00 news, 18:30 c03 c01, 18:50 news
    assert_eq!(
        labels(&played),
        vec!["c01.mkv", "c02.mkv", "n1.mp4", "c03.mkv", "c01.mkv", "n1.mp4"]
    );
}

#[test]
fn weekend_night_reaches_movies() {
    let mut station = station(RecordingSink::default());
    station.build();
    // Friday 2024-03-08 at 20:00 every series but news is on air
    let ahead = station.query(4, ms(2024, 3, 8, 20, 0)).unwrap();
    assert_eq!(
        labels(&ahead),
        vec!["c01.mkv", "c02.mkv", "m1.mkv", "c03.mkv"]
    );
}

#[test]
fn preview_does_not_move_playback() {
    let sink = RecordingSink::default();
    let mut station = station(sink.clone());
    station.build();
    let now = ms(2024, 3, 5, 14, 0);

    let first = station.query(5, now).unwrap();
    let second = station.query(5, now).unwrap();
    assert_eq!(first, second);
    assert!(sink.played.lock().unwrap().is_empty());

    let started = station.next(now).unwrap().unwrap();
    assert_eq!(started, first[0]);
}

#[test]
fn query_waits_for_current_item() {
    let mut station = station(RecordingSink::default());
    station.build();
    station.next(ms(2024, 3, 5, 17, 40)).unwrap();
    let now = ms(2024, 3, 5, 17, 50);
    // c02 runs 17:50..18:00, so the look-ahead starts in the news window
    assert_eq!(station.next(now).unwrap().unwrap().label(), "c02.mkv");
    assert_eq!(station.remaining_play_secs(now), 600);
    let ahead = station.query(1, now).unwrap();
    assert_eq!(labels(&ahead), vec!["n1.mp4"]);
}

#[test]
fn jump_skips_ahead_and_plays_last() {
    let sink = RecordingSink::default();
    let mut station = station(sink.clone());
    station.build();
    let item = station.jump(3, ms(2024, 3, 5, 14, 0)).unwrap().unwrap();
    assert_eq!(item.label(), "c03.mkv");
    assert_eq!(item.duration_secs, 600);
    assert_eq!(labels(&sink.played.lock().unwrap()), vec!["c03.mkv"]);
}

#[test]
fn refused_item_still_advances() {
    let sink = RecordingSink {
        refuse: true,
        ..RecordingSink::default()
    };
    let mut station = station(sink);
    let events = station.subscribe();
    station.build();
    let now = ms(2024, 3, 5, 14, 0);

    let first = station.next(now).unwrap().unwrap();
    let second = station.next(now).unwrap().unwrap();
    assert_eq!(labels(&[first.clone(), second]), vec!["c01.mkv", "c02.mkv"]);
    assert!(station.now_playing().is_none());

    let failures: Vec<StationEvent> = events
        .try_iter()
        .filter(|e| matches!(e, StationEvent::MediaStartFailed { .. }))
        .collect();
    assert_eq!(failures.len(), 2);
    assert!(matches!(
        &failures[0],
        StationEvent::MediaStartFailed { item, error } if item == &first && error.contains("device busy")
    ));
}

#[test]
fn dead_air_is_played_as_a_gap() {
    let mut config = StationConfig::new();
    let id = config.add_series("News".into());
    config.find_series_mut(id).unwrap().schedule = "0 9 * * *".to_string();
    let sink = RecordingSink::default();
    let mut station = Station::with_scanner(
        config,
        Arc::new(MemoryScanner::new().with_folder("News", &[("n1.mp4", 300)])),
        Box::new(sink.clone()),
        Utc,
    );
    station.build();

    let gap = station.next(ms(2024, 3, 5, 8, 0)).unwrap().unwrap();
    assert!(gap.is_dead_air());
    assert_eq!(gap.duration_secs, 3600);
    assert_eq!(station.remaining_play_secs(ms(2024, 3, 5, 8, 30)), 1800);

    let news = station.next(ms(2024, 3, 5, 9, 0)).unwrap().unwrap();
    assert_eq!(news.label(), "n1.mp4");
}

#[test]
fn empty_station_stops_the_sink() {
    let mut config = StationConfig::new();
    config.add_series("Nothing".into());
    let sink = RecordingSink::default();
    let mut station = Station::with_scanner(
        config,
        Arc::new(MemoryScanner::new()),
        Box::new(sink.clone()),
        Utc,
    );
    let events = station.subscribe();
    assert_eq!(station.autoplay(ms(2024, 3, 5, 14, 0)).unwrap(), None);
    assert_eq!(*sink.stops.lock().unwrap(), 1);
    assert!(events.try_iter().any(|e| e == StationEvent::NothingPlayable));
}

// ── Rebuilds ──────────────────────────────────────────────────────────────

#[test]
fn rebuild_picks_up_config_changes() {
    let mut station = station(RecordingSink::default());
    station.build();
    let now = ms(2024, 3, 5, 14, 0);
    station.next(now).unwrap();

    let cartoons = station.config().series[0].id;
    let series = station.config_mut().find_series_mut(cartoons).unwrap();
    series.order = PlayOrder::Sequential;
    series.start_offset = 2;
    assert!(station.build());
    assert_eq!(station.status(now).generation, Some(2));
    assert_eq!(station.next(now).unwrap().unwrap().label(), "c03.mkv");
}

#[test]
fn randomized_rotation_keeps_every_series() {
    let mut config = cartoon_config();
    config.randomize_series_order = true;
    config.randomize_start_offset = true;
    let mut station = Station::with_scanner(
        config,
        Arc::new(cartoon_catalogue()),
        Box::new(RecordingSink::default()),
        Utc,
    );
    assert!(station.build());
    let sequencer = station.sequencer().unwrap();
    let mut ids: Vec<u32> = sequencer.series().map(|s| s.id).collect();
    ids.sort();
    assert_eq!(ids, vec![1, 2, 3]);
    for id in ids {
        let cursor = sequencer.state().cursor(id).last_played;
        assert!(cursor >= -1 && cursor < sequencer.files(id).len() as i64);
    }
}

// ── Real folders ──────────────────────────────────────────────────────────

#[test]
fn scans_real_folders_and_survives_unprobeable_files() {
    let dir = tempfile::tempdir().unwrap();
    let show = dir.path().join("Show");
    let season = show.join("Season 2");
    fs::create_dir_all(&season).unwrap();
    fs::write(show.join("Episode 10.mkv"), b"not really video").unwrap();
    fs::write(show.join("Episode 9.mkv"), b"not really video").unwrap();
    fs::write(season.join("Episode 1.mkv"), b"not really video").unwrap();
    fs::write(show.join("cover.jpg"), b"jpeg").unwrap();

    let mut config = StationConfig::new();
    config.add_series(show.clone());
    let config_path = dir.path().join("tvflow.json");
    config.save(&config_path).unwrap();
    let config = StationConfig::load(&config_path);

    let scanner = Arc::new(FsScanner::new(&config.accepted_extensions));
    let sink = RecordingSink::default();
    let mut station = Station::with_scanner(config, scanner, Box::new(sink.clone()), Utc);
    assert!(station.build());

    let now = ms(2024, 3, 5, 14, 0);
    let ahead = station.query(3, now).unwrap();
    assert_eq!(
        labels(&ahead),
        vec!["Episode 9.mkv", "Episode 10.mkv", "Episode 1.mkv"]
    );
    // neither lofty nor ffprobe can read these files, so they play for zero seconds
    assert!(ahead.iter().all(|i| i.duration_secs == 0));
    assert!(station.next(now).unwrap().is_some());
}

#[test]
fn wrong_extensions_leave_series_empty() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.mkv"), b"x").unwrap();
    let mut config = StationConfig::new();
    config.add_series(dir.path().to_path_buf());
    config.set_extensions(&["mp4"]).unwrap();

    let scanner = Arc::new(config.scanner());
    let mut station =
        Station::with_scanner(config, scanner, Box::new(RecordingSink::default()), Utc);
    assert!(station.build());
    assert_eq!(station.status(0).files, 0);
    assert_eq!(station.next(0).unwrap(), None);
}
