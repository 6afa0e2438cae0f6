//! Playlist construction.
//!
//! A build scans every series' source folder, orders the files according to
//! the series' [`PlayOrder`], and places the play cursor according to the
//! start offset. Builds are generation-guarded: starting a new build makes
//! any build still in flight stale, and a stale build never writes its scan
//! results or reports completion.

use crate::scanner::{BuildGenerations, MediaScanner, ScanToken, Superseded};
use crate::series::{PlayOrder, Series};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::iter::Peekable;
use std::path::PathBuf;
use std::str::Chars;
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::{debug, info};

/// Ordered files of one series plus its play cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuiltPlaylist {
    pub files: Vec<PathBuf>,
    /// Index of the last played file; -1 when nothing has played yet.
    pub last_played: i64,
    /// Plays so far in the current repeat block.
    pub subsequent_plays: u32,
}

impl BuiltPlaylist {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// The file the cursor will play next, if any.
    pub fn upcoming(&self) -> Option<&PathBuf> {
        let next = self.last_played + 1;
        let next = if next < 0 || next >= self.len() as i64 { 0 } else { next };
        self.files.get(next as usize)
    }
}

/// Output of a completed build.
#[derive(Debug, Clone, Serialize)]
pub struct PlaylistSet {
    pub generation: u64,
    /// Rotation order walked by the sequencer.
    pub series: Vec<Series>,
    pub playlists: HashMap<u32, BuiltPlaylist>,
}

impl PlaylistSet {
    pub fn playlist(&self, series_id: u32) -> Option<&BuiltPlaylist> {
        self.playlists.get(&series_id)
    }

    pub fn file_count(&self) -> usize {
        self.playlists.values().map(BuiltPlaylist::len).sum()
    }
}

/// Station-wide build settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Shuffle the rotation order of the series on every build.
    pub randomize_series_order: bool,
    /// Start every series at a random position instead of its start offset.
    pub randomize_start_offset: bool,
}

#[derive(Debug, Clone)]
pub enum BuildOutcome {
    Completed(PlaylistSet),
    /// A newer build started before this one finished.
    Superseded,
}

pub struct PlaylistBuilder {
    scanner: Arc<dyn MediaScanner>,
    generations: BuildGenerations,
    file_lists: Mutex<HashMap<u32, Vec<PathBuf>>>,
    options: BuildOptions,
    seed: Option<u64>,
}

impl PlaylistBuilder {
    pub fn new(scanner: Arc<dyn MediaScanner>) -> Self {
        PlaylistBuilder {
            scanner,
            generations: BuildGenerations::new(),
            file_lists: Mutex::new(HashMap::new()),
            options: BuildOptions::default(),
            seed: None,
        }
    }

    pub fn with_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    /// Make shuffles reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn set_options(&mut self, options: BuildOptions) {
        self.options = options;
    }

    pub fn options(&self) -> BuildOptions {
        self.options
    }

    pub fn scanner(&self) -> Arc<dyn MediaScanner> {
        self.scanner.clone()
    }

    pub fn generations(&self) -> &BuildGenerations {
        &self.generations
    }

    /// Last committed scan result for a series.
    pub fn file_list(&self, series_id: u32) -> Vec<PathBuf> {
        self.lists().get(&series_id).cloned().unwrap_or_default()
    }

    /// Scan, order and position every series.
    pub fn build(&self, series: &[Series]) -> BuildOutcome {
        let token = self.generations.begin();
        info!(
            generation = token.generation(),
            series = series.len(),
            "Building playlists"
        );
        if !self.scan_all(series, &token) {
            debug!(generation = token.generation(), "Build superseded during scan");
            return BuildOutcome::Superseded;
        }

        let mut rng = self.rng();
        let mut order = series.to_vec();
        if self.options.randomize_series_order {
            rng.shuffle(&mut order);
        }

        let mut playlists = HashMap::new();
        {
            let lists = self.lists();
            for s in &order {
                let mut files = lists.get(&s.id).cloned().unwrap_or_default();
                arrange(&mut files, s.order, &mut rng);
                let offset = if self.options.randomize_start_offset && !files.is_empty() {
                    rng.usize(..files.len()) as i64
                } else {
                    s.start_offset
                };
                let playlist = BuiltPlaylist {
                    last_played: initial_cursor(offset, files.len()),
                    subsequent_plays: 0,
                    files,
                };
                playlists.insert(s.id, playlist);
            }
        }

        if !token.is_current() {
            debug!(generation = token.generation(), "Build superseded while ordering");
            return BuildOutcome::Superseded;
        }
        let set = PlaylistSet {
            generation: token.generation(),
            series: order,
            playlists,
        };
        info!(
            generation = set.generation,
            files = set.file_count(),
            "Build completed"
        );
        BuildOutcome::Completed(set)
    }

    /// Scan all series concurrently under `token`. Returns whether the token
    /// was still current once every scan finished.
    pub fn scan_all(&self, series: &[Series], token: &ScanToken) -> bool {
        thread::scope(|scope| {
            for s in series {
                scope.spawn(move || self.scan_into(s, token));
            }
        });
        token.is_current()
    }

    /// Rescan a single series under a fresh generation.
    pub fn scan_series(&self, series: &Series) -> bool {
        let token = self.generations.begin();
        self.scan_into(series, &token)
    }

    fn scan_into(&self, series: &Series, token: &ScanToken) -> bool {
        let files = match self.scanner.list_files(&series.source, token) {
            Ok(files) => files,
            Err(Superseded) => return false,
        };
        let mut lists = self.lists();
        // Checked under the lock so a stale scan can never overwrite a fresher one.
        if !token.is_current() {
            return false;
        }
        debug!(series = series.id, files = files.len(), "Committed scan");
        lists.insert(series.id, files);
        true
    }

    fn lists(&self) -> std::sync::MutexGuard<'_, HashMap<u32, Vec<PathBuf>>> {
        self.file_lists.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn rng(&self) -> fastrand::Rng {
        self.seed.map_or_else(fastrand::Rng::new, fastrand::Rng::with_seed)
    }
}

/// Put files in play order.
fn arrange(files: &mut Vec<PathBuf>, order: PlayOrder, rng: &mut fastrand::Rng) {
    match order {
        PlayOrder::Sequential => {
            let mut keyed: Vec<(String, PathBuf)> = files
                .drain(..)
                .map(|p| (p.to_string_lossy().to_lowercase(), p))
                .collect();
            keyed.sort_by(|a, b| natural_cmp(&a.0, &b.0).then_with(|| a.1.cmp(&b.1)));
            files.extend(keyed.into_iter().map(|(_, p)| p));
        }
        PlayOrder::Random => rng.shuffle(files),
    }
}

/// Last-played index for a fresh playlist of `len` files.
///
/// The cursor sits at `start_offset - 1`. Negative offsets count back from
/// the end of the list. `len - 1` and `-1` both mean "play index 0 next" and
/// are reported as `-1`.
pub fn initial_cursor(start_offset: i64, len: usize) -> i64 {
    let len = len as i64;
    if len == 0 {
        return -1;
    }
    let index = start_offset.saturating_sub(1);
    if index >= len - 1 {
        -1
    } else if index < -1 {
        (index + 1).rem_euclid(len) - 1
    } else {
        index
    }
}

/// Compare strings the way people read them: digit runs compare by value.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut a = a.chars().peekable();
    let mut b = b.chars().peekable();
    loop {
        match (a.peek().copied(), b.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let ord = compare_digits(&take_digits(&mut a), &take_digits(&mut b));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(&y);
                }
                a.next();
                b.next();
            }
        }
    }
}

fn take_digits(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(c) = chars.next_if(|c| c.is_ascii_digit()) {
        digits.push(c);
    }
    digits
}

fn compare_digits(x: &str, y: &str) -> Ordering {
    let xt = x.trim_start_matches('0');
    let yt = y.trim_start_matches('0');
    xt.len()
        .cmp(&yt.len())
        .then_with(|| xt.cmp(yt))
        .then_with(|| x.len().cmp(&y.len()))
}
