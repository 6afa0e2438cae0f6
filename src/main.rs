use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tvflow::config::StationConfig;
use tvflow::cron::CronSchedule;
use tvflow::media::MediaItem;
use tvflow::series::{DurationPolicy, PlayOrder, Series};
use tvflow::sink::LogSink;
use tvflow::station::{Station, clock_ms};

#[derive(Parser)]
#[command(name = "tvflow", about = "Scheduled TV channel CLI")]
struct Cli {
    /// Config file (defaults to the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show station status
    Status,
    /// Series management
    Series {
        #[command(subcommand)]
        action: SeriesCmd,
    },
    /// Station configuration
    Config {
        #[command(subcommand)]
        action: ConfigCmd,
    },
    /// Test schedule expressions
    Cron {
        #[command(subcommand)]
        action: CronCmd,
    },
    /// Build playlists and list what would play next
    Preview {
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
    },
    /// Build playlists, skip ahead, and show the item that would play
    Jump { count: usize },
    /// Build playlists and play items through the log sink
    Run {
        /// Stop after this many items
        #[arg(short, long)]
        count: Option<usize>,
        /// Simulate the clock instead of waiting for each item
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum SeriesCmd {
    /// List series in rotation order
    List,
    /// Add a series folder
    Add {
        source: PathBuf,
        #[command(flatten)]
        settings: SeriesSettings,
    },
    /// Change a series
    Set {
        id: u32,
        #[command(flatten)]
        settings: SeriesSettings,
    },
    /// Remove a series
    Remove { id: u32 },
    /// Move a series to a new rotation position (1-based)
    Move { id: u32, position: usize },
}

#[derive(clap::Args)]
struct SeriesSettings {
    #[arg(long)]
    title: Option<String>,
    /// Five-field cron expression
    #[arg(long)]
    schedule: Option<String>,
    /// Items played before rotating to the next series
    #[arg(long)]
    repeat: Option<u32>,
    /// sequential or random
    #[arg(long)]
    order: Option<String>,
    #[arg(long, allow_hyphen_values = true)]
    offset: Option<i64>,
    /// Play every item for this many seconds
    #[arg(long, conflicts_with = "media")]
    fixed: Option<u64>,
    /// Use each file's measured length
    #[arg(long)]
    media: bool,
}

#[derive(Subcommand)]
enum ConfigCmd {
    /// Show configuration
    Show,
    /// Replace the accepted file extensions
    Extensions {
        #[arg(required = true)]
        extensions: Vec<String>,
    },
    /// Shuffle the series rotation on every build
    RandomizeSeries { state: Switch },
    /// Start every series at a random episode
    RandomizeOffset { state: Switch },
}

#[derive(Subcommand)]
enum CronCmd {
    /// Check whether an expression matches a time
    Check {
        expr: String,
        /// Local time "YYYY-MM-DD HH:MM" (defaults to now)
        #[arg(long)]
        at: Option<String>,
    },
    /// Find the next time an expression matches
    Next {
        expr: String,
        /// Local time "YYYY-MM-DD HH:MM" (defaults to now)
        #[arg(long)]
        from: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}

impl Switch {
    fn enabled(self) -> bool {
        matches!(self, Switch::On)
    }
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tvflow=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(StationConfig::default_path);
    let mut config = StationConfig::load(&config_path);

    match cli.command {
        Commands::Status => {
            println!("tvflow v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "Series: {} | Randomize series: {} | Randomize offset: {} | Config: {}",
                config.series.len(),
                on_off(config.randomize_series_order),
                on_off(config.randomize_start_offset),
                config_path.display()
            );
            let now = Local::now();
            let on_air: Vec<String> = config
                .series
                .iter()
                .filter(|s| tvflow::cron::matches(&s.schedule, &now))
                .map(Series::display_name)
                .collect();
            if on_air.is_empty() {
                println!("On air now: nothing");
            } else {
                println!("On air now: {}", on_air.join(", "));
            }
        }
        Commands::Series { action } => match action {
            SeriesCmd::List => {
                if config.series.is_empty() {
                    println!("No series. Use 'series add <folder>' to add one.");
                }
                for (i, s) in config.series.iter().enumerate() {
                    let duration = match s.duration {
                        DurationPolicy::Media => "media".to_string(),
                        DurationPolicy::Fixed => format!("{}s", s.fixed_secs),
                    };
                    println!(
                        "{:>3}. [{}] {} | {} | cron '{}' | x{} | {} | offset {} | {}",
                        i + 1,
                        s.id,
                        s.display_name(),
                        s.source.display(),
                        s.schedule,
                        s.repeat_count,
                        s.order,
                        s.start_offset,
                        duration
                    );
                }
            }
            SeriesCmd::Add { source, settings } => {
                if !source.is_dir() {
                    fail(&format!("'{}' is not a directory", source.display()));
                }
                let id = config.add_series(source);
                if let Some(series) = config.find_series_mut(id) {
                    apply_settings(series, settings);
                }
                save(&config, &config_path);
                println!("Added series {}.", id);
            }
            SeriesCmd::Set { id, settings } => {
                let Some(series) = config.find_series_mut(id) else {
                    fail(&format!("series {} not found", id));
                };
                apply_settings(series, settings);
                save(&config, &config_path);
                println!("Updated series {}.", id);
            }
            SeriesCmd::Remove { id } => match config.remove_series(id) {
                Ok(series) => {
                    save(&config, &config_path);
                    println!("Removed '{}'.", series.display_name());
                }
                Err(e) => fail(&e.to_string()),
            },
            SeriesCmd::Move { id, position } => {
                if position == 0 {
                    fail("positions start at 1");
                }
                if let Err(e) = config.move_series(id, position - 1) {
                    fail(&e.to_string());
                }
                save(&config, &config_path);
                println!("Moved series {} to position {}.", id, position);
            }
        },
        Commands::Config { action } => match action {
            ConfigCmd::Show => {
                println!("Config file: {}", config_path.display());
                println!("Extensions: {}", config.accepted_extensions.join(" "));
                println!("Max scan depth: {}", config.max_scan_depth);
                println!("Randomize series: {}", on_off(config.randomize_series_order));
                println!("Randomize offset: {}", on_off(config.randomize_start_offset));
            }
            ConfigCmd::Extensions { extensions } => {
                if let Err(e) = config.set_extensions(&extensions) {
                    fail(&e.to_string());
                }
                save(&config, &config_path);
                println!("Extensions: {}", config.accepted_extensions.join(" "));
            }
            ConfigCmd::RandomizeSeries { state } => {
                config.randomize_series_order = state.enabled();
                save(&config, &config_path);
                println!("Randomize series: {}", on_off(state.enabled()));
            }
            ConfigCmd::RandomizeOffset { state } => {
                config.randomize_start_offset = state.enabled();
                save(&config, &config_path);
                println!("Randomize offset: {}", on_off(state.enabled()));
            }
        },
        Commands::Cron { action } => match action {
            CronCmd::Check { expr, at } => {
                let schedule = parse_schedule(&expr);
                let at = at.map_or_else(Local::now, |s| parse_local(&s));
                let verdict = if schedule.matches(&at) { "matches" } else { "does not match" };
                println!("'{}' {} {}", schedule, verdict, at.format("%Y-%m-%d %H:%M %a"));
            }
            CronCmd::Next { expr, from } => {
                let schedule = parse_schedule(&expr);
                let from = from.map_or_else(Local::now, |s| parse_local(&s));
                match schedule.next_match(&from) {
                    Some(next) => println!("{}", next.format("%Y-%m-%d %H:%M %a")),
                    None => fail(&format!("'{}' never matches", schedule)),
                }
            }
        },
        Commands::Preview { count } => {
            let station = built_station(config);
            let now = clock_ms();
            match station.query(count, now) {
                Ok(items) => print_items(&items, now),
                Err(e) => fail(&e.to_string()),
            }
        }
        Commands::Jump { count } => {
            let mut station = built_station(config);
            match station.jump(count, clock_ms()) {
                Ok(Some(item)) => println!("Now playing: {} ({})", item.label(), item.duration_display()),
                Ok(None) => println!("Nothing playable."),
                Err(e) => fail(&e.to_string()),
            }
        }
        Commands::Run { count, dry_run } => {
            let limit = count.or(dry_run.then_some(20));
            let mut station = built_station(config);
            let mut now = clock_ms();
            let mut played = 0;
            while limit.is_none_or(|limit| played < limit) {
                let item = match station.next(now) {
                    Ok(Some(item)) => item,
                    Ok(None) => {
                        println!("Nothing playable.");
                        break;
                    }
                    Err(e) => fail(&e.to_string()),
                };
                println!("{} {} ({})", timestamp(now), item.label(), item.duration_display());
                played += 1;
                if dry_run {
                    now += item.duration_secs as i64 * 1000;
                } else {
                    // unmeasured items still hold the air for a second
                    thread::sleep(Duration::from_secs(item.duration_secs.max(1)));
                    now = clock_ms();
                }
            }
        }
    }
}

fn built_station(config: StationConfig) -> Station {
    if config.series.is_empty() {
        fail("no series configured. Use 'series add <folder>' first.");
    }
    let mut station = Station::new(config, Box::new(LogSink));
    if !station.build() {
        fail("playlist build was superseded");
    }
    station
}

fn apply_settings(series: &mut Series, settings: SeriesSettings) {
    if let Some(title) = settings.title {
        series.title = title;
    }
    if let Some(schedule) = settings.schedule {
        series.schedule = parse_schedule(&schedule).to_string();
    }
    if let Some(repeat) = settings.repeat {
        if repeat == 0 {
            fail("repeat count must be at least 1");
        }
        series.repeat_count = repeat;
    }
    if let Some(order) = settings.order {
        match PlayOrder::from_str_loose(&order) {
            Ok(order) => series.order = order,
            Err(e) => fail(&e),
        }
    }
    if let Some(offset) = settings.offset {
        series.start_offset = offset;
    }
    if let Some(secs) = settings.fixed {
        series.duration = DurationPolicy::Fixed;
        series.fixed_secs = secs;
    }
    if settings.media {
        series.duration = DurationPolicy::Media;
    }
}

fn print_items(items: &[MediaItem], start_ms: i64) {
    if items.is_empty() {
        println!("Nothing playable.");
        return;
    }
    let mut at = start_ms;
    for (i, item) in items.iter().enumerate() {
        println!(
            "{:>3}. {} {} ({})",
            i + 1,
            timestamp(at),
            item.label(),
            item.duration_display()
        );
        at += item.duration_secs as i64 * 1000;
    }
}

fn timestamp(ms: i64) -> String {
    match Local.timestamp_millis_opt(ms).single() {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "????-??-?? ??:??:??".to_string(),
    }
}

fn parse_schedule(expr: &str) -> CronSchedule {
    match CronSchedule::parse(expr) {
        Ok(schedule) => schedule,
        Err(e) => fail(&format!("invalid schedule '{}': {}", expr, e)),
    }
}

fn parse_local(s: &str) -> DateTime<Local> {
    let naive = match NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M") {
        Ok(naive) => naive,
        Err(e) => fail(&format!("invalid time '{}': {} (expected YYYY-MM-DD HH:MM)", s, e)),
    };
    match Local.from_local_datetime(&naive).earliest() {
        Some(t) => t,
        None => fail(&format!("'{}' does not exist in the local time zone", s)),
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}

fn save(config: &StationConfig, path: &Path) {
    if let Err(e) = config.save(path) {
        fail(&format!("could not save config: {}", e));
    }
}

fn fail(message: &str) -> ! {
    eprintln!("Error: {}", message);
    std::process::exit(1);
}
