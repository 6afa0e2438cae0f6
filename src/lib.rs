//! tvflow: core library for a scheduled TV-series channel.
//!
//! Series folders are scanned into playlists, and a round-robin sequencer
//! picks what plays next under each series' cron schedule.
//! The CLI in `main.rs` consumes this crate.

pub mod config;
pub mod cron;
pub mod error;
pub mod media;
pub mod playlist;
pub mod scanner;
pub mod sequencer;
pub mod series;
pub mod sink;
pub mod station;

pub use error::{Error, Result};
