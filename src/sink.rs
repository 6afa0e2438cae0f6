//! Playback sinks: where chosen items go.

use crate::error::{Error, Result};
use crate::media::MediaItem;
use std::sync::mpsc;
use tracing::info;

/// The external player.
pub trait PlaybackSink: Send {
    /// Begin playing `item` for roughly its duration. Dead air items carry no
    /// file; a sink should treat them as a timed pause.
    fn play(&mut self, item: &MediaItem) -> Result<()>;

    /// Nothing is playable; stop whatever is playing.
    fn stop(&mut self) {}
}

/// Logs each item instead of playing it.
#[derive(Debug, Default)]
pub struct LogSink;

impl PlaybackSink for LogSink {
    fn play(&mut self, item: &MediaItem) -> Result<()> {
        info!(
            file = %item.label(),
            duration = %item.duration_display(),
            policy = %item.policy,
            "Now playing"
        );
        Ok(())
    }

    fn stop(&mut self) {
        info!("Playback stopped");
    }
}

/// Commands forwarded by a [`ChannelSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCommand {
    Play(MediaItem),
    Stop,
}

/// Forwards items to a player running on another thread.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<SinkCommand>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::Receiver<SinkCommand>) {
        let (tx, rx) = mpsc::channel();
        (ChannelSink { tx }, rx)
    }
}

impl PlaybackSink for ChannelSink {
    fn play(&mut self, item: &MediaItem) -> Result<()> {
        self.tx
            .send(SinkCommand::Play(item.clone()))
            .map_err(|_| Error::Playback("player has shut down".to_string()))
    }

    fn stop(&mut self) {
        let _ = self.tx.send(SinkCommand::Stop);
    }
}
