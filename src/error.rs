//! Error types shared across the engine.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used by tvflow operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Media duration could not be measured.
    #[error("Failed to probe '{}': {message}", path.display())]
    Probe { path: PathBuf, message: String },

    #[error("Series {0} not found")]
    SeriesNotFound(u32),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The playback sink refused or failed to start an item.
    #[error("Playback error: {0}")]
    Playback(String),

    #[error("Playlists have not been built yet")]
    NotBuilt,
}
