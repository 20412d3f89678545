//! Error types shared across the crate.

use std::path::PathBuf;

use thiserror::Error;

use crate::modes::ModeKind;

/// Audio pipeline errors
#[derive(Debug, Error)]
pub enum AudioError {
    /// The output device or stream could not be opened
    #[error("audio init failed: {0}")]
    InitFailure(String),

    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid audio config: {0}")]
    InvalidConfig(String),

    #[error("track contains no samples")]
    EmptyTrack,

    #[error("failed to write audio: {0}")]
    Encode(#[from] hound::Error),
}

/// Preset lookup and save errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PresetError {
    #[error("preset '{0}' not found")]
    NotFound(String),

    #[error("preset name required")]
    NameRequired,
}

/// Key-value storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage io: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage json: {0}")]
    Json(#[from] serde_json::Error),
}

/// A visual mode failed while producing a frame
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{mode} mode fault: {message}")]
pub struct ModeFault {
    pub mode: ModeKind,
    pub message: String,
}

impl ModeFault {
    pub fn new(mode: ModeKind, message: impl Into<String>) -> Self {
        Self {
            mode,
            message: message.into(),
        }
    }
}

/// Session-level failures surfaced to the shell
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error(transparent)]
    Preset(#[from] PresetError),

    #[error("failed to read beat list {path}: {message}")]
    BeatList { path: PathBuf, message: String },

    #[error("no track loaded")]
    NoTrack,
}
