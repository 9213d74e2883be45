//! Error types shared by the download and playback engine.

use thiserror::Error;

/// Errors surfaced by the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A reference was malformed or could not be reached.
    #[error("Invalid source reference: {0}")]
    Validation(String),

    /// A search query produced no usable candidate.
    #[error("No match found for query: {0}")]
    NotFound(String),

    /// Neither thumbnail resolution could be fetched.
    #[error("Thumbnail unavailable for {0}")]
    ThumbnailUnavailable(String),

    /// The downloader exited with a failure not caused by cancellation.
    #[error("Download process failed: {0}")]
    DownloadProcess(String),

    /// The media-processing binary failed while applying an effect.
    #[error("Effect process failed: {0}")]
    EffectProcess(String),

    /// Operation is illegal in the current lifecycle state.
    #[error("Invalid state: {0}")]
    State(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Audio output or decoder could not be opened.
    #[error("Playback error: {0}")]
    Playback(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        EngineError::Http(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
