//! Media acquisition and playback engine.
//!
//! Resolves references to downloadable sources, drives the external
//! downloader with live progress, validates files by content and coordinates
//! local playback sessions.

// Engine configuration
pub mod config;
// Error taxonomy
pub mod error;
// Shared runtime for subprocess tasks
pub mod runtime;
// Value types for download jobs
pub mod model;
// Progress line grammar
pub mod progress;
// Reference resolution and the HTTP seam
pub mod source;
// Thumbnail fetching and cropping
pub mod thumbnail;
// Download jobs driving the external downloader
pub mod downloader;
// Active download tracking
pub mod registry;
// Audio effects through the media-processing binary
pub mod effects;
// Content-based format validation
pub mod format;
// Playback sessions and their coordinator
pub mod playback;

pub use config::EngineConfig;
pub use downloader::DownloadJob;
pub use error::{EngineError, Result};
pub use model::{DownloadNames, DownloadStatus, ProgressSnapshot, ThumbnailSize};
pub use playback::{PlaybackCoordinator, PlaybackSession};
pub use registry::DownloadRegistry;
pub use source::{ResolvedSource, SourceReference};
