use crate::error::{EngineError, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Settings for the download and playback engine.
///
/// Every field has a default so a partial TOML file (or none at all) is valid.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Downloader command line; the first word is the program.
    pub downloader_command: String,
    /// Appended after the documented downloader arguments.
    pub downloader_extra_args: Vec<String>,
    /// Media-processing command line used for audio effects.
    pub ffmpeg_command: String,
    /// Target audio container requested from the downloader.
    pub audio_format: String,
    pub watch_url: String,
    pub playlist_url: String,
    pub search_url: String,
    pub thumbnail_host: String,
    pub http_timeout_secs: u64,
    /// Upper bound on candidates whose titles are fetched for a query.
    pub max_search_candidates: usize,
    /// Length of one decode slice between cancellation checks.
    pub playback_poll_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            downloader_command: "yt-dlp".to_string(),
            downloader_extra_args: vec!["--newline".to_string()],
            ffmpeg_command: "ffmpeg".to_string(),
            audio_format: "mp3".to_string(),
            watch_url: "https://www.youtube.com/watch?v=".to_string(),
            playlist_url: "https://www.youtube.com/playlist?list=".to_string(),
            search_url: "https://www.youtube.com/results".to_string(),
            thumbnail_host: "https://img.youtube.com/vi".to_string(),
            http_timeout_secs: 15,
            max_search_candidates: 5,
            playback_poll_ms: 50,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        Self::from_toml(&content).map_err(|e| {
            EngineError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })
    }

    /// Loads `path` when given and present, otherwise returns defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) if p.exists() => Self::load(p),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn playback_poll(&self) -> Duration {
        Duration::from_millis(self.playback_poll_ms.max(1))
    }

    /// Splits the downloader command line into program and leading arguments.
    pub fn downloader_program(&self) -> Result<(String, Vec<String>)> {
        split_command(&self.downloader_command)
    }

    pub fn ffmpeg_program(&self) -> Result<(String, Vec<String>)> {
        split_command(&self.ffmpeg_command)
    }
}

fn split_command(command: &str) -> Result<(String, Vec<String>)> {
    let mut words = shlex::split(command)
        .ok_or_else(|| EngineError::Config(format!("Unparseable command line: {}", command)))?;
    if words.is_empty() {
        return Err(EngineError::Config("Empty command line".to_string()));
    }
    let program = words.remove(0);
    Ok((program, words))
}
