use std::fmt;
use uuid::Uuid;

/// Identity of a download job inside a registry.
pub type JobId = Uuid;

/// Represents the current state of a download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    /// Created, subprocess not started yet
    Pending,
    /// Subprocess running, progress being reported
    Downloading,
    /// Subprocess exited with the success code
    Done,
    /// Subprocess failed to start or exited with any other code
    Failed,
    /// Cancel flag observed before the subprocess finished
    Canceled,
}

impl DownloadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Canceled)
    }

    /// Transitions only move forward: Pending -> Downloading -> terminal.
    pub fn can_transition_to(self, next: DownloadStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Downloading) => true,
            (Self::Pending, Self::Failed) => true,
            (Self::Downloading, s) => s.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        };
        f.write_str(label)
    }
}

/// One progress report from the downloader, replaced as a whole on each update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressSnapshot {
    /// Percentage in 0..=100 as reported (not clamped, not monotonic).
    pub percent: f32,
    pub size: String,
    pub rate: String,
    pub eta: String,
}

/// Requested thumbnail geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThumbnailSize {
    /// Largest centered square.
    #[default]
    AutoSquare,
    Exact { width: u32, height: u32 },
}

/// Output base names (without extension) for a job's artifacts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadNames {
    pub audio: Option<String>,
    pub thumbnail: Option<String>,
    /// Both artifacts were explicitly requested under one name; a thumbnail
    /// failure then aborts the job.
    pub combined: bool,
}

impl DownloadNames {
    /// Names are derived from the source title.
    pub fn derived() -> Self {
        Self::default()
    }

    pub fn combined(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            audio: Some(name.clone()),
            thumbnail: Some(name),
            combined: true,
        }
    }

    pub fn separate(audio: impl Into<String>, thumbnail: impl Into<String>) -> Self {
        Self {
            audio: Some(audio.into()),
            thumbnail: Some(thumbnail.into()),
            combined: false,
        }
    }
}
