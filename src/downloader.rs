//! Download jobs: thumbnail fetch plus a downloader subprocess for the audio.
//!
//! A [`DownloadJob`] moves `Pending -> Downloading -> {Done, Failed, Canceled}`.
//! The audio stage runs on the shared runtime; one reader task per job owns
//! the subprocess, parses its standard output into [`ProgressSnapshot`]s and
//! classifies the exit. Callers only ever observe state through snapshots.

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::model::{DownloadNames, DownloadStatus, JobId, ProgressSnapshot, ThumbnailSize};
use crate::progress::parse_progress_from_line;
use crate::runtime::runtime;
use crate::source::{HttpFetch, ResolvedSource, sanitize_file_name};
use crate::thumbnail;
use parking_lot::{Condvar, Mutex};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Exit code the downloader reports on success.
pub const SUCCESS_EXIT_CODE: i32 = 0;

/// How long to keep reading stderr after the downloader has exited.
const STDERR_DRAIN: Duration = Duration::from_secs(2);

type ProgressCallback = Arc<dyn Fn(&ProgressSnapshot) + Send + Sync>;
type CompletionCallback = Box<dyn FnOnce(&Path) + Send>;
type CancelCallback = Box<dyn FnOnce() + Send>;
type FailureCallback = Box<dyn FnOnce(&EngineError) + Send>;

#[derive(Default)]
struct Callbacks {
    progress: Option<ProgressCallback>,
    complete: Option<CompletionCallback>,
    cancel: Option<CancelCallback>,
    failure: Option<FailureCallback>,
}

struct JobState {
    status: DownloadStatus,
    exit_code: Option<i32>,
    failure: Option<String>,
    cleanup_errors: Vec<String>,
    /// Terminal state reached and callbacks have run.
    settled: bool,
}

struct Shared {
    state: Mutex<JobState>,
    settled: Condvar,
    progress: Mutex<ProgressSnapshot>,
    callbacks: Mutex<Callbacks>,
    cancel: CancellationToken,
}

impl Shared {
    fn publish(&self, snapshot: ProgressSnapshot) {
        *self.progress.lock() = snapshot.clone();
        let callback = self.callbacks.lock().progress.clone();
        if let Some(callback) = callback {
            callback(&snapshot);
        }
    }

    fn transition(&self, next: DownloadStatus) -> bool {
        self.transition_with(next, |_| {})
    }

    /// Moves to `next` and records `update` under the same lock.
    fn transition_with(&self, next: DownloadStatus, update: impl FnOnce(&mut JobState)) -> bool {
        let mut state = self.state.lock();
        if !state.status.can_transition_to(next) {
            warn!("Ignoring transition {} -> {}", state.status, next);
            return false;
        }
        state.status = next;
        update(&mut state);
        true
    }

    fn settle(&self) {
        self.state.lock().settled = true;
        self.settled.notify_all();
    }

    fn finish_done(&self, exit_code: i32, audio_file: &Path) {
        if !self.transition_with(DownloadStatus::Done, |s| s.exit_code = Some(exit_code)) {
            return;
        }
        let callback = self.callbacks.lock().complete.take();
        if let Some(callback) = callback {
            callback(audio_file);
        }
        self.settle();
    }

    fn finish_failed(&self, exit_code: Option<i32>, message: String) {
        let recorded = message.clone();
        let moved = self.transition_with(DownloadStatus::Failed, |s| {
            s.exit_code = exit_code;
            s.failure = Some(recorded);
        });
        if !moved {
            return;
        }
        let callback = self.callbacks.lock().failure.take();
        if let Some(callback) = callback {
            callback(&EngineError::DownloadProcess(message));
        }
        self.settle();
    }

    fn finish_canceled(&self, cleanup_errors: Vec<String>) {
        if !self.transition_with(DownloadStatus::Canceled, |s| s.cleanup_errors = cleanup_errors) {
            return;
        }
        let callback = self.callbacks.lock().cancel.take();
        if let Some(callback) = callback {
            callback();
        }
        self.settle();
    }
}

/// One source downloaded into `<dir>/<name>.<ext>` plus `<dir>/<name>.png`.
pub struct DownloadJob {
    id: JobId,
    source: ResolvedSource,
    target_dir: PathBuf,
    audio_name: String,
    thumbnail_name: String,
    combined_names: bool,
    thumbnail_size: ThumbnailSize,
    config: EngineConfig,
    shared: Arc<Shared>,
}

impl DownloadJob {
    pub fn new(
        source: ResolvedSource,
        target_dir: impl Into<PathBuf>,
        names: DownloadNames,
        thumbnail_size: ThumbnailSize,
        config: EngineConfig,
    ) -> Self {
        let fallback = source.default_base_name();
        let audio_name = names
            .audio
            .as_deref()
            .map(sanitize_file_name)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| fallback.clone());
        let thumbnail_name = names
            .thumbnail
            .as_deref()
            .map(sanitize_file_name)
            .filter(|n| !n.is_empty())
            .unwrap_or(fallback);

        Self {
            id: Uuid::new_v4(),
            source,
            target_dir: target_dir.into(),
            audio_name,
            thumbnail_name,
            combined_names: names.combined,
            thumbnail_size,
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(JobState {
                    status: DownloadStatus::Pending,
                    exit_code: None,
                    failure: None,
                    cleanup_errors: Vec::new(),
                    settled: false,
                }),
                settled: Condvar::new(),
                progress: Mutex::new(ProgressSnapshot::default()),
                callbacks: Mutex::new(Callbacks::default()),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Canonical source URL; two jobs may share it.
    pub fn url(&self) -> &str {
        &self.source.url
    }

    pub fn source(&self) -> &ResolvedSource {
        &self.source
    }

    pub fn audio_name(&self) -> &str {
        &self.audio_name
    }

    pub fn thumbnail_name(&self) -> &str {
        &self.thumbnail_name
    }

    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    pub fn thumbnail_file(&self) -> PathBuf {
        self.target_dir.join(format!("{}.png", self.thumbnail_name))
    }

    fn expected_audio_file(&self) -> PathBuf {
        self.target_dir
            .join(format!("{}.{}", self.audio_name, self.config.audio_format))
    }

    /// Output path handed to the downloader; it substitutes the extension.
    pub fn output_template(&self) -> PathBuf {
        self.target_dir.join(format!("{}.%(ext)s", self.audio_name))
    }

    pub fn on_progress(&self, callback: impl Fn(&ProgressSnapshot) + Send + Sync + 'static) {
        self.shared.callbacks.lock().progress = Some(Arc::new(callback));
    }

    pub fn on_complete(&self, callback: impl FnOnce(&Path) + Send + 'static) {
        self.shared.callbacks.lock().complete = Some(Box::new(callback));
    }

    pub fn on_cancel(&self, callback: impl FnOnce() + Send + 'static) {
        self.shared.callbacks.lock().cancel = Some(Box::new(callback));
    }

    pub fn on_failure(&self, callback: impl FnOnce(&EngineError) + Send + 'static) {
        self.shared.callbacks.lock().failure = Some(Box::new(callback));
    }

    pub fn status(&self) -> DownloadStatus {
        self.shared.state.lock().status
    }

    /// Consistent copy of the latest progress report.
    pub fn progress(&self) -> ProgressSnapshot {
        self.shared.progress.lock().clone()
    }

    pub fn is_downloading(&self) -> bool {
        self.status() == DownloadStatus::Downloading
    }

    pub fn is_downloaded(&self) -> bool {
        self.status() == DownloadStatus::Done
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.shared.state.lock().exit_code
    }

    pub fn failure_message(&self) -> Option<String> {
        self.shared.state.lock().failure.clone()
    }

    /// Files that could not be removed while cleaning up after a cancel.
    pub fn cleanup_errors(&self) -> Vec<String> {
        self.shared.state.lock().cleanup_errors.clone()
    }

    /// The downloaded audio file; only available once the job is done.
    pub fn audio_file(&self) -> Result<PathBuf> {
        match self.status() {
            DownloadStatus::Done => Ok(self.expected_audio_file()),
            other => Err(EngineError::State(format!(
                "audio file requested while job is {}",
                other
            ))),
        }
    }

    /// Argument vector after the program name.
    pub fn downloader_args(&self) -> Result<(String, Vec<String>)> {
        let (program, mut args) = self.config.downloader_program()?;
        args.extend([
            self.source.url.clone(),
            "-x".to_string(),
            "--audio-format".to_string(),
            self.config.audio_format.clone(),
            "-o".to_string(),
            self.output_template().to_string_lossy().into_owned(),
        ]);
        args.extend(self.config.downloader_extra_args.iter().cloned());
        Ok((program, args))
    }

    /// Fetches and crops the thumbnail into `<dir>/<thumbnail name>.png`.
    pub fn download_thumbnail(&self, fetcher: &dyn HttpFetch) -> Result<PathBuf> {
        let video_id = self
            .source
            .video_id
            .as_deref()
            .ok_or_else(|| EngineError::ThumbnailUnavailable(self.source.url.clone()))?;
        let output = self.thumbnail_file();
        thumbnail::download_thumbnail(
            fetcher,
            &self.config,
            video_id,
            self.thumbnail_size,
            &output,
        )?;
        Ok(output)
    }

    /// Thumbnail first (synchronously), then the audio stage.
    ///
    /// A thumbnail failure only aborts the job when both artifacts were
    /// requested under one explicit name.
    pub fn download_audio_and_thumbnail(&self, fetcher: &dyn HttpFetch) -> Result<()> {
        if self.status() != DownloadStatus::Pending {
            return Err(EngineError::State(format!(
                "download requested while job is {}",
                self.status()
            )));
        }
        match self.download_thumbnail(fetcher) {
            Ok(path) => info!("[{}] thumbnail saved to {:?}", self.id, path),
            Err(e) if self.combined_names => {
                error!("[{}] thumbnail failed: {}", self.id, e);
                self.shared
                    .finish_failed(None, format!("thumbnail unavailable: {}", e));
                return Err(e);
            }
            Err(e) => warn!("[{}] continuing without thumbnail: {}", self.id, e),
        }
        self.download_audio()
    }

    /// Starts the downloader subprocess and returns immediately.
    pub fn download_audio(&self) -> Result<()> {
        if !self.shared.transition(DownloadStatus::Downloading) {
            return Err(EngineError::State(format!(
                "download requested while job is {}",
                self.status()
            )));
        }
        let (program, args) = match self.downloader_args() {
            Ok(command) => command,
            Err(e) => {
                self.shared.finish_failed(None, e.to_string());
                return Err(e);
            }
        };
        std::fs::create_dir_all(&self.target_dir).map_err(|e| {
            self.shared
                .finish_failed(None, format!("cannot create {:?}: {}", self.target_dir, e));
            EngineError::Io(e)
        })?;

        let rt = match runtime() {
            Ok(rt) => rt,
            Err(e) => {
                self.shared.finish_failed(None, e.to_string());
                return Err(e);
            }
        };

        info!("[{}] spawning {} {:?}", self.id, program, args);
        let task = ReaderTask {
            id: self.id,
            shared: Arc::clone(&self.shared),
            program,
            args,
            target_dir: self.target_dir.clone(),
            prefixes: vec![self.audio_name.clone(), self.thumbnail_name.clone()],
            audio_file: self.expected_audio_file(),
        };
        rt.spawn(task.run());
        Ok(())
    }

    /// Requests cancellation; only has an effect while downloading.
    pub fn cancel(&self) -> bool {
        let state = self.shared.state.lock();
        if state.status == DownloadStatus::Downloading {
            self.shared.cancel.cancel();
            info!("[{}] cancel requested", self.id);
            true
        } else {
            false
        }
    }

    /// Blocks until the job has settled in a terminal state.
    pub fn wait(&self) -> DownloadStatus {
        let mut state = self.shared.state.lock();
        while !state.settled {
            self.shared.settled.wait(&mut state);
        }
        state.status
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<DownloadStatus> {
        let mut state = self.shared.state.lock();
        if !state.settled {
            let _ = self
                .shared
                .settled
                .wait_while_for(&mut state, |s| !s.settled, timeout);
        }
        state.settled.then_some(state.status)
    }
}

struct ReaderTask {
    id: JobId,
    shared: Arc<Shared>,
    program: String,
    args: Vec<String>,
    target_dir: PathBuf,
    prefixes: Vec<String>,
    audio_file: PathBuf,
}

impl ReaderTask {
    async fn run(self) {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own group, so cancel also reaches the transcoder it starts.
        #[cfg(unix)]
        {
            command.process_group(0);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!("[{}] failed to spawn {}: {}", self.id, self.program, e);
                self.shared
                    .finish_failed(None, format!("failed to spawn {}: {}", self.program, e));
                return;
            }
        };

        let stderr_tail = Arc::new(Mutex::new(None::<String>));
        let stderr_reader = child.stderr.take().map(|stderr| {
            let tail = Arc::clone(&stderr_tail);
            let id = self.id;
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("[{}] stderr> {}", id, line);
                    if !line.trim().is_empty() {
                        *tail.lock() = Some(line);
                    }
                }
            })
        });

        let mut canceled = false;
        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    biased;
                    _ = self.shared.cancel.cancelled() => {
                        canceled = true;
                        break;
                    }
                    next = lines.next_line() => match next {
                        Ok(Some(line)) => {
                            debug!("[{}] stdout> {}", self.id, line);
                            if let Some(snapshot) = parse_progress_from_line(&line) {
                                self.shared.publish(snapshot);
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!("[{}] stdout read failed: {}", self.id, e);
                            break;
                        }
                    }
                }
            }
        }

        let exit = if canceled {
            None
        } else {
            tokio::select! {
                biased;
                _ = self.shared.cancel.cancelled() => {
                    canceled = true;
                    None
                }
                status = child.wait() => Some(status),
            }
        };

        if canceled {
            #[cfg(unix)]
            {
                if let Err(e) = kill_process_group(&child) {
                    warn!("[{}] killing process group failed: {}", self.id, e);
                }
            }
            if let Err(e) = child.kill().await {
                warn!("[{}] kill failed: {}", self.id, e);
            }
            if let Some(reader) = stderr_reader {
                reader.abort();
            }
            let errors = remove_files_with_prefixes(&self.target_dir, &self.prefixes);
            info!("[{}] canceled, partial files removed", self.id);
            self.shared.finish_canceled(errors);
            return;
        }

        if let Some(reader) = stderr_reader {
            // Background descendants may hold stderr open past the exit.
            if tokio::time::timeout(STDERR_DRAIN, reader).await.is_err() {
                debug!("[{}] stderr still open after exit", self.id);
            }
        }

        match exit {
            Some(Ok(status)) => {
                let code = status.code();
                if code == Some(SUCCESS_EXIT_CODE) && !self.shared.cancel.is_cancelled() {
                    info!("[{}] finished: {:?}", self.id, self.audio_file);
                    self.shared.finish_done(SUCCESS_EXIT_CODE, &self.audio_file);
                } else {
                    let reason = stderr_tail
                        .lock()
                        .take()
                        .unwrap_or_else(|| format!("exit status {}", status));
                    warn!("[{}] downloader failed ({:?}): {}", self.id, code, reason);
                    self.shared.finish_failed(code, reason);
                }
            }
            Some(Err(e)) => {
                error!("[{}] waiting for downloader failed: {}", self.id, e);
                self.shared.finish_failed(None, e.to_string());
            }
            None => self.shared.finish_failed(None, "no exit status".to_string()),
        }
    }
}

/// Sends SIGKILL to the downloader and everything in its process group.
#[cfg(unix)]
fn kill_process_group(child: &tokio::process::Child) -> std::io::Result<()> {
    let Some(pid) = child.id() else {
        return Ok(());
    };
    // SAFETY: killpg only signals; the group was created at spawn with the child's pid.
    let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// Deletes every file in `dir` whose name starts with one of `prefixes`.
///
/// Best effort: failures are logged and returned, never raised.
pub fn remove_files_with_prefixes(dir: &Path, prefixes: &[String]) -> Vec<String> {
    let mut errors = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot list {:?} for cleanup: {}", dir, e);
            errors.push(format!("{:?}: {}", dir, e));
            return errors;
        }
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !prefixes.iter().any(|p| !p.is_empty() && name.starts_with(p.as_str())) {
            continue;
        }
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => debug!("Removed {:?}", path),
            Err(e) => {
                warn!("Failed to remove {:?}: {}", path, e);
                errors.push(format!("{:?}: {}", path, e));
            }
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MockHttpFetch;
    use crate::thumbnail::tests::png_bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    fn source() -> ResolvedSource {
        ResolvedSource {
            url: "https://example.com/watch?v=ABCDEFGHIJK".to_string(),
            video_id: Some("ABCDEFGHIJK".to_string()),
            title: Some("Night Drive / Remix".to_string()),
        }
    }

    /// Writes a stand-in downloader that honours `-o <dir>/<name>.%(ext)s`.
    fn fake_downloader(dir: &Path, body: &str) -> EngineConfig {
        let script = dir.join("fake-dl.sh");
        let content = format!(
            "#!/bin/sh\nfmt=\"$4\"\nout=\"$6\"\ntarget=\"${{out%'.%(ext)s'}}.$fmt\"\n{}\n",
            body
        );
        std::fs::write(&script, content).unwrap();
        EngineConfig {
            downloader_command: format!("sh '{}'", script.display()),
            downloader_extra_args: Vec::new(),
            ..EngineConfig::default()
        }
    }

    fn files_starting_with(dir: &Path, prefix: &str) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with(prefix))
            .collect()
    }

    #[test]
    fn default_names_come_from_sanitized_title() {
        let job = DownloadJob::new(
            source(),
            "/tmp/out",
            DownloadNames::derived(),
            ThumbnailSize::AutoSquare,
            EngineConfig::default(),
        );
        assert_eq!(job.audio_name(), "Night Drive  Remix");
        assert_eq!(job.thumbnail_file(), Path::new("/tmp/out/Night Drive  Remix.png"));
        assert_eq!(job.status(), DownloadStatus::Pending);
    }

    #[test]
    fn argument_vector_has_documented_shape() {
        let job = DownloadJob::new(
            source(),
            "/tmp/out",
            DownloadNames::combined("song"),
            ThumbnailSize::AutoSquare,
            EngineConfig::default(),
        );
        let (program, args) = job.downloader_args().unwrap();
        assert_eq!(program, "yt-dlp");
        assert_eq!(
            args,
            vec![
                "https://example.com/watch?v=ABCDEFGHIJK",
                "-x",
                "--audio-format",
                "mp3",
                "-o",
                "/tmp/out/song.%(ext)s",
                "--newline",
            ]
        );
    }

    #[test]
    fn audio_file_before_done_is_a_state_error() {
        let job = DownloadJob::new(
            source(),
            "/tmp/out",
            DownloadNames::derived(),
            ThumbnailSize::AutoSquare,
            EngineConfig::default(),
        );
        assert!(matches!(job.audio_file(), Err(EngineError::State(_))));
        assert!(!job.cancel());
        assert_eq!(job.status(), DownloadStatus::Pending);
    }

    #[test]
    fn combined_names_make_thumbnail_failure_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut fetcher = MockHttpFetch::new();
        fetcher
            .expect_fetch_bytes()
            .returning(|_| Err(EngineError::Http("404".to_string())));
        let job = DownloadJob::new(
            source(),
            dir.path(),
            DownloadNames::combined("song"),
            ThumbnailSize::AutoSquare,
            EngineConfig::default(),
        );
        let (fail_tx, fail_rx) = mpsc::channel();
        job.on_failure(move |e| fail_tx.send(e.to_string()).unwrap());

        let err = job.download_audio_and_thumbnail(&fetcher).unwrap_err();
        assert!(matches!(err, EngineError::ThumbnailUnavailable(_)));
        assert_eq!(
            job.wait_timeout(Duration::from_secs(1)),
            Some(DownloadStatus::Failed)
        );
        assert!(fail_rx.recv().unwrap().contains("thumbnail"));
        assert!(matches!(job.download_audio(), Err(EngineError::State(_))));
    }

    #[test]
    fn unusable_downloader_command_fails_the_job() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            downloader_command: "'unterminated".to_string(),
            ..EngineConfig::default()
        };
        let job = DownloadJob::new(
            source(),
            dir.path(),
            DownloadNames::combined("song"),
            ThumbnailSize::AutoSquare,
            config,
        );
        assert!(matches!(job.download_audio(), Err(EngineError::Config(_))));
        assert_eq!(job.wait(), DownloadStatus::Failed);
        assert!(job.failure_message().is_some());
    }

    #[cfg(unix)]
    #[test]
    fn successful_run_reports_progress_and_completes() {
        let dir = tempfile::tempdir().unwrap();
        let config = fake_downloader(
            dir.path(),
            "echo '[youtube] ABCDEFGHIJK: Downloading webpage'\n\
             echo '[download]  10.0% of 2.00MiB at 1.00MiB/s ETA 00:02'\n\
             echo '[download] 100.0% of 2.00MiB at 1.00MiB/s ETA 00:00'\n\
             echo data > \"$target\"\n\
             exit 0",
        );
        let mut fetcher = MockHttpFetch::new();
        fetcher.expect_fetch_bytes().returning(|_| Ok(png_bytes(32, 18)));

        let job = DownloadJob::new(
            source(),
            dir.path(),
            DownloadNames::derived(),
            ThumbnailSize::AutoSquare,
            config,
        );
        let reports = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&reports);
        job.on_progress(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let (done_tx, done_rx) = mpsc::channel();
        job.on_complete(move |path| done_tx.send(path.to_path_buf()).unwrap());
        job.on_cancel(|| panic!("cancel callback must not fire"));

        job.download_audio_and_thumbnail(&fetcher).unwrap();
        assert_eq!(job.wait(), DownloadStatus::Done);

        assert_eq!(reports.load(Ordering::SeqCst), 2);
        assert_eq!(job.progress().percent, 100.0);
        assert_eq!(job.exit_code(), Some(SUCCESS_EXIT_CODE));
        let audio = job.audio_file().unwrap();
        assert_eq!(audio, dir.path().join("Night Drive  Remix.mp3"));
        assert!(audio.exists());
        assert!(job.thumbnail_file().exists());
        assert_eq!(done_rx.recv().unwrap(), audio);
        assert!(matches!(job.download_audio(), Err(EngineError::State(_))));
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_fails_without_success_callback() {
        let dir = tempfile::tempdir().unwrap();
        let config = fake_downloader(dir.path(), "echo 'ERROR: video unavailable' >&2\nexit 1");
        let job = DownloadJob::new(
            source(),
            dir.path(),
            DownloadNames::combined("broken"),
            ThumbnailSize::AutoSquare,
            config,
        );
        job.on_complete(|_| panic!("success callback must not fire"));
        let (fail_tx, fail_rx) = mpsc::channel();
        job.on_failure(move |e| fail_tx.send(e.to_string()).unwrap());

        job.download_audio().unwrap();
        assert_eq!(job.wait(), DownloadStatus::Failed);
        assert_eq!(job.exit_code(), Some(1));
        assert_eq!(job.failure_message().as_deref(), Some("ERROR: video unavailable"));
        assert!(fail_rx.recv().unwrap().contains("video unavailable"));
        assert!(!job.is_downloaded());
    }

    #[cfg(unix)]
    #[test]
    fn failure_message_keeps_last_stderr_line_on_fast_exit() {
        let dir = tempfile::tempdir().unwrap();
        let config = fake_downloader(
            dir.path(),
            "echo 'WARNING: retrying' >&2\necho 'ERROR: video unavailable' >&2\nexit 1",
        );
        for _ in 0..25 {
            let job = DownloadJob::new(
                source(),
                dir.path(),
                DownloadNames::combined("broken"),
                ThumbnailSize::AutoSquare,
                config.clone(),
            );
            job.download_audio().unwrap();
            assert_eq!(job.wait(), DownloadStatus::Failed);
            assert_eq!(job.failure_message().as_deref(), Some("ERROR: video unavailable"));
        }
    }

    #[cfg(unix)]
    #[test]
    fn missing_binary_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            downloader_command: "/nonexistent/downloader-binary".to_string(),
            ..EngineConfig::default()
        };
        let job = DownloadJob::new(
            source(),
            dir.path(),
            DownloadNames::combined("x"),
            ThumbnailSize::AutoSquare,
            config,
        );
        job.download_audio().unwrap();
        assert_eq!(job.wait(), DownloadStatus::Failed);
        assert_eq!(job.exit_code(), None);
    }

    #[cfg(unix)]
    #[test]
    fn cancel_mid_download_removes_partial_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = fake_downloader(
            dir.path(),
            "echo partial > \"$target.part\"\n\
             echo partial > \"$target\"\n\
             echo '[download]  50.0% of 4.00MiB at 1.00MiB/s ETA 00:02'\n\
             exec sleep 30",
        );
        std::fs::write(dir.path().join("unrelated.txt"), "keep").unwrap();
        std::fs::write(dir.path().join("Night Drive  Remix.png"), "thumb").unwrap();

        let job = DownloadJob::new(
            source(),
            dir.path(),
            DownloadNames::derived(),
            ThumbnailSize::AutoSquare,
            config,
        );
        let (half_tx, half_rx) = mpsc::channel();
        job.on_progress(move |snap| {
            if snap.percent >= 50.0 {
                let _ = half_tx.send(());
            }
        });
        job.on_complete(|_| panic!("success callback must not fire"));
        let (cancel_tx, cancel_rx) = mpsc::channel();
        job.on_cancel(move || cancel_tx.send(()).unwrap());

        job.download_audio().unwrap();
        half_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(job.cancel());

        assert_eq!(job.wait_timeout(Duration::from_secs(10)), Some(DownloadStatus::Canceled));
        cancel_rx.recv().unwrap();
        assert!(!job.is_downloaded());
        assert!(files_starting_with(dir.path(), "Night Drive  Remix").is_empty());
        assert!(dir.path().join("unrelated.txt").exists());
        assert!(job.cleanup_errors().is_empty());
        assert!(!job.cancel());
    }

    #[cfg(unix)]
    #[test]
    fn cancel_stops_background_writers_of_the_downloader() {
        let dir = tempfile::tempdir().unwrap();
        let config = fake_downloader(
            dir.path(),
            "(sleep 1; echo late > \"$target\") &\n\
             echo '[download]  50.0% of 4.00MiB at 1.00MiB/s ETA 00:02'\n\
             wait",
        );
        let job = DownloadJob::new(
            source(),
            dir.path(),
            DownloadNames::combined("Night Drive"),
            ThumbnailSize::AutoSquare,
            config,
        );
        let (half_tx, half_rx) = mpsc::channel();
        job.on_progress(move |_| {
            let _ = half_tx.send(());
        });

        job.download_audio().unwrap();
        half_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(job.cancel());
        assert_eq!(job.wait_timeout(Duration::from_secs(10)), Some(DownloadStatus::Canceled));

        std::thread::sleep(Duration::from_millis(1500));
        assert!(files_starting_with(dir.path(), "Night Drive").is_empty());
    }

    #[test]
    fn prefix_cleanup_only_touches_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["song.mp3", "song.webm.part", "song.png", "other.mp3"] {
            std::fs::write(dir.path().join(name), "x").unwrap();
        }
        let errors = remove_files_with_prefixes(dir.path(), &["song".to_string()]);
        assert!(errors.is_empty());
        assert_eq!(files_starting_with(dir.path(), ""), vec!["other.mp3".to_string()]);
    }
}
