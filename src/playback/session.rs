use super::backend::AudioBackend;
use crate::error::{EngineError, Result};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info};
use uuid::Uuid;

type CompletionCallback = Arc<dyn Fn() + Send + Sync>;

/// Control flags of a single `play()` run.
#[derive(Default)]
struct RunControl {
    closed: AtomicBool,
    finished: AtomicBool,
}

struct SessionInner {
    id: Uuid,
    path: PathBuf,
    backend: Arc<dyn AudioBackend>,
    poll: Duration,
    run: Mutex<Option<Arc<RunControl>>>,
    canceled: AtomicBool,
    callbacks: Mutex<Vec<CompletionCallback>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Plays one file on a dedicated thread.
///
/// `stop()` ends playback and fires the completion callbacks (the "track
/// ended" signal); `cancel()` ends playback silently. Natural end of the
/// stream behaves like `stop()`. Callbacks fire at most once per run.
#[derive(Clone)]
pub struct PlaybackSession {
    inner: Arc<SessionInner>,
}

impl PlaybackSession {
    pub fn new(path: impl Into<PathBuf>, backend: Arc<dyn AudioBackend>, poll: Duration) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id: Uuid::new_v4(),
                path: path.into(),
                backend,
                poll,
                run: Mutex::new(None),
                canceled: AtomicBool::new(false),
                callbacks: Mutex::new(Vec::new()),
                worker: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Exact comparison of the bound path, no normalization.
    pub fn is_using(&self, file: &Path) -> bool {
        self.inner.path.as_os_str() == file.as_os_str()
    }

    pub fn on_complete(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.inner.callbacks.lock().push(Arc::new(callback));
    }

    pub fn is_playing(&self) -> bool {
        self.inner
            .run
            .lock()
            .as_ref()
            .is_some_and(|run| !run.finished.load(Ordering::SeqCst))
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::SeqCst)
    }

    /// Starts streaming on a new thread.
    pub fn play(&self) -> Result<()> {
        let mut run = self.inner.run.lock();
        if run
            .as_ref()
            .is_some_and(|r| !r.finished.load(Ordering::SeqCst))
        {
            return Err(EngineError::State(format!(
                "{:?} is already playing",
                self.inner.path
            )));
        }

        let control = Arc::new(RunControl::default());
        self.inner.canceled.store(false, Ordering::SeqCst);

        let inner = Arc::clone(&self.inner);
        let thread_control = Arc::clone(&control);
        let handle = std::thread::Builder::new()
            .name(format!("playback-{}", self.inner.id))
            .spawn(move || inner.stream(thread_control))?;

        *run = Some(control);
        *self.inner.worker.lock() = Some(handle);
        info!("Playing {:?}", self.inner.path);
        Ok(())
    }

    /// Ends playback and fires completion callbacks. Returns false when idle.
    pub fn stop(&self) -> bool {
        let Some(control) = self.inner.current_run() else {
            return false;
        };
        control.closed.store(true, Ordering::SeqCst);
        debug!("Stopping {:?}", self.inner.path);
        self.inner.finish(&control, true)
    }

    /// Ends playback without firing completion callbacks. Returns false when idle.
    pub fn cancel(&self) -> bool {
        let Some(control) = self.inner.current_run() else {
            return false;
        };
        self.inner.canceled.store(true, Ordering::SeqCst);
        control.closed.store(true, Ordering::SeqCst);
        debug!("Canceling {:?}", self.inner.path);
        self.inner.finish(&control, false)
    }

    /// Blocks until the playback thread has released its resources.
    pub fn wait(&self) {
        let handle = self.inner.worker.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == std::thread::current().id() {
                *self.inner.worker.lock() = Some(handle);
                return;
            }
            if handle.join().is_err() {
                error!("Playback thread for {:?} panicked", self.inner.path);
            }
        }
    }
}

impl SessionInner {
    fn current_run(&self) -> Option<Arc<RunControl>> {
        self.run
            .lock()
            .as_ref()
            .filter(|r| !r.finished.load(Ordering::SeqCst))
            .cloned()
    }

    fn stream(&self, control: Arc<RunControl>) {
        match self.backend.open(&self.path) {
            Ok(mut stream) => {
                while !control.closed.load(Ordering::SeqCst) {
                    if !stream.pump(self.poll) {
                        debug!("Reached end of {:?}", self.path);
                        break;
                    }
                }
            }
            Err(e) => error!("Cannot play {:?}: {}", self.path, e),
        }
        if !control.closed.load(Ordering::SeqCst) {
            self.finish(&control, true);
        }
    }

    /// Marks the run finished; only the first caller per run gets `true`.
    fn finish(&self, control: &RunControl, fire: bool) -> bool {
        if control.finished.swap(true, Ordering::SeqCst) {
            return false;
        }
        if fire {
            let callbacks: Vec<CompletionCallback> = self.callbacks.lock().clone();
            for callback in callbacks {
                callback();
            }
        }
        true
    }
}
