use super::backend::AudioBackend;
use super::session::PlaybackSession;
use crate::error::{EngineError, Result};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Default)]
struct CoordinatorState {
    primary: Option<PlaybackSession>,
    transient: Vec<PlaybackSession>,
}

/// Owns the primary playback slot and the transient sessions.
///
/// Construct one and share it by reference; every mutation goes through a
/// single lock so two callers cannot both claim a free primary slot.
pub struct PlaybackCoordinator {
    backend: Arc<dyn AudioBackend>,
    poll: Duration,
    state: Arc<Mutex<CoordinatorState>>,
}

impl PlaybackCoordinator {
    pub fn new(backend: Arc<dyn AudioBackend>, poll: Duration) -> Self {
        Self {
            backend,
            poll,
            state: Arc::new(Mutex::new(CoordinatorState::default())),
        }
    }

    fn session(&self, file: &Path) -> PlaybackSession {
        PlaybackSession::new(file, Arc::clone(&self.backend), self.poll)
    }

    pub fn play_primary(&self, file: &Path) -> Result<PlaybackSession> {
        self.start_primary(self.session(file))
    }

    /// Like [`play_primary`](Self::play_primary) with a callback for the end
    /// of the track (natural end or `stop_primary`).
    pub fn play_primary_with(
        &self,
        file: &Path,
        on_complete: impl Fn() + Send + Sync + 'static,
    ) -> Result<PlaybackSession> {
        let session = self.session(file);
        session.on_complete(on_complete);
        self.start_primary(session)
    }

    fn start_primary(&self, session: PlaybackSession) -> Result<PlaybackSession> {
        let mut state = self.state.lock();
        if let Some(current) = state.primary.as_ref().filter(|s| s.is_playing()) {
            return Err(EngineError::State(format!(
                "primary playback already active for {:?}",
                current.path()
            )));
        }
        session.play()?;
        info!("Primary playback started: {:?}", session.path());
        state.primary = Some(session.clone());
        Ok(session)
    }

    /// Starts a session outside the primary slot; it removes itself when it ends.
    pub fn play_transient(&self, file: &Path) -> Result<PlaybackSession> {
        let session = self.session(file);
        let weak: Weak<Mutex<CoordinatorState>> = Arc::downgrade(&self.state);
        let id = session.id();
        session.on_complete(move || {
            if let Some(state) = weak.upgrade() {
                state.lock().transient.retain(|s| s.id() != id);
                debug!("Transient session {} removed", id);
            }
        });

        let mut state = self.state.lock();
        state.transient.retain(|s| s.is_playing());
        state.transient.push(session.clone());
        if let Err(e) = session.play() {
            state.transient.retain(|s| s.id() != id);
            return Err(e);
        }
        Ok(session)
    }

    /// Stops the primary session, firing its completion callbacks.
    pub fn stop_primary(&self) -> Result<()> {
        let session = self.take_active_primary()?;
        session.stop();
        Ok(())
    }

    /// Discards the primary session without firing its callbacks.
    pub fn cancel_primary(&self) -> Result<()> {
        let session = self.take_active_primary()?;
        session.cancel();
        Ok(())
    }

    fn take_active_primary(&self) -> Result<PlaybackSession> {
        let mut state = self.state.lock();
        match state.primary.take() {
            Some(session) if session.is_playing() => Ok(session),
            _ => Err(EngineError::State("no primary playback active".to_string())),
        }
    }

    /// Cancels every session; used on shutdown.
    pub fn cancel_all(&self) {
        let sessions: Vec<PlaybackSession> = {
            let mut state = self.state.lock();
            let mut all: Vec<PlaybackSession> = state.transient.drain(..).collect();
            all.extend(state.primary.take());
            all
        };
        for session in &sessions {
            session.cancel();
        }
        info!("Canceled {} playback sessions", sessions.len());
    }

    pub fn primary(&self) -> Option<PlaybackSession> {
        self.state.lock().primary.clone()
    }

    pub fn is_playing_anything(&self) -> bool {
        let state = self.state.lock();
        state.primary.as_ref().is_some_and(|s| s.is_playing())
            || state.transient.iter().any(|s| s.is_playing())
    }

    pub fn is_primary_playing(&self, file: &Path) -> bool {
        self.state
            .lock()
            .primary
            .as_ref()
            .is_some_and(|s| s.is_playing() && s.is_using(file))
    }

    pub fn is_transient_playing(&self, file: &Path) -> bool {
        self.state
            .lock()
            .transient
            .iter()
            .any(|s| s.is_playing() && s.is_using(file))
    }

    pub fn transient_count(&self) -> usize {
        self.state
            .lock()
            .transient
            .iter()
            .filter(|s| s.is_playing())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::testing::FakeBackend;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const POLL: Duration = Duration::from_millis(5);

    #[test]
    fn second_primary_is_rejected() {
        let coordinator = PlaybackCoordinator::new(FakeBackend::endless(), POLL);
        let a = Path::new("/music/a.mp3");
        let b = Path::new("/music/b.mp3");

        let session = coordinator.play_primary(a).unwrap();
        assert!(matches!(coordinator.play_primary(b), Err(EngineError::State(_))));
        assert!(coordinator.is_primary_playing(a));
        assert!(!coordinator.is_primary_playing(b));

        coordinator.stop_primary().unwrap();
        session.wait();
        assert!(!coordinator.is_playing_anything());
        coordinator.play_primary(b).unwrap();
        assert!(coordinator.is_primary_playing(b));
        coordinator.cancel_all();
    }

    #[test]
    fn stop_without_primary_is_a_state_error() {
        let coordinator = PlaybackCoordinator::new(FakeBackend::endless(), POLL);
        assert!(matches!(coordinator.stop_primary(), Err(EngineError::State(_))));
        assert!(matches!(coordinator.cancel_primary(), Err(EngineError::State(_))));
    }

    #[test]
    fn stop_primary_fires_callback_and_cancel_does_not() {
        let coordinator = PlaybackCoordinator::new(FakeBackend::endless(), POLL);
        let ended = Arc::new(AtomicUsize::new(0));

        let e = Arc::clone(&ended);
        let first = coordinator
            .play_primary_with(Path::new("/music/a.mp3"), move || {
                e.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        coordinator.stop_primary().unwrap();
        first.wait();
        assert_eq!(ended.load(Ordering::SeqCst), 1);

        let e = Arc::clone(&ended);
        let second = coordinator
            .play_primary_with(Path::new("/music/b.mp3"), move || {
                e.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        coordinator.cancel_primary().unwrap();
        second.wait();
        assert_eq!(ended.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn transient_sessions_coexist_and_clean_up() {
        let coordinator = PlaybackCoordinator::new(FakeBackend::finite(20), POLL);
        let a = Path::new("/music/a.mp3");
        let b = Path::new("/music/b.mp3");

        let first = coordinator.play_transient(a).unwrap();
        let second = coordinator.play_transient(b).unwrap();
        let third = coordinator.play_transient(a).unwrap();
        assert!(coordinator.is_playing_anything());
        assert!(coordinator.is_transient_playing(a));
        assert!(coordinator.is_transient_playing(b));
        assert!(!coordinator.is_primary_playing(a));

        for session in [first, second, third] {
            session.wait();
        }
        assert!(!coordinator.is_playing_anything());
        assert_eq!(coordinator.transient_count(), 0);
        assert!(coordinator.state.lock().transient.is_empty());
    }

    #[test]
    fn concurrent_primary_requests_admit_exactly_one() {
        let coordinator = Arc::new(PlaybackCoordinator::new(FakeBackend::endless(), POLL));
        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let coordinator = Arc::clone(&coordinator);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    coordinator
                        .play_primary(Path::new(&format!("/music/{i}.mp3")))
                        .is_ok()
                })
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 1);
        coordinator.cancel_all();
    }
}
