//! Local playback: one primary session plus any number of transient ones.

mod backend;
mod coordinator;
mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{AudioBackend, AudioStream, RodioBackend};
pub use coordinator::PlaybackCoordinator;
pub use session::PlaybackSession;
