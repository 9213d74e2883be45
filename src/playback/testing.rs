use super::{AudioBackend, AudioStream};
use crate::error::{EngineError, Result};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Backend whose streams last a fixed number of slices, or forever.
pub(crate) struct FakeBackend {
    slices: Option<usize>,
    fail_open: bool,
    pub opened: AtomicUsize,
    pub released: Arc<AtomicUsize>,
}

impl FakeBackend {
    pub fn finite(slices: usize) -> Arc<Self> {
        Arc::new(Self {
            slices: Some(slices),
            fail_open: false,
            opened: AtomicUsize::new(0),
            released: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn endless() -> Arc<Self> {
        Arc::new(Self {
            slices: None,
            fail_open: false,
            opened: AtomicUsize::new(0),
            released: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn broken() -> Arc<Self> {
        Arc::new(Self {
            slices: None,
            fail_open: true,
            opened: AtomicUsize::new(0),
            released: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

struct FakeStream {
    remaining: Option<usize>,
    released: Arc<AtomicUsize>,
}

impl AudioBackend for FakeBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn AudioStream>> {
        if self.fail_open {
            return Err(EngineError::Playback(format!("cannot open {:?}", path)));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeStream {
            remaining: self.slices,
            released: Arc::clone(&self.released),
        }))
    }
}

impl AudioStream for FakeStream {
    fn pump(&mut self, slice: Duration) -> bool {
        std::thread::sleep(slice);
        match self.remaining.as_mut() {
            None => true,
            Some(0) => false,
            Some(n) => {
                *n -= 1;
                true
            }
        }
    }
}

impl Drop for FakeStream {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}
