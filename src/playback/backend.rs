use crate::error::{EngineError, Result};
use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Opens decoded audio streams for playback sessions.
pub trait AudioBackend: Send + Sync {
    /// Opens the file and its decoder together; dropping the returned stream
    /// releases both.
    fn open(&self, path: &Path) -> Result<Box<dyn AudioStream>>;
}

/// An open, playing stream owned by one session thread.
pub trait AudioStream {
    /// Plays for at most `slice`; returns false once the source is exhausted.
    fn pump(&mut self, slice: Duration) -> bool;
}

/// Default output device through rodio.
#[derive(Debug, Default, Clone, Copy)]
pub struct RodioBackend;

struct RodioStream {
    // Declared first so the sink is dropped before its output stream.
    sink: Sink,
    _stream: OutputStream,
}

impl AudioBackend for RodioBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn AudioStream>> {
        let file = File::open(path)?;
        let decoder = Decoder::new(BufReader::new(file))
            .map_err(|e| EngineError::Playback(format!("{:?}: {}", path, e)))?;
        let stream = OutputStreamBuilder::open_default_stream()
            .map_err(|e| EngineError::Playback(format!("output device: {}", e)))?;
        let sink = Sink::connect_new(stream.mixer());
        sink.append(decoder);
        sink.play();
        debug!("Opened output for {:?}", path);
        Ok(Box::new(RodioStream {
            sink,
            _stream: stream,
        }))
    }
}

impl AudioStream for RodioStream {
    fn pump(&mut self, slice: Duration) -> bool {
        if self.sink.empty() {
            return false;
        }
        std::thread::sleep(slice);
        !self.sink.empty()
    }
}

impl Drop for RodioStream {
    fn drop(&mut self) {
        self.sink.stop();
    }
}
