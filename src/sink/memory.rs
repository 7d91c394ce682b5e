//! In-memory sink.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::sink::Sink;
use crate::SinkError;

/// A sink that appends everything to a shared buffer.
///
/// Clones share the buffer, so a clone kept by the caller can read what
/// the session wrote after the first handle has been moved into the builder.
#[derive(Clone, Default)]
pub struct MemorySink {
    buffer: Arc<Mutex<Vec<u8>>>,
    stopped: Arc<Mutex<bool>>,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.buffer.lock().clone()
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Returns `true` if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }

    /// Returns `true` once `on_stop` has run.
    pub fn is_stopped(&self) -> bool {
        *self.stopped.lock()
    }
}

impl Sink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn write(&mut self, data: &[u8]) -> Result<(), SinkError> {
        self.buffer.lock().extend_from_slice(data);
        Ok(())
    }

    fn on_stop(&mut self) -> Result<(), SinkError> {
        *self.stopped.lock() = true;
        Ok(())
    }
}
