//! Sink trait and implementations for muxed output.
//!
//! A [`Sink`] is a writable byte stream that receives one container header
//! followed by reordered PCM frames. The crate provides:
//!
//! - [`FileSink`]: Writes to a file, created on first write
//! - [`WriterSink`]: Wraps any [`std::io::Write`] (stdout, sockets, ...)
//! - [`MemorySink`]: Collects bytes in memory, cloneable for inspection
//! - [`ChannelSink`]: Forwards raw decoded blocks to a tokio channel
//!   (used for outputs that are not muxed)

mod channel;
mod file;
mod memory;
mod writer;

pub use channel::{ChannelSink, DecodedBlock};
pub use file::FileSink;
pub use memory::MemorySink;
pub use writer::WriterSink;

use crate::SinkError;

/// A destination for muxed audio bytes.
///
/// Sinks are driven from backend callback threads, one write at a time,
/// in stream order.
///
/// # Implementation Notes
///
/// - `write` receives whole header or whole block buffers
/// - `on_stop` is called once when the session ends, even after errors
///
/// # Example
///
/// ```
/// use stream_decode::{Sink, SinkError};
///
/// struct CountingSink {
///     bytes: usize,
/// }
///
/// impl Sink for CountingSink {
///     fn name(&self) -> &str {
///         "counting"
///     }
///
///     fn write(&mut self, data: &[u8]) -> Result<(), SinkError> {
///         self.bytes += data.len();
///         Ok(())
///     }
/// }
/// ```
pub trait Sink: Send {
    /// Human-readable name for logging and error messages.
    fn name(&self) -> &str;

    /// Writes bytes in order.
    fn write(&mut self, data: &[u8]) -> Result<(), SinkError>;

    /// Flushes buffered bytes.
    ///
    /// Default implementation does nothing.
    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Called once when the session ends.
    ///
    /// Default implementation flushes.
    fn on_stop(&mut self) -> Result<(), SinkError> {
        self.flush()
    }
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn write(&mut self, data: &[u8]) -> Result<(), SinkError> {
        (**self).write(data)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        (**self).flush()
    }

    fn on_stop(&mut self) -> Result<(), SinkError> {
        (**self).on_stop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingSink {
        name: String,
        writes: usize,
        stopped: bool,
    }

    impl CountingSink {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                writes: 0,
                stopped: false,
            }
        }
    }

    impl Sink for CountingSink {
        fn name(&self) -> &str {
            &self.name
        }

        fn write(&mut self, _data: &[u8]) -> Result<(), SinkError> {
            self.writes += 1;
            Ok(())
        }

        fn on_stop(&mut self) -> Result<(), SinkError> {
            self.stopped = true;
            Ok(())
        }
    }

    #[test]
    fn test_sink_lifecycle() {
        let mut sink = CountingSink::new("test");
        sink.write(&[1, 2]).unwrap();
        sink.write(&[3]).unwrap();
        sink.flush().unwrap();
        assert_eq!(sink.writes, 2);

        sink.on_stop().unwrap();
        assert!(sink.stopped);
    }

    #[test]
    fn test_boxed_sink_delegates() {
        let mut sink: Box<dyn Sink> = Box::new(CountingSink::new("boxed"));
        assert_eq!(sink.name(), "boxed");
        sink.write(&[0]).unwrap();
        sink.on_stop().unwrap();
    }

    #[test]
    fn test_sink_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Box<dyn Sink>>();
    }
}
