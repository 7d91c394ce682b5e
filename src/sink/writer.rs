//! Sink over an arbitrary writer.

use std::io::Write;

use crate::sink::Sink;
use crate::SinkError;

/// A sink that writes to any [`Write`] implementation.
///
/// # Example
///
/// ```
/// use stream_decode::WriterSink;
///
/// let sink = WriterSink::stdout();
/// // Use with StreamDecode builder...
/// ```
pub struct WriterSink<W: Write + Send> {
    name: String,
    writer: W,
}

impl WriterSink<std::io::Stdout> {
    /// Creates a sink writing to standard output.
    pub fn stdout() -> Self {
        Self::new("stdout", std::io::stdout())
    }
}

impl<W: Write + Send> WriterSink<W> {
    /// Wraps `writer` under the given name.
    pub fn new(name: impl Into<String>, writer: W) -> Self {
        Self {
            name: name.into(),
            writer,
        }
    }

    /// Returns the wrapped writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> Sink for WriterSink<W> {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, data: &[u8]) -> Result<(), SinkError> {
        self.writer
            .write_all(data)
            .map_err(|e| SinkError::write_failed(format!("{}: {e}", self.name)))
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.writer
            .flush()
            .map_err(|e| SinkError::write_failed(format!("{}: {e}", self.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "pipe closed",
            ))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_writer_sink_collects() {
        let mut sink = WriterSink::new("vec", Vec::new());
        sink.write(&[1, 2]).unwrap();
        sink.write(&[3]).unwrap();
        sink.on_stop().unwrap();
        assert_eq!(sink.into_inner(), vec![1, 2, 3]);
    }

    #[test]
    fn test_writer_sink_error() {
        let mut sink = WriterSink::new("pipe", BrokenPipe);
        let err = sink.write(&[1]).unwrap_err();
        assert!(matches!(err, SinkError::WriteFailed { .. }));
        assert!(err.to_string().contains("pipe closed"));
    }
}
