//! File sink implementation.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::sink::Sink;
use crate::SinkError;

/// A sink that writes muxed output to a file.
///
/// The file is created on first write, so a session that fails before any
/// output is configured leaves nothing behind. Container sizes are streaming
/// sentinels and are never patched on stop.
///
/// # Example
///
/// ```no_run
/// use stream_decode::FileSink;
///
/// let sink = FileSink::new("decoded.wav");
/// // Use with StreamDecode builder...
/// ```
pub struct FileSink {
    name: String,
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    bytes_written: u64,
}

impl FileSink {
    /// Creates a sink that will write to `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            name: format!("file:{}", path.as_ref().display()),
            path: path.as_ref().to_path_buf(),
            writer: None,
            bytes_written: 0,
        }
    }

    /// Path of the output file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written so far, header included.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>, SinkError> {
        if self.writer.is_none() {
            let file =
                File::create(&self.path).map_err(|e| SinkError::file_error(&self.path, e))?;
            tracing::debug!(path = %self.path.display(), "created output file");
            self.writer = Some(BufWriter::new(file));
        }
        self.writer
            .as_mut()
            .ok_or_else(|| SinkError::write_failed("file writer unavailable"))
    }
}

impl Sink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, data: &[u8]) -> Result<(), SinkError> {
        tracing::trace!("FileSink {}: writing {} bytes", self.name, data.len());

        let path = self.path.clone();
        self.writer()?
            .write_all(data)
            .map_err(|e| SinkError::file_error(path, e))?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        if let Some(ref mut writer) = self.writer {
            writer
                .flush()
                .map_err(|e| SinkError::file_error(&self.path, e))?;
        }
        Ok(())
    }

    fn on_stop(&mut self) -> Result<(), SinkError> {
        self.flush()?;
        self.writer = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_sink_writes_bytes_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.wav");

        let mut sink = FileSink::new(&path);
        sink.write(b"RIFF").unwrap();
        sink.write(&[1, 2, 3]).unwrap();
        sink.on_stop().unwrap();

        let data = std::fs::read(&path).unwrap();
        assert_eq!(data, b"RIFF\x01\x02\x03");
        assert_eq!(sink.bytes_written(), 7);
    }

    #[test]
    fn test_file_sink_invalid_path_error() {
        let path = PathBuf::from("/nonexistent/directory/out.wav");
        let mut sink = FileSink::new(&path);

        let err = sink.write(&[0, 1]).unwrap_err();
        assert!(err.to_string().contains("nonexistent"));
    }

    #[test]
    fn test_file_sink_flush_before_write() {
        let dir = tempdir().unwrap();
        let mut sink = FileSink::new(dir.path().join("out.wav"));
        assert!(sink.flush().is_ok());
    }

    #[test]
    fn test_file_sink_flush_after_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.wav");

        let mut sink = FileSink::new(&path);
        sink.write(&[9; 16]).unwrap();
        sink.flush().unwrap();

        assert_eq!(std::fs::read(&path).unwrap().len(), 16);
        sink.on_stop().unwrap();
    }

    #[test]
    fn test_file_sink_on_stop_before_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.wav");

        let mut sink = FileSink::new(&path);
        sink.on_stop().unwrap();

        // Nothing was written, so no file is created
        assert!(!path.exists());
    }

    #[test]
    fn test_file_sink_name() {
        let sink = FileSink::new("/path/to/audio.wav");
        assert_eq!(sink.name(), "file:/path/to/audio.wav");
        assert_eq!(sink.path(), Path::new("/path/to/audio.wav"));
    }
}
