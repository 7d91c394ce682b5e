//! Elementary stream reader.

use std::io::{ErrorKind, Read};

use crate::config::CompressionFormat;
use crate::error::{ConfigError, DecodeError};
use crate::source::{CompressedPacket, Demuxer};

/// Default read size of a [`RawDemuxer`].
pub const DEFAULT_PACKET_SIZE: usize = 4096;

/// Serves a raw elementary stream as fixed-size, untimed packets.
///
/// The backend parses frame boundaries itself, so packets need not be
/// frame aligned. The last packet may be shorter.
pub struct RawDemuxer<R: Read> {
    reader: R,
    format: CompressionFormat,
    buffer: Vec<u8>,
    exhausted: bool,
}

impl<R: Read> RawDemuxer<R> {
    /// Reads `format` packets of `packet_size` bytes from `reader`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPacketSize`] for a zero packet size.
    pub fn new(
        reader: R,
        format: CompressionFormat,
        packet_size: usize,
    ) -> Result<Self, ConfigError> {
        if packet_size == 0 {
            return Err(ConfigError::InvalidPacketSize);
        }
        Ok(Self {
            reader,
            format,
            buffer: vec![0; packet_size],
            exhausted: false,
        })
    }

    /// Fills the buffer as far as the reader allows.
    fn fill(&mut self) -> Result<usize, DecodeError> {
        let mut filled = 0;
        while filled < self.buffer.len() {
            match self.reader.read(&mut self.buffer[filled..]) {
                Ok(0) => {
                    self.exhausted = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(DecodeError::demux(format!("read failed: {e}"))),
            }
        }
        Ok(filled)
    }
}

impl<R: Read> Demuxer for RawDemuxer<R> {
    fn format(&self) -> CompressionFormat {
        self.format
    }

    fn next_packet(&mut self) -> Result<Option<CompressedPacket<'_>>, DecodeError> {
        if self.exhausted {
            return Ok(None);
        }
        let filled = self.fill()?;
        if filled == 0 {
            return Ok(None);
        }
        tracing::trace!(bytes = filled, "read raw packet");
        Ok(Some(CompressedPacket::untimed(&self.buffer[..filled])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_raw_demuxer_splits_input() {
        let input: Vec<u8> = (0..10).collect();
        let mut demuxer =
            RawDemuxer::new(Cursor::new(input.clone()), CompressionFormat::Ac3, 4).unwrap();

        let mut packets = Vec::new();
        while let Some(packet) = demuxer.next_packet().unwrap() {
            assert!(packet.pts.is_none());
            packets.push(packet.data.to_vec());
        }
        assert_eq!(packets, vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7], vec![8, 9]]);
        assert!(demuxer.next_packet().unwrap().is_none());
        assert_eq!(demuxer.format(), CompressionFormat::Ac3);
    }

    #[test]
    fn test_raw_demuxer_empty_input() {
        let mut demuxer =
            RawDemuxer::new(Cursor::new(Vec::new()), CompressionFormat::Pcm, 4).unwrap();
        assert!(demuxer.next_packet().unwrap().is_none());
    }

    #[test]
    fn test_raw_demuxer_rejects_zero_packet_size() {
        let result = RawDemuxer::new(Cursor::new(Vec::new()), CompressionFormat::Pcm, 0);
        assert!(matches!(result, Err(ConfigError::InvalidPacketSize)));
    }

    #[test]
    fn test_raw_demuxer_read_error() {
        struct Failing;
        impl Read for Failing {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(ErrorKind::Other, "device gone"))
            }
        }

        let mut demuxer = RawDemuxer::new(Failing, CompressionFormat::Pcm, 4).unwrap();
        let err = demuxer.next_packet().unwrap_err();
        assert!(err.to_string().contains("device gone"));
    }
}
