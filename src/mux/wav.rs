//! WAVE_FORMAT_EXTENSIBLE streaming header and frame reordering.
//!
//! The header is written once, up front, with the RIFF and data sizes set
//! to `0xFFFFFFFF` because the stream length is unknown. Nothing is ever
//! patched afterwards, so the output is valid on pipes.
//!
//! See: <https://learn.microsoft.com/en-us/windows/win32/api/mmreg/ns-mmreg-waveformatextensible>

use crate::error::FormatError;
use crate::format::ChannelLayout;

/// Size of the extensible WAV header in bytes.
pub const WAV_HEADER_SIZE: usize = 68;

/// Sentinel used for RIFF and data chunk sizes of a stream of unknown length.
pub const WAV_UNKNOWN_SIZE: u32 = 0xFFFF_FFFF;

/// Size of the fmt chunk body for WAVE_FORMAT_EXTENSIBLE.
const WAV_FMT_CHUNK_SIZE: u32 = 40;

/// Format tag for WAVE_FORMAT_EXTENSIBLE.
const WAV_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Size of the extension that follows the basic fmt fields.
const WAV_EXTENSION_SIZE: u16 = 22;

/// KSDATAFORMAT_SUBTYPE_PCM.
const KSDATAFORMAT_SUBTYPE_PCM: [u8; 16] = [
    0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xAA, 0x00, 0x38, 0x9B, 0x71,
];

/// Parameters of a streaming WAV header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    /// Channels written to the container.
    pub channels: u16,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Bits per sample.
    pub bits_per_sample: u16,
    /// Speaker mask of the written channels.
    pub channel_mask: u32,
    /// Bytes per frame.
    pub block_align: u16,
    /// Bytes per second.
    pub byte_rate: u32,
}

impl WavHeader {
    /// Builds the header for a remapped layout.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::HeaderOverflow`] when a field does not fit its
    /// on-disk width.
    pub fn for_layout(layout: &ChannelLayout, sample_rate: u32) -> Result<Self, FormatError> {
        let overflow = || FormatError::HeaderOverflow {
            channels: layout.channels(),
            bits: u16::try_from(layout.sample_size() * 8).unwrap_or(u16::MAX),
            sample_rate,
        };

        let channels = u16::try_from(layout.channels()).map_err(|_| overflow())?;
        let bits_per_sample = layout
            .sample_size()
            .checked_mul(8)
            .and_then(|bits| u16::try_from(bits).ok())
            .ok_or_else(overflow)?;
        let block_align = u16::try_from(layout.stride()).map_err(|_| overflow())?;
        let byte_rate = sample_rate
            .checked_mul(u32::from(block_align))
            .ok_or_else(overflow)?;

        Ok(Self {
            channels,
            sample_rate,
            bits_per_sample,
            channel_mask: layout.mask(),
            block_align,
            byte_rate,
        })
    }

    /// Serializes the header.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut header = Vec::with_capacity(WAV_HEADER_SIZE);

        // RIFF container header
        header.extend_from_slice(b"RIFF");
        header.extend_from_slice(&WAV_UNKNOWN_SIZE.to_le_bytes());
        header.extend_from_slice(b"WAVE");

        // fmt subchunk
        header.extend_from_slice(b"fmt ");
        header.extend_from_slice(&WAV_FMT_CHUNK_SIZE.to_le_bytes());
        header.extend_from_slice(&WAV_FORMAT_EXTENSIBLE.to_le_bytes());
        header.extend_from_slice(&self.channels.to_le_bytes());
        header.extend_from_slice(&self.sample_rate.to_le_bytes());
        header.extend_from_slice(&self.byte_rate.to_le_bytes());
        header.extend_from_slice(&self.block_align.to_le_bytes());
        header.extend_from_slice(&self.bits_per_sample.to_le_bytes());

        // Extensible part
        header.extend_from_slice(&WAV_EXTENSION_SIZE.to_le_bytes());
        header.extend_from_slice(&self.bits_per_sample.to_le_bytes());
        header.extend_from_slice(&self.channel_mask.to_le_bytes());
        header.extend_from_slice(&KSDATAFORMAT_SUBTYPE_PCM);

        // data subchunk header
        header.extend_from_slice(b"data");
        header.extend_from_slice(&WAV_UNKNOWN_SIZE.to_le_bytes());

        debug_assert_eq!(header.len(), WAV_HEADER_SIZE);
        header
    }
}

/// Reorders whole interleaved source frames into WAV order.
///
/// `block.len()` must be a multiple of `layout.source_stride()`.
pub fn reorder_interleaved(layout: &ChannelLayout, block: &[u8]) -> Vec<u8> {
    let sample_size = layout.sample_size();
    let mut out = Vec::with_capacity(block.len() / layout.source_stride() * layout.stride());

    for frame in block.chunks_exact(layout.source_stride()) {
        for &offset in layout.offsets() {
            out.extend_from_slice(&frame[offset..offset + sample_size]);
        }
    }
    out
}

/// Interleaves a planar block (one plane per source channel) into WAV order.
///
/// `block.len()` must be a multiple of `layout.source_stride()`.
pub fn reorder_planar(layout: &ChannelLayout, block: &[u8]) -> Vec<u8> {
    let sample_size = layout.sample_size();
    let plane = block.len() / layout.source_channels();
    let frames = plane / sample_size;
    let mut out = Vec::with_capacity(frames * layout.stride());

    for frame in 0..frames {
        for &source in layout.sources() {
            let start = source * plane + frame * sample_size;
            out.extend_from_slice(&block[start..start + sample_size]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{remap, ChannelPosition};

    fn u16_at(data: &[u8], at: usize) -> u16 {
        u16::from_le_bytes([data[at], data[at + 1]])
    }

    fn u32_at(data: &[u8], at: usize) -> u32 {
        u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
    }

    #[test]
    fn test_stereo_header_layout() {
        let layout = remap(&[ChannelPosition::L, ChannelPosition::R], 16).unwrap();
        let data = WavHeader::for_layout(&layout, 48000).unwrap().to_bytes();

        assert_eq!(data.len(), WAV_HEADER_SIZE);
        assert_eq!(&data[0..4], b"RIFF");
        assert_eq!(u32_at(&data, 4), WAV_UNKNOWN_SIZE);
        assert_eq!(&data[8..12], b"WAVE");
        assert_eq!(&data[12..16], b"fmt ");
        assert_eq!(u32_at(&data, 16), 40);
        assert_eq!(u16_at(&data, 20), 0xFFFE);
        assert_eq!(u16_at(&data, 22), 2); // channels
        assert_eq!(u32_at(&data, 24), 48000); // sample rate
        assert_eq!(u32_at(&data, 28), 192_000); // byte rate
        assert_eq!(u16_at(&data, 32), 4); // block align
        assert_eq!(u16_at(&data, 34), 16); // bits per sample
        assert_eq!(u16_at(&data, 36), 22); // extension size
        assert_eq!(u16_at(&data, 38), 16); // valid bits
        assert_eq!(u32_at(&data, 40), 0x3); // channel mask
        assert_eq!(&data[44..60], &KSDATAFORMAT_SUBTYPE_PCM);
        assert_eq!(&data[60..64], b"data");
        assert_eq!(u32_at(&data, 64), WAV_UNKNOWN_SIZE);
    }

    #[test]
    fn test_five_one_24bit_header() {
        use ChannelPosition::*;
        let layout = remap(&[L, R, C, Lfe, Ls, Rs], 24).unwrap();
        let header = WavHeader::for_layout(&layout, 44100).unwrap();

        assert_eq!(header.block_align, 18);
        assert_eq!(header.byte_rate, 44100 * 18);
        assert_eq!(header.channel_mask, 0x3F);
    }

    #[test]
    fn test_byte_rate_overflow_is_an_error() {
        use ChannelPosition::*;
        let layout = remap(&[L, R, C, Lfe, Ls, Rs, Lb, Rb], 32).unwrap();

        let err = WavHeader::for_layout(&layout, u32::MAX).unwrap_err();
        assert!(matches!(
            err,
            FormatError::HeaderOverflow {
                channels: 8,
                bits: 32,
                ..
            }
        ));
    }

    #[test]
    fn test_reorder_interleaved_identity() {
        let layout = remap(&[ChannelPosition::L, ChannelPosition::R], 16).unwrap();
        let block = [1, 2, 3, 4, 5, 6, 7, 8];
        assert_eq!(reorder_interleaved(&layout, &block), block.to_vec());
    }

    #[test]
    fn test_reorder_interleaved_swaps() {
        use ChannelPosition::*;
        let layout = remap(&[R, L, C], 16).unwrap();
        // One frame: R=0x0101, L=0x0202, C=0x0303
        let block = [0x01, 0x01, 0x02, 0x02, 0x03, 0x03];
        assert_eq!(
            reorder_interleaved(&layout, &block),
            vec![0x02, 0x02, 0x01, 0x01, 0x03, 0x03]
        );
    }

    #[test]
    fn test_reorder_drops_unmapped() {
        use ChannelPosition::*;
        // Lw has no WAV position.
        let layout = remap(&[L, Lw, R], 8).unwrap();
        let block = [10, 99, 20, 11, 98, 21];
        assert_eq!(reorder_interleaved(&layout, &block), vec![10, 20, 11, 21]);
    }

    #[test]
    fn test_reorder_planar() {
        use ChannelPosition::*;
        let layout = remap(&[R, L], 16).unwrap();
        // R plane: frames 0,1 ; L plane: frames 0,1
        let block = [0xA0, 0xA0, 0xA1, 0xA1, 0xB0, 0xB0, 0xB1, 0xB1];
        assert_eq!(
            reorder_planar(&layout, &block),
            vec![0xB0, 0xB0, 0xA0, 0xA0, 0xB1, 0xB1, 0xA1, 0xA1]
        );
    }
}
