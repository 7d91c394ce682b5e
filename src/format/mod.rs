//! Audio format descriptors and channel mapping.
//!
//! - [`OutputFormat`]: what the backend announces for a logical output
//! - [`InputFormat`]: what the backend detected in the compressed input
//! - [`remap`]: backend channel order to WAV speaker order

mod channel;

pub use channel::{
    format_channel_map, remap, speaker, ChannelLayout, ChannelPosition, MAX_BIT_WIDTH,
    WAV_CHANNEL_ORDER,
};

/// Format of a logical output, as negotiated by the backend.
///
/// Produced whenever the backend configures or reconfigures an output and
/// valid for every buffer of that output until superseded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFormat {
    /// Sample rate in Hz; `0` means "same as the input".
    pub sample_rate: u32,
    /// Bits per sample.
    pub bit_width: u16,
    /// `true` for interleaved frames, `false` for one plane per channel.
    pub interleaved: bool,
    /// Channel positions in physical sample order.
    pub channel_map: Vec<ChannelPosition>,
}

impl OutputFormat {
    /// Creates an interleaved format.
    pub fn interleaved(sample_rate: u32, bit_width: u16, channel_map: Vec<ChannelPosition>) -> Self {
        Self {
            sample_rate,
            bit_width,
            interleaved: true,
            channel_map,
        }
    }

    /// Creates a planar format.
    pub fn planar(sample_rate: u32, bit_width: u16, channel_map: Vec<ChannelPosition>) -> Self {
        Self {
            interleaved: false,
            ..Self::interleaved(sample_rate, bit_width, channel_map)
        }
    }

    /// Number of channels.
    pub fn channels(&self) -> usize {
        self.channel_map.len()
    }

    /// Bytes per source frame (all channels, one sample each).
    pub fn frame_size(&self) -> usize {
        self.channels() * usize::from(self.bit_width / 8)
    }

    /// Returns a copy with `sample_rate` filled from `fallback` when unset.
    pub fn with_rate_fallback(&self, fallback: u32) -> Self {
        let mut format = self.clone();
        if format.sample_rate == 0 {
            format.sample_rate = fallback;
        }
        format
    }
}

/// Input stream parameters detected by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Bits per sample.
    pub bit_width: u16,
    /// Channel count.
    pub channels: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_frame_size() {
        let format = OutputFormat::interleaved(
            48000,
            24,
            vec![ChannelPosition::L, ChannelPosition::R, ChannelPosition::C],
        );
        assert_eq!(format.channels(), 3);
        assert_eq!(format.frame_size(), 9);
        assert!(format.interleaved);
    }

    #[test]
    fn test_planar_constructor() {
        let format = OutputFormat::planar(44100, 16, vec![ChannelPosition::L]);
        assert!(!format.interleaved);
        assert_eq!(format.sample_rate, 44100);
    }

    #[test]
    fn test_rate_fallback() {
        let format = OutputFormat::interleaved(0, 16, vec![ChannelPosition::L]);
        assert_eq!(format.with_rate_fallback(32000).sample_rate, 32000);

        let format = OutputFormat::interleaved(48000, 16, vec![ChannelPosition::L]);
        assert_eq!(format.with_rate_fallback(32000).sample_rate, 48000);
    }
}
