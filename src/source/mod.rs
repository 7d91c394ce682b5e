//! Compressed packet sources.
//!
//! A [`Demuxer`] hands out one [`CompressedPacket`] at a time, borrowed for
//! the duration of one feed call. Provided demuxers:
//!
//! - [`MockDemuxer`]: synthetic PCM for tests, no files needed
//! - [`RawDemuxer`]: fixed-size reads from an elementary stream
//! - `FfmpegDemuxer` (feature `ffmpeg`): packets of one audio stream of any
//!   container FFmpeg can open

mod mock;
mod raw;
#[cfg(feature = "ffmpeg")]
mod ffmpeg;

pub use mock::MockDemuxer;
pub use raw::{RawDemuxer, DEFAULT_PACKET_SIZE};
#[cfg(feature = "ffmpeg")]
pub use ffmpeg::FfmpegDemuxer;

use std::fmt;

use crate::config::CompressionFormat;
use crate::error::DecodeError;

/// Time base used by the backend: microseconds.
pub const BACKEND_TIME_BASE: TimeBase = TimeBase::new(1, 1_000_000);

/// A rational time unit, `num / den` seconds per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBase {
    /// Numerator.
    pub num: i32,
    /// Denominator.
    pub den: i32,
}

impl TimeBase {
    /// Creates a time base of `num / den` seconds.
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Returns `false` for a zero numerator or denominator.
    pub fn is_valid(&self) -> bool {
        self.num != 0 && self.den != 0
    }

    /// Converts `value` ticks of `self` into ticks of `to`, rounding to the
    /// nearest tick with halves away from zero. Saturates at the `i64`
    /// range.
    ///
    /// # Example
    ///
    /// ```
    /// use stream_decode::source::{TimeBase, BACKEND_TIME_BASE};
    ///
    /// let mpeg_ts = TimeBase::new(1, 90_000);
    /// assert_eq!(mpeg_ts.rescale(90_000, BACKEND_TIME_BASE), 1_000_000);
    /// ```
    pub fn rescale(&self, value: i64, to: TimeBase) -> i64 {
        let num = i128::from(value) * i128::from(self.num) * i128::from(to.den);
        let den = i128::from(self.den) * i128::from(to.num);
        if den == 0 {
            return 0;
        }

        let quotient = num / den;
        let remainder = num % den;
        let rounded = if 2 * remainder.abs() >= den.abs() {
            quotient + num.signum() * den.signum()
        } else {
            quotient
        };
        rounded.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
    }
}

impl fmt::Display for TimeBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// One compressed packet, borrowed from its demuxer.
#[derive(Debug, Clone, Copy)]
pub struct CompressedPacket<'a> {
    /// Packet payload.
    pub data: &'a [u8],
    /// Presentation timestamp in `time_base` units.
    pub pts: Option<i64>,
    /// Unit of `pts`.
    pub time_base: TimeBase,
}

impl<'a> CompressedPacket<'a> {
    /// A packet without a timestamp.
    pub fn untimed(data: &'a [u8]) -> Self {
        Self {
            data,
            pts: None,
            time_base: BACKEND_TIME_BASE,
        }
    }

    /// The timestamp in backend microseconds, if the packet has one.
    pub fn backend_timestamp(&self) -> Option<i64> {
        if !self.time_base.is_valid() {
            return None;
        }
        self.pts
            .map(|pts| self.time_base.rescale(pts, BACKEND_TIME_BASE))
    }
}

/// Sample layout of an uncompressed PCM stream, as found by a demuxer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmParameters {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Interleaved channel count.
    pub channels: u16,
    /// Bits per sample.
    pub bit_width: u16,
}

/// Source of compressed packets.
pub trait Demuxer {
    /// Compressed format of the packets.
    fn format(&self) -> CompressionFormat;

    /// Sample layout of a PCM stream, when the demuxer knows it.
    fn pcm_parameters(&self) -> Option<PcmParameters> {
        None
    }

    /// Returns the next packet, or `None` once the input is exhausted.
    fn next_packet(&mut self) -> Result<Option<CompressedPacket<'_>>, DecodeError>;
}

impl<D: Demuxer + ?Sized> Demuxer for Box<D> {
    fn format(&self) -> CompressionFormat {
        (**self).format()
    }

    fn pcm_parameters(&self) -> Option<PcmParameters> {
        (**self).pcm_parameters()
    }

    fn next_packet(&mut self) -> Result<Option<CompressedPacket<'_>>, DecodeError> {
        (**self).next_packet()
    }
}
