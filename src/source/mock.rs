//! Mock demuxer for testing without media files.

use crate::config::CompressionFormat;
use crate::error::DecodeError;
use crate::source::{CompressedPacket, Demuxer, PcmParameters, TimeBase};

/// A demuxer that serves synthetic 16-bit PCM as packets.
///
/// Packet timestamps count frames (time base `1 / sample_rate`).
///
/// # Example
///
/// ```
/// use stream_decode::source::{Demuxer, MockDemuxer};
///
/// let mut mock = MockDemuxer::new(48000, 2).with_packet_size(1024);
///
/// // 100ms of silence, then 100ms of a 440Hz sine wave
/// mock.generate_silence(100);
/// mock.generate_sine(440.0, 100);
///
/// let first = mock.next_packet().unwrap().unwrap();
/// assert_eq!(first.data.len(), 1024);
/// assert_eq!(first.pts, Some(0));
/// ```
pub struct MockDemuxer {
    sample_rate: u32,
    channels: u16,
    format: CompressionFormat,
    data: Vec<u8>,
    packet_size: usize,
    position: usize,
    packets_served: usize,
    fail_after: Option<usize>,
}

impl MockDemuxer {
    /// Creates an empty mock with the given PCM layout.
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            format: CompressionFormat::Pcm,
            data: Vec::new(),
            packet_size: 4096,
            position: 0,
            packets_served: 0,
            fail_after: None,
        }
    }

    /// Sets the packet size in bytes (at least one).
    #[must_use]
    pub fn with_packet_size(mut self, packet_size: usize) -> Self {
        self.packet_size = packet_size.max(1);
        self
    }

    /// Reports a different compressed format.
    #[must_use]
    pub fn with_format(mut self, format: CompressionFormat) -> Self {
        self.format = format;
        self
    }

    /// Fails with a demux error after serving `packets` packets.
    #[must_use]
    pub fn failing_after(mut self, packets: usize) -> Self {
        self.fail_after = Some(packets);
        self
    }

    /// Returns the sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Returns the channel count.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Generates silence for the given duration in milliseconds.
    pub fn generate_silence(&mut self, duration_ms: u64) {
        let num_samples = self.samples_for_duration(duration_ms);
        self.data.resize(self.data.len() + num_samples * 2, 0);
    }

    /// Generates a sine wave at the given frequency for the given duration.
    pub fn generate_sine(&mut self, frequency: f64, duration_ms: u64) {
        let num_frames = self.samples_for_duration(duration_ms) / usize::from(self.channels);
        let sample_rate = f64::from(self.sample_rate);

        for i in 0..num_frames {
            let t = i as f64 / sample_rate;
            let value = (2.0 * std::f64::consts::PI * frequency * t).sin();
            let sample = (value * 32767.0) as i16;

            // Same sample on every channel
            for _ in 0..self.channels {
                self.data.extend_from_slice(&sample.to_le_bytes());
            }
        }
    }

    /// Appends interleaved samples.
    pub fn add_samples(&mut self, samples: &[i16]) {
        for sample in samples {
            self.data.extend_from_slice(&sample.to_le_bytes());
        }
    }

    /// Appends raw bytes.
    pub fn add_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// All bytes the mock will serve.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    fn samples_for_duration(&self, duration_ms: u64) -> usize {
        let frames = (u64::from(self.sample_rate) * duration_ms / 1000) as usize;
        frames * usize::from(self.channels)
    }

    fn frame_size(&self) -> usize {
        usize::from(self.channels) * 2
    }
}

impl Demuxer for MockDemuxer {
    fn format(&self) -> CompressionFormat {
        self.format
    }

    fn pcm_parameters(&self) -> Option<PcmParameters> {
        (self.format == CompressionFormat::Pcm).then_some(PcmParameters {
            sample_rate: self.sample_rate,
            channels: self.channels,
            bit_width: 16,
        })
    }

    fn next_packet(&mut self) -> Result<Option<CompressedPacket<'_>>, DecodeError> {
        if self.fail_after == Some(self.packets_served) {
            return Err(DecodeError::demux("mock demuxer failure"));
        }
        if self.position >= self.data.len() {
            return Ok(None);
        }

        let start = self.position;
        let end = (start + self.packet_size).min(self.data.len());
        self.position = end;
        self.packets_served += 1;

        let pts = (start / self.frame_size().max(1)) as i64;
        Ok(Some(CompressedPacket {
            data: &self.data[start..end],
            pts: Some(pts),
            time_base: TimeBase::new(1, self.sample_rate as i32),
        }))
    }
}
