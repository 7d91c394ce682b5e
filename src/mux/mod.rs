//! Container muxing of decoded output.
//!
//! The [`Muxer`] owns one route per logical output:
//!
//! - **mux**: remap channels, write a streaming WAV header once, then write
//!   every block reordered into WAV order
//! - **forward**: hand raw blocks to a [`ChannelSink`] untouched
//! - anything without a route is ignored

pub mod wav;

use std::collections::HashMap;

use crate::config::OutputId;
use crate::error::{FormatError, MuxError, SinkError};
use crate::format::{remap, ChannelLayout, ChannelPosition, OutputFormat};
use crate::sink::{ChannelSink, DecodedBlock, Sink};

pub use wav::{WavHeader, WAV_HEADER_SIZE};

/// A logical output whose header has been written.
#[derive(Debug, Clone)]
pub struct LogicalOutput {
    id: OutputId,
    format: OutputFormat,
    layout: ChannelLayout,
    blocks_written: u64,
    bytes_written: u64,
}

impl LogicalOutput {
    /// Output id.
    pub fn id(&self) -> OutputId {
        self.id
    }

    /// Format the header was written for, with the sample rate resolved.
    pub fn format(&self) -> &OutputFormat {
        &self.format
    }

    /// Channel remap in effect.
    pub fn layout(&self) -> &ChannelLayout {
        &self.layout
    }

    /// Bytes per written frame.
    pub fn stride(&self) -> usize {
        self.layout.stride()
    }

    /// Blocks muxed so far.
    pub fn blocks_written(&self) -> u64 {
        self.blocks_written
    }

    /// PCM bytes written after the header.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn mux_block(&mut self, block: &[u8]) -> Result<Vec<u8>, FormatError> {
        let source_stride = self.layout.source_stride();
        if self.layout.stride() == 0 || source_stride == 0 {
            return Err(FormatError::ZeroStride { output: self.id });
        }
        if block.len() % source_stride != 0 {
            return Err(FormatError::PartialFrame {
                output: self.id,
                len: block.len(),
                stride: source_stride,
            });
        }

        let frames = if self.format.interleaved {
            wav::reorder_interleaved(&self.layout, block)
        } else {
            wav::reorder_planar(&self.layout, block)
        };
        Ok(frames)
    }
}

/// Result of [`Muxer::begin`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeginOutcome {
    /// The header was written.
    HeaderWritten {
        /// Channels in the container.
        channels: usize,
        /// Source positions without a WAV position, in source order.
        dropped: Vec<ChannelPosition>,
    },
    /// A header already exists for this output; nothing was written.
    AlreadyStarted,
    /// The output is forwarded; its format was recorded.
    Forwarded,
    /// The output has no route.
    Ignored,
}

/// Result of [`Muxer::write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Reordered frames were written to the sink.
    Muxed {
        /// Bytes written to the sink.
        bytes: usize,
    },
    /// The block was sent to a channel sink.
    Forwarded,
    /// The output has no route.
    Ignored,
}

enum Route {
    Mux {
        sink: Box<dyn Sink>,
        output: Option<LogicalOutput>,
    },
    Forward {
        sink: ChannelSink,
        format: Option<OutputFormat>,
    },
}

/// Per-output container muxer.
///
/// # Example
///
/// ```
/// use stream_decode::format::{ChannelPosition, OutputFormat};
/// use stream_decode::mux::{Muxer, WAV_HEADER_SIZE};
/// use stream_decode::{MemorySink, OutputId};
///
/// let sink = MemorySink::new();
/// let mut muxer = Muxer::new();
/// muxer.mux_to(OutputId::PRIMARY, Box::new(sink.clone()));
///
/// let format = OutputFormat::interleaved(48000, 16, vec![ChannelPosition::L, ChannelPosition::R]);
/// muxer.begin(OutputId::PRIMARY, &format, None).unwrap();
/// muxer.write(OutputId::PRIMARY, &[0; 8], None).unwrap();
///
/// assert_eq!(sink.len(), WAV_HEADER_SIZE + 8);
/// ```
#[derive(Default)]
pub struct Muxer {
    routes: HashMap<OutputId, Route>,
}

impl Muxer {
    /// Creates a muxer with no routes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Muxes `id` into `sink`, replacing any previous route.
    pub fn mux_to(&mut self, id: OutputId, sink: Box<dyn Sink>) {
        self.routes.insert(id, Route::Mux { sink, output: None });
    }

    /// Forwards raw blocks of `id` to `sink`, replacing any previous route.
    pub fn forward_to(&mut self, id: OutputId, sink: ChannelSink) {
        self.routes.insert(id, Route::Forward { sink, format: None });
    }

    /// Returns `true` if `id` has a route.
    pub fn is_routed(&self, id: OutputId) -> bool {
        self.routes.contains_key(&id)
    }

    /// Returns the started output for `id`, if its header was written.
    pub fn output(&self, id: OutputId) -> Option<&LogicalOutput> {
        match self.routes.get(&id) {
            Some(Route::Mux { output, .. }) => output.as_ref(),
            _ => None,
        }
    }

    /// Starts output `id` with `format`.
    ///
    /// Idempotent: once a header exists for `id`, later calls write nothing
    /// and keep the first layout. A format without a sample rate takes
    /// `input_sample_rate`.
    ///
    /// # Errors
    ///
    /// - [`FormatError::UnknownSampleRate`] if no rate can be resolved
    /// - [`FormatError::UnsupportedBitWidth`] for non byte-aligned or too wide samples
    /// - [`FormatError::HeaderOverflow`] if the rate does not fit the header
    /// - [`FormatError::NoMappedChannels`] if no channel has a WAV position
    /// - [`MuxError::Sink`] if the header cannot be written
    pub fn begin(
        &mut self,
        id: OutputId,
        format: &OutputFormat,
        input_sample_rate: Option<u32>,
    ) -> Result<BeginOutcome, MuxError> {
        let (sink, slot) = match self.routes.get_mut(&id) {
            Some(Route::Mux { sink, output }) => (sink, output),
            Some(Route::Forward { format: current, .. }) => {
                *current = Some(format.with_rate_fallback(input_sample_rate.unwrap_or(0)));
                return Ok(BeginOutcome::Forwarded);
            }
            None => return Ok(BeginOutcome::Ignored),
        };

        if let Some(existing) = slot {
            if existing.format.channel_map != format.channel_map
                || existing.format.bit_width != format.bit_width
            {
                tracing::warn!(
                    output = %id,
                    "output reconfigured after its header was written; keeping the first layout"
                );
            }
            return Ok(BeginOutcome::AlreadyStarted);
        }

        let format = format.with_rate_fallback(input_sample_rate.unwrap_or(0));
        if format.sample_rate == 0 {
            return Err(FormatError::UnknownSampleRate { output: id }.into());
        }

        let layout = remap(&format.channel_map, format.bit_width)?;
        if layout.channels() == 0 {
            return Err(FormatError::NoMappedChannels { output: id }.into());
        }

        let header = WavHeader::for_layout(&layout, format.sample_rate)?;
        sink.write(&header.to_bytes())?;

        tracing::info!(
            output = %id,
            sink = sink.name(),
            sample_rate = header.sample_rate,
            bits = header.bits_per_sample,
            channels = header.channels,
            mask = format_args!("{:#x}", header.channel_mask),
            "wrote WAV header"
        );

        let dropped = format
            .channel_map
            .iter()
            .enumerate()
            .filter(|(index, _)| !layout.sources().contains(index))
            .map(|(_, &position)| position)
            .collect();
        let outcome = BeginOutcome::HeaderWritten {
            channels: layout.channels(),
            dropped,
        };
        *slot = Some(LogicalOutput {
            id,
            format,
            layout,
            blocks_written: 0,
            bytes_written: 0,
        });
        Ok(outcome)
    }

    /// Writes one decoded block of output `id`.
    ///
    /// # Errors
    ///
    /// - [`FormatError::NotStarted`] if `begin` has not succeeded for `id`
    /// - [`FormatError::ZeroStride`] / [`FormatError::PartialFrame`] for
    ///   blocks that are not whole frames
    /// - [`MuxError::Sink`] if the sink rejects the write
    pub fn write(
        &mut self,
        id: OutputId,
        block: &[u8],
        timestamp: Option<i64>,
    ) -> Result<WriteOutcome, MuxError> {
        match self.routes.get_mut(&id) {
            Some(Route::Mux { sink, output }) => {
                let output = output
                    .as_mut()
                    .ok_or(FormatError::NotStarted { output: id })?;
                let frames = output.mux_block(block)?;
                if !frames.is_empty() {
                    sink.write(&frames)?;
                }
                output.blocks_written += 1;
                output.bytes_written += frames.len() as u64;

                tracing::trace!(output = %id, bytes = frames.len(), ?timestamp, "muxed block");
                Ok(WriteOutcome::Muxed {
                    bytes: frames.len(),
                })
            }
            Some(Route::Forward { sink, format }) => {
                let format = format
                    .clone()
                    .ok_or(FormatError::NotStarted { output: id })?;
                sink.send(DecodedBlock {
                    output: id,
                    format,
                    data: block.to_vec(),
                    timestamp,
                })?;
                Ok(WriteOutcome::Forwarded)
            }
            None => Ok(WriteOutcome::Ignored),
        }
    }

    /// Stops every mux sink, returning the first failure.
    ///
    /// All sinks are stopped even if one fails.
    pub fn finish(&mut self) -> Result<(), SinkError> {
        let mut first_error = None;
        for (id, route) in &mut self.routes {
            if let Route::Mux { sink, .. } = route {
                if let Err(e) = sink.on_stop() {
                    tracing::error!(output = %id, sink = sink.name(), "sink stop failed: {e}");
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ChannelPosition::{self, *};
    use crate::sink::MemorySink;
    use tokio::sync::mpsc;

    fn stereo() -> OutputFormat {
        OutputFormat::interleaved(48000, 16, vec![L, R])
    }

    fn muxer_with_memory() -> (Muxer, MemorySink) {
        let sink = MemorySink::new();
        let mut muxer = Muxer::new();
        muxer.mux_to(OutputId::PRIMARY, Box::new(sink.clone()));
        (muxer, sink)
    }

    #[test]
    fn test_begin_writes_header_once() {
        let (mut muxer, sink) = muxer_with_memory();

        let outcome = muxer.begin(OutputId::PRIMARY, &stereo(), None).unwrap();
        assert_eq!(
            outcome,
            BeginOutcome::HeaderWritten {
                channels: 2,
                dropped: Vec::new()
            }
        );
        assert_eq!(sink.len(), WAV_HEADER_SIZE);

        // Same and different formats after the first begin are no-ops
        let again = muxer.begin(OutputId::PRIMARY, &stereo(), None).unwrap();
        assert_eq!(again, BeginOutcome::AlreadyStarted);
        let other = OutputFormat::interleaved(44100, 24, vec![L, R, C]);
        let again = muxer.begin(OutputId::PRIMARY, &other, None).unwrap();
        assert_eq!(again, BeginOutcome::AlreadyStarted);
        assert_eq!(sink.len(), WAV_HEADER_SIZE);
        assert_eq!(muxer.output(OutputId::PRIMARY).unwrap().format(), &stereo());
    }

    #[test]
    fn test_write_before_begin_fails() {
        let (mut muxer, sink) = muxer_with_memory();
        let err = muxer.write(OutputId::PRIMARY, &[0; 4], None).unwrap_err();
        assert!(matches!(
            err,
            MuxError::Format(FormatError::NotStarted { .. })
        ));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_write_rejects_partial_frames() {
        let (mut muxer, sink) = muxer_with_memory();
        muxer.begin(OutputId::PRIMARY, &stereo(), None).unwrap();

        for len in [1, 2, 3, 5, 7] {
            let err = muxer
                .write(OutputId::PRIMARY, &vec![0; len], None)
                .unwrap_err();
            assert!(matches!(
                err,
                MuxError::Format(FormatError::PartialFrame { stride: 4, .. })
            ));
        }
        // Nothing beyond the header was written
        assert_eq!(sink.len(), WAV_HEADER_SIZE);
    }

    #[test]
    fn test_write_reorders_frames() {
        let (mut muxer, sink) = muxer_with_memory();
        let format = OutputFormat::interleaved(48000, 16, vec![R, L, C]);
        muxer.begin(OutputId::PRIMARY, &format, None).unwrap();

        let block = [1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6];
        let outcome = muxer.write(OutputId::PRIMARY, &block, Some(0)).unwrap();
        assert_eq!(outcome, WriteOutcome::Muxed { bytes: 12 });

        let data = sink.contents();
        assert_eq!(
            &data[WAV_HEADER_SIZE..],
            &[2, 2, 1, 1, 3, 3, 5, 5, 4, 4, 6, 6]
        );

        let output = muxer.output(OutputId::PRIMARY).unwrap();
        assert_eq!(output.blocks_written(), 1);
        assert_eq!(output.bytes_written(), 12);
        assert_eq!(output.stride(), 6);
    }

    #[test]
    fn test_dropped_channels_use_source_stride() {
        let (mut muxer, sink) = muxer_with_memory();
        let format = OutputFormat::interleaved(48000, 8, vec![L, Lw, R]);
        let outcome = muxer.begin(OutputId::PRIMARY, &format, None).unwrap();
        assert_eq!(
            outcome,
            BeginOutcome::HeaderWritten {
                channels: 2,
                dropped: vec![Lw]
            }
        );

        // Three bytes per source frame, two per written frame
        muxer.write(OutputId::PRIMARY, &[1, 0, 2, 3, 0, 4], None).unwrap();
        assert_eq!(&sink.contents()[WAV_HEADER_SIZE..], &[1, 2, 3, 4]);

        let err = muxer.write(OutputId::PRIMARY, &[1, 0, 2, 3], None).unwrap_err();
        assert!(matches!(
            err,
            MuxError::Format(FormatError::PartialFrame { stride: 3, .. })
        ));
    }

    #[test]
    fn test_planar_write() {
        let (mut muxer, sink) = muxer_with_memory();
        let format = OutputFormat::planar(48000, 8, vec![L, R]);
        muxer.begin(OutputId::PRIMARY, &format, None).unwrap();

        muxer.write(OutputId::PRIMARY, &[1, 2, 3, 10, 20, 30], None).unwrap();
        assert_eq!(
            &sink.contents()[WAV_HEADER_SIZE..],
            &[1, 10, 2, 20, 3, 30]
        );
    }

    #[test]
    fn test_no_mapped_channels_fails_fast() {
        let (mut muxer, sink) = muxer_with_memory();
        let format = OutputFormat::interleaved(48000, 16, vec![Lw, Rw]);

        let err = muxer.begin(OutputId::PRIMARY, &format, None).unwrap_err();
        assert!(matches!(
            err,
            MuxError::Format(FormatError::NoMappedChannels { .. })
        ));
        assert!(sink.is_empty());
        assert!(muxer.output(OutputId::PRIMARY).is_none());
    }

    #[test]
    fn test_oversized_format_is_rejected_without_writing() {
        let (mut muxer, sink) = muxer_with_memory();
        let wide = OutputFormat::interleaved(48000, 65528, vec![L, R, C, Lfe, Ls, Rs, Flc, Frc, Cs]);

        let err = muxer.begin(OutputId::PRIMARY, &wide, None).unwrap_err();
        assert!(matches!(
            err,
            MuxError::Format(FormatError::UnsupportedBitWidth { bits: 65528 })
        ));

        let fast = OutputFormat::interleaved(u32::MAX, 32, vec![L, R]);
        let err = muxer.begin(OutputId::PRIMARY, &fast, None).unwrap_err();
        assert!(matches!(
            err,
            MuxError::Format(FormatError::HeaderOverflow { .. })
        ));

        assert!(sink.is_empty());
        assert!(muxer.output(OutputId::PRIMARY).is_none());
    }

    #[test]
    fn test_sample_rate_fallback() {
        let (mut muxer, sink) = muxer_with_memory();
        let format = OutputFormat::interleaved(0, 16, vec![L, R]);

        let err = muxer.begin(OutputId::PRIMARY, &format, None).unwrap_err();
        assert!(matches!(
            err,
            MuxError::Format(FormatError::UnknownSampleRate { .. })
        ));

        muxer.begin(OutputId::PRIMARY, &format, Some(32000)).unwrap();
        let data = sink.contents();
        assert_eq!(u32::from_le_bytes([data[24], data[25], data[26], data[27]]), 32000);
        assert_eq!(
            muxer.output(OutputId::PRIMARY).unwrap().format().sample_rate,
            32000
        );
    }

    #[test]
    fn test_unrouted_output_is_ignored() {
        let mut muxer = Muxer::new();
        let id = OutputId::nth(2);
        assert_eq!(muxer.begin(id, &stereo(), None).unwrap(), BeginOutcome::Ignored);
        assert_eq!(muxer.write(id, &[0; 3], None).unwrap(), WriteOutcome::Ignored);
        assert!(!muxer.is_routed(id));
    }

    #[tokio::test]
    async fn test_forward_route_sends_raw_blocks() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut muxer = Muxer::new();
        let id = OutputId::nth(1);
        muxer.forward_to(id, ChannelSink::new(tx));

        let format = OutputFormat::interleaved(48000, 16, vec![R, ChannelPosition::L]);
        assert_eq!(muxer.begin(id, &format, None).unwrap(), BeginOutcome::Forwarded);
        assert_eq!(
            muxer.write(id, &[1, 2, 3, 4], Some(42)).unwrap(),
            WriteOutcome::Forwarded
        );

        let block = rx.recv().await.unwrap();
        assert_eq!(block.data, vec![1, 2, 3, 4]);
        assert_eq!(block.format, format);
        assert_eq!(block.timestamp, Some(42));
    }

    #[test]
    fn test_finish_stops_sinks() {
        let (mut muxer, sink) = muxer_with_memory();
        muxer.finish().unwrap();
        assert!(sink.is_stopped());
    }
}
