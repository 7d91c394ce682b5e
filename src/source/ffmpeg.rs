//! FFmpeg-backed container demuxer.

use std::path::Path;

use ffmpeg_next::codec::Id;
use ffmpeg_next::format::context::Input;
use ffmpeg_next::media::Type;
use ffmpeg_next::Packet;

use crate::config::CompressionFormat;
use crate::error::DecodeError;
use crate::source::{CompressedPacket, Demuxer, PcmParameters, TimeBase};

/// Reads the packets of one audio stream from a container.
pub struct FfmpegDemuxer {
    input: Input,
    stream_index: usize,
    format: CompressionFormat,
    time_base: TimeBase,
    pcm: Option<PcmParameters>,
    packet: Packet,
}

impl FfmpegDemuxer {
    /// Opens `path` and selects an audio stream.
    ///
    /// With `stream` set, that stream must exist and carry audio; otherwise
    /// FFmpeg's best audio stream is used.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be opened, has no usable audio stream, or
    /// the stream's codec has no decoding backend.
    pub fn open(path: impl AsRef<Path>, stream: Option<usize>) -> Result<Self, DecodeError> {
        let path = path.as_ref();
        ffmpeg_next::init().map_err(|e| DecodeError::demux(format!("ffmpeg init: {e}")))?;
        let input = ffmpeg_next::format::input(&path)
            .map_err(|e| DecodeError::demux(format!("cannot open {}: {e}", path.display())))?;

        let selected = match stream {
            Some(index) => input
                .stream(index)
                .filter(|s| s.parameters().medium() == Type::Audio)
                .ok_or_else(|| DecodeError::demux(format!("stream {index} is not an audio stream")))?,
            None => input
                .streams()
                .best(Type::Audio)
                .ok_or_else(|| DecodeError::demux("no audio stream found"))?,
        };

        let codec = selected.parameters().id();
        let format = compression_format(codec)
            .ok_or_else(|| DecodeError::demux(format!("unsupported codec {codec:?}")))?;
        let pcm = match pcm_bit_width(codec) {
            Some(bit_width) => Some(pcm_parameters(&selected, bit_width)?),
            None => None,
        };
        let rational = selected.time_base();
        let time_base = TimeBase::new(rational.numerator(), rational.denominator());
        let stream_index = selected.index();

        tracing::info!(
            path = %path.display(),
            stream = stream_index,
            codec = ?codec,
            %time_base,
            "opened container"
        );

        Ok(Self {
            input,
            stream_index,
            format,
            time_base,
            pcm,
            packet: Packet::empty(),
        })
    }

    /// Index of the selected stream.
    pub fn stream_index(&self) -> usize {
        self.stream_index
    }
}

fn compression_format(codec: Id) -> Option<CompressionFormat> {
    match codec {
        Id::AC3 => Some(CompressionFormat::Ac3),
        Id::EAC3 => Some(CompressionFormat::Eac3),
        Id::AAC | Id::AAC_LATM => Some(CompressionFormat::AacAdts),
        Id::DTS => Some(CompressionFormat::Dts),
        _ if pcm_bit_width(codec).is_some() => Some(CompressionFormat::Pcm),
        _ => None,
    }
}

/// Sample width of the little-endian PCM codecs WAV can carry unchanged.
fn pcm_bit_width(codec: Id) -> Option<u16> {
    match codec {
        Id::PCM_U8 => Some(8),
        Id::PCM_S16LE => Some(16),
        Id::PCM_S24LE => Some(24),
        Id::PCM_S32LE => Some(32),
        _ => None,
    }
}

fn pcm_parameters(
    stream: &ffmpeg_next::format::stream::Stream<'_>,
    bit_width: u16,
) -> Result<PcmParameters, DecodeError> {
    let context = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())
        .map_err(|e| DecodeError::demux(format!("stream parameters: {e}")))?;
    let audio = context
        .decoder()
        .audio()
        .map_err(|e| DecodeError::demux(format!("stream parameters: {e}")))?;
    let channels = u16::try_from(audio.ch_layout().channels())
        .map_err(|_| DecodeError::demux("stream reports a negative channel count"))?;

    Ok(PcmParameters {
        sample_rate: audio.rate(),
        channels,
        bit_width,
    })
}

impl Demuxer for FfmpegDemuxer {
    fn format(&self) -> CompressionFormat {
        self.format
    }

    fn pcm_parameters(&self) -> Option<PcmParameters> {
        self.pcm
    }

    fn next_packet(&mut self) -> Result<Option<CompressedPacket<'_>>, DecodeError> {
        loop {
            match self.packet.read(&mut self.input) {
                Ok(()) => {}
                Err(ffmpeg_next::Error::Eof) => return Ok(None),
                Err(e) => return Err(DecodeError::demux(format!("read failed: {e}"))),
            }
            if self.packet.stream() == self.stream_index {
                break;
            }
        }

        Ok(Some(CompressedPacket {
            data: self.packet.data().unwrap_or(&[]),
            pts: self.packet.pts(),
            time_base: self.time_base,
        }))
    }
}
