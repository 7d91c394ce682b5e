//! Error types for stream-decode.
//!
//! Errors are split into two categories:
//! - **Fatal errors** ([`DecodeError`]): Stop the session; backend resources
//!   are released before the error reaches the caller
//! - **Recoverable events**: Backend error reports, dropped channels and
//!   similar conditions surfaced via [`EventCallback`](crate::EventCallback)

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::OutputId;

/// Fatal errors returned by [`StreamDecodeBuilder::build()`] and [`Session::run()`].
///
/// A "not ready" answer from the backend is never an error: it is the
/// backpressure signal and the same data is always retried.
///
/// [`StreamDecodeBuilder::build()`]: crate::StreamDecodeBuilder::build
/// [`Session::run()`]: crate::Session::run
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The session configuration was rejected before anything started.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// A backend lifecycle step failed.
    #[error("backend {stage} failed: {reason}")]
    Backend {
        /// The step that failed.
        stage: BackendStage,
        /// Backend-provided reason.
        reason: String,
    },

    /// The backend broke the processing contract.
    #[error("backend protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    /// Decoded output could not be muxed or written.
    #[error(transparent)]
    Mux(#[from] MuxError),

    /// The demuxer failed to produce the next packet.
    #[error("demux failed: {reason}")]
    Demux {
        /// Why the demuxer failed.
        reason: String,
    },

    /// The backend did not confirm end of stream in time.
    #[error("backend did not confirm end of stream within {waited:?}")]
    DrainTimeout {
        /// How long the session waited.
        waited: Duration,
    },

    /// The pipeline stopped for a failure that was never recorded.
    #[error("internal pipeline error: {reason}")]
    Internal {
        /// What was inconsistent.
        reason: String,
    },

    /// The blocking decode task panicked or was aborted by the runtime.
    #[error("decode task failed: {reason}")]
    TaskFailed {
        /// Join error message.
        reason: String,
    },
}

impl DecodeError {
    /// Creates a backend error for the given stage.
    pub fn backend(stage: BackendStage, reason: impl Into<String>) -> Self {
        Self::Backend {
            stage,
            reason: reason.into(),
        }
    }

    /// Creates a demux error with the given reason.
    pub fn demux(reason: impl Into<String>) -> Self {
        Self::Demux {
            reason: reason.into(),
        }
    }
}

/// Backend lifecycle steps, used to report where a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendStage {
    /// Loading the backend library.
    LoadLibrary,
    /// Opening the session.
    OpenSession,
    /// Registering the logical outputs.
    ConfigureOutputs,
    /// Applying the key/value string.
    SetKvPairs,
    /// Creating the decoder module.
    InitModule,
    /// Starting the decoder module.
    StartModule,
    /// Stopping the decoder module after end of stream.
    StopModule,
}

impl fmt::Display for BackendStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            Self::LoadLibrary => "library load",
            Self::OpenSession => "session open",
            Self::ConfigureOutputs => "output configuration",
            Self::SetKvPairs => "kvpairs configuration",
            Self::InitModule => "module init",
            Self::StartModule => "module start",
            Self::StopModule => "module stop",
        };
        f.write_str(stage)
    }
}

/// Configuration rejected before the session starts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// No logical outputs were requested.
    #[error("no outputs configured")]
    NoOutputs,

    /// More outputs than the backend supports.
    #[error("too many outputs: {count} (max {max})")]
    TooManyOutputs {
        /// Requested output count.
        count: usize,
        /// Supported maximum.
        max: usize,
    },

    /// An output channel limit is out of range.
    #[error("invalid number of channels {channels} for output {output}")]
    InvalidChannelCount {
        /// The offending output.
        output: OutputId,
        /// The requested channel count.
        channels: u8,
    },

    /// The same output id was requested twice.
    #[error("duplicate output {output}")]
    DuplicateOutput {
        /// The duplicated id.
        output: OutputId,
    },

    /// A sink or forward route names an output that is not configured.
    #[error("route for unknown output {output}")]
    UnknownRouteOutput {
        /// The unknown id.
        output: OutputId,
    },

    /// A PCM input the loopback backend cannot lay out.
    #[error("unsupported PCM input: {channels} channels of {bits} bits")]
    UnsupportedPcmLayout {
        /// Channel count.
        channels: u16,
        /// Bits per sample.
        bits: u16,
    },

    /// A raw demuxer was asked for zero-sized packets.
    #[error("packet size must be greater than zero")]
    InvalidPacketSize,
}

/// The backend answered a push in a way the contract forbids.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The backend reported zero bytes consumed.
    #[error("decoder consumed zero bytes at offset {offset} ({remaining} remaining)")]
    ZeroConsumption {
        /// Offset within the packet.
        offset: usize,
        /// Bytes that were offered.
        remaining: usize,
    },

    /// The backend claimed more bytes than it was offered.
    #[error("decoder consumed {consumed} bytes but only {remaining} were offered")]
    OverConsumption {
        /// Reported consumption.
        consumed: usize,
        /// Bytes that were offered.
        remaining: usize,
    },
}

/// A decoded block or output format cannot be muxed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    /// Data arrived for an output whose header was never written.
    #[error("output {output} has no header yet")]
    NotStarted {
        /// The output.
        output: OutputId,
    },

    /// The output's frame stride is zero.
    #[error("output {output} has a zero frame stride")]
    ZeroStride {
        /// The output.
        output: OutputId,
    },

    /// The block is not a whole number of frames.
    #[error("output {output}: block of {len} bytes is not a multiple of the {stride}-byte frame")]
    PartialFrame {
        /// The output.
        output: OutputId,
        /// Block length.
        len: usize,
        /// Source frame size.
        stride: usize,
    },

    /// Samples are not a whole number of bytes.
    #[error("unsupported bit width {bits}")]
    UnsupportedBitWidth {
        /// Requested bit width.
        bits: u16,
    },

    /// None of the output's channel positions exist in the container layout.
    #[error("output {output} has no channel the container can represent")]
    NoMappedChannels {
        /// The output.
        output: OutputId,
    },

    /// The header fields cannot represent the layout at this rate.
    #[error("{channels} channels of {bits} bits at {sample_rate} Hz overflow the WAV header")]
    HeaderOverflow {
        /// Written channels.
        channels: usize,
        /// Bits per sample.
        bits: u16,
        /// Sample rate in Hz.
        sample_rate: u32,
    },

    /// Neither the output config nor the input config carried a sample rate.
    #[error("output {output} has no sample rate and no input rate is known")]
    UnknownSampleRate {
        /// The output.
        output: OutputId,
    },
}

/// Failure while muxing decoded output.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// The data or format was unusable.
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    /// The sink rejected the write.
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),
}

/// Errors that can occur within a [`Sink`](crate::Sink) implementation.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// A write operation failed.
    #[error("write failed: {reason}")]
    WriteFailed {
        /// Description of what went wrong.
        reason: String,
    },

    /// File I/O error.
    #[error("file error: {path}: {source}")]
    FileError {
        /// Path to the file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The receiving channel was closed.
    #[error("channel closed")]
    ChannelClosed,

    /// Custom error for user-implemented sinks.
    #[error("{0}")]
    Custom(String),
}

impl SinkError {
    /// Creates a custom sink error with the given message.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// Creates a write failed error with the given reason.
    pub fn write_failed(reason: impl Into<String>) -> Self {
        Self::WriteFailed {
            reason: reason.into(),
        }
    }

    /// Creates a file error for the given path.
    pub fn file_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileError {
            path: path.into(),
            source,
        }
    }
}

/// Failure reported by a backend implementation.
///
/// Backends only describe what went wrong; the adapter attaches the
/// lifecycle stage when turning it into a [`DecodeError`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct BackendFault(String);

impl BackendFault {
    /// Creates a fault with the given message.
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the message.
    pub fn message(&self) -> &str {
        &self.0
    }
}
