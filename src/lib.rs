//! # stream-decode
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Compressed audio decode sessions with streaming WAV output.
//!
//! `stream-decode` feeds compressed packets (AC-3, E-AC-3, AAC, DTS or PCM)
//! into a pluggable decoding backend, honours the backend's backpressure,
//! and writes each decoded logical output as a WAVE_FORMAT_EXTENSIBLE
//! stream with channels reordered into the container's canonical order.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stream_decode::backend::{LoopbackLoader, LoopbackOptions};
//! use stream_decode::source::MockDemuxer;
//! use stream_decode::{FileSink, OutputId, StreamDecode};
//!
//! let session = StreamDecode::builder()
//!     .mux_to(OutputId::PRIMARY, FileSink::new("decoded.wav"))
//!     .on_event(|e| tracing::warn!(?e, "decode event"))
//!     .build()?;
//!
//! let mut demuxer = MockDemuxer::new(48000, 2);
//! demuxer.generate_sine(440.0, 1000);
//!
//! let loader = LoopbackLoader::new(LoopbackOptions::default());
//! let stats = session.run(&loader, &mut demuxer)?;
//! println!("{} bytes decoded", stats.bytes_muxed);
//! # Ok::<(), stream_decode::DecodeError>(())
//! ```
//!
//! ## Architecture
//!
//! Two threads share one lock and one condition variable:
//!
//! - **Feeder** (caller's thread): reads packets, pushes them to the
//!   backend, waits while the backend reports it is full
//! - **Backend worker**: decodes and calls back with events and decoded
//!   blocks; callbacks only update state, signal and mux
//!
//! Cancellation through a [`CancelHandle`] wakes every wait. Backend
//! handles are always released before `run` returns.

// unsafe_code lint is configured in Cargo.toml as "deny"
#![warn(missing_docs)]
// Sample and timestamp code requires intentional numeric casts
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
// unwrap/expect allowed in tests only
#![allow(clippy::unwrap_used)]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

pub mod backend;
mod builder;
pub mod config;
mod error;
mod event;
pub mod format;
pub mod mux;
mod pipeline;
mod session;
mod sink;
pub mod source;

pub use builder::{StreamDecode, StreamDecodeBuilder};
pub use config::{CompressionFormat, DecodeConfig, OutputConfig, OutputId, SessionKind};
pub use error::{
    BackendFault, BackendStage, ConfigError, DecodeError, FormatError, MuxError, ProtocolError,
    SinkError,
};
pub use event::{event_callback, DecodeEvent, EventCallback};
pub use session::{CancelHandle, Completion, Session, SessionStats};
pub use sink::{ChannelSink, DecodedBlock, FileSink, MemorySink, Sink, WriterSink};
