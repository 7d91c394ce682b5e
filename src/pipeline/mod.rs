//! Decode pipeline components.
//!
//! Two threads meet in the pipeline:
//!
//! ```text
//! Demuxer → Feeder → Backend ┄┄ backend worker → EventDispatcher → Muxer → Sinks
//!              ▲                                      │
//!              └──────────── PipelineState ◄──────────┘
//! ```
//!
//! - **Feeder**: runs on the caller's thread, pushes packets and blocks on
//!   the shared condition variable while the backend is full
//! - **EventDispatcher**: runs on backend threads, clears the buffer-full
//!   flag, records the end of stream and hands decoded blocks to the muxer
//! - **PipelineState**: the flags both sides share, one lock plus one
//!   condition variable
//!
//! Dispatcher handlers never wait on the feeder.

mod dispatch;
mod feeder;
mod state;

pub(crate) use dispatch::EventDispatcher;
pub(crate) use feeder::{Feeder, InputPort};
pub(crate) use state::{Counters, PipelineState, WaitOutcome};
