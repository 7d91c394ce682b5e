//! Contract of the external decode/post-processing backend.
//!
//! A backend is reached in four layers, each owning the next:
//!
//! ```text
//! BackendLoader ─load─▶ BackendLibrary ─open_session─▶ BackendSession ─init_module─▶ BackendModule
//! ```
//!
//! Backends deliver their results asynchronously, on threads they own,
//! through two typed callbacks: [`SessionCallback`] for decoded data and
//! output negotiation, [`ModuleCallback`] for input readiness. Callbacks
//! must return quickly and never wait on the feeding thread.
//!
//! [`BackendAdapter`] drives this contract for a session; [`LoopbackLoader`]
//! is a self-contained PCM backend that honors it.

mod adapter;
mod loopback;

pub use adapter::BackendAdapter;
pub use loopback::{LoopbackLoader, LoopbackOptions};

use std::sync::Arc;

use crate::config::{CompressionFormat, OutputConfig, OutputId, SessionKind};
use crate::error::BackendFault;
use crate::format::{InputFormat, OutputFormat};

/// Loads backend libraries by name.
pub trait BackendLoader: Send + Sync {
    /// Loads the library called `name`.
    fn load(&self, name: &str) -> Result<Box<dyn BackendLibrary>, BackendFault>;
}

/// A loaded backend library.
pub trait BackendLibrary: Send {
    /// Library name, for logging.
    fn name(&self) -> &str;

    /// Library version, `major << 16 | minor << 8 | patch`.
    fn version(&self) -> u32;

    /// Opens a session whose events are delivered to `callback`.
    fn open_session(
        &mut self,
        kind: SessionKind,
        callback: SessionCallback,
    ) -> Result<Box<dyn BackendSession>, BackendFault>;

    /// Unloads the library.
    fn unload(self: Box<Self>) -> Result<(), BackendFault>;
}

/// An open backend session.
pub trait BackendSession: Send {
    /// Registers the logical outputs and their channel limits.
    fn configure_outputs(&mut self, outputs: &[OutputConfig]) -> Result<(), BackendFault>;

    /// Applies a free-form key/value configuration string.
    fn set_kv_pairs(&mut self, kv_pairs: &str) -> Result<(), BackendFault>;

    /// Creates a processing module whose events are delivered to `callback`.
    fn init_module(
        &mut self,
        config: &ModuleConfig,
        callback: ModuleCallback,
    ) -> Result<Box<dyn BackendModule>, BackendFault>;

    /// Closes the session.
    fn close(self: Box<Self>) -> Result<(), BackendFault>;
}

/// A processing module inside a session.
pub trait BackendModule: Send {
    /// Starts processing.
    fn start(&mut self) -> Result<(), BackendFault>;

    /// Stops processing. Queued input is still drained after an
    /// end-of-stream buffer.
    fn stop(&mut self) -> Result<(), BackendFault>;

    /// Offers `buffer` for incremental consumption.
    fn process(&mut self, buffer: &InputBuffer<'_>) -> ProcessStatus;

    /// Releases the module.
    fn release(self: Box<Self>) -> Result<(), BackendFault>;
}

/// Module role inside a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleType {
    /// Decoder of a compressed stream.
    Decoder,
}

/// Module input role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleFlags {
    /// Main program input.
    Primary,
}

/// Parameters for [`BackendSession::init_module`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleConfig {
    /// Module role.
    pub module_type: ModuleType,
    /// Input role.
    pub flags: ModuleFlags,
    /// Compressed format the module decodes.
    pub format: CompressionFormat,
}

impl ModuleConfig {
    /// Primary decoder for `format`.
    pub fn primary_decoder(format: CompressionFormat) -> Self {
        Self {
            module_type: ModuleType::Decoder,
            flags: ModuleFlags::Primary,
            format,
        }
    }
}

/// A slice of compressed input offered to a module.
#[derive(Debug, Clone, Copy)]
pub struct InputBuffer<'a> {
    /// Unconsumed bytes.
    pub data: &'a [u8],
    /// Timestamp in microseconds.
    pub timestamp: Option<i64>,
    /// Marks the last buffer of the stream.
    pub eos: bool,
}

impl<'a> InputBuffer<'a> {
    /// A data buffer.
    pub fn new(data: &'a [u8], timestamp: Option<i64>) -> Self {
        Self {
            data,
            timestamp,
            eos: false,
        }
    }

    /// The zero-length end-of-stream marker.
    pub fn end_of_stream() -> Self {
        Self {
            data: &[],
            timestamp: None,
            eos: true,
        }
    }
}

/// Answer of [`BackendModule::process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// This many bytes were taken from the front of the buffer.
    Consumed(usize),
    /// The module cannot take input now; a
    /// [`ModuleEvent::SendInputBuffer`] follows once it can.
    NotReady,
}

/// A decoded buffer delivered for one logical output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBuffer {
    /// PCM bytes in the output's current format.
    pub data: Vec<u8>,
    /// Timestamp in microseconds.
    pub timestamp: Option<i64>,
}

/// Session-level events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Decoded data for a logical output.
    Data {
        /// Output the data belongs to.
        output: OutputId,
        /// The data.
        buffer: DecodedBuffer,
    },
    /// A logical output was (re)configured.
    OutputConfigChange {
        /// The output.
        output: OutputId,
        /// Its new format.
        format: OutputFormat,
    },
    /// The primary output is fully drained.
    Eos,
    /// A secondary input reached end of stream.
    EosSecondary,
    /// An associated input reached end of stream.
    EosAssoc,
    /// The backend reported an error. Not fatal by itself.
    Error {
        /// Backend message.
        message: String,
    },
    /// A command completed.
    Success,
    /// Stream metadata was updated.
    Metadata,
}

/// Module-level events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleEvent {
    /// The module can take more input.
    SendInputBuffer {
        /// Free space, when known.
        bytes_available: Option<usize>,
    },
    /// The module detected the input stream parameters.
    InputConfigChange(InputFormat),
}

/// Receiver of [`SessionEvent`]s, called on backend threads.
pub type SessionCallback = Arc<dyn Fn(SessionEvent) + Send + Sync>;

/// Receiver of [`ModuleEvent`]s, called on backend threads.
pub type ModuleCallback = Arc<dyn Fn(ModuleEvent) + Send + Sync>;

/// Formats a packed backend version as `major.minor.patch`.
pub fn format_version(version: u32) -> String {
    format!(
        "{}.{}.{}",
        (version >> 16) & 0xFF,
        (version >> 8) & 0xFF,
        version & 0xFF
    )
}
