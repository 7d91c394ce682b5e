//! Tokio mpsc channel forwarding for outputs that are not muxed.

use tokio::sync::mpsc;

use crate::config::OutputId;
use crate::format::OutputFormat;
use crate::SinkError;

/// A decoded block forwarded unchanged from the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBlock {
    /// Output the block belongs to.
    pub output: OutputId,
    /// Format in effect for the block.
    pub format: OutputFormat,
    /// Raw PCM in backend channel order.
    pub data: Vec<u8>,
    /// Presentation timestamp in microseconds, if the backend supplied one.
    pub timestamp: Option<i64>,
}

/// Forwards raw decoded blocks of one logical output to a tokio channel.
///
/// The channel is unbounded: sends happen on backend callback threads,
/// which must never block.
///
/// # Example
///
/// ```
/// use stream_decode::{ChannelSink, DecodedBlock};
/// use tokio::sync::mpsc;
///
/// let (tx, mut rx) = mpsc::unbounded_channel::<DecodedBlock>();
/// let sink = ChannelSink::new(tx);
///
/// // Use sink with StreamDecode builder...
/// // Then receive blocks:
/// // while let Some(block) = rx.recv().await { ... }
/// ```
pub struct ChannelSink {
    name: String,
    sender: mpsc::UnboundedSender<DecodedBlock>,
}

impl ChannelSink {
    /// Creates a channel sink with the given sender.
    pub fn new(sender: mpsc::UnboundedSender<DecodedBlock>) -> Self {
        Self {
            name: "channel".to_string(),
            sender,
        }
    }

    /// Creates a channel sink with a custom name.
    pub fn with_name(name: impl Into<String>, sender: mpsc::UnboundedSender<DecodedBlock>) -> Self {
        Self {
            name: name.into(),
            sender,
        }
    }

    /// Human-readable name for logging.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sends one block without blocking.
    pub fn send(&self, block: DecodedBlock) -> Result<(), SinkError> {
        self.sender
            .send(block)
            .map_err(|_| SinkError::ChannelClosed)
    }
}
