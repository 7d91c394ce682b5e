//! Runtime events for monitoring a decode session.
//!
//! Events are non-fatal notifications. The session keeps running after any
//! of them - they're for logging and diagnostics, not error handling.
//! Fatal conditions are returned from [`Session::run()`](crate::Session::run).

use std::sync::Arc;

use crate::config::OutputId;
use crate::format::{ChannelPosition, InputFormat, OutputFormat};

/// Runtime events emitted during a decode session.
///
/// Events are delivered on backend threads; handlers must return quickly.
///
/// # Example
///
/// ```
/// use stream_decode::DecodeEvent;
///
/// fn handle_event(event: DecodeEvent) {
///     match event {
///         DecodeEvent::ChannelsDropped { output, dropped } => {
///             eprintln!("output {output}: {} channels dropped", dropped.len());
///         }
///         DecodeEvent::BackendError { message } => {
///             eprintln!("backend error: {message}");
///         }
///         other => eprintln!("{other:?}"),
///     }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeEvent {
    /// The backend detected the input stream parameters.
    InputConfigChanged(InputFormat),

    /// An output started: its header was written or its forwarding format
    /// recorded.
    OutputConfigured {
        /// The output.
        output: OutputId,
        /// Its format, with the sample rate resolved for muxed outputs.
        format: OutputFormat,
    },

    /// Some source channels have no container position and are not written.
    ChannelsDropped {
        /// The output.
        output: OutputId,
        /// Positions that were dropped.
        dropped: Vec<ChannelPosition>,
    },

    /// The backend reported an error. Decoding continues.
    BackendError {
        /// Backend message.
        message: String,
    },

    /// A secondary input reached end of stream.
    SecondaryEos,

    /// An associated input reached end of stream.
    AssocEos,

    /// The backend reported end of stream again after it was already
    /// confirmed. Ignored.
    DuplicateEos,

    /// The backend sent something out of order.
    ProtocolWarning {
        /// What happened.
        message: String,
    },

    /// A decoded block was dropped without being written.
    BufferDiscarded {
        /// The output.
        output: OutputId,
        /// Block size.
        bytes: usize,
    },
}

/// Callback type for receiving runtime events.
///
/// Register one via [`StreamDecodeBuilder::on_event()`].
///
/// [`StreamDecodeBuilder::on_event()`]: crate::StreamDecodeBuilder::on_event
///
/// # Example
///
/// ```ignore
/// use stream_decode::{StreamDecode, DecodeEvent};
///
/// let session = StreamDecode::builder()
///     .on_event(|event| {
///         tracing::warn!(?event, "decode event");
///     })
///     .build()?;
/// ```
pub type EventCallback = Arc<dyn Fn(DecodeEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// # Example
///
/// ```
/// use stream_decode::{event_callback, DecodeEvent};
///
/// let callback = event_callback(|event| {
///     println!("Got event: {:?}", event);
/// });
/// callback(DecodeEvent::DuplicateEos);
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(DecodeEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_event_debug() {
        let event = DecodeEvent::BufferDiscarded {
            output: OutputId::PRIMARY,
            bytes: 512,
        };
        let debug = format!("{:?}", event);
        assert!(debug.contains("BufferDiscarded"));
        assert!(debug.contains("512"));
    }

    #[test]
    fn test_decode_event_clone() {
        let event = DecodeEvent::ChannelsDropped {
            output: OutputId::PRIMARY,
            dropped: vec![ChannelPosition::Lw, ChannelPosition::Rw],
        };
        if let DecodeEvent::ChannelsDropped { output, dropped } = event.clone() {
            assert_eq!(output, OutputId::PRIMARY);
            assert_eq!(dropped.len(), 2);
        } else {
            panic!("Expected ChannelsDropped variant");
        }
    }

    #[test]
    fn test_event_callback_helper() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let called = Arc::new(AtomicBool::new(false));
        let called_clone = called.clone();

        let callback = event_callback(move |_| {
            called_clone.store(true, Ordering::SeqCst);
        });

        callback(DecodeEvent::SecondaryEos);
        assert!(called.load(Ordering::SeqCst));
    }
}
