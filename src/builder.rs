//! Builder pattern for `StreamDecode`.

use std::time::Duration;

use crate::config::{CompressionFormat, DecodeConfig, OutputConfig, OutputId, SessionKind};
use crate::error::{ConfigError, DecodeError};
use crate::event::{event_callback, DecodeEvent, EventCallback};
use crate::mux::Muxer;
use crate::session::Session;
use crate::sink::{ChannelSink, Sink};

/// Destination of one logical output.
enum OutputRoute {
    Mux(Box<dyn Sink>),
    Forward(ChannelSink),
}

/// Builder for configuring a decode session.
///
/// Use [`StreamDecode::builder()`] to create a new builder. Outputs without
/// a route are configured on the backend but their data is ignored.
///
/// # Example
///
/// ```
/// use stream_decode::{CompressionFormat, FileSink, OutputId, StreamDecode};
///
/// let session = StreamDecode::builder()
///     .format(CompressionFormat::Ac3)
///     .channel_limits(&[8, 2])
///     .mux_to(OutputId::PRIMARY, FileSink::new("primary.wav"))
///     .mux_to(OutputId::nth(1), FileSink::new("stereo.wav"))
///     .on_event(|e| tracing::warn!(?e, "decode event"))
///     .build()?;
/// # Ok::<(), stream_decode::DecodeError>(())
/// ```
///
/// [`StreamDecode::builder()`]: crate::StreamDecode::builder
#[must_use]
pub struct StreamDecodeBuilder {
    config: DecodeConfig,
    format: Option<CompressionFormat>,
    /// Outputs added one by one; replace the default output when non-empty.
    added_outputs: Vec<OutputConfig>,
    routes: Vec<(OutputId, OutputRoute)>,
    event_callback: Option<EventCallback>,
}

impl Default for StreamDecodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamDecodeBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: DecodeConfig::default(),
            format: None,
            added_outputs: Vec::new(),
            routes: Vec::new(),
            event_callback: None,
        }
    }

    /// Set the compressed input format.
    ///
    /// Default: whatever the demuxer reports.
    pub fn format(mut self, format: CompressionFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Set a complete session configuration.
    pub fn with_config(mut self, config: DecodeConfig) -> Self {
        self.config = config;
        self.added_outputs.clear();
        self
    }

    /// Set the backend session kind.
    ///
    /// Default: [`SessionKind::Broadcast`]
    pub fn session_kind(mut self, kind: SessionKind) -> Self {
        self.config.session_kind = kind;
        self
    }

    /// Add a logical output with a channel limit.
    ///
    /// The first call replaces the default 8-channel primary output.
    pub fn add_output(mut self, id: OutputId, max_channels: u8) -> Self {
        self.added_outputs.push(OutputConfig::new(id, max_channels));
        self
    }

    /// Configure one output per limit, numbered from [`OutputId::PRIMARY`].
    pub fn channel_limits(mut self, limits: &[u8]) -> Self {
        self.added_outputs = DecodeConfig::with_channel_limits(limits).outputs;
        self
    }

    /// Pass a key/value string to the backend session.
    pub fn kv_pairs(mut self, kv_pairs: impl Into<String>) -> Self {
        self.config.kv_pairs = Some(kv_pairs.into());
        self
    }

    /// Load this backend library instead of the format's default.
    pub fn library(mut self, library: impl Into<String>) -> Self {
        self.config.library = Some(library.into());
        self
    }

    /// Bound the wait for the backend's final end of stream.
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.config.drain_timeout = Some(timeout);
        self
    }

    /// Write output `id` as a WAV stream into `sink`.
    ///
    /// A later route for the same id replaces this one.
    pub fn mux_to<S: Sink + 'static>(mut self, id: OutputId, sink: S) -> Self {
        self.routes.push((id, OutputRoute::Mux(Box::new(sink))));
        self
    }

    /// Forward output `id` undecorated, block by block, into a channel.
    pub fn forward_to(mut self, id: OutputId, sink: ChannelSink) -> Self {
        self.routes.push((id, OutputRoute::Forward(sink)));
        self
    }

    /// Set a callback to receive runtime events.
    ///
    /// The callback runs on backend threads and must not block.
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(DecodeEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(event_callback(callback));
        self
    }

    /// Returns the configuration `build()` would use.
    pub fn config(&self) -> DecodeConfig {
        let mut config = self.config.clone();
        if !self.added_outputs.is_empty() {
            config.outputs = self.added_outputs.clone();
        }
        config
    }

    /// Validates the configuration and every route.
    fn validate(&self, config: &DecodeConfig) -> Result<(), ConfigError> {
        config.validate()?;
        for (id, _) in &self.routes {
            if !config.has_output(*id) {
                return Err(ConfigError::UnknownRouteOutput { output: *id });
            }
        }
        Ok(())
    }

    /// Validates everything and returns a session ready to run.
    ///
    /// Nothing is loaded or opened here.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Config`] if:
    /// - No outputs are configured, or more than three
    /// - An output allows zero or more than eight channels
    /// - Two outputs share an id
    /// - A route names an output that is not configured
    pub fn build(self) -> Result<Session, DecodeError> {
        let config = self.config();
        self.validate(&config)?;

        let mut muxer = Muxer::new();
        for (id, route) in self.routes {
            match route {
                OutputRoute::Mux(sink) => {
                    tracing::debug!(output = %id, sink = sink.name(), "muxing output");
                    muxer.mux_to(id, sink);
                }
                OutputRoute::Forward(sink) => {
                    tracing::debug!(output = %id, sink = sink.name(), "forwarding output");
                    muxer.forward_to(id, sink);
                }
            }
        }

        Ok(Session::new(config, self.format, muxer, self.event_callback))
    }
}

/// Main entry point for stream-decode.
///
/// Use [`StreamDecode::builder()`] to start configuring a decode session.
pub struct StreamDecode;

impl StreamDecode {
    /// Creates a new builder for configuring a decode session.
    pub fn builder() -> StreamDecodeBuilder {
        StreamDecodeBuilder::new()
    }
}
