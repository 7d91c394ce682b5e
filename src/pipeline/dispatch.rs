//! Callback entry points invoked by the backend on its own threads.
//!
//! Handlers only mutate shared state and signal; they never wait on the
//! feeding thread. The muxer has its own lock, never held together with
//! the pipeline lock.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{ModuleCallback, ModuleEvent, SessionCallback, SessionEvent};
use crate::config::OutputId;
use crate::error::{FormatError, MuxError};
use crate::event::{DecodeEvent, EventCallback};
use crate::format::{format_channel_map, OutputFormat};
use crate::mux::{BeginOutcome, Muxer, WriteOutcome};
use crate::pipeline::state::{Counters, PipelineState};

/// Routes backend events to the pipeline state and the muxer.
pub(crate) struct EventDispatcher {
    state: Arc<PipelineState>,
    muxer: Mutex<Muxer>,
    events: Option<EventCallback>,
}

impl EventDispatcher {
    pub fn new(state: Arc<PipelineState>, muxer: Muxer, events: Option<EventCallback>) -> Self {
        Self {
            state,
            muxer: Mutex::new(muxer),
            events,
        }
    }

    /// Session-level callback for the backend.
    pub fn session_callback(self: &Arc<Self>) -> SessionCallback {
        let dispatcher = Arc::clone(self);
        Arc::new(move |event| dispatcher.handle_session_event(event))
    }

    /// Module-level callback for the backend.
    pub fn module_callback(self: &Arc<Self>) -> ModuleCallback {
        let dispatcher = Arc::clone(self);
        Arc::new(move |event| dispatcher.handle_module_event(event))
    }

    pub fn handle_session_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::Data { output, buffer } => {
                self.on_data(output, &buffer.data, buffer.timestamp);
            }
            SessionEvent::OutputConfigChange { output, format } => {
                self.on_output_config(output, &format);
            }
            SessionEvent::Eos => {
                if self.state.mark_end_of_stream() {
                    tracing::info!("end of stream reached");
                } else {
                    tracing::warn!("ignoring repeated end of stream");
                    self.emit(DecodeEvent::DuplicateEos);
                }
            }
            SessionEvent::EosSecondary => {
                tracing::info!("secondary input reached end of stream");
                self.emit(DecodeEvent::SecondaryEos);
            }
            SessionEvent::EosAssoc => {
                tracing::info!("associated input reached end of stream");
                self.emit(DecodeEvent::AssocEos);
            }
            SessionEvent::Error { message } => {
                tracing::error!("backend error: {message}");
                self.emit(DecodeEvent::BackendError { message });
            }
            SessionEvent::Success => tracing::info!("backend command succeeded"),
            SessionEvent::Metadata => tracing::info!("backend metadata updated"),
        }
    }

    pub fn handle_module_event(&self, event: ModuleEvent) {
        match event {
            ModuleEvent::SendInputBuffer { bytes_available } => {
                tracing::trace!(?bytes_available, "decoder ready for input");
                self.state.release_buffer();
            }
            ModuleEvent::InputConfigChange(input) => {
                tracing::info!(
                    sample_rate = input.sample_rate,
                    bits = input.bit_width,
                    channels = input.channels,
                    "input config changed"
                );
                self.state.set_input_sample_rate(input.sample_rate);
                self.emit(DecodeEvent::InputConfigChanged(input));
            }
        }
    }

    /// Stops every sink. Called once, after the backend is closed.
    pub fn finish(&self) -> Result<(), MuxError> {
        self.muxer.lock().finish().map_err(MuxError::from)
    }

    fn on_output_config(&self, output: OutputId, format: &OutputFormat) {
        tracing::info!(
            %output,
            sample_rate = format.sample_rate,
            bits = format.bit_width,
            interleaved = format.interleaved,
            channels = %format_channel_map(&format.channel_map),
            "output config changed"
        );

        let input_sample_rate = self.state.input_sample_rate();
        let result = {
            let mut muxer = self.muxer.lock();
            muxer
                .begin(output, format, input_sample_rate)
                .map(|outcome| (outcome, muxer.output(output).map(|o| o.format().clone())))
        };

        match result {
            Ok((BeginOutcome::HeaderWritten { dropped, .. }, resolved)) => {
                self.emit(DecodeEvent::OutputConfigured {
                    output,
                    format: resolved.unwrap_or_else(|| format.clone()),
                });
                if !dropped.is_empty() {
                    tracing::warn!(
                        %output,
                        dropped = %format_channel_map(&dropped),
                        "channels without a WAV position are dropped"
                    );
                    Counters::add(&self.state.counters.dropped_channels, dropped.len() as u64);
                    self.emit(DecodeEvent::ChannelsDropped { output, dropped });
                }
            }
            Ok((BeginOutcome::Forwarded, _)) => {
                self.emit(DecodeEvent::OutputConfigured {
                    output,
                    format: format.with_rate_fallback(input_sample_rate.unwrap_or(0)),
                });
            }
            Ok((BeginOutcome::AlreadyStarted, _)) => {
                tracing::debug!(%output, "header already written");
            }
            Ok((BeginOutcome::Ignored, _)) => {
                tracing::debug!(%output, "output not routed");
            }
            Err(e) => self.state.fail(e.into()),
        }
    }

    fn on_data(&self, output: OutputId, data: &[u8], timestamp: Option<i64>) {
        if self.state.has_failed() {
            return;
        }

        let result = self.muxer.lock().write(output, data, timestamp);
        let counters = &self.state.counters;
        match result {
            Ok(WriteOutcome::Muxed { bytes }) => {
                tracing::debug!(%output, bytes, ?timestamp, "muxed decoded block");
                Counters::add(&counters.blocks_muxed, 1);
                Counters::add(&counters.bytes_muxed, bytes as u64);
            }
            Ok(WriteOutcome::Forwarded) => {
                tracing::debug!(%output, bytes = data.len(), "forwarded decoded block");
                Counters::add(&counters.blocks_forwarded, 1);
            }
            Ok(WriteOutcome::Ignored) => {
                tracing::trace!(%output, bytes = data.len(), "ignored decoded block");
            }
            Err(MuxError::Format(FormatError::NotStarted { .. })) => {
                tracing::warn!(%output, bytes = data.len(), "data before output config, discarded");
                Counters::add(&counters.blocks_discarded, 1);
                self.emit(DecodeEvent::ProtocolWarning {
                    message: format!("data for output {output} before its output config"),
                });
                self.emit(DecodeEvent::BufferDiscarded {
                    output,
                    bytes: data.len(),
                });
            }
            Err(e) => self.state.fail(e.into()),
        }
    }

    fn emit(&self, event: DecodeEvent) {
        if let Some(ref callback) = self.events {
            callback(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DecodedBuffer;
    use crate::error::DecodeError;
    use crate::format::{ChannelPosition::*, InputFormat};
    use crate::mux::WAV_HEADER_SIZE;
    use crate::pipeline::state::WaitOutcome;
    use crate::sink::MemorySink;
    use crate::event_callback;
    use std::time::Duration;

    struct Fixture {
        state: Arc<PipelineState>,
        dispatcher: Arc<EventDispatcher>,
        sink: MemorySink,
        events: Arc<Mutex<Vec<DecodeEvent>>>,
    }

    fn fixture() -> Fixture {
        let state = Arc::new(PipelineState::new());
        let sink = MemorySink::new();
        let mut muxer = Muxer::new();
        muxer.mux_to(OutputId::PRIMARY, Box::new(sink.clone()));

        let events = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&events);
        let callback = event_callback(move |event| seen.lock().push(event));

        let dispatcher = Arc::new(EventDispatcher::new(
            Arc::clone(&state),
            muxer,
            Some(callback),
        ));
        Fixture {
            state,
            dispatcher,
            sink,
            events,
        }
    }

    fn data(bytes: Vec<u8>) -> SessionEvent {
        SessionEvent::Data {
            output: OutputId::PRIMARY,
            buffer: DecodedBuffer {
                data: bytes,
                timestamp: None,
            },
        }
    }

    #[test]
    fn test_send_input_buffer_releases_feeder() {
        let f = fixture();
        f.state.arm_buffer_full();
        f.dispatcher.module_callback()(ModuleEvent::SendInputBuffer {
            bytes_available: Some(1024),
        });
        assert_eq!(f.state.wait_for_buffer(), WaitOutcome::Ready);
    }

    #[test]
    fn test_input_config_feeds_rate_fallback() {
        let f = fixture();
        f.dispatcher.handle_module_event(ModuleEvent::InputConfigChange(InputFormat {
            sample_rate: 44100,
            bit_width: 16,
            channels: 2,
        }));
        f.dispatcher
            .handle_session_event(SessionEvent::OutputConfigChange {
                output: OutputId::PRIMARY,
                format: OutputFormat::interleaved(0, 16, vec![L, R]),
            });

        let header = f.sink.contents();
        assert_eq!(header.len(), WAV_HEADER_SIZE);
        assert_eq!(
            u32::from_le_bytes([header[24], header[25], header[26], header[27]]),
            44100
        );
        let events = f.events.lock();
        assert!(events.iter().any(|e| matches!(
            e,
            DecodeEvent::OutputConfigured { format, .. } if format.sample_rate == 44100
        )));
    }

    #[test]
    fn test_data_before_config_is_discarded() {
        let f = fixture();
        f.dispatcher.handle_session_event(data(vec![0; 4]));

        assert!(f.sink.is_empty());
        assert!(!f.state.has_failed());
        assert_eq!(f.state.stats(None).blocks_discarded, 1);
        assert!(f
            .events
            .lock()
            .contains(&DecodeEvent::BufferDiscarded {
                output: OutputId::PRIMARY,
                bytes: 4
            }));
    }

    #[test]
    fn test_partial_frame_fails_session() {
        let f = fixture();
        f.dispatcher
            .handle_session_event(SessionEvent::OutputConfigChange {
                output: OutputId::PRIMARY,
                format: OutputFormat::interleaved(48000, 16, vec![L, R]),
            });
        f.dispatcher.handle_session_event(data(vec![0; 6]));

        assert!(f.state.has_failed());
        assert!(matches!(
            f.state.take_failure(),
            Some(DecodeError::Mux(MuxError::Format(FormatError::PartialFrame { .. })))
        ));
    }

    #[test]
    fn test_duplicate_eos_is_reported_not_counted() {
        let f = fixture();
        f.dispatcher.handle_session_event(SessionEvent::Eos);
        f.dispatcher.handle_session_event(SessionEvent::Eos);

        assert_eq!(f.state.wait_for_end_of_stream(None), WaitOutcome::Ready);
        let events = f.events.lock();
        assert_eq!(
            events.iter().filter(|e| **e == DecodeEvent::DuplicateEos).count(),
            1
        );
    }

    #[test]
    fn test_backend_error_is_not_fatal() {
        let f = fixture();
        f.dispatcher.handle_session_event(SessionEvent::Error {
            message: "sync lost".to_string(),
        });
        f.dispatcher.handle_session_event(SessionEvent::Metadata);
        f.dispatcher.handle_session_event(SessionEvent::Success);
        f.dispatcher.handle_session_event(SessionEvent::EosSecondary);

        assert!(!f.state.has_failed());
        assert_eq!(
            f.state.wait_for_end_of_stream(Some(Duration::ZERO)),
            WaitOutcome::TimedOut
        );
        let events = f.events.lock();
        assert!(events.contains(&DecodeEvent::BackendError {
            message: "sync lost".to_string()
        }));
        assert!(events.contains(&DecodeEvent::SecondaryEos));
    }

    #[test]
    fn test_dropped_channels_reported() {
        let f = fixture();
        f.dispatcher
            .handle_session_event(SessionEvent::OutputConfigChange {
                output: OutputId::PRIMARY,
                format: OutputFormat::interleaved(48000, 16, vec![L, R, Lw, Rw]),
            });

        assert_eq!(f.state.stats(None).dropped_channels, 2);
        assert!(f.events.lock().contains(&DecodeEvent::ChannelsDropped {
            output: OutputId::PRIMARY,
            dropped: vec![Lw, Rw],
        }));
    }

    #[test]
    fn test_muxed_counters() {
        let f = fixture();
        f.dispatcher
            .handle_session_event(SessionEvent::OutputConfigChange {
                output: OutputId::PRIMARY,
                format: OutputFormat::interleaved(48000, 16, vec![L, R]),
            });
        f.dispatcher.handle_session_event(data(vec![0; 8]));
        f.dispatcher.handle_session_event(data(vec![0; 4]));

        let stats = f.state.stats(None);
        assert_eq!(stats.blocks_muxed, 2);
        assert_eq!(stats.bytes_muxed, 12);
        assert_eq!(f.sink.len(), WAV_HEADER_SIZE + 12);
    }
}
