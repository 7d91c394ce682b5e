//! Decode session management.

use std::sync::Arc;

use crate::backend::{BackendAdapter, BackendLoader};
use crate::config::{CompressionFormat, DecodeConfig};
use crate::error::DecodeError;
use crate::event::EventCallback;
use crate::mux::Muxer;
use crate::pipeline::{EventDispatcher, Feeder, PipelineState};
use crate::source::Demuxer;

/// How a session that returned `Ok` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The input was exhausted and the backend confirmed the drain.
    Drained,
    /// A [`CancelHandle`] stopped the session; the drain was skipped.
    Cancelled,
}

/// Statistics about a decode session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Packets read from the demuxer.
    pub packets_fed: u64,
    /// Compressed bytes the backend consumed.
    pub bytes_fed: u64,
    /// Times the feeder waited for the backend to accept more input.
    pub not_ready_waits: u64,
    /// Decoded blocks written into containers.
    pub blocks_muxed: u64,
    /// Container payload bytes written, headers excluded.
    pub bytes_muxed: u64,
    /// Decoded blocks forwarded raw to channels.
    pub blocks_forwarded: u64,
    /// Blocks dropped because their output had no header yet.
    pub blocks_discarded: u64,
    /// Channels left out of containers because WAV cannot place them.
    pub dropped_channels: u64,
    /// How the session ended; `None` if it never got to feed.
    pub completion: Option<Completion>,
}

/// Requests cancellation of a running [`Session`] from any thread.
///
/// Cancellation wakes the feeder out of any wait and skips the final
/// drain; backend resources are still released before `run` returns.
#[derive(Clone)]
pub struct CancelHandle {
    state: Arc<PipelineState>,
}

impl CancelHandle {
    /// Asks the session to stop.
    pub fn cancel(&self) {
        tracing::debug!("cancellation requested");
        self.state.cancel();
    }

    /// Returns `true` once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// A configured decode session, ready to run.
///
/// The `Session` is returned by [`StreamDecodeBuilder::build()`]. Running it
/// consumes it: one session decodes one input.
///
/// # Lifecycle
///
/// 1. Created by [`StreamDecodeBuilder::build()`]
/// 2. [`run()`](Session::run) loads the backend, feeds every packet and
///    waits for the drain
/// 3. Backend handles are released and sinks stopped, on success and on
///    every error path
///
/// # Example
///
/// ```
/// use stream_decode::backend::{LoopbackLoader, LoopbackOptions};
/// use stream_decode::source::MockDemuxer;
/// use stream_decode::{Completion, MemorySink, OutputId, StreamDecode};
///
/// let wav = MemorySink::new();
/// let session = StreamDecode::builder()
///     .mux_to(OutputId::PRIMARY, wav.clone())
///     .build()?;
///
/// let mut demuxer = MockDemuxer::new(48000, 2);
/// demuxer.generate_sine(440.0, 50);
///
/// let loader = LoopbackLoader::new(LoopbackOptions::default());
/// let stats = session.run(&loader, &mut demuxer)?;
/// assert_eq!(stats.completion, Some(Completion::Drained));
/// assert!(wav.len() > 68);
/// # Ok::<(), stream_decode::DecodeError>(())
/// ```
///
/// [`StreamDecodeBuilder::build()`]: crate::StreamDecodeBuilder::build
pub struct Session {
    config: DecodeConfig,
    format: Option<CompressionFormat>,
    muxer: Muxer,
    events: Option<EventCallback>,
    state: Arc<PipelineState>,
}

impl Session {
    pub(crate) fn new(
        config: DecodeConfig,
        format: Option<CompressionFormat>,
        muxer: Muxer,
        events: Option<EventCallback>,
    ) -> Self {
        Self {
            config,
            format,
            muxer,
            events,
            state: Arc::new(PipelineState::new()),
        }
    }

    /// Returns a handle that can cancel this session while it runs.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// Returns the session configuration.
    pub fn config(&self) -> &DecodeConfig {
        &self.config
    }

    /// Decodes everything `demuxer` yields, blocking the calling thread.
    ///
    /// The compressed format is the builder's, or else the demuxer's.
    ///
    /// # Errors
    ///
    /// Any [`DecodeError`]. The backend is closed and sinks are stopped
    /// before the error is returned.
    pub fn run(
        self,
        loader: &dyn BackendLoader,
        demuxer: &mut dyn Demuxer,
    ) -> Result<SessionStats, DecodeError> {
        let format = self.format.unwrap_or_else(|| demuxer.format());
        tracing::info!(
            %format,
            library = self.config.library_for(format),
            outputs = self.config.outputs.len(),
            "starting decode session"
        );

        let dispatcher = Arc::new(EventDispatcher::new(
            Arc::clone(&self.state),
            self.muxer,
            self.events,
        ));

        let mut adapter = match BackendAdapter::open(
            loader,
            format,
            &self.config,
            dispatcher.session_callback(),
            dispatcher.module_callback(),
        ) {
            Ok(adapter) => adapter,
            Err(e) => {
                if let Err(finish_err) = dispatcher.finish() {
                    tracing::warn!("stopping sinks failed: {finish_err}");
                }
                return Err(e);
            }
        };

        let fed = Feeder::new(&mut adapter, &self.state, self.config.drain_timeout).run(demuxer);

        // Joins backend threads, so no callback runs past this point.
        adapter.close();
        let finished = dispatcher.finish();

        let completion = match fed {
            Ok(completion) => completion,
            Err(e) => {
                if let Err(finish_err) = finished {
                    tracing::warn!("stopping sinks failed: {finish_err}");
                }
                return Err(e);
            }
        };
        if let Some(failure) = self.state.take_failure() {
            return Err(failure);
        }
        finished?;

        let stats = self.state.stats(Some(completion));
        tracing::info!(
            ?completion,
            packets = stats.packets_fed,
            bytes_in = stats.bytes_fed,
            bytes_out = stats.bytes_muxed,
            "decode session finished"
        );
        Ok(stats)
    }

    /// Runs the session on tokio's blocking pool.
    ///
    /// # Errors
    ///
    /// As [`run()`](Session::run), plus [`DecodeError::TaskFailed`] if the
    /// blocking task panicked.
    pub async fn run_async(
        self,
        loader: Arc<dyn BackendLoader>,
        mut demuxer: Box<dyn Demuxer + Send>,
    ) -> Result<SessionStats, DecodeError> {
        tokio::task::spawn_blocking(move || self.run(loader.as_ref(), &mut *demuxer))
            .await
            .map_err(|e| DecodeError::TaskFailed {
                reason: e.to_string(),
            })?
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{LoopbackLoader, LoopbackOptions};
    use crate::config::OutputId;
    use crate::error::BackendStage;
    use crate::sink::MemorySink;
    use crate::source::MockDemuxer;

    fn session_with(sink: &MemorySink) -> Session {
        let mut muxer = Muxer::new();
        muxer.mux_to(OutputId::PRIMARY, Box::new(sink.clone()));
        Session::new(DecodeConfig::default(), None, muxer, None)
    }

    #[test]
    fn test_session_stats_default() {
        let stats = SessionStats::default();
        assert_eq!(stats.packets_fed, 0);
        assert_eq!(stats.bytes_muxed, 0);
        assert_eq!(stats.completion, None);
    }

    #[test]
    fn test_cancel_handle_shares_state() {
        let sink = MemorySink::new();
        let session = session_with(&sink);
        let handle = session.cancel_handle();
        let other = handle.clone();

        assert!(!handle.is_cancelled());
        other.cancel();
        assert!(handle.is_cancelled());
    }

    #[test]
    fn test_run_drains_and_stops_sinks() {
        let sink = MemorySink::new();
        let session = session_with(&sink);
        let mut demuxer = MockDemuxer::new(48000, 2).with_packet_size(1000);
        demuxer.generate_sine(440.0, 20);
        let input = demuxer.bytes().to_vec();

        let loader = LoopbackLoader::new(LoopbackOptions::default());
        let stats = session.run(&loader, &mut demuxer).unwrap();

        assert_eq!(stats.completion, Some(Completion::Drained));
        assert_eq!(stats.bytes_fed, input.len() as u64);
        assert_eq!(stats.bytes_muxed, input.len() as u64);
        assert_eq!(&sink.contents()[68..], &input[..]);
        assert!(sink.is_stopped());
        assert_eq!(loader.live_handles(), 0);
    }

    #[test]
    fn test_cancelled_before_run() {
        let sink = MemorySink::new();
        let session = session_with(&sink);
        session.cancel_handle().cancel();

        let mut demuxer = MockDemuxer::new(48000, 2);
        demuxer.generate_silence(10);
        let loader = LoopbackLoader::new(LoopbackOptions::default());

        let stats = session.run(&loader, &mut demuxer).unwrap();
        assert_eq!(stats.completion, Some(Completion::Cancelled));
        assert_eq!(stats.packets_fed, 0);
        assert_eq!(loader.live_handles(), 0);
    }

    #[test]
    fn test_open_failure_stops_sinks() {
        let sink = MemorySink::new();
        let session = session_with(&sink);
        let mut demuxer = MockDemuxer::new(48000, 2);
        let loader = LoopbackLoader::new(LoopbackOptions {
            fail_at: Some(BackendStage::StartModule),
            ..LoopbackOptions::default()
        });

        let err = session.run(&loader, &mut demuxer).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Backend {
                stage: BackendStage::StartModule,
                ..
            }
        ));
        assert!(sink.is_stopped());
        assert!(sink.is_empty());
        assert_eq!(loader.live_handles(), 0);
    }

    #[tokio::test]
    async fn test_run_async() {
        let sink = MemorySink::new();
        let session = session_with(&sink);
        let mut demuxer = MockDemuxer::new(48000, 2);
        demuxer.generate_silence(10);

        let loader: Arc<dyn BackendLoader> =
            Arc::new(LoopbackLoader::new(LoopbackOptions::default()));
        let stats = session.run_async(loader, Box::new(demuxer)).await.unwrap();

        assert_eq!(stats.completion, Some(Completion::Drained));
        assert!(sink.len() > 68);
    }
}
