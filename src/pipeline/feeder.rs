//! The feeding loop: demuxer packets in, backpressure honoured, drain awaited.

use std::time::Duration;

use crate::backend::ProcessStatus;
use crate::error::DecodeError;
use crate::pipeline::{Counters, PipelineState, WaitOutcome};
use crate::session::Completion;
use crate::source::Demuxer;

/// Where compressed input goes. Implemented by the backend adapter.
pub(crate) trait InputPort {
    /// Offers `packet[offset..]`; see [`crate::backend::BackendAdapter::push`].
    fn push(
        &mut self,
        packet: &[u8],
        offset: usize,
        timestamp: Option<i64>,
    ) -> Result<ProcessStatus, DecodeError>;

    /// Sends the end-of-stream marker.
    fn signal_end_of_stream(&mut self) -> Result<(), DecodeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Reading,
    Feeding,
    Draining,
    Done,
}

/// Drives one session's input from a demuxer into an [`InputPort`].
pub(crate) struct Feeder<'a, P: InputPort + ?Sized> {
    port: &'a mut P,
    state: &'a PipelineState,
    drain_timeout: Option<Duration>,
    phase: Phase,
}

impl<'a, P: InputPort + ?Sized> Feeder<'a, P> {
    pub fn new(port: &'a mut P, state: &'a PipelineState, drain_timeout: Option<Duration>) -> Self {
        Self {
            port,
            state,
            drain_timeout,
            phase: Phase::Reading,
        }
    }

    /// Feeds every packet, then waits for the backend to confirm the drain.
    ///
    /// Returns [`Completion::Cancelled`] when cancellation interrupts the
    /// loop; the drain is skipped in that case.
    pub fn run(&mut self, demuxer: &mut dyn Demuxer) -> Result<Completion, DecodeError> {
        loop {
            if let Some(outcome) = self.interrupted()? {
                return Ok(outcome);
            }

            let Some(packet) = demuxer.next_packet()? else {
                break;
            };
            Counters::add(&self.state.counters.packets_fed, 1);
            let timestamp = packet.backend_timestamp();
            tracing::debug!(bytes = packet.data.len(), ?timestamp, "read packet");

            if let Some(outcome) = self.feed(packet.data, timestamp)? {
                return Ok(outcome);
            }
        }

        self.drain()
    }

    /// Pushes one packet until the backend has consumed all of it.
    fn feed(
        &mut self,
        data: &[u8],
        timestamp: Option<i64>,
    ) -> Result<Option<Completion>, DecodeError> {
        self.enter(Phase::Feeding);
        let mut offset = 0;

        while offset < data.len() {
            self.state.arm_buffer_full();
            match self.port.push(data, offset, timestamp)? {
                ProcessStatus::Consumed(consumed) => {
                    offset += consumed;
                    Counters::add(&self.state.counters.bytes_fed, consumed as u64);
                }
                ProcessStatus::NotReady => {
                    Counters::add(&self.state.counters.not_ready_waits, 1);
                    match self.state.wait_for_buffer() {
                        WaitOutcome::Ready => {}
                        WaitOutcome::Cancelled => return Ok(Some(self.cancelled())),
                        WaitOutcome::Failed | WaitOutcome::TimedOut => {
                            return Err(self.failure());
                        }
                    }
                }
            }
        }

        self.enter(Phase::Reading);
        Ok(None)
    }

    fn drain(&mut self) -> Result<Completion, DecodeError> {
        self.enter(Phase::Draining);
        self.port.signal_end_of_stream()?;

        match self.state.wait_for_end_of_stream(self.drain_timeout) {
            WaitOutcome::Ready => {
                self.enter(Phase::Done);
                tracing::info!("decoder drained");
                Ok(Completion::Drained)
            }
            WaitOutcome::Cancelled => Ok(self.cancelled()),
            WaitOutcome::Failed => Err(self.failure()),
            WaitOutcome::TimedOut => Err(DecodeError::DrainTimeout {
                waited: self.drain_timeout.unwrap_or_default(),
            }),
        }
    }

    /// Checks for a callback failure or a cancellation request.
    fn interrupted(&mut self) -> Result<Option<Completion>, DecodeError> {
        if let Some(error) = self.state.take_failure() {
            return Err(error);
        }
        if self.state.is_cancelled() {
            return Ok(Some(self.cancelled()));
        }
        Ok(None)
    }

    fn cancelled(&mut self) -> Completion {
        tracing::info!(phase = ?self.phase, "feeding cancelled");
        self.enter(Phase::Done);
        Completion::Cancelled
    }

    fn failure(&self) -> DecodeError {
        self.state.take_failure().unwrap_or_else(|| DecodeError::Internal {
            reason: "wait ended in failure with no failure recorded".to_string(),
        })
    }

    fn enter(&mut self, phase: Phase) {
        if self.phase != phase {
            tracing::trace!(from = ?self.phase, to = ?phase, "feeder phase");
            self.phase = phase;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;
    use crate::source::MockDemuxer;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::thread;

    enum Step {
        NotReady,
        Consume(Option<usize>),
        Fail,
    }

    /// Port that follows a script and records every offered slice.
    struct ScriptedPort<'s> {
        state: &'s PipelineState,
        script: VecDeque<Step>,
        offers: Vec<(usize, Vec<u8>)>,
        eos_signalled: bool,
        confirm_eos: bool,
    }

    impl<'s> ScriptedPort<'s> {
        fn new(state: &'s PipelineState, script: Vec<Step>) -> Self {
            Self {
                state,
                script: script.into(),
                offers: Vec::new(),
                eos_signalled: false,
                confirm_eos: true,
            }
        }
    }

    impl InputPort for ScriptedPort<'_> {
        fn push(
            &mut self,
            packet: &[u8],
            offset: usize,
            _timestamp: Option<i64>,
        ) -> Result<ProcessStatus, DecodeError> {
            let remaining = &packet[offset..];
            self.offers.push((offset, remaining.to_vec()));
            match self.script.pop_front() {
                Some(Step::NotReady) => {
                    // The backend asks for more input right away.
                    self.state.release_buffer();
                    Ok(ProcessStatus::NotReady)
                }
                Some(Step::Consume(Some(n))) => Ok(ProcessStatus::Consumed(n.min(remaining.len()))),
                Some(Step::Consume(None)) | None => Ok(ProcessStatus::Consumed(remaining.len())),
                Some(Step::Fail) => Err(ProtocolError::ZeroConsumption {
                    offset,
                    remaining: remaining.len(),
                }
                .into()),
            }
        }

        fn signal_end_of_stream(&mut self) -> Result<(), DecodeError> {
            self.eos_signalled = true;
            if self.confirm_eos {
                self.state.mark_end_of_stream();
            }
            Ok(())
        }
    }

    fn demuxer(bytes: &[u8], packet_size: usize) -> MockDemuxer {
        let mut mock = MockDemuxer::new(48000, 2).with_packet_size(packet_size);
        mock.add_bytes(bytes);
        mock
    }

    #[test]
    fn test_retries_identical_slice_after_not_ready() {
        let state = PipelineState::new();
        let mut port = ScriptedPort::new(
            &state,
            vec![Step::NotReady, Step::NotReady, Step::NotReady, Step::Consume(None)],
        );
        let mut mock = demuxer(&[1, 2, 3, 4, 5, 6, 7, 8], 8);

        let completion = Feeder::new(&mut port, &state, None).run(&mut mock).unwrap();
        assert_eq!(completion, Completion::Drained);

        assert_eq!(port.offers.len(), 4);
        for (offset, slice) in &port.offers {
            assert_eq!(*offset, 0);
            assert_eq!(slice, &vec![1, 2, 3, 4, 5, 6, 7, 8]);
        }
        let stats = state.stats(None);
        assert_eq!(stats.not_ready_waits, 3);
        assert_eq!(stats.bytes_fed, 8);
        assert_eq!(stats.packets_fed, 1);
    }

    #[test]
    fn test_partial_consumption_advances_offset() {
        let state = PipelineState::new();
        let mut port = ScriptedPort::new(
            &state,
            vec![Step::Consume(Some(3)), Step::NotReady, Step::Consume(Some(2))],
        );
        let mut mock = demuxer(&[0, 1, 2, 3, 4, 5, 6, 7], 8);

        Feeder::new(&mut port, &state, None).run(&mut mock).unwrap();

        let offsets: Vec<usize> = port.offers.iter().map(|(o, _)| *o).collect();
        assert_eq!(offsets, vec![0, 3, 3, 5]);
        assert_eq!(port.offers[3].1, vec![5, 6, 7]);
        assert_eq!(state.stats(None).bytes_fed, 8);
        assert!(port.eos_signalled);
    }

    #[test]
    fn test_empty_input_goes_straight_to_drain() {
        let state = PipelineState::new();
        let mut port = ScriptedPort::new(&state, Vec::new());
        let mut mock = demuxer(&[], 8);

        let completion = Feeder::new(&mut port, &state, None).run(&mut mock).unwrap();
        assert_eq!(completion, Completion::Drained);
        assert!(port.offers.is_empty());
        assert!(port.eos_signalled);
    }

    #[test]
    fn test_protocol_error_is_fatal() {
        let state = PipelineState::new();
        let mut port = ScriptedPort::new(&state, vec![Step::Fail]);
        let mut mock = demuxer(&[1, 2, 3, 4], 4);

        let err = Feeder::new(&mut port, &state, None).run(&mut mock).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Protocol(ProtocolError::ZeroConsumption { .. })
        ));
        assert!(!port.eos_signalled);
    }

    #[test]
    fn test_demux_error_propagates() {
        let state = PipelineState::new();
        let mut port = ScriptedPort::new(&state, Vec::new());
        let mut mock = demuxer(&[0; 16], 4).failing_after(2);

        let err = Feeder::new(&mut port, &state, None).run(&mut mock).unwrap_err();
        assert!(matches!(err, DecodeError::Demux { .. }));
        assert_eq!(port.offers.len(), 2);
    }

    #[test]
    fn test_cancel_before_start_skips_drain() {
        let state = PipelineState::new();
        state.cancel();
        let mut port = ScriptedPort::new(&state, Vec::new());
        let mut mock = demuxer(&[0; 8], 4);

        let completion = Feeder::new(&mut port, &state, None).run(&mut mock).unwrap();
        assert_eq!(completion, Completion::Cancelled);
        assert!(port.offers.is_empty());
        assert!(!port.eos_signalled);
    }

    #[test]
    fn test_callback_failure_stops_feeding() {
        let state = PipelineState::new();
        state.fail(DecodeError::demux("sink broke"));
        let mut port = ScriptedPort::new(&state, Vec::new());
        let mut mock = demuxer(&[0; 8], 4);

        let err = Feeder::new(&mut port, &state, None).run(&mut mock).unwrap_err();
        assert!(err.to_string().contains("sink broke"));
    }

    #[test]
    fn test_failure_without_record_is_internal() {
        let state = PipelineState::new();
        let mut port = ScriptedPort::new(&state, Vec::new());
        let feeder = Feeder::new(&mut port, &state, None);

        assert!(matches!(feeder.failure(), DecodeError::Internal { .. }));

        state.fail(DecodeError::demux("sink broke"));
        assert!(matches!(feeder.failure(), DecodeError::Demux { .. }));
    }

    #[test]
    fn test_drain_timeout() {
        let state = PipelineState::new();
        let mut port = ScriptedPort::new(&state, Vec::new());
        port.confirm_eos = false;
        let mut mock = demuxer(&[0; 4], 4);

        let timeout = Duration::from_millis(20);
        let err = Feeder::new(&mut port, &state, Some(timeout))
            .run(&mut mock)
            .unwrap_err();
        assert!(matches!(err, DecodeError::DrainTimeout { waited } if waited == timeout));
    }

    #[test]
    fn test_cancel_unblocks_drain_wait() {
        let state = Arc::new(PipelineState::new());
        let canceller = {
            let state = Arc::clone(&state);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                state.cancel();
            })
        };

        let mut port = ScriptedPort::new(&state, Vec::new());
        port.confirm_eos = false;
        let mut mock = demuxer(&[0; 4], 4);

        let completion = Feeder::new(&mut port, &state, None).run(&mut mock).unwrap();
        canceller.join().unwrap();
        assert_eq!(completion, Completion::Cancelled);
        assert!(port.eos_signalled);
    }

    #[test]
    fn test_timestamps_are_rescaled() {
        struct Recording(Vec<Option<i64>>);
        impl InputPort for Recording {
            fn push(
                &mut self,
                packet: &[u8],
                offset: usize,
                timestamp: Option<i64>,
            ) -> Result<ProcessStatus, DecodeError> {
                self.0.push(timestamp);
                Ok(ProcessStatus::Consumed(packet.len() - offset))
            }
            fn signal_end_of_stream(&mut self) -> Result<(), DecodeError> {
                Ok(())
            }
        }

        let state = PipelineState::new();
        state.mark_end_of_stream();
        let mut port = Recording(Vec::new());
        // 48 kHz stereo, 16-bit: 4 bytes per frame, 960 frames = 20 ms
        let mut mock = demuxer(&[0; 3840 * 2], 3840);

        Feeder::new(&mut port, &state, None).run(&mut mock).unwrap();
        assert_eq!(port.0, vec![Some(0), Some(20_000)]);
    }
}
