//! Shared state between the feeding thread and backend callbacks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::DecodeError;
use crate::session::{Completion, SessionStats};

/// Outcome of a wait on the pipeline condition variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    /// The awaited condition holds.
    Ready,
    /// The session was cancelled.
    Cancelled,
    /// A callback recorded a fatal failure.
    Failed,
    /// The deadline passed first.
    TimedOut,
}

#[derive(Default)]
struct Flags {
    /// Set by the feeder before every push, cleared by the dispatcher.
    buffer_full: bool,
    /// Set exactly once, on the first primary EOS.
    end_of_stream: bool,
    cancelled: bool,
    /// Last rate reported by an input config change.
    input_sample_rate: Option<u32>,
    /// First fatal failure raised on a callback thread.
    failure: Option<DecodeError>,
}

/// Per-session counters.
#[derive(Default)]
pub(crate) struct Counters {
    pub packets_fed: AtomicU64,
    pub bytes_fed: AtomicU64,
    pub not_ready_waits: AtomicU64,
    pub blocks_muxed: AtomicU64,
    pub bytes_muxed: AtomicU64,
    pub blocks_forwarded: AtomicU64,
    pub blocks_discarded: AtomicU64,
    pub dropped_channels: AtomicU64,
}

impl Counters {
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

/// Flags guarded by one mutex, one condition variable for every wait.
///
/// Every mutation happens under the lock and is followed by `notify_all`;
/// every wait re-checks its predicate in a loop.
#[derive(Default)]
pub(crate) struct PipelineState {
    flags: Mutex<Flags>,
    changed: Condvar,
    pub counters: Counters,
}

impl PipelineState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the backend as full ahead of a push.
    pub fn arm_buffer_full(&self) {
        self.flags.lock().buffer_full = true;
    }

    /// Backend asked for more input.
    pub fn release_buffer(&self) {
        let mut flags = self.flags.lock();
        flags.buffer_full = false;
        self.changed.notify_all();
    }

    /// Blocks until the buffer-full flag is cleared.
    pub fn wait_for_buffer(&self) -> WaitOutcome {
        let mut flags = self.flags.lock();
        loop {
            if let Some(outcome) = Self::interrupted(&flags) {
                return outcome;
            }
            if !flags.buffer_full {
                return WaitOutcome::Ready;
            }
            self.changed.wait(&mut flags);
        }
    }

    /// Records the end of stream. Returns `true` only for the first call.
    pub fn mark_end_of_stream(&self) -> bool {
        let mut flags = self.flags.lock();
        if flags.end_of_stream {
            return false;
        }
        flags.end_of_stream = true;
        self.changed.notify_all();
        true
    }

    /// Blocks until the end of stream is recorded, optionally bounded.
    pub fn wait_for_end_of_stream(&self, timeout: Option<Duration>) -> WaitOutcome {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut flags = self.flags.lock();
        loop {
            // A confirmed drain wins over a late cancellation.
            if flags.end_of_stream {
                return WaitOutcome::Ready;
            }
            if let Some(outcome) = Self::interrupted(&flags) {
                return outcome;
            }
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut flags, deadline).timed_out()
                        && !flags.end_of_stream
                    {
                        return Self::interrupted(&flags).unwrap_or(WaitOutcome::TimedOut);
                    }
                }
                None => self.changed.wait(&mut flags),
            }
        }
    }

    /// Requests cancellation and wakes every waiter.
    pub fn cancel(&self) {
        let mut flags = self.flags.lock();
        flags.cancelled = true;
        self.changed.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flags.lock().cancelled
    }

    /// Records a fatal failure. Only the first one is kept.
    pub fn fail(&self, error: DecodeError) {
        let mut flags = self.flags.lock();
        if flags.failure.is_none() {
            tracing::error!("session failed: {error}");
            flags.failure = Some(error);
        }
        self.changed.notify_all();
    }

    pub fn has_failed(&self) -> bool {
        self.flags.lock().failure.is_some()
    }

    pub fn take_failure(&self) -> Option<DecodeError> {
        self.flags.lock().failure.take()
    }

    pub fn set_input_sample_rate(&self, rate: u32) {
        self.flags.lock().input_sample_rate = Some(rate);
    }

    pub fn input_sample_rate(&self) -> Option<u32> {
        self.flags.lock().input_sample_rate
    }

    pub fn stats(&self, completion: Option<Completion>) -> SessionStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        SessionStats {
            packets_fed: load(&self.counters.packets_fed),
            bytes_fed: load(&self.counters.bytes_fed),
            not_ready_waits: load(&self.counters.not_ready_waits),
            blocks_muxed: load(&self.counters.blocks_muxed),
            bytes_muxed: load(&self.counters.bytes_muxed),
            blocks_forwarded: load(&self.counters.blocks_forwarded),
            blocks_discarded: load(&self.counters.blocks_discarded),
            dropped_channels: load(&self.counters.dropped_channels),
            completion,
        }
    }

    fn interrupted(flags: &Flags) -> Option<WaitOutcome> {
        if flags.failure.is_some() {
            Some(WaitOutcome::Failed)
        } else if flags.cancelled {
            Some(WaitOutcome::Cancelled)
        } else {
            None
        }
    }
}
